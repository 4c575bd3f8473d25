// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Strava activity records as fetched from the list endpoint.
//!
//! The record schema belongs to Strava; records are carried through to
//! BigQuery untouched and BigQuery autodetects the columns.

use serde::{Deserialize, Serialize};

/// One activity record with an opaque, API-defined shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Activity(pub serde_json::Value);

impl Activity {
    /// Strava activity ID, if the record carries one.
    pub fn id(&self) -> Option<u64> {
        self.0.get("id").and_then(serde_json::Value::as_u64)
    }
}

impl From<serde_json::Value> for Activity {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Encode activities as newline-delimited JSON, one record per line.
///
/// Compact serialization never emits a raw newline inside a record, so the
/// output always holds exactly `activities.len()` lines.
pub fn to_ndjson(activities: &[Activity]) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::with_capacity(activities.len() * 512);
    for activity in activities {
        serde_json::to_writer(&mut buf, activity)?;
        buf.push(b'\n');
    }
    Ok(buf)
}
