// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod activity;
pub mod credentials;

pub use activity::Activity;
pub use credentials::{CredentialKind, Secret, StravaCredentials};
