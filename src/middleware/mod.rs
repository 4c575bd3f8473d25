// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Middleware modules (invoker authentication, security headers).

pub mod invoker_auth;
pub mod security;

pub use invoker_auth::require_invoker_auth;
