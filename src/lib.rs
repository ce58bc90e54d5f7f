// src/lib.rs
//! Authentication and authorization core
//!
//! - [`cache`]: key/value cache backed by Redis with an in-process fallback
//! - [`auth`]: credential flows, tokens, lockout and rate limiting
//! - [`api`]: axum router and middleware

pub mod api;
pub mod auth;
pub mod cache;
