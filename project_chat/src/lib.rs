//! HTTP service exposing per-project communication logs.
//!
//! Authentication, the project access check and the conversation overview
//! live here; the log itself comes from the `comm_log` crate.

pub mod api;
pub mod auth;
pub mod config;
pub mod conversations;
pub mod projects;
pub mod typing;
