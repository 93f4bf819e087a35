//! hostkeeper library crate
//!
//! Exposes the renewal-workflow stages so the binary and the tests can
//! exercise them against either a live Chromium session or a scripted fake.

pub mod actuator;
pub mod auth;
pub mod classify;
pub mod config;
pub mod driver;
pub mod error;
pub mod guard;
pub mod markers;
pub mod notify;
pub mod power;
pub mod quota;
pub mod report;
pub mod run;
