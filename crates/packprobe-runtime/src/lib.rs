//! Container lifecycle management for verification cases.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod container;
pub mod logs;
pub mod readiness;
pub mod request;
