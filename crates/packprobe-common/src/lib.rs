//! # packprobe-common
//!
//! Shared types, the error taxonomy, configuration models, and the bounded
//! polling primitive used across the entire packprobe workspace.
//!
//! This crate is the leaf of the dependency graph: it depends on no other
//! internal crate and provides the foundational primitives that the build,
//! runtime, and verification crates build upon.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod poll;
pub mod process;
pub mod types;
