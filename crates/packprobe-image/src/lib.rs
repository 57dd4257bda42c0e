//! # packprobe-image
//!
//! Everything on the build side of a verification case.
//!
//! Handles:
//! - **Fixtures**: isolated, self-deleting copies of named source trees.
//! - **Requests**: immutable build requests (buildpacks, env, labels, pull policy).
//! - **Engine**: the blocking `pack build` boundary and its failure reporting.
//! - **Descriptors**: applied buildpacks, layer metadata, and labels of a built image.
//! - **Cache**: names of the per-image cache volumes the engine leaves behind.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cache;
pub mod descriptor;
pub mod engine;
pub mod fixture;
pub mod request;
