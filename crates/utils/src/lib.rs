//! Utilities shared by sourcelens' crates: the on-disk cache and per-run output directories.

#[macro_use]
extern crate tracing;

pub mod cache;
pub mod workdir;
