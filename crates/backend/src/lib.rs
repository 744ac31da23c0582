//! # sourcelens-backend
//!
//! Decodes Solidity runtime source maps, correlates every pc of the runtime bytecode with its
//! source location, and verifies recompiled bytecode against what is deployed on chain.

#[macro_use]
extern crate tracing;

pub mod acquisition;
pub mod analysis;
pub mod artifact;
pub mod compiler;
pub mod config;
mod core;
pub mod error;
pub mod utils;

pub use crate::core::{
    Stage, VerificationPipeline, VerificationPipelineBuilder, VerificationReport,
    VerificationSummary,
};
