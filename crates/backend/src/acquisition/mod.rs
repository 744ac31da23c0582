//! Acquisition of verified contract metadata, sources and deployed bytecode.

use std::collections::BTreeMap;

use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AcquisitionError;

mod etherscan;

pub use etherscan::EtherscanProvider;

/// Everything needed to recompile a verified contract and compare it with the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractSource {
    pub address: Address,
    pub contract_name: String,
    /// Compiler version as reported by the explorer, e.g. `v0.8.19+commit.7dd6d404`.
    pub compiler_version: String,
    pub optimization: bool,
    pub runs: u64,
    /// `None` means the compiler default.
    pub evm_version: Option<String>,
    pub via_ir: Option<bool>,
    #[serde(default)]
    pub remappings: Vec<String>,
    /// The `metadata` settings of the original compilation, which affect the appended CBOR tail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_settings: Option<Value>,
    /// Relative source path to content.
    pub sources: BTreeMap<String, String>,
    #[serde(default)]
    pub constructor_arguments: Bytes,
    pub deployed_bytecode: Bytes,
}

/// A source of verified contracts.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    async fn fetch(&self, address: Address) -> Result<ContractSource, AcquisitionError>;
}
