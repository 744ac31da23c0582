use alloy_primitives::Address;
use alloy_provider::{Provider, ProviderBuilder, RootProvider};
use alloy_transport::BoxTransport;
use async_trait::async_trait;
use eyre::Result;
use foundry_block_explorers::{contract::Metadata, errors::EtherscanError, Client};
use sourcelens_utils::cache::Cache;

use super::{ContractSource, SourceProvider};
use crate::error::AcquisitionError;

/// Fetches verified sources from an Etherscan-compatible explorer and the deployed bytecode
/// from an RPC node.
pub struct EtherscanProvider {
    client: Client,
    provider: RootProvider<BoxTransport>,
    cache: Option<Cache<ContractSource>>,
}

impl EtherscanProvider {
    pub fn new(client: Client, rpc_url: &str, cache: Option<Cache<ContractSource>>) -> Result<Self> {
        let provider = ProviderBuilder::new().on_http(rpc_url.parse()?).boxed();
        Ok(Self { client, provider, cache })
    }

    async fn fetch_metadata(&self, address: Address) -> Result<Metadata, AcquisitionError> {
        let mut meta =
            self.client.contract_source_code(address).await.map_err(|e| match e {
                EtherscanError::ContractCodeNotVerified(_) => AcquisitionError::NotFound(address),
                EtherscanError::RateLimitExceeded => AcquisitionError::RateLimited,
                e => AcquisitionError::Network(e.to_string()),
            })?;

        if meta.items.is_empty() {
            return Err(AcquisitionError::NotFound(address));
        }
        Ok(meta.items.remove(0))
    }

    fn unsupported(address: Address, reason: impl ToString) -> AcquisitionError {
        AcquisitionError::Unsupported { address, reason: reason.to_string() }
    }
}

#[async_trait]
impl SourceProvider for EtherscanProvider {
    async fn fetch(&self, address: Address) -> Result<ContractSource, AcquisitionError> {
        if let Some(source) = self.cache.as_ref().and_then(|c| c.load_cache(address.to_string())) {
            debug!(%address, "using cached contract source");
            return Ok(source);
        }

        let meta = self.fetch_metadata(address).await?;
        if meta.is_vyper() {
            return Err(Self::unsupported(address, "Vyper contracts cannot be recompiled"));
        }

        let sources: std::collections::BTreeMap<_, _> =
            meta.sources().into_iter().map(|(path, entry)| (path, entry.content)).collect();
        if sources.is_empty() {
            return Err(AcquisitionError::NotFound(address));
        }

        let settings =
            meta.settings().map_err(|e| Self::unsupported(address, format!("settings: {e}")))?;
        let metadata_settings = settings
            .metadata
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| Self::unsupported(address, format!("metadata settings: {e}")))?;

        let deployed_bytecode = self
            .provider
            .get_code_at(address)
            .await
            .map_err(|e| AcquisitionError::Network(e.to_string()))?;
        if deployed_bytecode.is_empty() {
            warn!(%address, "no code deployed at address");
            return Err(AcquisitionError::NotFound(address));
        }

        let source = ContractSource {
            address,
            contract_name: meta.contract_name.clone(),
            compiler_version: meta.compiler_version.clone(),
            optimization: settings.optimizer.enabled.unwrap_or_default(),
            runs: settings.optimizer.runs.unwrap_or(200) as u64,
            evm_version: settings.evm_version.map(|v| v.to_string()),
            via_ir: settings.via_ir,
            remappings: settings.remappings.iter().map(ToString::to_string).collect(),
            metadata_settings,
            sources,
            constructor_arguments: meta.constructor_arguments.clone(),
            deployed_bytecode,
        };
        debug!(
            %address,
            contract = %source.contract_name,
            compiler = %source.compiler_version,
            sources = source.sources.len(),
            "fetched verified contract"
        );

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.save_cache(address.to_string(), &source) {
                warn!(%address, "failed to cache contract source: {e}");
            }
        }
        Ok(source)
    }
}
