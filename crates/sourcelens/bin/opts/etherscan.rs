use std::ffi::OsStr;

use alloy_chains::{Chain, NamedChain};
use clap::{
    builder::{PossibleValuesParser, TypedValueParser},
    Parser,
};
use serde::Serialize;
use strum::VariantNames;

/// Custom Clap value parser for [`Chain`]s.
///
/// Displays all possible chains when an invalid chain is provided.
#[derive(Clone, Debug)]
struct ChainValueParser {
    pub inner: PossibleValuesParser,
}

impl Default for ChainValueParser {
    fn default() -> Self {
        Self { inner: PossibleValuesParser::from(NamedChain::VARIANTS) }
    }
}

impl TypedValueParser for ChainValueParser {
    type Value = Chain;

    fn parse_ref(
        &self,
        cmd: &clap::Command,
        arg: Option<&clap::Arg>,
        value: &OsStr,
    ) -> Result<Self::Value, clap::Error> {
        let s =
            value.to_str().ok_or_else(|| clap::Error::new(clap::error::ErrorKind::InvalidUtf8))?;
        if let Ok(id) = s.parse() {
            return Ok(Chain::from_id(id));
        }

        // NamedChain::VARIANTS is a subset of all possible variants, since there are aliases:
        // mumbai instead of polygon-mumbai etc
        //
        // Parse first as NamedChain, if it fails parse with NamedChain::VARIANTS for displaying
        // the error to the user
        match s.parse::<NamedChain>() {
            Ok(named) => Ok(Chain::from_named(named)),
            Err(_) => match self.inner.parse_ref(cmd, arg, value) {
                Ok(_) => Err(clap::Error::new(clap::error::ErrorKind::InvalidValue)),
                Err(e) => Err(e),
            },
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Parser)]
pub struct EtherscanOpts {
    /// The Etherscan (or equivalent) API key.
    #[arg(short = 'e', long = "etherscan-api-key", alias = "api-key", env = "ETHERSCAN_API_KEY")]
    #[serde(rename = "etherscan_api_key", skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// The chain name or EIP-155 chain ID.
    #[arg(
        short,
        long,
        alias = "chain-id",
        env = "CHAIN",
        value_parser = ChainValueParser::default(),
    )]
    #[serde(rename = "chain_id", skip_serializing_if = "Option::is_none")]
    pub chain: Option<Chain>,

    /// An Etherscan-compatible explorer API to use instead of the chain's default.
    #[arg(long, value_name = "URL")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explorer_api_url: Option<String>,
}

impl EtherscanOpts {
    /// Returns the Etherscan API key.
    pub fn key(&self) -> Option<String> {
        self.key.as_ref().filter(|key| !key.trim().is_empty()).cloned()
    }

    /// Returns the chain.
    pub fn chain(&self) -> Chain {
        self.chain.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chain() {
        let opts = EtherscanOpts::parse_from(["sourcelens", "--chain", "1"]);
        assert_eq!(opts.chain(), Chain::mainnet());

        let opts = EtherscanOpts::parse_from(["sourcelens", "--chain", "sepolia"]);
        assert_eq!(opts.chain(), Chain::from_named(NamedChain::Sepolia));

        assert!(EtherscanOpts::try_parse_from(["sourcelens", "--chain", "not-a-chain"]).is_err());
    }

    #[test]
    fn test_blank_key() {
        let opts = EtherscanOpts { key: Some("  ".to_string()), ..Default::default() };
        assert_eq!(opts.key(), None);
    }
}
