use std::borrow::Cow;

use clap::Parser;

const LOCALHOST_URL: &str = "http://localhost:8545";

#[derive(Clone, Debug, Default, Parser)]
pub struct RpcOpts {
    /// The RPC endpoint the deployed bytecode is read from.
    #[arg(short = 'r', long = "rpc-url", env = "ETH_RPC_URL")]
    pub url: Option<String>,
}

impl RpcOpts {
    /// Returns the RPC endpoint, or the local node if none is set and `fallback_to_default`.
    pub fn url(&self, fallback_to_default: bool) -> Option<Cow<'_, str>> {
        match self.url.as_deref() {
            Some(url) => Some(Cow::Borrowed(url)),
            None if fallback_to_default => Some(Cow::Borrowed(LOCALHOST_URL)),
            None => None,
        }
    }
}
