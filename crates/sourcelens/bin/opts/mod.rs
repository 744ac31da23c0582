mod cache;
mod config;
mod etherscan;
mod rpc;

pub use cache::CacheOpts;
pub use config::ConfigOpts;
pub use etherscan::EtherscanOpts;
pub use rpc::RpcOpts;
