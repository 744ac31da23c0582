use std::{path::PathBuf, process::ExitCode};

use alloy_primitives::Address;
use clap::Parser;
use eyre::Result;
use sourcelens_backend::{VerificationPipeline, VerificationSummary};
use yansi::Paint;

use crate::opts::{CacheOpts, ConfigOpts, EtherscanOpts, RpcOpts};

#[derive(Clone, Debug, Parser)]
pub struct VerifyArgs {
    /// The address of the deployed contract.
    pub address: Address,

    /// Write the sources, compiler input and output, and the decoded source map of the run
    /// into a fresh directory below this one.
    #[arg(long, short, value_name = "DIR")]
    pub out: Option<PathBuf>,

    /// Print the summary as JSON.
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub etherscan: EtherscanOpts,

    #[command(flatten)]
    pub rpc: RpcOpts,

    #[command(flatten)]
    pub cache: CacheOpts,

    #[command(flatten)]
    pub config: ConfigOpts,
}

impl VerifyArgs {
    pub async fn run(self) -> Result<ExitCode> {
        let Self { address, out, json, etherscan, rpc, cache, config } = self;

        let mut builder = VerificationPipeline::builder()
            .chain(etherscan.chain())
            .config(config.load()?);
        if let Some(key) = etherscan.key() {
            builder = builder.etherscan_api_key(key);
        }
        if let Some(url) = etherscan.explorer_api_url {
            builder = builder.explorer_api_url(url);
        }
        if let Some(url) = rpc.url(true) {
            builder = builder.rpc_url(url.into_owned());
        }
        match cache.cache_path() {
            Some(paths) => {
                if let Some(root) = paths.cache_dir() {
                    builder = builder.cache_root(root);
                }
            }
            None => builder = builder.no_cache(true),
        }
        if let Some(out) = out {
            builder = builder.out_dir(out);
        }

        let pipeline = builder.build()?;
        let report = pipeline.verify(address).await?;
        let summary = &report.summary;

        if json {
            println!("{}", serde_json::to_string_pretty(summary)?);
        } else {
            print_summary(summary);
        }

        Ok(if summary.verified { ExitCode::SUCCESS } else { ExitCode::FAILURE })
    }
}

fn print_summary(summary: &VerificationSummary) {
    let comparison = &summary.comparison;

    println!("{} {}", "Contract:".bold(), summary.contract_name);
    println!("{} {}", "Source:  ".bold(), summary.source_path);
    println!("{} {}", "Compiler:".bold(), summary.compiler_version);
    if !summary.constructor_arguments.is_empty() {
        println!("{} {}", "Ctor args:".bold(), summary.constructor_arguments);
    }
    println!(
        "{} {:.4}%{} ({} compiled / {} deployed bytes)",
        "Match:   ".bold(),
        comparison.similarity,
        if comparison.approximate { " (lower bound)" } else { "" },
        comparison.compiled_size,
        comparison.deployed_size,
    );
    if let Some(offset) = comparison.first_divergence_offset {
        println!("{} byte {offset}", "Diverges:".bold());
    }
    if let Some(dir) = &summary.run_dir {
        println!("{} {}", "Run dir: ".bold(), dir.display());
    }

    println!();
    if summary.verified {
        println!("{}", format!("Verified: {}", summary.class).green().bold());
    } else {
        println!("{}", format!("Not verified: {}", summary.class).red().bold());
    }
}
