use std::process::ExitCode;

use clap::Parser;
use eyre::Result;
use sourcelens_backend::analysis::comparison::BytecodeComparator;
use yansi::Paint;

use crate::{opts::ConfigOpts, utils::read_hex_arg};

#[derive(Clone, Debug, Parser)]
pub struct CompareArgs {
    /// The compiled runtime bytecode, as hex or `@path` to a file holding it.
    #[arg(value_name = "COMPILED")]
    pub compiled: String,

    /// The deployed runtime bytecode, as hex or `@path` to a file holding it.
    #[arg(value_name = "DEPLOYED")]
    pub deployed: String,

    /// Print the result as JSON.
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub config: ConfigOpts,
}

impl CompareArgs {
    pub fn run(self) -> Result<ExitCode> {
        let config = self.config.load()?;
        let compiled = read_hex_arg(&self.compiled)?;
        let deployed = read_hex_arg(&self.deployed)?;

        let result = BytecodeComparator::new(config.comparison).compare_hex(&compiled, &deployed)?;
        let class = config.policy.classify(&result);
        let verified = config.policy.passes(class);

        if self.json {
            let out = serde_json::json!({
                "result": result,
                "class": class,
                "verified": verified,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        } else {
            println!(
                "similarity: {:.4}%{}",
                result.similarity,
                if result.approximate { " (lower bound)" } else { "" }
            );
            println!("sizes:      {} / {} bytes", result.compiled_size, result.deployed_size);
            match result.first_divergence_offset {
                Some(offset) => println!("diverges:   byte {offset}"),
                None => println!("diverges:   never"),
            }
            if verified {
                println!("{}", class.green().bold());
            } else {
                println!("{}", class.red().bold());
            }
        }

        Ok(if verified { ExitCode::SUCCESS } else { ExitCode::FAILURE })
    }
}
