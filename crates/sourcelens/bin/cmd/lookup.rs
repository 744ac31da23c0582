use std::{fs, path::PathBuf, process::ExitCode};

use clap::Parser;
use eyre::{Result, WrapErr};
use sourcelens_backend::artifact::SourceMapArtifact;
use yansi::Paint;

#[derive(Clone, Debug, Parser)]
pub struct LookupArgs {
    /// Path to a decoded source map artifact.
    #[arg(value_name = "ARTIFACT")]
    pub artifact: PathBuf,

    /// The program counter, in decimal or `0x` hex.
    #[arg(value_name = "PC", value_parser = parse_pc)]
    pub pc: usize,
}

impl LookupArgs {
    pub fn run(self) -> Result<ExitCode> {
        let raw = fs::read(&self.artifact)
            .wrap_err_with(|| format!("failed to read {}", self.artifact.display()))?;
        let artifact: SourceMapArtifact = serde_json::from_slice(&raw)
            .wrap_err_with(|| format!("invalid artifact {}", self.artifact.display()))?;

        let record = match artifact.lookup(self.pc) {
            Ok(record) => record,
            Err(e) => {
                eprintln!("{}", e.red());
                return Ok(ExitCode::FAILURE);
            }
        };

        println!("{}", serde_json::to_string_pretty(record)?);
        println!();
        println!("{} {} (0x{:02x})", "Instruction:".bold(), record.mnemonic, record.opcode);
        println!("{} {}", "Jump:       ".bold(), record.jump_description());
        match (&record.source_path, &record.span) {
            (Some(path), Some(span)) => {
                println!(
                    "{} {path}:{}:{} - {}:{}",
                    "Location:   ".bold(),
                    span.line_start,
                    span.column_start,
                    span.line_end,
                    span.column_end
                );
                if let Some(snippet) = &record.snippet {
                    println!("{}\n{}", "Source:".bold(), snippet.cyan());
                }
            }
            _ => println!("{} none (compiler-internal code)", "Location:   ".bold()),
        }

        Ok(ExitCode::SUCCESS)
    }
}

/// Parses a pc given in decimal or as `0x` prefixed hex.
fn parse_pc(s: &str) -> Result<usize, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid pc `{s}`: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pc() {
        assert_eq!(parse_pc("42"), Ok(42));
        assert_eq!(parse_pc("0x2a"), Ok(42));
        assert_eq!(parse_pc("0X2A"), Ok(42));
        assert!(parse_pc("2a").is_err());
        assert!(parse_pc("0x").is_err());
        assert!(parse_pc("-1").is_err());
    }
}
