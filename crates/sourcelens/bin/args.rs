use clap::{Parser, Subcommand};

use crate::cmd::{
    compare::CompareArgs, decode::DecodeArgs, disasm::DisasmArgs, lookup::LookupArgs,
    verify::VerifyArgs,
};

/// sourcelens: map EVM bytecode back to Solidity source, and verify it against the chain.
#[derive(Parser, Debug)]
#[command(
    name = "sourcelens",
    version,
    after_help = "Find more information in our homepage: https://medga.org/",
    next_display_order = None,
)]
pub struct SourcelensArgs {
    #[command(subcommand)]
    pub cmd: SourcelensSubcommand,
}

#[derive(Subcommand, Debug)]
#[allow(clippy::large_enum_variant)]
pub enum SourcelensSubcommand {
    /// Recompile a verified contract and compare it with the deployed bytecode.
    #[command(visible_alias = "v")]
    Verify(VerifyArgs),

    /// Decode the runtime source map of a compiler output into a pc-to-source artifact.
    #[command(visible_alias = "d")]
    Decode(DecodeArgs),

    /// Look up the source location of a pc in a decoded artifact.
    #[command(visible_alias = "l")]
    Lookup(LookupArgs),

    /// Disassemble runtime bytecode.
    Disasm(DisasmArgs),

    /// Compare two bytecodes.
    Compare(CompareArgs),
}
