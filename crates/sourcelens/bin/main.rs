#[macro_use]
extern crate tracing;

mod args;
mod cmd;
mod opts;
mod utils;

use std::process::ExitCode;

use args::{SourcelensArgs, SourcelensSubcommand};
use clap::Parser;
use eyre::Result;

fn main() -> Result<ExitCode> {
    utils::install_error_handler();
    utils::subscriber();
    utils::enable_paint();

    let opts = SourcelensArgs::parse();

    match opts.cmd {
        SourcelensSubcommand::Verify(cmd) => utils::block_on(cmd.run()),
        SourcelensSubcommand::Decode(cmd) => cmd.run(),
        SourcelensSubcommand::Lookup(cmd) => cmd.run(),
        SourcelensSubcommand::Disasm(cmd) => cmd.run(),
        SourcelensSubcommand::Compare(cmd) => cmd.run(),
    }
}
