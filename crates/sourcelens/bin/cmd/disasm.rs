use std::process::ExitCode;

use clap::Parser;
use eyre::Result;
use sourcelens_backend::artifact::AnalyzedBytecode;

use crate::utils::read_hex_arg;

#[derive(Clone, Debug, Parser)]
pub struct DisasmArgs {
    /// The runtime bytecode, as hex or `@path` to a file holding it.
    #[arg(value_name = "BYTECODE|@FILE")]
    pub bytecode: String,
}

impl DisasmArgs {
    pub fn run(self) -> Result<ExitCode> {
        let code = AnalyzedBytecode::from_hex(&read_hex_arg(&self.bytecode)?)?;

        println!("{:5} ({:5}): {:<48}\n", "IC", "PC", "Opcode");
        for insn in code.instructions() {
            println!(
                "{:05} ({:05}): {:<48}",
                insn.instruction_index,
                insn.pc,
                insn.display(code.code())
            );
        }

        if !code.metadata().is_empty() {
            println!(
                "\n{} byte(s) of metadata at pc {}",
                code.metadata().len(),
                code.body().len()
            );
        }

        Ok(ExitCode::SUCCESS)
    }
}
