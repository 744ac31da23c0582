//! Artifacts flowing through the pipeline: analyzed bytecode, compiler input and output, and
//! the decoded source map.

mod bytecode;
mod compilation;
mod source;
mod sourcemap;

pub use bytecode::AnalyzedBytecode;
pub use compilation::{
    ByteRange, BytecodeOutput, CompilerInput, CompilerOutput, CompilerSettings, Diagnostic,
    EvmOutput, GeneratedSource, InputSource, OptimizerSettings, OutputContract, OutputSource,
};
pub use source::{SourceFile, SourceFiles};
pub use sourcemap::{collect_source_files, ArtifactMetadata, PcRange, SourceMapArtifact};
