//! Error taxonomy of the verification pipeline.
//!
//! Every stage of the pipeline fails with one of the typed errors below. The orchestrator
//! wraps them into a [`VerificationError`] which additionally records the [`Stage`] the
//! failure originated from.

use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    time::Duration,
};

use alloy_primitives::Address;
use semver::Version;

use crate::core::Stage;

/// Failures while acquiring contract metadata, sources, or the deployed bytecode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    /// Transport-level failure talking to the explorer or the RPC node.
    Network(String),
    /// The explorer has no verified source for this address, or no code is deployed.
    NotFound(Address),
    /// The explorer rejected the request because of its rate limit.
    RateLimited,
    /// The contract is verified, but not in a language this tool can recompile.
    Unsupported { address: Address, reason: String },
    /// The request did not complete within the configured time.
    Timeout(Duration),
}

impl Display for AcquisitionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(reason) => write!(f, "network failure: {reason}"),
            Self::NotFound(address) => write!(f, "no verified contract found at {address}"),
            Self::RateLimited => write!(f, "explorer rate limit exceeded"),
            Self::Unsupported { address, reason } => {
                write!(f, "contract {address} is not supported: {reason}")
            }
            Self::Timeout(after) => write!(f, "request timed out after {after:?}"),
        }
    }
}

impl Error for AcquisitionError {}

/// Failures while turning acquired metadata into a compiler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The compiler version string could not be parsed.
    UnresolvableVersion(String),
    /// The compiler could not be installed.
    InstallFailed { version: Version, reason: String },
    /// The selected compiler does not report the requested version.
    VersionMismatch { expected: Version, found: Version },
    /// The source tree is empty, or contains a path that escapes the project root.
    MalformedSourceTree(String),
    /// The run directory could not be written.
    Workspace(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvableVersion(raw) => write!(f, "unresolvable compiler version `{raw}`"),
            Self::InstallFailed { version, reason } => {
                write!(f, "failed to install solc {version}: {reason}")
            }
            Self::VersionMismatch { expected, found } => {
                write!(f, "compiler version mismatch: expected {expected}, found {found}")
            }
            Self::MalformedSourceTree(reason) => write!(f, "malformed source tree: {reason}"),
            Self::Workspace(reason) => write!(f, "failed to write run directory: {reason}"),
        }
    }
}

impl Error for ConfigError {}

/// Failures of the external compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// The compiler process failed to run or exited with a non-zero status.
    Failed(String),
    /// The compiler reported errors in its structured output.
    Diagnostics(Vec<String>),
    /// The compiler output does not follow the structured output schema.
    MalformedOutput(String),
    /// The requested contract is not part of the compiler output.
    ContractNotFound(String),
    /// The compiler did not finish within the configured time.
    Timeout(Duration),
}

impl Display for CompileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "compiler failed: {reason}"),
            Self::Diagnostics(errors) => {
                write!(f, "compilation reported {} error(s)", errors.len())?;
                for error in errors {
                    write!(f, "\n  {error}")?;
                }
                Ok(())
            }
            Self::MalformedOutput(reason) => write!(f, "malformed compiler output: {reason}"),
            Self::ContractNotFound(name) => {
                write!(f, "contract `{name}` not found in compiler output")
            }
            Self::Timeout(after) => write!(f, "compilation timed out after {after:?}"),
        }
    }
}

impl Error for CompileError {}

/// Failures while disassembling bytecode, parsing a source map, or correlating the two.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// A segment of the compact source map violates the grammar.
    MalformedMap { segment: usize, reason: String },
    /// The source map does not have one entry per instruction.
    CountMismatch { instructions: usize, entries: usize },
    /// A PUSH operand runs past the end of the bytecode.
    TruncatedBytecode { pc: usize, opcode: u8, needed: usize, available: usize },
    /// A source map entry references a file id that is not in the file table.
    UnknownSourceFile { instruction_index: usize, file_index: i32 },
    /// A source map entry references bytes outside of its file.
    SpanOutOfBounds { instruction_index: usize, file_index: i32, end: usize, file_len: usize },
    /// The compiler output carries no deployed bytecode or source map for the contract.
    MissingSourceMap(String),
    /// The content of a source file referenced by the compiler output is not available.
    MissingSourceContent(String),
    /// The bytecode object is not valid hex.
    InvalidBytecode(String),
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedMap { segment, reason } => {
                write!(f, "malformed source map at segment {segment}: {reason}")
            }
            Self::CountMismatch { instructions, entries } => write!(
                f,
                "instruction/entry count mismatch: expected {instructions} source map entries, \
                 found {entries}"
            ),
            Self::TruncatedBytecode { pc, opcode, needed, available } => write!(
                f,
                "truncated bytecode: opcode 0x{opcode:02x} at pc {pc} needs {needed} operand \
                 byte(s), only {available} available"
            ),
            Self::UnknownSourceFile { instruction_index, file_index } => write!(
                f,
                "instruction {instruction_index} references unknown source file {file_index}"
            ),
            Self::SpanOutOfBounds { instruction_index, file_index, end, file_len } => write!(
                f,
                "instruction {instruction_index} references bytes up to {end} of source file \
                 {file_index}, which has {file_len} bytes"
            ),
            Self::MissingSourceMap(name) => {
                write!(f, "no deployed bytecode or source map for `{name}`")
            }
            Self::MissingSourceContent(path) => write!(f, "missing content of source `{path}`"),
            Self::InvalidBytecode(reason) => write!(f, "invalid bytecode: {reason}"),
        }
    }
}

impl Error for DecodeError {}

/// Failures while reading the bytecodes to compare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompareError {
    /// The named input is empty after normalization.
    Empty(&'static str),
    /// The named input is not valid hex.
    Unreadable { input: &'static str, reason: String },
}

impl Display for CompareError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty(input) => write!(f, "{input} bytecode is empty"),
            Self::Unreadable { input, reason } => {
                write!(f, "{input} bytecode is unreadable: {reason}")
            }
        }
    }
}

impl Error for CompareError {}

/// A pc lookup against a built correlation table failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// No instruction starts at the requested pc.
    PcNotFound { pc: usize, range: Option<(usize, usize)> },
}

impl Display for LookupError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::PcNotFound { pc, range: Some((min, max)) } => {
                write!(f, "no instruction at pc {pc} (available pc range: {min} - {max})")
            }
            Self::PcNotFound { pc, range: None } => {
                write!(f, "no instruction at pc {pc} (the table is empty)")
            }
        }
    }
}

impl Error for LookupError {}

/// The error kinds a pipeline stage can fail with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Acquisition(AcquisitionError),
    Config(ConfigError),
    Compile(CompileError),
    Decode(DecodeError),
    Compare(CompareError),
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acquisition(e) => write!(f, "acquisition error: {e}"),
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::Compile(e) => write!(f, "compile error: {e}"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
            Self::Compare(e) => write!(f, "compare error: {e}"),
        }
    }
}

macro_rules! impl_from_kind {
    ($($error:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$error> for ErrorKind {
                fn from(e: $error) -> Self {
                    Self::$variant(e)
                }
            }
        )*
    };
}

impl_from_kind! {
    AcquisitionError => Acquisition,
    ConfigError => Config,
    CompileError => Compile,
    DecodeError => Decode,
    CompareError => Compare,
}

/// A pipeline failure, tagged with the stage it originated from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationError {
    pub stage: Stage,
    pub kind: ErrorKind,
}

impl VerificationError {
    pub fn new(stage: Stage, kind: impl Into<ErrorKind>) -> Self {
        Self { stage, kind: kind.into() }
    }
}

impl Display for VerificationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} failed: {}", self.stage, self.kind)
    }
}

impl Error for VerificationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_carries_stage_and_context() {
        let error = VerificationError::new(
            Stage::DecodingSourceMap,
            DecodeError::CountMismatch { instructions: 3, entries: 2 },
        );
        let message = error.to_string();
        assert!(message.contains("DECODING_SOURCEMAP"));
        assert!(message.contains("expected 3"));
        assert!(message.contains("found 2"));
    }
}
