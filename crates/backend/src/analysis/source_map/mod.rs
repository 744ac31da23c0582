//! Decoding of compact source maps and their correlation with disassembled bytecode.

mod correlator;
mod line_index;
mod parser;

pub use correlator::{PcSourceRecord, PcSourceTable, SourceSpan};
pub use line_index::LineIndex;
pub use parser::{JumpType, SourceMap, SourceMapEntry};
