use std::{collections::BTreeMap, ops::Range};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{JumpType, SourceMap, SourceMapEntry};
use crate::{
    artifact::{SourceFile, SourceFiles},
    error::{DecodeError, LookupError},
    utils::opcode::{mnemonic, Instruction},
};

/// A resolved source range with 1-based line/column positions of both ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start: u32,
    pub length: u32,
    pub line_start: usize,
    pub column_start: usize,
    pub line_end: usize,
    pub column_end: usize,
}

/// Everything known about the instruction at one pc.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcSourceRecord {
    pub pc: usize,
    pub instruction_index: usize,
    pub opcode: u8,
    pub mnemonic: String,
    pub jump_type: JumpType,
    pub modifier_depth: u32,
    pub file_index: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<SourceSpan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl PcSourceRecord {
    /// Returns `true` if the instruction resolved to a byte range of a source file.
    pub const fn has_source(&self) -> bool {
        self.span.is_some()
    }

    pub const fn jump_description(&self) -> &'static str {
        self.jump_type.description()
    }

    fn resolve(
        insn: &Instruction,
        entry: &SourceMapEntry,
        sources: &SourceFiles,
    ) -> Result<Self, DecodeError> {
        let mut record = Self {
            pc: insn.pc,
            instruction_index: insn.instruction_index,
            opcode: insn.opcode,
            mnemonic: mnemonic(insn.opcode),
            jump_type: entry.jump_type,
            modifier_depth: entry.modifier_depth,
            file_index: entry.file_index,
            source_path: None,
            span: None,
            snippet: None,
        };
        if !entry.has_source() {
            return Ok(record);
        }

        let file = sources.get(&(entry.file_index as u32)).ok_or(
            DecodeError::UnknownSourceFile {
                instruction_index: insn.instruction_index,
                file_index: entry.file_index,
            },
        )?;
        let (span, snippet) = Self::locate(insn, entry, file)?;

        record.source_path = Some(file.path.clone());
        record.span = Some(span);
        record.snippet = Some(snippet);
        Ok(record)
    }

    fn locate(
        insn: &Instruction,
        entry: &SourceMapEntry,
        file: &SourceFile,
    ) -> Result<(SourceSpan, String), DecodeError> {
        let out_of_bounds = || DecodeError::SpanOutOfBounds {
            instruction_index: insn.instruction_index,
            file_index: entry.file_index,
            end: entry.end(),
            file_len: file.len(),
        };

        let index = file.line_index();
        let (line_start, column_start) =
            index.position(entry.start as usize).ok_or_else(out_of_bounds)?;
        let (line_end, column_end) = index.position(entry.end()).ok_or_else(out_of_bounds)?;

        // Spans are byte ranges and may split a multi-byte character.
        let snippet =
            String::from_utf8_lossy(&file.content.as_bytes()[entry.start as usize..entry.end()])
                .into_owned();

        let span = SourceSpan {
            start: entry.start as u32,
            length: entry.length as u32,
            line_start,
            column_start,
            line_end,
            column_end,
        };
        Ok((span, snippet))
    }
}

/// Joins disassembled instructions with their source map entries, position by position.
///
/// Serializes as a map from pc to record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PcSourceTable {
    // Sorted by pc, since instructions are.
    records: Vec<PcSourceRecord>,
    /// pc -> position in `records`.
    by_pc: FxHashMap<usize, usize>,
}

impl PcSourceTable {
    /// Builds the table. Fails unless there is exactly one map entry per instruction and every
    /// entry with a file index points to a known file and lies within it.
    pub fn correlate(
        instructions: &[Instruction],
        source_map: &SourceMap,
        sources: &SourceFiles,
    ) -> Result<Self, DecodeError> {
        source_map.check_instruction_count(instructions.len())?;

        let records = instructions
            .iter()
            .zip(source_map.entries())
            .map(|(insn, entry)| PcSourceRecord::resolve(insn, entry, sources))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            records = records.len(),
            with_source = records.iter().filter(|r| r.has_source()).count(),
            "correlated pcs with sources"
        );
        Ok(Self::from_records(records))
    }

    /// Indexes records that are sorted by pc.
    fn from_records(records: Vec<PcSourceRecord>) -> Self {
        let by_pc = records.iter().enumerate().map(|(at, record)| (record.pc, at)).collect();
        Self { records, by_pc }
    }

    pub fn lookup(&self, pc: usize) -> Result<&PcSourceRecord, LookupError> {
        self.by_pc
            .get(&pc)
            .map(|&at| &self.records[at])
            .ok_or_else(|| LookupError::PcNotFound { pc, range: self.pc_range() })
    }

    /// Lowest and highest pc of the table.
    pub fn pc_range(&self) -> Option<(usize, usize)> {
        Some((self.records.first()?.pc, self.records.last()?.pc))
    }

    /// All records of instructions that start within `range`.
    pub fn records_in_range(&self, range: Range<usize>) -> &[PcSourceRecord] {
        let from = self.records.partition_point(|record| record.pc < range.start);
        let to = self.records.partition_point(|record| record.pc < range.end);
        &self.records[from..to.max(from)]
    }

    /// All records attributed to the given file.
    pub fn records_for_file(&self, file_index: i32) -> impl Iterator<Item = &PcSourceRecord> {
        self.records.iter().filter(move |record| record.file_index == file_index)
    }

    pub fn records(&self) -> &[PcSourceRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<PcSourceRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Serialize for PcSourceTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.records.iter().map(|record| (record.pc, record)))
    }
}

impl<'de> Deserialize<'de> for PcSourceTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let records = BTreeMap::<usize, PcSourceRecord>::deserialize(deserializer)?;
        Ok(Self::from_records(records.into_values().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{artifact::AnalyzedBytecode, utils::opcode::disassemble};

    fn sources() -> SourceFiles {
        let content = "contract A {\n  x = 1;\n}\n";
        SourceFiles::from([(0, SourceFile::new(0, "src/A.sol", content))])
    }

    #[test]
    fn test_correlate_example() {
        let bytecode = AnalyzedBytecode::from_hex("0x6001600201").unwrap();
        let map = SourceMap::parse("10:5:0:-;15:3:0:i;0:0:-1:-").unwrap();
        let table = PcSourceTable::correlate(bytecode.instructions(), &map, &sources()).unwrap();

        assert_eq!(table.len(), 3);
        let pcs: Vec<_> = table.records().iter().map(|r| r.pc).collect();
        assert_eq!(pcs, vec![0, 2, 4]);

        let first = table.lookup(0).unwrap();
        assert_eq!(first.source_path.as_deref(), Some("src/A.sol"));
        assert_eq!(first.snippet.as_deref(), Some(" {\n  "));
        assert_eq!(
            first.span,
            Some(SourceSpan {
                start: 10,
                length: 5,
                line_start: 1,
                column_start: 11,
                line_end: 2,
                column_end: 3,
            })
        );

        let second = table.lookup(2).unwrap();
        assert_eq!(second.jump_type, JumpType::In);
        assert_eq!(second.jump_description(), "jump_into_function");
        assert_eq!(second.snippet.as_deref(), Some("x ="));

        let third = table.lookup(4).unwrap();
        assert!(!third.has_source());
        assert_eq!(third.mnemonic, "ADD");
        assert!(third.span.is_none() && third.snippet.is_none());
    }

    #[test]
    fn test_lookup_miss_reports_range() {
        let bytecode = AnalyzedBytecode::from_hex("6001600201").unwrap();
        let map = SourceMap::parse("0:1:0:-;;").unwrap();
        let table = PcSourceTable::correlate(bytecode.instructions(), &map, &sources()).unwrap();

        assert_eq!(table.lookup(1), Err(LookupError::PcNotFound { pc: 1, range: Some((0, 4)) }));
        assert_eq!(
            table.lookup(100).unwrap_err().to_string(),
            "no instruction at pc 100 (available pc range: 0 - 4)"
        );
    }

    #[test]
    fn test_range_queries() {
        let bytecode = AnalyzedBytecode::from_hex("6001600201").unwrap();
        let map = SourceMap::parse("0:1:0:-;2:1:-1:-;4:1:0:o").unwrap();
        let table = PcSourceTable::correlate(bytecode.instructions(), &map, &sources()).unwrap();

        let pcs = |records: &[PcSourceRecord]| records.iter().map(|r| r.pc).collect::<Vec<_>>();
        assert_eq!(pcs(table.records_in_range(1..5)), vec![2, 4]);
        assert_eq!(pcs(table.records_in_range(0..1)), vec![0]);
        assert!(table.records_in_range(5..10).is_empty());
        assert_eq!(table.records_for_file(0).count(), 2);
        assert_eq!(table.records_for_file(-1).count(), 1);
    }

    #[test]
    fn test_pcs_follow_the_decoder() {
        // PUSH1 0x80; PUSH2 0x0104; ADD; PUSH32 0x11..; DUP1; JUMPDEST; PUSH1 0x00; MSTORE; STOP
        let mut code = vec![0x60, 0x80, 0x61, 0x01, 0x04, 0x01, 0x7f];
        code.extend([0x11; 32]);
        code.extend([0x80, 0x5b, 0x60, 0x00, 0x52, 0x00]);

        let instructions = disassemble(&code).unwrap();
        let map = SourceMap::parse("0:10:0:-;;12:3;:::i;-1:-1:-1:-;;2:4:0;:::o;").unwrap();
        let table = PcSourceTable::correlate(&instructions, &map, &sources()).unwrap();

        assert_eq!(table.len(), instructions.len());
        assert_eq!(table.len(), 9);
        for (i, (record, insn)) in table.records().iter().zip(&instructions).enumerate() {
            assert_eq!(record.instruction_index, i);
            assert_eq!(record.pc, insn.pc);
            assert_eq!(record.opcode, insn.opcode);
        }
        assert!(table.records().windows(2).all(|w| w[0].instruction_index < w[1].instruction_index));
        assert_eq!(
            table.records().iter().map(|r| r.pc).collect::<Vec<_>>(),
            vec![0, 2, 5, 6, 39, 40, 41, 43, 44]
        );

        let with_source: Vec<_> = table.records().iter().map(|r| r.has_source()).collect();
        assert_eq!(with_source, vec![true, true, true, true, false, false, true, true, true]);
        assert_eq!(table.lookup(5).unwrap().snippet.as_deref(), Some("\n  "));
        assert_eq!(table.lookup(6).unwrap().jump_type, JumpType::In);
        assert_eq!(table.lookup(44).unwrap().jump_type, JumpType::Out);
        assert_eq!(table.lookup(44).unwrap().snippet.as_deref(), Some("ntra"));
        assert!(table.lookup(7).is_err());
    }

    #[test]
    fn test_no_location_entries_keep_their_record() {
        let bytecode = AnalyzedBytecode::from_hex("6001600201").unwrap();
        let map = SourceMap::parse("0:8:0:-;-1:-1:-1:-;-1:-1:0").unwrap();
        let table = PcSourceTable::correlate(bytecode.instructions(), &map, &sources()).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.lookup(0).unwrap().snippet.as_deref(), Some("contract"));

        let unattributed = table.lookup(2).unwrap();
        assert_eq!(unattributed.file_index, -1);
        assert!(!unattributed.has_source());

        let no_location = table.lookup(4).unwrap();
        assert_eq!(no_location.file_index, 0);
        assert!(!no_location.has_source());
        assert!(no_location.span.is_none() && no_location.snippet.is_none());
        assert_eq!(table.records_for_file(0).count(), 2);
    }

    #[test]
    fn test_reloaded_table_is_indexed() {
        let bytecode = AnalyzedBytecode::from_hex("6001600201").unwrap();
        let map = SourceMap::parse("0:8:0:-;10:5;-1:-1:-1:-").unwrap();
        let table = PcSourceTable::correlate(bytecode.instructions(), &map, &sources()).unwrap();

        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json["2"]["snippet"], " {\n  ");
        assert_eq!(json.as_object().unwrap().len(), 3);

        let reloaded: PcSourceTable = serde_json::from_value(json).unwrap();
        assert_eq!(reloaded, table);
        assert_eq!(reloaded.lookup(2).unwrap().instruction_index, 1);
        assert_eq!(reloaded.lookup(3), Err(LookupError::PcNotFound { pc: 3, range: Some((0, 4)) }));
    }

    #[test]
    fn test_count_mismatch() {
        let instructions = disassemble(&[0x60, 0x01, 0x60, 0x02, 0x01]).unwrap();
        let map = SourceMap::parse("0:1:0:-;").unwrap();
        assert_eq!(
            PcSourceTable::correlate(&instructions, &map, &sources()),
            Err(DecodeError::CountMismatch { instructions: 3, entries: 2 })
        );
    }

    #[test]
    fn test_unknown_file_and_out_of_bounds() {
        let instructions = disassemble(&[0x00]).unwrap();

        let map = SourceMap::parse("0:1:3:-").unwrap();
        assert_eq!(
            PcSourceTable::correlate(&instructions, &map, &sources()),
            Err(DecodeError::UnknownSourceFile { instruction_index: 0, file_index: 3 })
        );

        let map = SourceMap::parse("20:10:0:-").unwrap();
        assert_eq!(
            PcSourceTable::correlate(&instructions, &map, &sources()),
            Err(DecodeError::SpanOutOfBounds {
                instruction_index: 0,
                file_index: 0,
                end: 30,
                file_len: 24
            })
        );
    }
}
