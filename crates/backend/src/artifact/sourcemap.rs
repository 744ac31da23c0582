use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{
    AnalyzedBytecode, BytecodeOutput, CompilerOutput, OutputContract, SourceFile, SourceFiles,
};
use crate::{
    analysis::source_map::{JumpType, PcSourceRecord, PcSourceTable, SourceMap},
    error::{DecodeError, LookupError},
    utils::{compilation::link_contracts_fakely, opcode::Instruction},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcRange {
    pub min: usize,
    pub max: usize,
}

/// Summary statistics of a decoded runtime source map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub contract_name: String,
    pub source_path: String,
    pub total_instructions: usize,
    /// Number of distinct files referenced by at least one instruction.
    pub unique_source_files: usize,
    pub jump_type_counts: BTreeMap<JumpType, usize>,
    pub bytecode_length: usize,
    pub metadata_length: usize,
    pub pc_range: Option<PcRange>,
    /// RFC 3339 timestamp.
    pub generated_at: String,
}

/// The persisted result of decoding a contract's runtime source map: every pc with its
/// instruction and source location, plus the inputs needed to reproduce it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMapArtifact {
    pub metadata: ArtifactMetadata,
    pub source_files: SourceFiles,
    pub pc_to_source: PcSourceTable,
    pub instructions: Vec<Instruction>,
    pub raw_sourcemap: String,
    /// `0x`-prefixed runtime bytecode, metadata included.
    pub bytecode: String,
}

impl SourceMapArtifact {
    pub fn build(
        contract_name: &str,
        source_path: &str,
        bytecode: &AnalyzedBytecode,
        raw_sourcemap: &str,
        source_files: SourceFiles,
    ) -> Result<Self, DecodeError> {
        let source_map = SourceMap::parse(raw_sourcemap)?;
        let table = PcSourceTable::correlate(bytecode.instructions(), &source_map, &source_files)?;

        let mut jump_type_counts = BTreeMap::new();
        for entry in source_map.iter() {
            *jump_type_counts.entry(entry.jump_type).or_insert(0) += 1;
        }
        let unique_source_files = source_map
            .iter()
            .map(|entry| entry.file_index)
            .filter(|&file_index| file_index >= 0)
            .collect::<BTreeSet<_>>()
            .len();

        let metadata = ArtifactMetadata {
            contract_name: contract_name.to_string(),
            source_path: source_path.to_string(),
            total_instructions: bytecode.inst_n(),
            unique_source_files,
            jump_type_counts,
            bytecode_length: bytecode.len(),
            metadata_length: bytecode.metadata().len(),
            pc_range: table.pc_range().map(|(min, max)| PcRange { min, max }),
            generated_at: chrono::Utc::now().to_rfc3339(),
        };
        debug!(
            contract = contract_name,
            instructions = metadata.total_instructions,
            files = metadata.unique_source_files,
            "built source map artifact"
        );

        Ok(Self {
            metadata,
            source_files,
            pc_to_source: table,
            instructions: bytecode.instructions().to_vec(),
            raw_sourcemap: raw_sourcemap.to_string(),
            bytecode: format!("0x{}", hex::encode(bytecode.code())),
        })
    }

    /// Decodes the runtime source map of one contract of a compiler output.
    ///
    /// Library placeholders are linked against the zero address. `contents` maps source paths
    /// to their text, since the compiler output does not carry it.
    pub fn from_contract(
        output: &CompilerOutput,
        source_path: &str,
        contract_name: &str,
        contract: &OutputContract,
        contents: &BTreeMap<String, String>,
    ) -> Result<Self, DecodeError> {
        let missing = || DecodeError::MissingSourceMap(format!("{source_path}:{contract_name}"));
        let deployed = contract.deployed_bytecode().filter(|b| !b.is_empty()).ok_or_else(missing)?;
        let raw_sourcemap = deployed.source_map.as_deref().ok_or_else(missing)?;

        let bytecode = AnalyzedBytecode::from_hex(&link_contracts_fakely(deployed, None))?;
        let source_files = collect_source_files(output, deployed, contents)?;
        Self::build(contract_name, source_path, &bytecode, raw_sourcemap, source_files)
    }

    /// Like [`Self::from_contract`], selecting the contract by `Name` or `path:Name`. Without a
    /// selector, the first contract with runtime code is used.
    pub fn from_compiler_output(
        output: &CompilerOutput,
        selector: Option<&str>,
        contents: &BTreeMap<String, String>,
    ) -> Result<Self, DecodeError> {
        let (path, name, contract) = select_contract(output, selector)?;
        Self::from_contract(output, path, name, contract, contents)
    }

    pub fn lookup(&self, pc: usize) -> Result<&PcSourceRecord, LookupError> {
        self.pc_to_source.lookup(pc)
    }

    pub fn source_file(&self, file_index: i32) -> Option<&SourceFile> {
        u32::try_from(file_index).ok().and_then(|id| self.source_files.get(&id))
    }
}

fn select_contract<'a>(
    output: &'a CompilerOutput,
    selector: Option<&str>,
) -> Result<(&'a str, &'a str, &'a OutputContract), DecodeError> {
    let has_code =
        |contract: &OutputContract| contract.deployed_bytecode().is_some_and(|b| !b.is_empty());

    let mut candidates = output.contracts().filter(|(path, name, contract)| {
        has_code(contract) &&
            match selector {
                None => true,
                Some(selector) => match selector.rsplit_once(':') {
                    Some((p, n)) => *path == p && *name == n,
                    None => *name == selector,
                },
            }
    });

    let selected = candidates.next().ok_or_else(|| {
        DecodeError::MissingSourceMap(selector.unwrap_or("any contract").to_string())
    })?;
    if candidates.next().is_some() {
        warn!(
            path = selected.0,
            name = selected.1,
            "several contracts match, using the first one; qualify the name as `path:Name`"
        );
    }
    Ok(selected)
}

/// Builds the file table referenced by the source map: the compiled sources by their compiler
/// assigned ids, plus the compiler-generated sources of `bytecode`.
pub fn collect_source_files(
    output: &CompilerOutput,
    bytecode: &BytecodeOutput,
    contents: &BTreeMap<String, String>,
) -> Result<SourceFiles, DecodeError> {
    let mut files = SourceFiles::new();

    for (path, source) in &output.sources {
        let content = contents
            .get(path)
            .ok_or_else(|| DecodeError::MissingSourceContent(path.clone()))?;
        files.insert(
            source.id,
            SourceFile::new(source.id, path, content.as_str()).with_ast(source.ast.clone()),
        );
    }

    for generated in &bytecode.generated_sources {
        files.insert(
            generated.id,
            SourceFile::new(generated.id, &generated.name, generated.contents.as_str())
                .with_ast(generated.ast.clone())
                .generated(),
        );
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTENT: &str = "contract A {\n  x = 1;\n}\n";

    fn output(source_map: &str) -> CompilerOutput {
        let raw = serde_json::json!({
            "sources": {"src/A.sol": {"id": 0}},
            "contracts": {
                "src/A.sol": {
                    "A": {"evm": {"deployedBytecode": {
                        "object": "6001600201",
                        "sourceMap": source_map,
                        "generatedSources": [
                            {"id": 1, "name": "#utility.yul", "contents": "{ }", "language": "Yul"}
                        ]
                    }}}
                }
            }
        });
        serde_json::from_value(raw).unwrap()
    }

    fn contents() -> BTreeMap<String, String> {
        BTreeMap::from([("src/A.sol".to_string(), CONTENT.to_string())])
    }

    #[test]
    fn test_decode_compiler_output() {
        let output = output("10:5:0:-;15:3:0:i;0:0:-1:-");
        let artifact =
            SourceMapArtifact::from_compiler_output(&output, Some("A"), &contents()).unwrap();

        assert_eq!(artifact.metadata.total_instructions, 3);
        assert_eq!(artifact.metadata.unique_source_files, 1);
        assert_eq!(artifact.metadata.pc_range, Some(PcRange { min: 0, max: 4 }));
        assert_eq!(artifact.metadata.jump_type_counts[&JumpType::Regular], 2);
        assert_eq!(artifact.metadata.jump_type_counts[&JumpType::In], 1);
        assert_eq!(artifact.bytecode, "0x6001600201");
        assert_eq!(artifact.source_files.len(), 2);
        assert!(artifact.source_files[&1].generated);

        let pcs: Vec<_> = artifact.pc_to_source.records().iter().map(|r| r.pc).collect();
        assert_eq!(pcs, vec![0, 2, 4]);
        assert_eq!(artifact.lookup(4).unwrap().file_index, -1);
        assert_eq!(
            artifact.lookup(3),
            Err(LookupError::PcNotFound { pc: 3, range: Some((0, 4)) })
        );
    }

    #[test]
    fn test_generated_sources_are_resolvable() {
        let artifact = SourceMapArtifact::from_compiler_output(
            &output("0:1:1:-;10:5:0:-;1:1:1:o"),
            None,
            &contents(),
        )
        .unwrap();
        let record = artifact.lookup(0).unwrap();
        assert_eq!(record.source_path.as_deref(), Some("#utility.yul"));
        assert_eq!(record.snippet.as_deref(), Some("{"));
        assert_eq!(artifact.metadata.unique_source_files, 2);
    }

    #[test]
    fn test_decoding_is_deterministic() {
        let output = output("10:5:0:-;15:3:0:i;0:0:-1:-");
        let first = SourceMapArtifact::from_compiler_output(&output, None, &contents()).unwrap();
        let mut second =
            SourceMapArtifact::from_compiler_output(&output, Some("src/A.sol:A"), &contents())
                .unwrap();
        second.metadata.generated_at = first.metadata.generated_at.clone();

        assert_eq!(
            serde_json::to_string_pretty(&first).unwrap(),
            serde_json::to_string_pretty(&second).unwrap()
        );

        let json = serde_json::to_value(&first).unwrap();
        let keys: Vec<_> = json["pc_to_source"].as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["0", "2", "4"]);

        let reloaded: SourceMapArtifact = serde_json::from_value(json).unwrap();
        assert_eq!(reloaded, first);
        assert_eq!(reloaded.lookup(2).unwrap().instruction_index, 1);
        assert!(reloaded.lookup(1).is_err());
    }

    #[test]
    fn test_missing_inputs() {
        assert_eq!(
            SourceMapArtifact::from_compiler_output(&output("0:1:0:-;;"), Some("B"), &contents()),
            Err(DecodeError::MissingSourceMap("B".to_string()))
        );
        assert_eq!(
            SourceMapArtifact::from_compiler_output(&output("0:1:0:-;;"), None, &BTreeMap::new()),
            Err(DecodeError::MissingSourceContent("src/A.sol".to_string()))
        );
        assert_eq!(
            SourceMapArtifact::from_compiler_output(&output("0:1:0:-;"), None, &contents()),
            Err(DecodeError::CountMismatch { instructions: 3, entries: 2 })
        );
    }
}
