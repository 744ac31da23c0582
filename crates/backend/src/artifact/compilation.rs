//! The subset of the Solidity standard-JSON input and output schema the pipeline reads and
//! writes.

use std::collections::BTreeMap;

use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{acquisition::ContractSource, error::CompileError, utils::normalize_hex};

/// Outputs requested for every contract: the ABI and everything about the runtime bytecode
/// needed to decode its source map.
const CONTRACT_OUTPUTS: &[&str] = &[
    "abi",
    "evm.deployedBytecode.object",
    "evm.deployedBytecode.sourceMap",
    "evm.deployedBytecode.linkReferences",
    "evm.deployedBytecode.immutableReferences",
    "evm.deployedBytecode.generatedSources",
];

/// First compiler release that accepts the `viaIR` setting.
const VIA_IR_SINCE: Version = Version::new(0, 8, 13);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilerInput {
    pub language: String,
    pub sources: BTreeMap<String, InputSource>,
    pub settings: CompilerSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSource {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerSettings {
    pub optimizer: OptimizerSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evm_version: Option<String>,
    #[serde(default, rename = "viaIR", skip_serializing_if = "Option::is_none")]
    pub via_ir: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remappings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub output_selection: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizerSettings {
    pub enabled: bool,
    pub runs: u64,
}

impl CompilerInput {
    /// Builds the standard-JSON input that reproduces the original compilation of `source`
    /// with compiler `version`.
    pub fn for_contract(
        source: &ContractSource,
        sources: &BTreeMap<String, String>,
        version: &Version,
    ) -> Self {
        let output_selection = BTreeMap::from([(
            "*".to_string(),
            BTreeMap::from([
                ("*".to_string(), CONTRACT_OUTPUTS.iter().map(ToString::to_string).collect()),
                (String::new(), vec!["ast".to_string()]),
            ]),
        )]);

        let evm_version = source
            .evm_version
            .clone()
            .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("default"));
        let via_ir = source.via_ir.filter(|_| *version >= VIA_IR_SINCE);
        if source.via_ir.is_some() && via_ir.is_none() {
            warn!(%version, "dropping the viaIR setting unsupported by this compiler");
        }

        Self {
            language: "Solidity".to_string(),
            sources: sources
                .iter()
                .map(|(path, content)| (path.clone(), InputSource { content: content.clone() }))
                .collect(),
            settings: CompilerSettings {
                optimizer: OptimizerSettings { enabled: source.optimization, runs: source.runs },
                evm_version,
                via_ir,
                remappings: source.remappings.clone(),
                metadata: source.metadata_settings.clone(),
                output_selection,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompilerOutput {
    #[serde(default)]
    pub errors: Vec<Diagnostic>,
    #[serde(default)]
    pub sources: BTreeMap<String, OutputSource>,
    #[serde(default)]
    pub contracts: BTreeMap<String, BTreeMap<String, OutputContract>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub severity: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub formatted_message: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity.eq_ignore_ascii_case("error")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSource {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ast: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputContract {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abi: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evm: Option<EvmOutput>,
}

impl OutputContract {
    pub fn deployed_bytecode(&self) -> Option<&BytecodeOutput> {
        self.evm.as_ref()?.deployed_bytecode.as_ref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_bytecode: Option<BytecodeOutput>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BytecodeOutput {
    #[serde(default)]
    pub object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_map: Option<String>,
    /// file -> library -> placeholder offsets
    #[serde(default)]
    pub link_references: BTreeMap<String, BTreeMap<String, Vec<ByteRange>>>,
    #[serde(default)]
    pub immutable_references: BTreeMap<String, Vec<ByteRange>>,
    #[serde(default)]
    pub generated_sources: Vec<GeneratedSource>,
}

impl BytecodeOutput {
    /// Whether the contract has no runtime code, e.g. because it is abstract or an interface.
    pub fn is_empty(&self) -> bool {
        normalize_hex(&self.object).is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: usize,
    pub length: usize,
}

/// Compiler-generated (Yul) source referenced by the source map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSource {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub contents: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ast: Option<Value>,
}

impl CompilerOutput {
    pub fn from_slice(raw: &[u8]) -> Result<Self, CompileError> {
        serde_json::from_slice(raw).map_err(|e| CompileError::MalformedOutput(e.to_string()))
    }

    /// Messages of all diagnostics with error severity.
    pub fn error_messages(&self) -> Vec<String> {
        self.errors
            .iter()
            .filter(|d| d.is_error())
            .map(|d| d.formatted_message.clone().unwrap_or_else(|| d.message.clone()))
            .collect()
    }

    /// Fails if the compiler reported any error. Warnings are only logged.
    pub fn check_diagnostics(&self) -> Result<(), CompileError> {
        for warning in self.errors.iter().filter(|d| !d.is_error()) {
            trace!(severity = %warning.severity, "{}", warning.message);
        }

        let errors = self.error_messages();
        if !errors.is_empty() {
            return Err(CompileError::Diagnostics(errors));
        }
        Ok(())
    }

    /// All `(source path, contract name, contract)` triples.
    pub fn contracts(&self) -> impl Iterator<Item = (&str, &str, &OutputContract)> {
        self.contracts.iter().flat_map(|(path, contracts)| {
            contracts.iter().map(move |(name, contract)| (path.as_str(), name.as_str(), contract))
        })
    }

    /// All `(source path, contract name, contract)` triples of contracts called `name` that
    /// carry runtime code.
    pub fn deployable_contracts_named(&self, name: &str) -> Vec<(&str, &str, &OutputContract)> {
        self.contracts()
            .filter(|(_, contract_name, contract)| {
                *contract_name == name &&
                    contract.deployed_bytecode().is_some_and(|b| !b.is_empty())
            })
            .collect()
    }
}
