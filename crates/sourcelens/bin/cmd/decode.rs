use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::Parser;
use eyre::{Result, WrapErr};
use serde::Deserialize;
use sourcelens_backend::artifact::{CompilerOutput, SourceMapArtifact};

#[derive(Clone, Debug, Parser)]
pub struct DecodeArgs {
    /// Path to the compiler's standard JSON output.
    #[arg(value_name = "COMPILER_OUTPUT")]
    pub compiler_output: PathBuf,

    /// Path to the compiler's standard JSON input, which carries the source contents.
    #[arg(long, short, value_name = "SOLC_INPUT", conflicts_with = "base_path")]
    pub input: Option<PathBuf>,

    /// Directory the source paths are resolved against. Defaults to the directory of the
    /// compiler output.
    #[arg(long, value_name = "DIR")]
    pub base_path: Option<PathBuf>,

    /// The contract to decode, as `Name` or `path:Name`. Defaults to the first contract with
    /// runtime code.
    #[arg(long, short)]
    pub contract: Option<String>,

    /// Where to write the artifact. Defaults to `runtime_sourcemap.json` beside the compiler
    /// output.
    #[arg(long, short, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct SolcInput {
    #[serde(default)]
    sources: BTreeMap<String, SolcInputSource>,
}

#[derive(Debug, Deserialize)]
struct SolcInputSource {
    content: Option<String>,
}

impl DecodeArgs {
    pub fn run(self) -> Result<ExitCode> {
        let raw = fs::read(&self.compiler_output)
            .wrap_err_with(|| format!("failed to read {}", self.compiler_output.display()))?;
        let output = CompilerOutput::from_slice(&raw)?;
        output.check_diagnostics()?;

        let parent = self.compiler_output.parent().unwrap_or_else(|| Path::new("."));
        let contents = match &self.input {
            Some(input) => contents_from_input(input)?,
            None => {
                let base = self.base_path.as_deref().unwrap_or(parent);
                contents_from_disk(&output, base)?
            }
        };

        let artifact =
            SourceMapArtifact::from_compiler_output(&output, self.contract.as_deref(), &contents)?;

        let out = self.output.unwrap_or_else(|| parent.join("runtime_sourcemap.json"));
        fs::write(&out, serde_json::to_vec_pretty(&artifact)?)
            .wrap_err_with(|| format!("failed to write {}", out.display()))?;
        let raw_out = out.with_extension("txt");
        fs::write(&raw_out, &artifact.raw_sourcemap)
            .wrap_err_with(|| format!("failed to write {}", raw_out.display()))?;

        let meta = &artifact.metadata;
        println!("contract:      {} ({})", meta.contract_name, meta.source_path);
        println!("instructions:  {}", meta.total_instructions);
        println!("source files:  {}", meta.unique_source_files);
        println!("bytecode:      {} bytes ({} metadata)", meta.bytecode_length, meta.metadata_length);
        if let Some(range) = &meta.pc_range {
            println!("pc range:      {} - {}", range.min, range.max);
        }
        for (jump, count) in &meta.jump_type_counts {
            println!("  {:<22} {count}", jump.description());
        }
        println!("wrote {} and {}", out.display(), raw_out.display());

        Ok(ExitCode::SUCCESS)
    }
}

fn contents_from_input(path: &Path) -> Result<BTreeMap<String, String>> {
    let raw = fs::read(path).wrap_err_with(|| format!("failed to read {}", path.display()))?;
    let input: SolcInput = serde_json::from_slice(&raw)
        .wrap_err_with(|| format!("invalid compiler input {}", path.display()))?;
    Ok(input
        .sources
        .into_iter()
        .filter_map(|(path, source)| source.content.map(|content| (path, content)))
        .collect())
}

/// Reads every source named by the compiler output from `base`. Unreadable files are skipped,
/// decoding reports them if the source map needs them.
fn contents_from_disk(output: &CompilerOutput, base: &Path) -> Result<BTreeMap<String, String>> {
    let mut contents = BTreeMap::new();
    for path in output.sources.keys() {
        match fs::read_to_string(base.join(path)) {
            Ok(content) => {
                contents.insert(path.clone(), content);
            }
            Err(e) => warn!(%path, "cannot read source: {e}"),
        }
    }
    Ok(contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTENT: &str = "contract A {\n  x = 1;\n}\n";

    fn write_output(dir: &Path) -> PathBuf {
        let output = serde_json::json!({
            "sources": {"src/A.sol": {"id": 0}},
            "contracts": {
                "src/A.sol": {
                    "A": {"evm": {"deployedBytecode": {
                        "object": "6001600201",
                        "sourceMap": "11:8:0:-;15:3;:::i"
                    }}}
                }
            }
        });
        let path = dir.join("out.json");
        fs::write(&path, serde_json::to_vec(&output).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_decode_from_base_path() {
        let dir = tempfile::tempdir().unwrap();
        let output = write_output(dir.path());
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/A.sol"), CONTENT).unwrap();

        let args = DecodeArgs {
            compiler_output: output,
            input: None,
            base_path: None,
            contract: Some("A".to_string()),
            output: None,
        };
        args.run().unwrap();

        let written = fs::read(dir.path().join("runtime_sourcemap.json")).unwrap();
        let artifact: SourceMapArtifact = serde_json::from_slice(&written).unwrap();
        assert_eq!(artifact.metadata.total_instructions, 3);
        assert_eq!(artifact.lookup(2).unwrap().snippet.as_deref(), Some("x ="));
        assert_eq!(
            fs::read_to_string(dir.path().join("runtime_sourcemap.txt")).unwrap(),
            "11:8:0:-;15:3;:::i"
        );
    }

    #[test]
    fn test_decode_from_solc_input() {
        let dir = tempfile::tempdir().unwrap();
        let output = write_output(dir.path());
        let input = dir.path().join("in.json");
        let raw = serde_json::json!({"sources": {"src/A.sol": {"content": CONTENT}}});
        fs::write(&input, serde_json::to_vec(&raw).unwrap()).unwrap();

        let target = dir.path().join("custom.json");
        let args = DecodeArgs {
            compiler_output: output,
            input: Some(input),
            base_path: None,
            contract: None,
            output: Some(target.clone()),
        };
        args.run().unwrap();
        assert!(target.exists());
        assert!(dir.path().join("custom.txt").exists());
    }

    #[test]
    fn test_decode_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let output = write_output(dir.path());

        let args = DecodeArgs {
            compiler_output: output,
            input: None,
            base_path: None,
            contract: None,
            output: None,
        };
        assert!(args.run().is_err());
    }
}
