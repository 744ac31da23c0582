use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use alloy_chains::Chain;
use alloy_primitives::{Address, Bytes};
use eyre::{OptionExt, Result};
use foundry_block_explorers::Client;
use semver::Version;
use serde::{Deserialize, Serialize};
use sourcelens_utils::{
    cache::{Cache, CachePath, DEFAULT_CACHE_TTL},
    workdir::RunDirectory,
};

use crate::{
    acquisition::{ContractSource, EtherscanProvider, SourceProvider},
    analysis::comparison::{BytecodeComparator, ComparisonResult, MatchClass},
    artifact::{CompilerInput, CompilerOutput, OutputContract, SourceMapArtifact},
    compiler::{parse_compiler_version, CompilerDriver, SelectedCompiler, SolcDriver},
    config::PipelineConfig,
    error::{AcquisitionError, CompileError, ConfigError, ErrorKind, VerificationError},
    utils::compilation::link_contracts_fakely,
};

/// The stages of a verification run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "FETCHING")]
    Fetching,
    #[serde(rename = "EXTRACTING_SOURCES")]
    ExtractingSources,
    #[serde(rename = "CONFIGURING")]
    Configuring,
    #[serde(rename = "COMPILING")]
    Compiling,
    #[serde(rename = "DECODING_SOURCEMAP")]
    DecodingSourceMap,
    #[serde(rename = "COMPARING")]
    Comparing,
    #[serde(rename = "DONE")]
    Done,
}

impl Stage {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fetching => "FETCHING",
            Self::ExtractingSources => "EXTRACTING_SOURCES",
            Self::Configuring => "CONFIGURING",
            Self::Compiling => "COMPILING",
            Self::DecodingSourceMap => "DECODING_SOURCEMAP",
            Self::Comparing => "COMPARING",
            Self::Done => "DONE",
        }
    }

    pub const fn next(&self) -> Option<Self> {
        match self {
            Self::Fetching => Some(Self::ExtractingSources),
            Self::ExtractingSources => Some(Self::Configuring),
            Self::Configuring => Some(Self::Compiling),
            Self::Compiling => Some(Self::DecodingSourceMap),
            Self::DecodingSourceMap => Some(Self::Comparing),
            Self::Comparing => Some(Self::Done),
            Self::Done => None,
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the current stage of a run, so failures are tagged with where they happened.
#[derive(Debug)]
struct StageTracker {
    current: Stage,
    completed: Vec<Stage>,
}

impl StageTracker {
    fn new() -> Self {
        debug!(stage = %Stage::Fetching, "entering stage");
        Self { current: Stage::Fetching, completed: Vec::new() }
    }

    fn advance(&mut self) {
        if let Some(next) = self.current.next() {
            self.completed.push(self.current);
            self.current = next;
            debug!(stage = %next, "entering stage");
        }
    }

    /// All stages entered so far, the current one included.
    fn history(&self) -> Vec<Stage> {
        self.completed.iter().copied().chain([self.current]).collect()
    }

    fn fail(&self, kind: impl Into<ErrorKind>) -> VerificationError {
        let error = VerificationError::new(self.current, kind);
        warn!(stage = %self.current, "{}", error.kind);
        error
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub address: Address,
    pub contract_name: String,
    pub source_path: String,
    pub compiler_version: Version,
    /// ABI-encoded constructor arguments as published by the explorer.
    #[serde(default)]
    pub constructor_arguments: Bytes,
    pub comparison: ComparisonResult,
    pub class: MatchClass,
    /// Whether the match class passes the configured policy.
    pub verified: bool,
    pub stages: Vec<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub summary: VerificationSummary,
    pub artifact: SourceMapArtifact,
}

#[derive(Default)]
pub struct VerificationPipelineBuilder {
    chain: Option<Chain>,
    api_key: Option<String>,
    explorer_api_url: Option<String>,
    rpc_url: Option<String>,
    cache_root: Option<PathBuf>,
    cache_ttl: Option<Duration>,
    no_cache: bool,
    out_dir: Option<PathBuf>,
    config: PipelineConfig,

    source_provider: Option<Arc<dyn SourceProvider>>,
    compiler: Option<Arc<dyn CompilerDriver>>,
}

impl VerificationPipelineBuilder {
    /// Set the chain to use.
    /// If not set, the default chain will be used.
    pub fn chain(mut self, chain: Chain) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Set the etherscan API key.
    /// If not set, a blank API key will be used.
    pub fn etherscan_api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// Use an Etherscan-compatible explorer API other than the chain's default.
    pub fn explorer_api_url(mut self, url: String) -> Self {
        self.explorer_api_url = Some(url);
        self
    }

    /// Set the RPC endpoint the deployed bytecode is read from.
    pub fn rpc_url(mut self, url: String) -> Self {
        self.rpc_url = Some(url);
        self
    }

    /// Set the cache root directory.
    /// If not set, the default cache directory will be used.
    pub fn cache_root(mut self, path: PathBuf) -> Self {
        self.cache_root = Some(path);
        self
    }

    /// Set the cache TTL.
    /// If not set, the default cache TTL will be used.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Disable all caching.
    pub fn no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    /// Write the artifacts of every run into a fresh directory below `path`.
    pub fn out_dir(mut self, path: PathBuf) -> Self {
        self.out_dir = Some(path);
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom source provider instead of the explorer and RPC node.
    pub fn source_provider(mut self, provider: Arc<dyn SourceProvider>) -> Self {
        self.source_provider = Some(provider);
        self
    }

    /// Use a custom compiler driver instead of svm-managed solc.
    pub fn compiler(mut self, compiler: Arc<dyn CompilerDriver>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// Build the verification pipeline.
    pub fn build(self) -> Result<VerificationPipeline> {
        debug!(
            chain = ?self.chain,
            explorer = ?self.explorer_api_url,
            cache_root = ?self.cache_root,
            no_cache = self.no_cache,
            "building verification pipeline with {:?}",
            self.config
        );

        let source_provider = match self.source_provider {
            Some(provider) => provider,
            None => {
                let chain = self.chain.unwrap_or_default();
                let paths = CachePath::new(self.cache_root);
                let ttl = self.cache_ttl.unwrap_or(DEFAULT_CACHE_TTL);

                let cb = Client::builder().chain(chain)?;
                let cb = if self.no_cache {
                    cb
                } else {
                    cb.with_cache(paths.etherscan_chain_cache_dir(chain), ttl)
                };
                let cb =
                    if let Some(api_key) = self.api_key { cb.with_api_key(api_key) } else { cb };
                let cb = if let Some(url) = self.explorer_api_url {
                    cb.with_api_url(url.as_str())?
                } else {
                    cb
                };
                let client = cb.build()?;

                let cache = if self.no_cache {
                    None
                } else {
                    Some(Cache::new(paths.sources_chain_cache_dir(chain), Some(ttl))?)
                };
                let rpc_url = self.rpc_url.ok_or_eyre("missing rpc url")?;
                Arc::new(EtherscanProvider::new(client, &rpc_url, cache)?)
            }
        };

        Ok(VerificationPipeline {
            source_provider,
            compiler: self.compiler.unwrap_or_else(|| Arc::new(SolcDriver)),
            comparator: BytecodeComparator::new(self.config.comparison),
            config: self.config,
            out_dir: self.out_dir,
        })
    }
}

/// Recompiles verified contracts and checks them against the chain.
pub struct VerificationPipeline {
    source_provider: Arc<dyn SourceProvider>,
    compiler: Arc<dyn CompilerDriver>,
    comparator: BytecodeComparator,
    config: PipelineConfig,
    out_dir: Option<PathBuf>,
}

impl VerificationPipeline {
    pub fn builder() -> VerificationPipelineBuilder {
        VerificationPipelineBuilder::default()
    }

    /// Runs all stages for `address`, failing fast at the first failing stage.
    ///
    /// A mismatching bytecode is not an error: the report carries the classification and
    /// whether it passes the policy.
    pub async fn verify(&self, address: Address) -> Result<VerificationReport, VerificationError> {
        let mut tracker = StageTracker::new();

        let source = self.fetch(address).await.map_err(|e| tracker.fail(e))?;
        tracker.advance();

        let sources = extract_sources(&source).map_err(|e| tracker.fail(e))?;
        tracker.advance();

        let run_dir = self.create_run_dir(address).map_err(|e| tracker.fail(e))?;
        let (compiler, input) = self
            .configure(&source, sources, run_dir.as_ref())
            .await
            .map_err(|e| tracker.fail(e))?;
        tracker.advance();

        let output = self
            .compile(&compiler, &input, run_dir.as_ref())
            .await
            .map_err(|e| tracker.fail(e))?;
        let (source_path, contract_name, contract) = self
            .select_contract(&output, &source.contract_name, &source.deployed_bytecode)
            .map_err(|e| tracker.fail(e))?;
        tracker.advance();

        let sources: BTreeMap<_, _> =
            input.sources.iter().map(|(path, s)| (path.clone(), s.content.clone())).collect();
        let artifact = SourceMapArtifact::from_contract(
            &output,
            source_path,
            contract_name,
            contract,
            &sources,
        )
        .map_err(|e| tracker.fail(e))?;
        if let Some(run_dir) = &run_dir {
            write_artifact(run_dir, &artifact).map_err(|e| tracker.fail(e))?;
        }
        tracker.advance();

        let comparison = self
            .comparator
            .compare_hex(&artifact.bytecode, &source.deployed_bytecode.to_string())
            .map_err(|e| tracker.fail(e))?;
        let class = self.config.policy.classify(&comparison);
        let verified = self.config.policy.passes(class);
        tracker.advance();

        let summary = VerificationSummary {
            address,
            contract_name: contract_name.to_string(),
            source_path: source_path.to_string(),
            compiler_version: compiler.version,
            constructor_arguments: source.constructor_arguments.clone(),
            comparison,
            class,
            verified,
            stages: tracker.history(),
            run_dir: run_dir.as_ref().map(|dir| dir.path().to_path_buf()),
        };
        if let Some(run_dir) = &run_dir {
            run_dir
                .write_json("report.json", &summary)
                .map_err(|e| tracker.fail(ConfigError::Workspace(e.to_string())))?;
        }

        info!(
            %address,
            %class,
            verified,
            similarity = summary.comparison.similarity,
            "verification finished"
        );
        Ok(VerificationReport { summary, artifact })
    }

    async fn fetch(&self, address: Address) -> Result<ContractSource, AcquisitionError> {
        let timeout = self.config.timeouts.fetch();
        tokio::time::timeout(timeout, self.source_provider.fetch(address))
            .await
            .map_err(|_| AcquisitionError::Timeout(timeout))?
    }

    fn create_run_dir(&self, address: Address) -> Result<Option<RunDirectory>, ConfigError> {
        self.out_dir
            .as_ref()
            .map(|parent| RunDirectory::create(parent, &address.to_string()))
            .transpose()
            .map_err(|e| ConfigError::Workspace(e.to_string()))
    }

    /// Builds the compiler input and makes sure the requested compiler is installed.
    async fn configure(
        &self,
        source: &ContractSource,
        sources: BTreeMap<String, String>,
        run_dir: Option<&RunDirectory>,
    ) -> Result<(SelectedCompiler, CompilerInput), ConfigError> {
        for path in sources.keys() {
            validate_source_path(path)?;
        }

        let version = parse_compiler_version(&source.compiler_version)?;
        let input = CompilerInput::for_contract(source, &sources, &version);

        if let Some(run_dir) = run_dir {
            let workspace = |e: eyre::Report| ConfigError::Workspace(e.to_string());
            for (path, content) in &sources {
                run_dir.write(Path::new("sources").join(path), content).map_err(workspace)?;
            }
            run_dir.write_json("compiler_input.json", &input).map_err(workspace)?;
        }

        let driver = Arc::clone(&self.compiler);
        let requested = version.clone();
        let compiler =
            tokio::task::spawn_blocking(move || select_or_install(driver.as_ref(), &requested))
                .await
                .map_err(|e| ConfigError::InstallFailed { version, reason: e.to_string() })??;

        debug!(version = %compiler.version, path = ?compiler.path, "selected compiler");
        Ok((compiler, input))
    }

    async fn compile(
        &self,
        compiler: &SelectedCompiler,
        input: &CompilerInput,
        run_dir: Option<&RunDirectory>,
    ) -> Result<CompilerOutput, ErrorKind> {
        let driver = Arc::clone(&self.compiler);
        let (selected, owned_input) = (compiler.clone(), input.clone());
        let task = tokio::task::spawn_blocking(move || driver.compile(&selected, &owned_input));

        // The compiler keeps running in the background after a timeout.
        let timeout = self.config.timeouts.compile();
        let raw = match tokio::time::timeout(timeout, task).await {
            Err(_) => return Err(CompileError::Timeout(timeout).into()),
            Ok(Err(e)) => return Err(CompileError::Failed(e.to_string()).into()),
            Ok(Ok(raw)) => raw?,
        };

        if let Some(run_dir) = run_dir {
            run_dir
                .write("compiler_output.json", &raw)
                .map_err(|e| ConfigError::Workspace(e.to_string()))?;
        }

        let output = CompilerOutput::from_slice(&raw)?;
        output.check_diagnostics()?;
        Ok(output)
    }

    /// Picks the contract called `name`. If several compiled contracts share the name, the one
    /// whose runtime code is most similar to the deployed code wins.
    fn select_contract<'a>(
        &self,
        output: &'a CompilerOutput,
        name: &str,
        deployed: &[u8],
    ) -> Result<(&'a str, &'a str, &'a OutputContract), CompileError> {
        let candidates = output.deployable_contracts_named(name);
        if candidates.len() > 1 {
            debug!(name, candidates = candidates.len(), "selecting the most similar contract");
        }

        let mut best: Option<(f64, (&str, &str, &OutputContract))> = None;
        for candidate @ (path, _, contract) in candidates {
            let similarity = contract
                .deployed_bytecode()
                .map(|bytecode| link_contracts_fakely(bytecode, None))
                .and_then(|linked| hex::decode(linked).ok())
                .and_then(|compiled| self.comparator.compare(&compiled, deployed).ok())
                .map_or(0.0, |result| result.similarity);
            trace!(path, similarity, "candidate contract");

            if best.map_or(true, |(best, _)| similarity > best) {
                best = Some((similarity, candidate));
            }
        }

        best.map(|(_, candidate)| candidate)
            .ok_or_else(|| CompileError::ContractNotFound(name.to_string()))
    }
}

/// Returns the source tree of `source`, which must not be empty.
fn extract_sources(source: &ContractSource) -> Result<BTreeMap<String, String>, ConfigError> {
    if source.sources.is_empty() {
        return Err(ConfigError::MalformedSourceTree("no source files".to_string()));
    }

    debug!(files = source.sources.len(), "extracted source tree");
    Ok(source.sources.clone())
}

/// Source paths must stay inside the project root.
fn validate_source_path(path: &str) -> Result<(), ConfigError> {
    let malformed = |reason: &str| ConfigError::MalformedSourceTree(format!("`{path}` {reason}"));

    if path.trim().is_empty() {
        return Err(malformed("is empty"));
    }
    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => return Err(malformed("escapes the project root")),
            Component::RootDir | Component::Prefix(_) => return Err(malformed("is absolute")),
        }
    }
    Ok(())
}

/// Selects the installed compiler for `version`, installing it once if it is missing.
fn select_or_install(
    driver: &dyn CompilerDriver,
    version: &Version,
) -> Result<SelectedCompiler, ConfigError> {
    let selected = match driver.select(version)? {
        Some(selected) => selected,
        None => {
            info!(%version, "compiler not installed, installing");
            driver.install(version)?;
            driver.select(version)?.ok_or_else(|| ConfigError::InstallFailed {
                version: version.clone(),
                reason: "compiler still missing after install".to_string(),
            })?
        }
    };

    if selected.version != *version {
        return Err(ConfigError::VersionMismatch {
            expected: version.clone(),
            found: selected.version,
        });
    }
    Ok(selected)
}

fn write_artifact(run_dir: &RunDirectory, artifact: &SourceMapArtifact) -> Result<(), ConfigError> {
    let workspace = |e: eyre::Report| ConfigError::Workspace(e.to_string());
    run_dir.write_json("runtime_sourcemap.json", artifact).map_err(workspace)?;
    run_dir.write("runtime_sourcemap.txt", &artifact.raw_sourcemap).map_err(workspace)?;
    Ok(())
}
