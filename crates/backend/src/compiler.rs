//! Selection, installation and invocation of the Solidity compiler.

use std::{path::PathBuf, sync::Mutex};

use foundry_compilers::solc::Solc;
use once_cell::sync::Lazy;
use semver::Version;

use crate::{
    artifact::CompilerInput,
    error::{CompileError, ConfigError},
};

/// Serializes installs across threads, so two runs needing the same release do not race on the
/// install directory.
static INSTALL_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// An installed compiler binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedCompiler {
    /// The version the compiler reports.
    pub version: Version,
    pub path: PathBuf,
}

/// The external Solidity compiler.
pub trait CompilerDriver: Send + Sync {
    /// Returns the installed compiler for `version`, or `None` if it is not installed.
    fn select(&self, version: &Version) -> Result<Option<SelectedCompiler>, ConfigError>;

    /// Installs the compiler for `version`.
    fn install(&self, version: &Version) -> Result<(), ConfigError>;

    /// Runs a standard-JSON compilation and returns the raw output.
    fn compile(
        &self,
        compiler: &SelectedCompiler,
        input: &CompilerInput,
    ) -> Result<Vec<u8>, CompileError>;
}

/// Drives `solc` releases managed by svm.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolcDriver;

impl CompilerDriver for SolcDriver {
    fn select(&self, version: &Version) -> Result<Option<SelectedCompiler>, ConfigError> {
        let solc = Solc::find_svm_installed_version(version)
            .map_err(|e| ConfigError::UnresolvableVersion(format!("{version}: {e}")))?;
        Ok(solc.map(|solc| SelectedCompiler { version: solc.version, path: solc.solc }))
    }

    fn install(&self, version: &Version) -> Result<(), ConfigError> {
        install_once(self, version, || {
            info!(%version, "installing solc");
            Solc::blocking_install(version).map_err(|e| ConfigError::InstallFailed {
                version: version.clone(),
                reason: e.to_string(),
            })?;
            Ok(())
        })
    }

    fn compile(
        &self,
        compiler: &SelectedCompiler,
        input: &CompilerInput,
    ) -> Result<Vec<u8>, CompileError> {
        let solc = Solc::new_with_version(&compiler.path, compiler.version.clone());
        trace!(path = ?compiler.path, version = %compiler.version, "running solc");
        solc.compile_output(input).map_err(|e| CompileError::Failed(e.to_string()))
    }
}

/// Runs `install` under the install lock, unless `driver` already has `version` once the lock
/// is held.
pub fn install_once<D: CompilerDriver + ?Sized>(
    driver: &D,
    version: &Version,
    install: impl FnOnce() -> Result<(), ConfigError>,
) -> Result<(), ConfigError> {
    let _guard = INSTALL_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    // Another run may have installed it while we waited for the lock.
    if driver.select(version)?.is_some() {
        debug!(%version, "compiler installed concurrently");
        return Ok(());
    }
    install()
}

/// Parses an explorer compiler version such as `v0.8.19+commit.7dd6d404`.
///
/// Nightly builds cannot be installed, so any pre-release or build suffix is dropped.
pub fn parse_compiler_version(raw: &str) -> Result<Version, ConfigError> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    let core = trimmed.split(['+', '-']).next().unwrap_or_default();

    let version =
        Version::parse(core).map_err(|_| ConfigError::UnresolvableVersion(raw.to_string()))?;
    Ok(Version::new(version.major, version.minor, version.patch))
}
