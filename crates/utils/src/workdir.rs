use std::{
    fs, io,
    path::{Path, PathBuf},
};

use eyre::{Result, WrapErr};
use serde::Serialize;

/// A per-run output directory, `<parent>/verification_<label>_<timestamp>`.
///
/// Every run gets a fresh directory, so concurrent runs never share files.
#[derive(Debug, Clone)]
pub struct RunDirectory {
    root: PathBuf,
}

impl RunDirectory {
    /// Creates the run directory below `parent`.
    pub fn create(parent: impl AsRef<Path>, label: &str) -> Result<Self> {
        let parent = parent.as_ref();
        fs::create_dir_all(parent)
            .wrap_err_with(|| format!("failed to create {}", parent.display()))?;

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S_%f");
        let base = format!("verification_{label}_{timestamp}");
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 { base.clone() } else { format!("{base}_{attempt}") };
            let root = parent.join(name);
            match fs::create_dir(&root) {
                Ok(()) => {
                    debug!("created run directory: {:?}", root);
                    return Ok(Self { root });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => {
                    return Err(e)
                        .wrap_err_with(|| format!("failed to create run directory {}", root.display()))
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Writes `content` to `relative`, creating parent directories as needed.
    pub fn write(&self, relative: impl AsRef<Path>, content: impl AsRef<[u8]>) -> Result<PathBuf> {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content).wrap_err_with(|| format!("failed to write {}", path.display()))?;

        trace!("wrote {:?}", path);
        Ok(path)
    }

    /// Writes `value` as pretty-printed JSON to `relative`.
    pub fn write_json<T: Serialize>(&self, relative: impl AsRef<Path>, value: &T) -> Result<PathBuf> {
        self.write(relative, serde_json::to_vec_pretty(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_directory_layout() {
        let parent = tempfile::tempdir().unwrap();
        let run = RunDirectory::create(parent.path(), "0xabc").unwrap();

        let name = run.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("verification_0xabc_"));

        let source = run.write("sources/src/A.sol", "contract A {}").unwrap();
        assert_eq!(fs::read_to_string(source).unwrap(), "contract A {}");

        let report = run.write_json("report.json", &serde_json::json!({"ok": true})).unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&fs::read(report).unwrap()).unwrap();
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn test_runs_are_isolated() {
        let parent = tempfile::tempdir().unwrap();
        let first = RunDirectory::create(parent.path(), "a").unwrap();
        let second = RunDirectory::create(parent.path(), "a").unwrap();
        assert_ne!(first.path(), second.path());
    }
}
