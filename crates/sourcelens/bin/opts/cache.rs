use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;
use sourcelens_utils::cache::CachePath;

#[derive(Clone, Debug, Default, Serialize, Parser)]
pub struct CacheOpts {
    /// The root directory for the cache. If not provided, the default is
    /// `~/.sourcelens/cache`.
    #[clap(long, env = "SOURCELENS_CACHE_ROOT", conflicts_with = "no_cache")]
    pub cache_root: Option<PathBuf>,

    /// Do not use the cache.
    #[clap(long, conflicts_with = "cache_root")]
    pub no_cache: bool,
}

impl CacheOpts {
    pub fn cache_path(&self) -> Option<CachePath> {
        if self.no_cache {
            None
        } else {
            Some(CachePath::new(self.cache_root.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn test_cache_root_from_env() {
        std::env::set_var("SOURCELENS_CACHE_ROOT", "/tmp/sourcelens-test-cache");
        let opts = CacheOpts::parse_from(["sourcelens"]);
        std::env::remove_var("SOURCELENS_CACHE_ROOT");

        assert_eq!(opts.cache_root, Some(PathBuf::from("/tmp/sourcelens-test-cache")));
        assert_eq!(
            opts.cache_path().and_then(|p| p.cache_dir()),
            Some(PathBuf::from("/tmp/sourcelens-test-cache"))
        );
    }

    #[test]
    #[serial]
    fn test_no_cache() {
        std::env::remove_var("SOURCELENS_CACHE_ROOT");
        let opts = CacheOpts::parse_from(["sourcelens", "--no-cache"]);
        assert!(opts.cache_path().is_none());
    }
}
