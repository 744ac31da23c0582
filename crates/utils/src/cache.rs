use std::{fs, marker::PhantomData, path::PathBuf, time::Duration};

use alloy_chains::Chain;
use eyre::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Default time-to-live of cached explorer responses and contract sources: one day, since
/// verified sources rarely change.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(86400);

/// Layout of sourcelens' cache directory.
#[derive(Debug, Clone, Default)]
pub struct CachePath {
    root: Option<PathBuf>,
}

impl CachePath {
    /// New cache path.
    pub fn new(root: Option<impl Into<PathBuf>>) -> Self {
        Self { root: root.map(Into::into) }
    }

    /// Returns the path to sourcelens' cache dir: `~/.sourcelens/cache` by default.
    pub fn cache_dir(&self) -> Option<PathBuf> {
        self.root
            .clone()
            .or_else(|| dirs_next::home_dir().map(|p| p.join(".sourcelens").join("cache")))
    }

    /// Returns the path to the explorer response cache dir: `<cache_root>/etherscan`.
    pub fn etherscan_cache_dir(&self) -> Option<PathBuf> {
        Some(self.cache_dir()?.join("etherscan"))
    }

    /// Returns the path to the explorer response cache dir for `chain_id`:
    /// `<cache_root>/etherscan/<chain>`
    pub fn etherscan_chain_cache_dir(&self, chain_id: impl Into<Chain>) -> Option<PathBuf> {
        Some(self.etherscan_cache_dir()?.join(chain_id.into().to_string()))
    }

    /// Returns the path to the contract source cache dir: `<cache_root>/sources`.
    pub fn sources_cache_dir(&self) -> Option<PathBuf> {
        Some(self.cache_dir()?.join("sources"))
    }

    /// Returns the path to the contract source cache dir for `chain_id`:
    /// `<cache_root>/sources/<chain>`
    pub fn sources_chain_cache_dir(&self, chain_id: impl Into<Chain>) -> Option<PathBuf> {
        Some(self.sources_cache_dir()?.join(chain_id.into().to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheWrapper<T> {
    pub data: T,
    pub expires_at: u64,
}

impl<T> CacheWrapper<T> {
    pub fn new(data: T, ttl: Option<Duration>) -> Self {
        Self {
            data,
            expires_at: ttl
                .map(|ttl| ttl.as_secs().saturating_add(chrono::Utc::now().timestamp() as u64))
                .unwrap_or(u64::MAX),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at < chrono::Utc::now().timestamp() as u64
    }
}

/// A cache manager that stores data in the file system.
///  - `T` is the type of the data to be cached.
///  - `cache_dir` is the directory where the cache files are stored.
///  - `cache_ttl` is the time-to-live of the cache files. If it is `None`, the cache files will
///    never expire.
#[derive(Debug, Clone)]
pub struct Cache<T> {
    cache_dir: Option<PathBuf>,
    cache_ttl: Option<Duration>,
    phantom: PhantomData<T>,
}

impl<T> Cache<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(cache_dir: Option<impl Into<PathBuf>>, cache_ttl: Option<Duration>) -> Result<Self> {
        let cache_dir = cache_dir
            .map(|p| {
                let p = p.into();
                fs::create_dir_all(&p)?;
                Ok::<_, std::io::Error>(p)
            })
            .transpose()?;

        Ok(Self { cache_dir, cache_ttl, phantom: PhantomData })
    }

    pub fn cache_dir(&self) -> Option<&PathBuf> {
        self.cache_dir.as_ref()
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl
    }

    pub fn load_cache(&self, label: impl Into<String>) -> Option<T> {
        let cache_dir = self.cache_dir()?;
        let cache_file = cache_dir.join(format!("{}.json", label.into()));
        trace!("loading cache: {:?}", cache_file);
        if !cache_file.exists() {
            return None;
        }

        let content = fs::read_to_string(&cache_file).ok()?;
        let cache: CacheWrapper<_> = if let Ok(cache) = serde_json::from_str(&content) {
            cache
        } else {
            warn!("the cache file has been corrupted: {:?}", cache_file);
            let _ = fs::remove_file(&cache_file); // we do not care about the result
            return None;
        };

        if cache.is_expired() {
            trace!("the cache file has expired: {:?}", cache_file);
            let _ = fs::remove_file(&cache_file); // we do not care about the result
            None
        } else {
            trace!("hit the cache: {:?}", cache_file);
            Some(cache.data)
        }
    }

    pub fn save_cache(&self, label: impl Into<String>, data: &T) -> Result<()> {
        if let Some(cache_dir) = self.cache_dir() {
            let cache_file = cache_dir.join(format!("{}.json", label.into()));
            trace!("saving cache: {:?}", cache_file);

            let cache = CacheWrapper::new(data, self.cache_ttl);
            let content = serde_json::to_string(&cache)?;
            fs::write(&cache_file, content)?;
            Ok(())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_cache_paths() {
        let paths = CachePath::new(Some("/tmp/sl"));
        assert_eq!(paths.cache_dir(), Some(PathBuf::from("/tmp/sl")));
        assert_eq!(
            paths.sources_chain_cache_dir(Chain::mainnet()),
            Some(PathBuf::from("/tmp/sl/sources/mainnet"))
        );
        assert_eq!(
            paths.etherscan_chain_cache_dir(Chain::from_id(100)),
            Some(PathBuf::from("/tmp/sl/etherscan/gnosis"))
        );
    }

    #[test]
    fn test_cache_round_trip_and_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let cache: Cache<serde_json::Value> = Cache::new(Some(dir.path()), None).unwrap();

        assert!(cache.load_cache("missing").is_none());
        cache.save_cache("a", &json!({"x": 1})).unwrap();
        assert_eq!(cache.load_cache("a"), Some(json!({"x": 1})));

        fs::write(dir.path().join("b.json"), "{ not json").unwrap();
        assert!(cache.load_cache("b").is_none());
        assert!(!dir.path().join("b.json").exists());
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let cache: Cache<u64> = Cache::new(Some(dir.path()), None).unwrap();
        let expired = CacheWrapper { data: 7u64, expires_at: 0 };
        fs::write(dir.path().join("old.json"), serde_json::to_string(&expired).unwrap()).unwrap();

        assert!(cache.load_cache("old").is_none());
        assert!(!dir.path().join("old.json").exists());
    }
}
