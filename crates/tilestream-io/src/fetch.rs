//! Tile payload fetching.

use std::collections::HashMap;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use thiserror::Error;

// ── Errors ────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("No tile data for '{0}'")]
    NotFound(String),
}

/// Retrieves raw tile payloads by URL. Called from background fetch threads.
pub trait TileFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

impl<T: TileFetcher + ?Sized> TileFetcher for Arc<T> {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        (**self).fetch(url)
    }
}

impl<T: TileFetcher + ?Sized> TileFetcher for Box<T> {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        (**self).fetch(url)
    }
}

// ── HTTP ──────────────────────────────────────────────────────────────

pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("tilestream/", env!("CARGO_PKG_VERSION")))
            .build();
        Self { agent }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl TileFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        match self.agent.get(url).call() {
            Ok(response) => {
                let mut buf = Vec::new();
                response.into_reader().read_to_end(&mut buf)?;
                Ok(buf)
            }
            Err(ureq::Error::Status(code, _)) => Err(FetchError::Status(code)),
            Err(ureq::Error::Transport(transport)) => {
                Err(FetchError::Transport(transport.to_string()))
            }
        }
    }
}

// ── Files ─────────────────────────────────────────────────────────────

/// Reads `file://` URLs or plain paths, optionally below a root directory.
#[derive(Debug, Clone, Default)]
pub struct FileFetcher {
    root: Option<PathBuf>,
}

impl FileFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, url: &str) -> PathBuf {
        let path = url.strip_prefix("file://").unwrap_or(url);
        match &self.root {
            Some(root) => root.join(path.trim_start_matches('/')),
            None => PathBuf::from(path),
        }
    }
}

impl TileFetcher for FileFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        match std::fs::read(self.resolve(url)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(url.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ── Memory ────────────────────────────────────────────────────────────

/// Serves payloads from a map keyed by URL.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    tiles: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, payload: Vec<u8>) {
        if let Ok(mut tiles) = self.tiles.write() {
            tiles.insert(url.into(), payload);
        }
    }

    pub fn len(&self) -> usize {
        self.tiles.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TileFetcher for MemoryFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.tiles
            .read()
            .ok()
            .and_then(|tiles| tiles.get(url).cloned())
            .ok_or_else(|| FetchError::NotFound(url.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_fetcher() {
        let fetcher = MemoryFetcher::new();
        fetcher.insert("mem://0/0/0", vec![1, 2, 3]);
        assert_eq!(fetcher.fetch("mem://0/0/0").unwrap(), vec![1, 2, 3]);
        assert!(matches!(fetcher.fetch("mem://1/0/0"), Err(FetchError::NotFound(_))));
        assert_eq!(fetcher.len(), 1);
    }

    #[test]
    fn test_file_fetcher() {
        let dir = std::env::temp_dir().join(format!("tilestream-fetch-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("3/2")).unwrap();
        std::fs::write(dir.join("3/2/1.pbf"), [7u8, 8]).unwrap();

        let fetcher = FileFetcher::with_root(&dir);
        assert_eq!(fetcher.fetch("file:///3/2/1.pbf").unwrap(), vec![7, 8]);
        assert_eq!(fetcher.fetch("3/2/1.pbf").unwrap(), vec![7, 8]);
        assert!(matches!(fetcher.fetch("3/2/9.pbf"), Err(FetchError::NotFound(_))));

        let absolute = FileFetcher::new();
        let path = dir.join("3/2/1.pbf");
        assert_eq!(absolute.fetch(&format!("file://{}", path.display())).unwrap(), vec![7, 8]);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_shared_fetcher() {
        let fetcher: Arc<dyn TileFetcher> = Arc::new(MemoryFetcher::new());
        assert!(fetcher.fetch("missing").is_err());
    }
}
