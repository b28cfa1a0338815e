/// Asset fetching
///
/// Keys map to `{base}/{key}.{ext}`. Remote bases are fetched over HTTP with a
/// per-request timeout; anything else is read from the local filesystem.
use std::fs;
use std::io::{self, Read};
use std::time::Duration;

use crate::error::AudioError;

/// Upper bound on a single downloaded asset
const MAX_ASSET_BYTES: u64 = 32 * 1024 * 1024;

/// Source of raw asset bytes
pub trait AssetFetcher: Send + Sync {
    fn fetch(&self, location: &str, timeout: Duration) -> Result<Vec<u8>, AudioError>;
}

/// Build the location of one encoding of a key
pub fn asset_url(base: &str, key: &str, extension: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        format!("{}.{}", key, extension)
    } else {
        format!("{}/{}.{}", base, key, extension)
    }
}

/// Extension of a location, ignoring any query string
pub fn extension_of(location: &str) -> Option<&str> {
    let path = location.split(['?', '#']).next().unwrap_or(location);
    let file = path.rsplit('/').next()?;
    file.rsplit_once('.').map(|(_, ext)| ext).filter(|e| !e.is_empty())
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// HTTP and filesystem fetcher
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let user_agent = format!("vocab-audio/{}", env!("CARGO_PKG_VERSION"));
        Self {
            agent: ureq::AgentBuilder::new().user_agent(&user_agent).build(),
        }
    }

    fn fetch_remote(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, AudioError> {
        let response = self
            .agent
            .get(url)
            .timeout(timeout)
            .call()
            .map_err(|e| classify(url, e))?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_ASSET_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|e| match e.kind() {
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                    AudioError::Timeout(url.to_string())
                }
                _ => AudioError::Network(format!("{}: {}", url, e)),
            })?;
        Ok(bytes)
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

fn classify(url: &str, error: ureq::Error) -> AudioError {
    match error {
        ureq::Error::Status(404, _) | ureq::Error::Status(410, _) => {
            AudioError::NotFound(url.to_string())
        }
        ureq::Error::Status(code, _) => AudioError::Network(format!("{} returned {}", url, code)),
        ureq::Error::Transport(transport) => {
            let message = transport.to_string();
            if message.contains("timed out") || message.contains("Timeout") {
                AudioError::Timeout(url.to_string())
            } else {
                AudioError::Network(format!("{}: {}", url, message))
            }
        }
    }
}

impl AssetFetcher for HttpFetcher {
    fn fetch(&self, location: &str, timeout: Duration) -> Result<Vec<u8>, AudioError> {
        if is_remote(location) {
            return self.fetch_remote(location, timeout);
        }

        let path = location.strip_prefix("file://").unwrap_or(location);
        fs::read(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => AudioError::NotFound(location.to_string()),
            _ => AudioError::Network(format!("{}: {}", location, e)),
        })
    }
}
