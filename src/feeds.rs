//! Feed registry
//!
//! An ordered set of feed descriptors persisted as TOML. Mutations write
//! through to disk; remove/toggle match by exact name or URL
//! (case-sensitive); adding a duplicate URL fails with a specific error.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One feed descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSource {
    pub name: String,
    pub url: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_category() -> String {
    "uncategorized".to_string()
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FeedsFile {
    #[serde(default)]
    feeds: Vec<FeedSource>,
}

/// Outcome of a single-URL validation probe
#[derive(Debug, Clone, Serialize)]
pub struct FeedValidation {
    pub url: String,
    pub valid: bool,
    pub title: Option<String>,
    pub entry_count: usize,
    pub error: Option<String>,
}

/// TOML-persisted feed registry
///
/// Reads are lock-free snapshots of the file; mutations serialize on a
/// write lock so concurrent read-modify-write cycles cannot race (two
/// concurrent adds of the same URL: exactly one succeeds).
pub struct FeedRegistry {
    path: PathBuf,
    write_lock: parking_lot::Mutex<()>,
}

impl FeedRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: parking_lot::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All feeds in file order.
    pub fn list(&self) -> Result<Vec<FeedSource>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let file: FeedsFile =
            toml::from_str(&raw).map_err(|e| Error::Feed(format!("invalid feeds file: {}", e)))?;
        Ok(file.feeds)
    }

    fn save(&self, feeds: &[FeedSource]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = FeedsFile {
            feeds: feeds.to_vec(),
        };
        let raw = toml::to_string_pretty(&file)
            .map_err(|e| Error::Feed(format!("cannot serialize feeds: {}", e)))?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }

    /// Append a feed. Fails if the URL is already registered.
    pub fn add(&self, name: &str, url: &str, category: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut feeds = self.list()?;
        if let Some(existing) = feeds.iter().find(|f| f.url == url) {
            return Err(Error::Feed(format!(
                "feed URL already registered as '{}'",
                existing.name
            )));
        }
        feeds.push(FeedSource {
            name: name.to_string(),
            url: url.to_string(),
            category: if category.is_empty() {
                default_category()
            } else {
                category.to_string()
            },
            enabled: true,
        });
        self.save(&feeds)?;
        tracing::info!(name, url, "Feed added");
        Ok(())
    }

    /// Remove by exact name or URL.
    pub fn remove(&self, identifier: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut feeds = self.list()?;
        let before = feeds.len();
        feeds.retain(|f| f.name != identifier && f.url != identifier);
        if feeds.len() == before {
            return Err(Error::Feed(format!("feed not found: {}", identifier)));
        }
        self.save(&feeds)?;
        tracing::info!(identifier, "Feed removed");
        Ok(())
    }

    /// Set the enabled flag by exact name or URL.
    pub fn set_enabled(&self, identifier: &str, enabled: bool) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut feeds = self.list()?;
        let feed = feeds
            .iter_mut()
            .find(|f| f.name == identifier || f.url == identifier)
            .ok_or_else(|| Error::Feed(format!("feed not found: {}", identifier)))?;
        feed.enabled = enabled;
        let name = feed.name.clone();
        self.save(&feeds)?;
        tracing::info!(feed = %name, enabled, "Feed toggled");
        Ok(())
    }

    /// Probe a URL: one GET with a 10-second timeout, then an RSS/Atom
    /// parse. Never mutates the registry.
    pub async fn validate(url: &str) -> FeedValidation {
        let mut result = FeedValidation {
            url: url.to_string(),
            valid: false,
            title: None,
            entry_count: 0,
            error: None,
        };

        let client = match reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                result.error = Some(e.to_string());
                return result;
            }
        };

        let response = match client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                result.error = Some(if e.is_timeout() {
                    "connection timed out".to_string()
                } else {
                    e.to_string()
                });
                return result;
            }
        };
        if !response.status().is_success() {
            result.error = Some(format!("HTTP {}", response.status()));
            return result;
        }
        let body = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                result.error = Some(e.to_string());
                return result;
            }
        };

        match feed_rs::parser::parse(&body[..]) {
            Ok(feed) => {
                result.valid = true;
                result.title = feed.title.map(|t| t.content);
                result.entry_count = feed.entries.len();
            }
            Err(_) => {
                result.error = Some("not a valid RSS/Atom feed".to_string());
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry() -> (FeedRegistry, TempDir) {
        let dir = TempDir::new().unwrap();
        (FeedRegistry::new(dir.path().join("feeds.toml")), dir)
    }

    #[test]
    fn test_add_list_round_trip_preserves_order() {
        let (reg, _dir) = registry();
        reg.add("B Feed", "https://b.example/rss", "tech").unwrap();
        reg.add("A Feed", "https://a.example/rss", "news").unwrap();

        let feeds = reg.list().unwrap();
        assert_eq!(feeds.len(), 2);
        assert_eq!(feeds[0].name, "B Feed");
        assert_eq!(feeds[1].name, "A Feed");
        assert!(feeds.iter().all(|f| f.enabled));
    }

    #[test]
    fn test_duplicate_url_fails() {
        let (reg, _dir) = registry();
        reg.add("One", "https://x.example/rss", "").unwrap();
        let err = reg.add("Two", "https://x.example/rss", "").unwrap_err();
        assert!(err.to_string().contains("already registered as 'One'"));
        assert_eq!(reg.list().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_by_name_or_url() {
        let (reg, _dir) = registry();
        reg.add("One", "https://x.example/rss", "").unwrap();
        reg.add("Two", "https://y.example/rss", "").unwrap();

        reg.remove("One").unwrap();
        reg.remove("https://y.example/rss").unwrap();
        assert!(reg.list().unwrap().is_empty());

        assert!(reg.remove("missing").is_err());
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        let (reg, _dir) = registry();
        reg.add("MyFeed", "https://x.example/rss", "").unwrap();
        assert!(reg.remove("myfeed").is_err());
        assert!(reg.set_enabled("MYFEED", false).is_err());
    }

    #[test]
    fn test_toggle_persists() {
        let (reg, _dir) = registry();
        reg.add("One", "https://x.example/rss", "").unwrap();
        reg.set_enabled("One", false).unwrap();
        assert!(!reg.list().unwrap()[0].enabled);
        reg.set_enabled("https://x.example/rss", true).unwrap();
        assert!(reg.list().unwrap()[0].enabled);
    }

    #[test]
    fn test_missing_file_lists_empty() {
        let (reg, _dir) = registry();
        assert!(reg.list().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_adds_of_same_url_one_wins() {
        let dir = TempDir::new().unwrap();
        let reg = std::sync::Arc::new(FeedRegistry::new(dir.path().join("feeds.toml")));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    reg.add(&format!("Feed {}", i), "https://same.example/rss", "")
                        .is_ok()
                })
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 1);
        assert_eq!(reg.list().unwrap().len(), 1);
    }
}
