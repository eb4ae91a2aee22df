use anyhow::Result;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

/// File-backed prompt/response cache for non-streaming calls.
///
/// Constructed explicitly and handed to clients (`with_cache`) so its
/// lifecycle is owned by whoever wires up the process, not by module
/// initialisation.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    cache_dir: PathBuf,
}

impl ResponseCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Cache under `.cache/shiori-llm` relative to the working
    /// directory.
    pub fn in_working_dir() -> Self {
        let cache_dir = std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".cache")
            .join("shiori-llm");
        Self { cache_dir }
    }

    fn cache_key(&self, prompt: &str, model: &str) -> String {
        let mut hasher = DefaultHasher::new();
        prompt.hash(&mut hasher);
        model.hash(&mut hasher);
        format!("{}_{:x}.json", model, hasher.finish())
    }

    pub async fn get(&self, prompt: &str, model: &str) -> Option<String> {
        let path = self.cache_dir.join(self.cache_key(prompt, model));
        if path.exists() {
            debug!("Cache hit for prompt hash");
            if let Ok(content) = fs::read_to_string(path).await {
                return Some(content);
            }
        }
        None
    }

    pub async fn set(&self, prompt: &str, model: &str, response: &str) -> Result<()> {
        let path = self.cache_dir.join(self.cache_key(prompt, model));
        if !self.cache_dir.exists() {
            fs::create_dir_all(&self.cache_dir).await?;
        }
        fs::write(path, response).await?;
        debug!("Cached response for prompt hash");
        Ok(())
    }
}
