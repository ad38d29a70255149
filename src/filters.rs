use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Reads filter list files into rule lines, caching each file by path.
#[derive(Debug, Default)]
pub struct FilterManager {
    cached_filters: HashMap<PathBuf, Vec<String>>,
}

impl FilterManager {
    pub fn new() -> Self {
        Self {
            cached_filters: HashMap::new(),
        }
    }

    /// Load the rules of a local filter list, skipping `!` comments and blank lines.
    pub fn load_filters(&mut self, path: &Path) -> Result<Vec<String>> {
        if let Some(filters) = self.cached_filters.get(path) {
            return Ok(filters.clone());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read filter list {}", path.display()))?;
        let filters = parse_filter_lines(&content);

        self.cached_filters.insert(path.to_path_buf(), filters.clone());
        Ok(filters)
    }

    pub fn clear_cache(&mut self) {
        self.cached_filters.clear();
    }
}

pub fn parse_filter_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('!') && !line.starts_with("[Adblock"))
        .map(|line| line.to_string())
        .collect()
}
