//! The machine-consumable dispatch batch and its output channels.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::graph::ResolvedItem;
use super::priority::Priority;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixEntry {
    pub issue_number: u64,
    pub title: String,
    pub priority: Priority,
    pub priority_score: u8,
    /// `owner/repo`
    pub repository: String,
    pub url: String,
    pub parent_issue_number: Option<u64>,
}

impl From<&ResolvedItem> for MatrixEntry {
    fn from(item: &ResolvedItem) -> Self {
        Self {
            issue_number: item.item.id.number,
            title: item.item.title.clone(),
            priority: item.priority,
            priority_score: item.priority_score,
            repository: item.item.id.repository(),
            url: item.item.url.clone(),
            parent_issue_number: item.parent_issue_number,
        }
    }
}

/// `{"include": [...]}`, the shape a CI job matrix expects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixOutput {
    pub include: Vec<MatrixEntry>,
}

impl MatrixOutput {
    /// Entries keep the order of `items`.
    pub fn from_items(items: &[ResolvedItem]) -> Self {
        Self {
            include: items.iter().map(MatrixEntry::from).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty()
    }

    pub fn len(&self) -> usize {
        self.include.len()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_to_file(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json_pretty()?)
    }

    /// Appends `matrix=` and `has_items=` to the CI runner's output file when
    /// running under GitHub Actions. Returns whether anything was written.
    pub fn write_ci_output(&self, env: impl Fn(&str) -> Option<String>) -> std::io::Result<bool> {
        if env("GITHUB_ACTIONS").is_none() {
            return Ok(false);
        }
        let Some(output_path) = env("GITHUB_OUTPUT").filter(|p| !p.is_empty()) else {
            return Ok(false);
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&output_path)?;
        writeln!(file, "matrix={}", self.to_json()?)?;
        writeln!(file, "has_items={}", !self.is_empty())?;
        Ok(true)
    }
}
