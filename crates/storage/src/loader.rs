//! YAML rule files loaded into a [`MemoryRuleStore`], with optional hot-reload.
//!
//! A file holds either a single rule or a list of rules:
//!
//! ```yaml
//! id: pollen-moderate
//! owner: owner-1
//! source: { id: pollen-agent, name: Pollen }
//! condition:
//!   name: Moderate pollen
//!   dataPoint: pollenRiskLevel
//!   dataType: enum
//!   comparator: eq
//!   value: Moderate
//! executionInterval: 60
//! targets:
//!   - type: webhook
//!     params:
//!       - { key: url, value: "https://ads.example/campaigns/7/pause" }
//! ```

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use tracing::{info, warn};

use ifthen_core::Rule;
use ifthen_rules::MemoryRuleStore;

use crate::error::{LoadResult, LoadStatus, LoaderError, Result};
use crate::watcher::handle_fs_event;

#[derive(Deserialize)]
#[serde(untagged)]
enum RuleFile {
    Many(Vec<Rule>),
    One(Box<Rule>),
}

impl RuleFile {
    fn into_rules(self) -> Vec<Rule> {
        match self {
            RuleFile::Many(rules) => rules,
            RuleFile::One(rule) => vec![*rule],
        }
    }
}

pub(crate) fn is_rule_file(path: &Path) -> bool {
    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e == "yml" || e == "yaml")
        .unwrap_or(false);
    let is_dotfile = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false);
    is_yaml && !is_dotfile
}

/// Parse and validate one rule file. Nothing is applied on error.
pub fn parse_rule_file(path: &Path) -> Result<Vec<Rule>> {
    let contents = fs::read_to_string(path)?;
    let rules = serde_yaml::from_str::<RuleFile>(&contents)?.into_rules();

    let mut seen = HashSet::new();
    for rule in &rules {
        rule.validate()
            .map_err(|e| LoaderError::Validation(e.to_string()))?;
        if !seen.insert(rule.id.as_str()) {
            return Err(LoaderError::Validation(format!(
                "rule id '{}' appears twice in the same file",
                rule.id
            )));
        }
    }
    Ok(rules)
}

/// Tracks which rule ids came from which file so edits and deletions can be
/// applied to the store.
pub(crate) struct FileIndex {
    store: Arc<MemoryRuleStore>,
    files: RwLock<HashMap<PathBuf, Vec<String>>>,
}

impl FileIndex {
    fn new(store: Arc<MemoryRuleStore>) -> Self {
        Self {
            store,
            files: RwLock::new(HashMap::new()),
        }
    }

    /// Re-read `path` and reconcile the store with its contents.
    ///
    /// On error the rules previously loaded from the file are kept.
    pub(crate) fn apply_file(&self, path: &Path) -> LoadStatus {
        match parse_rule_file(path) {
            Ok(rules) => {
                let rule_ids: Vec<String> = rules.iter().map(|r| r.id.clone()).collect();
                let previous = self
                    .files
                    .write()
                    .expect("file index lock poisoned")
                    .insert(path.to_path_buf(), rule_ids.clone())
                    .unwrap_or_default();

                for stale in previous.iter().filter(|id| !rule_ids.contains(id)) {
                    self.store.remove(stale);
                    info!(rule_id = %stale, path = %path.display(), "removed rule no longer in file");
                }
                for rule in rules {
                    info!(rule_id = %rule.id, source_id = %rule.source.id, path = %path.display(), "loaded rule");
                    self.store.upsert(rule);
                }
                LoadStatus::Loaded { rule_ids }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load rule file");
                LoadStatus::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Drop every rule that was loaded from `path`.
    pub(crate) fn forget_file(&self, path: &Path) {
        let removed = self
            .files
            .write()
            .expect("file index lock poisoned")
            .remove(path)
            .unwrap_or_default();
        for rule_id in removed {
            self.store.remove(&rule_id);
            info!(rule_id = %rule_id, path = %path.display(), "removed rule after file deletion");
        }
    }
}

/// Filesystem-backed rule source feeding a [`MemoryRuleStore`].
pub struct RuleFileLoader {
    rules_dir: PathBuf,
    index: Arc<FileIndex>,
    /// Held to keep the watcher alive.
    _watcher: Option<RecommendedWatcher>,
}

impl RuleFileLoader {
    pub fn new(rules_dir: impl Into<PathBuf>, store: Arc<MemoryRuleStore>) -> Self {
        Self {
            rules_dir: rules_dir.into(),
            index: Arc::new(FileIndex::new(store)),
            _watcher: None,
        }
    }

    pub fn rules_dir(&self) -> &Path {
        &self.rules_dir
    }

    /// Recursively scan the rules directory and load all YAML files.
    ///
    /// Dotfiles and non-YAML files are skipped. Parse errors are reported
    /// per file and do not abort the scan. A missing directory is an error.
    pub fn load_all(&self) -> Result<Vec<LoadResult>> {
        let mut results = Vec::new();
        self.scan_dir_recursive(&self.rules_dir, &mut results)?;
        results.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(results)
    }

    fn scan_dir_recursive(&self, dir: &Path, results: &mut Vec<LoadResult>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();

            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with('.') {
                    if path.is_file() {
                        results.push(LoadResult {
                            path,
                            status: LoadStatus::Skipped {
                                reason: "dotfile".to_string(),
                            },
                        });
                    }
                    continue;
                }
            }

            if path.is_dir() {
                if let Err(e) = self.scan_dir_recursive(&path, results) {
                    warn!(path = %path.display(), error = %e, "failed to read directory");
                }
                continue;
            }

            if !is_rule_file(&path) {
                results.push(LoadResult {
                    path,
                    status: LoadStatus::Skipped {
                        reason: "not a YAML file".to_string(),
                    },
                });
                continue;
            }

            let status = self.index.apply_file(&path);
            results.push(LoadResult { path, status });
        }
        Ok(())
    }

    /// Start a recursive filesystem watcher.
    ///
    /// Created or modified files are re-parsed and upserted; upserts keep
    /// each rule's `lastExecuted`. Deleted files drop their rules.
    pub fn watch(&mut self) -> Result<()> {
        let index = Arc::clone(&self.index);

        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => handle_fs_event(&event, &index),
                Err(e) => warn!(error = %e, "filesystem watcher error"),
            },
        )?;

        watcher.watch(&self.rules_dir, RecursiveMode::Recursive)?;
        let _ = watcher
            .configure(notify::Config::default().with_poll_interval(Duration::from_millis(500)));

        info!(path = %self.rules_dir.display(), "watching rules directory for changes (recursive)");
        self._watcher = Some(watcher);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn index(&self) -> &Arc<FileIndex> {
        &self.index
    }
}

/// Summarise a scan for startup logs: (loaded rules, failed files).
pub fn summarize(results: &[LoadResult]) -> (usize, usize) {
    results.iter().fold((0, 0), |(loaded, failed), r| match &r.status {
        LoadStatus::Loaded { rule_ids } => (loaded + rule_ids.len(), failed),
        LoadStatus::Failed { .. } => (loaded, failed + 1),
        LoadStatus::Skipped { .. } => (loaded, failed),
    })
}
