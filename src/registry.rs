//! Target registry and wake-phrase index
//!
//! Mutations write through the database and rebuild an immutable
//! `PhraseIndex` snapshot; the router reads the snapshot without locking.

use std::sync::{Arc, RwLock};

use url::Url;

use crate::db::{DbPool, Target, TargetRepo};
use crate::{Error, Result};

/// Maximum target name length accepted at registration
const NAME_MAX_LEN: usize = 32;

/// Lowercase and collapse whitespace
///
/// Shared by phrase storage and transcript matching so that containment
/// checks compare like with like.
#[must_use]
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Immutable phrase-to-target mapping, ordered longest phrase first
///
/// Ties are broken by insertion order, so the first registered phrase of a
/// given length wins.
#[derive(Debug, Default)]
pub struct PhraseIndex {
    entries: Vec<(String, String)>,
}

impl PhraseIndex {
    fn build(targets: &[Target]) -> Self {
        let mut entries: Vec<(String, String)> = Vec::new();
        for target in targets {
            for phrase in &target.phrases {
                let normalized = normalize(phrase);
                if !normalized.is_empty() {
                    entries.push((normalized, target.name.clone()));
                }
            }
        }
        // Stable sort keeps insertion order among equal lengths
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { entries }
    }

    /// First entry whose phrase is contained in the normalized text
    #[must_use]
    pub fn find(&self, normalized_text: &str) -> Option<(&str, &str)> {
        self.entries
            .iter()
            .find(|(phrase, _)| normalized_text.contains(phrase.as_str()))
            .map(|(phrase, target)| (phrase.as_str(), target.as_str()))
    }

    /// Target owning an exact normalized phrase
    #[must_use]
    pub fn target_for(&self, phrase: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(p, _)| p == phrase)
            .map(|(_, target)| target.as_str())
    }

    /// All `(phrase, target)` entries in matching order
    #[must_use]
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }
}

/// Registry of downstream targets
pub struct Registry {
    targets: TargetRepo,
    index: RwLock<Arc<PhraseIndex>>,
}

impl Registry {
    /// Create a registry over the database and build the initial index
    ///
    /// # Errors
    ///
    /// Returns error if the target table cannot be read
    pub fn new(db: DbPool) -> Result<Self> {
        let targets = TargetRepo::new(db);
        let index = Arc::new(PhraseIndex::build(&targets.list()?));
        Ok(Self {
            targets,
            index: RwLock::new(index),
        })
    }

    /// Validate, normalize, and persist a target, then rebuild the index
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an empty/overlong name, a malformed base
    /// URL, or an empty phrase set after normalization.
    pub fn upsert(&self, name: &str, base_url: &str, phrases: &[String]) -> Result<Target> {
        let name = name.trim().to_lowercase();
        if name.is_empty() || name.len() > NAME_MAX_LEN {
            return Err(Error::Config(format!(
                "target name must be 1-{NAME_MAX_LEN} characters"
            )));
        }

        let base_url = base_url.trim().to_string();
        let parsed = Url::parse(&base_url)
            .map_err(|e| Error::Config(format!("invalid base_url '{base_url}': {e}")))?;
        if parsed.host_str().is_none() {
            return Err(Error::Config(format!("base_url '{base_url}' has no host")));
        }

        let phrases: Vec<String> = phrases
            .iter()
            .map(|p| normalize(p))
            .filter(|p| !p.is_empty())
            .collect();
        if phrases.is_empty() {
            return Err(Error::Config(
                "at least one non-empty wake phrase is required".to_string(),
            ));
        }

        let target = Target {
            name,
            base_url,
            phrases,
        };
        self.targets.upsert(&target)?;
        self.rebuild_index()?;

        tracing::info!(
            target_name = %target.name,
            phrases = target.phrases.len(),
            "target registered"
        );
        Ok(target)
    }

    /// Look up a target by name, case-insensitively
    ///
    /// # Errors
    ///
    /// Returns error if the query fails
    pub fn get(&self, name: &str) -> Result<Option<Target>> {
        self.targets.get(name)
    }

    /// List all registered targets
    ///
    /// # Errors
    ///
    /// Returns error if the query fails
    pub fn list(&self) -> Result<Vec<Target>> {
        self.targets.list()
    }

    /// Delete a target and rebuild the index
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if no such target exists
    pub fn delete(&self, name: &str) -> Result<()> {
        if !self.targets.delete(name)? {
            return Err(Error::NotFound(format!("target '{name}'")));
        }
        self.rebuild_index()?;
        tracing::info!(target_name = name, "target deleted");
        Ok(())
    }

    /// Current phrase index snapshot
    ///
    /// The returned `Arc` stays consistent even if the registry mutates
    /// concurrently; callers should not hold it across iterations.
    #[must_use]
    pub fn phrase_map(&self) -> Arc<PhraseIndex> {
        self.index
            .read()
            .map(|guard| Arc::clone(&guard))
            .unwrap_or_default()
    }

    fn rebuild_index(&self) -> Result<()> {
        let rebuilt = Arc::new(PhraseIndex::build(&self.targets.list()?));
        if let Ok(mut guard) = self.index.write() {
            *guard = rebuilt;
        }
        Ok(())
    }
}
