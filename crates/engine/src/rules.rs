use std::collections::BTreeMap;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::warn;
use vaultline_core::{BackupRule, ValidationError};

use crate::error::EngineError;

/// The engine's in-memory view of the configured rules.
///
/// Only validated rules get in. Persistence is the engine's job; this type
/// has no side effects beyond its own map.
#[derive(Debug, Default)]
pub struct RuleStore {
    rules: RwLock<BTreeMap<String, BackupRule>>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every problem with `rule`, empty when it is acceptable.
    pub fn validate(rule: &BackupRule) -> Vec<ValidationError> {
        rule.validate()
    }

    /// Insert `rule` or replace the rule with the same id.
    ///
    /// A replacement keeps the original `created_at`. Returns the stored
    /// rule and whether it replaced an existing one.
    pub fn upsert(&self, mut rule: BackupRule) -> Result<(BackupRule, bool), EngineError> {
        let errors = Self::validate(&rule);
        if !errors.is_empty() {
            return Err(EngineError::InvalidRule(errors));
        }
        let mut rules = self.rules.write();
        let replaced = if let Some(existing) = rules.get(&rule.id) {
            rule.created_at = existing.created_at;
            rule.updated_at = Utc::now();
            true
        } else {
            false
        };
        rules.insert(rule.id.clone(), rule.clone());
        Ok((rule, replaced))
    }

    /// Seed the store from persisted rules, skipping any that no longer
    /// validate.
    pub fn load(&self, loaded: impl IntoIterator<Item = BackupRule>) -> usize {
        let mut rules = self.rules.write();
        let mut count = 0;
        for rule in loaded {
            let errors = rule.validate();
            if errors.is_empty() {
                rules.insert(rule.id.clone(), rule);
                count += 1;
            } else {
                warn!(rule_id = %rule.id, errors = ?errors, "skipping invalid stored rule");
            }
        }
        count
    }

    pub fn get(&self, id: &str) -> Option<BackupRule> {
        self.rules.read().get(id).cloned()
    }

    /// All rules ordered by id.
    pub fn list(&self) -> Vec<BackupRule> {
        self.rules.read().values().cloned().collect()
    }

    pub fn remove(&self, id: &str) -> Option<BackupRule> {
        self.rules.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}
