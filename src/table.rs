//! Bidirectional original -> synthetic store for one address family.

use crate::error::{AnonymizeError, Result};
use crate::family::AddressFamily;
use std::collections::HashMap;

#[derive(Debug)]
pub struct MappingTable {
    family: AddressFamily,
    forward: HashMap<String, String>,
    /// synthetic -> original, keeps synthetic values unique
    reverse: HashMap<String, String>,
}

impl MappingTable {
    pub fn new(family: AddressFamily) -> Self {
        Self { family, forward: HashMap::new(), reverse: HashMap::new() }
    }

    pub fn lookup(&self, original: &str) -> Option<&str> {
        self.forward.get(original).map(String::as_str)
    }

    pub fn contains_value(&self, candidate: &str) -> bool {
        self.reverse.contains_key(candidate)
    }

    /// Bind `original` to `synthetic`. Re-inserting an identical pair is a no-op;
    /// a synthetic value already owned by another original is rejected.
    pub fn insert(&mut self, original: &str, synthetic: &str) -> Result<()> {
        if let Some(existing) = self.reverse.get(synthetic) {
            if existing == original {
                return Ok(());
            }
            return Err(AnonymizeError::InvariantViolation {
                family: self.family,
                synthetic: synthetic.to_string(),
                existing: existing.clone(),
                attempted: original.to_string(),
            });
        }
        if let Some(previous) = self.forward.get(original) {
            // entries are never updated once written
            return Err(AnonymizeError::InvariantViolation {
                family: self.family,
                synthetic: previous.clone(),
                existing: original.to_string(),
                attempted: synthetic.to_string(),
            });
        }
        self.forward.insert(original.to_string(), synthetic.to_string());
        self.reverse.insert(synthetic.to_string(), original.to_string());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.forward.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
