//! Caller allow-list

use std::collections::HashSet;
use tracing::warn;

/// Caller allow-list. An empty list means open access; a non-empty list
/// admits exactly its members.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    allowed: HashSet<i64>,
}

impl AccessPolicy {
    pub fn new(allowed: impl IntoIterator<Item = i64>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    /// Parse a comma-separated identity list. Blank entries are skipped;
    /// anything non-numeric is dropped with a warning.
    pub fn parse(list: &str) -> Self {
        let allowed = list
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .filter_map(|part| match part.parse::<i64>() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!("ignoring non-numeric allow-list entry: {part:?}");
                    None
                }
            })
            .collect();
        Self { allowed }
    }

    pub fn is_allowed(&self, caller: i64) -> bool {
        self.allowed.is_empty() || self.allowed.contains(&caller)
    }

    pub fn is_open(&self) -> bool {
        self.allowed.is_empty()
    }
}
