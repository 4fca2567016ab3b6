//! Retention policy: keep the newest N archives of every group.

use crate::archive::{ArchiveFile, ArchiveGroups};
use crate::utils::ConfigError;
use serde_json::Value;
use std::num::NonZeroUsize;

/// Per-storage retention limit. A value of this type is always a valid,
/// positive limit; every malformed setting is rejected in [`RetentionPolicy::from_setting`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    limit: NonZeroUsize,
}

impl RetentionPolicy {
    pub fn new(limit: NonZeroUsize) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> usize {
        self.limit.get()
    }

    /// Validate a raw `limit` setting from a storage configuration.
    ///
    /// Accepts a positive JSON integer or a string holding one. Missing,
    /// empty, zero, negative, fractional and non-numeric values are
    /// configuration errors.
    pub fn from_setting(storage: &str, value: Option<&Value>) -> Result<Self, ConfigError> {
        let setting = format!("storages.{storage}.limit");

        let parsed = match value {
            None | Some(Value::Null) => {
                return Err(ConfigError::invalid(setting, "the limit is required"))
            }
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) if s.trim().is_empty() => {
                return Err(ConfigError::invalid(setting, "the limit is required"))
            }
            Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
            Some(_) => None,
        };

        parsed
            .and_then(|n| usize::try_from(n).ok())
            .and_then(NonZeroUsize::new)
            .map(Self::new)
            .ok_or_else(|| ConfigError::invalid(setting, "the limit must be a positive integer"))
    }
}

/// Select the archives to delete so that every group keeps at most
/// `policy.limit()` entries.
///
/// Groups must be ordered newest first (see [`crate::archive::classify`]);
/// everything past the limit is returned, group after group. This function
/// never deletes anything itself.
pub fn prune(groups: &ArchiveGroups, policy: &RetentionPolicy) -> Vec<ArchiveFile> {
    groups
        .values()
        .filter(|files| files.len() > policy.limit())
        .flat_map(|files| files.iter().skip(policy.limit()).cloned())
        .collect()
}
