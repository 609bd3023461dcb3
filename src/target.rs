// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The `Target` data type (spec §3): the tuple identifying a logical
//! destination. Used as a map key for destination sharing and target-init
//! caching, so it is deliberately a plain, structurally-equal value type.

use std::fmt;

use serde::Deserialize;

/// Storage class tag CloudWatch Logs accepts on log group creation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
pub enum StorageClass {
    #[default]
    Standard,
    InfrequentAccess,
}

impl StorageClass {
    /// The literal CloudWatch Logs API value for this class.
    #[must_use]
    pub const fn as_api_str(self) -> &'static str {
        match self {
            StorageClass::Standard => "STANDARD",
            StorageClass::InfrequentAccess => "INFREQUENT_ACCESS",
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_api_str())
    }
}

/// Identifies a logical destination: group, stream, storage class, and
/// retention policy. Equality is structural (§3), so it doubles as a map key
/// for destination sharing (§4.8) and the target-init cache (§4.7).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct Target {
    pub group: String,
    pub stream: String,
    pub class: StorageClass,
    /// Retention in days. `<= 0` means "do not set a retention policy".
    pub retention_days: i32,
}

impl Target {
    #[must_use]
    pub fn new(group: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            stream: stream.into(),
            class: StorageClass::default(),
            retention_days: 0,
        }
    }

    #[must_use]
    pub fn with_class(mut self, class: StorageClass) -> Self {
        self.class = class;
        self
    }

    #[must_use]
    pub fn with_retention_days(mut self, days: i32) -> Self {
        self.retention_days = days;
        self
    }

    /// Whether this target requests a retention policy be applied upstream.
    #[must_use]
    pub fn wants_retention(&self) -> bool {
        self.retention_days > 0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_structural() {
        let a = Target::new("g", "s").with_retention_days(7);
        let b = Target::new("g", "s").with_retention_days(7);
        assert_eq!(a, b);

        let c = Target::new("g", "s").with_retention_days(8);
        assert_ne!(a, c);
    }

    #[test]
    fn retention_zero_or_negative_means_do_not_set() {
        assert!(!Target::new("g", "s").with_retention_days(0).wants_retention());
        assert!(!Target::new("g", "s").with_retention_days(-1).wants_retention());
        assert!(Target::new("g", "s").with_retention_days(1).wants_retention());
    }
}
