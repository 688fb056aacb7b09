// Version gating policy for permissions
//
// Older OS releases do not gate some capabilities at all. The table maps each
// such permission to the first OS version that requires consent for it.

use super::ACTIVITY_RECOGNITION;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// First API level that can report "show rationale"
pub const RATIONALE_MIN_OS_VERSION: u32 = 23;

/// First API level that gates activity recognition
pub const ACTIVITY_RECOGNITION_GATED_SINCE: u32 = 29;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionPolicy {
    /// Below this version "permanently denied" cannot be distinguished
    pub rationale_min_os_version: u32,
    /// permission name -> first OS version that gates it
    pub gated_since: BTreeMap<String, u32>,
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        let mut gated_since = BTreeMap::new();
        gated_since.insert(
            ACTIVITY_RECOGNITION.to_string(),
            ACTIVITY_RECOGNITION_GATED_SINCE,
        );
        Self {
            rationale_min_os_version: RATIONALE_MIN_OS_VERSION,
            gated_since,
        }
    }
}

impl PermissionPolicy {
    /// True when the OS predates gating for this permission
    pub fn is_implicitly_granted(&self, permission: &str, os_version: u32) -> bool {
        self.gated_since
            .get(permission)
            .map_or(false, |&since| os_version < since)
    }

    pub fn supports_rationale(&self, os_version: u32) -> bool {
        os_version >= self.rationale_min_os_version
    }

    pub fn with_gate(mut self, permission: &str, since: u32) -> Self {
        self.gated_since.insert(permission.to_string(), since);
        self
    }
}
