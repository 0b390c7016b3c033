use serde::{Deserialize, Serialize};

use gatekey_keystore::KeyCounts;

/// Snapshot of one key's scheduler state for the operator `status()` view.
///
/// Readers must tolerate stale `cool_down_seconds_remaining`: this is taken
/// at query time from a DB row, not refreshed on every tick of the release
/// loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerKeyStatus {
    pub identifier: String,
    pub brief: String,
    pub state: KeyLifecycleState,
    pub request_fail_count: i32,
    pub cool_down_entry_count: i32,
    pub last_usage_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyLifecycleState {
    Active,
    InUse,
    CoolingDown { cool_down_seconds_remaining: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyStatus {
    pub counts: KeyCounts,
    pub keys: Vec<PerKeyStatus>,
}
