//! LoopState record
//!
//! The durable cursor of one looping node: where it is in its combination
//! space and which configuration that position belongs to.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Persisted cursor for one node instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopState {
    /// Next global index to process
    #[serde(default)]
    pub global_index: u64,

    /// Fingerprint of the configuration the index belongs to
    #[serde(default)]
    pub last_input_hash: String,

    /// Set when the whole space was walked; the cursor is then back at 0
    #[serde(default)]
    pub is_completed: bool,

    /// Start index the caller asked for on the previous invocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_start_index: Option<u64>,

    /// Index mode used on the previous invocation (list controller only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_mode: Option<String>,
}

impl LoopState {
    /// Create a record positioned at `index` for the given fingerprint
    pub fn starting_at(index: u64, fingerprint: impl Into<String>) -> Self {
        let last_input_hash = fingerprint.into();
        debug!(index, %last_input_hash, "LoopState::starting_at: called");
        Self {
            global_index: index,
            last_input_hash,
            is_completed: false,
            last_start_index: None,
            last_mode: None,
        }
    }

    /// Whether `fingerprint` differs from the one this record was written for
    pub fn has_input_changed(&self, fingerprint: &str) -> bool {
        let changed = self.last_input_hash != fingerprint;
        debug!(changed, "LoopState::has_input_changed: called");
        changed
    }

    /// Move the cursor to `index` and clear the completion flag
    pub fn reposition(&mut self, index: u64) {
        debug!(from = self.global_index, to = index, "LoopState::reposition: called");
        self.global_index = index;
        self.is_completed = false;
    }

    /// Mark the space as fully walked; the cursor always returns to 0
    pub fn mark_completed(&mut self) {
        debug!(from = self.global_index, "LoopState::mark_completed: called");
        self.global_index = 0;
        self.is_completed = true;
    }

    /// First 8 characters of the fingerprint, for log lines
    pub fn short_hash(&self) -> &str {
        let end = self.last_input_hash.len().min(8);
        self.last_input_hash.get(..end).unwrap_or("")
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "index={} completed={} hash={}",
            self.global_index,
            self.is_completed,
            if self.last_input_hash.is_empty() {
                "-"
            } else {
                self.short_hash()
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_record() {
        let state = LoopState::default();
        assert_eq!(state.global_index, 0);
        assert_eq!(state.last_input_hash, "");
        assert!(!state.is_completed);
    }

    #[test]
    fn test_mark_completed_resets_cursor() {
        let mut state = LoopState::starting_at(7, "abc");
        state.mark_completed();
        assert!(state.is_completed);
        assert_eq!(state.global_index, 0);
    }

    #[test]
    fn test_reposition_clears_completion() {
        let mut state = LoopState::default();
        state.mark_completed();
        state.reposition(3);
        assert!(!state.is_completed);
        assert_eq!(state.global_index, 3);
    }

    #[test]
    fn test_has_input_changed() {
        let state = LoopState::starting_at(0, "abc");
        assert!(!state.has_input_changed("abc"));
        assert!(state.has_input_changed("abd"));
    }

    #[test]
    fn test_loads_base_fields_only() {
        let json = r#"{"global_index": 4, "last_input_hash": "ff00", "is_completed": false}"#;
        let state: LoopState = serde_json::from_str(json).unwrap();
        assert_eq!(state.global_index, 4);
        assert_eq!(state.last_start_index, None);
        assert_eq!(state.last_mode, None);
    }

    #[test]
    fn test_serializes_without_empty_bookkeeping() {
        let state = LoopState::starting_at(2, "hash");
        let json = serde_json::to_value(&state).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 3);
        assert!(obj.contains_key("global_index"));
        assert!(obj.contains_key("last_input_hash"));
        assert!(obj.contains_key("is_completed"));
    }

    #[test]
    fn test_short_hash_and_display() {
        let state = LoopState::starting_at(1, "0123456789abcdef");
        assert_eq!(state.short_hash(), "01234567");
        assert_eq!(state.to_string(), "index=1 completed=false hash=01234567");
        assert_eq!(LoopState::default().to_string(), "index=0 completed=false hash=-");
    }
}
