//! LoopStore - persisted loop cursors
//!
//! Keeps the position of a looping node between otherwise stateless
//! invocations. Each node owns one record in one location; continuity across
//! runs is recovered from that record plus a fingerprint of the current
//! configuration.
//!
//! # Architecture
//!
//! ```text
//! <state dir>/
//! ├── exhaustive_state.json    # combination engine cursor
//! └── auto_queue_state.json    # list controller cursor
//! ```
//!
//! # Example
//!
//! ```ignore
//! use loopstore::{JsonFileStore, StateStore, fingerprint, CONTROL_KEYS};
//!
//! let store = JsonFileStore::new("exhaustive_state.json");
//! let mut state = store.load();
//! let hash = fingerprint([("template_text", "a [1]")], CONTROL_KEYS);
//! if state.has_input_changed(&hash) {
//!     state = loopstore::LoopState::starting_at(0, hash);
//! }
//! store.save(&state)?;
//! ```

pub mod cli;
pub mod config;
mod fingerprint;
mod record;
mod store;

pub use fingerprint::{CONTROL_KEYS, fingerprint, hex_digest};
pub use record::LoopState;
pub use store::{JsonFileStore, MemoryStore, StateStore, StoreError};

/// Default file name for the combination engine's record
pub const DEFAULT_STATE_FILENAME: &str = "exhaustive_state.json";

/// Default file name for the list controller's record
pub const CONTROLLER_STATE_FILENAME: &str = "auto_queue_state.json";
