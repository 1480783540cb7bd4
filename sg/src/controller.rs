//! LoopController - steps through a precomputed list one item per run
//!
//! Companion to the generator: the generator materializes every combination
//! once, the controller hands them out in order. Resetting behavior is chosen
//! with an [`IndexMode`].

use std::str::FromStr;

use loopstore::{LoopState, StateStore};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::node::{Entry, LoopNode, LoopPhase, RecomputeSignal, StepOutcome, StepStatus, effective_limit};
use crate::notify::{EventSink, SchedulerNotifier};

/// Name used in logs and notifications
pub const CONTROLLER_NODE_NAME: &str = "AutoQueueLoopController";

/// Default ceiling on iterations
pub const DEFAULT_ITERATION_LIMIT: u64 = 100;

/// Controller input errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("Index out of range: index {index}, list length {len}")]
    Range { index: u64, len: u64 },

    #[error("Unknown index mode: {0} (expected auto, specified or from-start)")]
    UnknownMode(String),
}

/// How the controller picks the index it starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexMode {
    /// Resume; restart on a new config hash or after a completed cycle
    #[default]
    Auto,
    /// Jump to the caller's start index
    Specified,
    /// Jump to 0
    FromStart,
}

impl IndexMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Specified => "specified",
            Self::FromStart => "from-start",
        }
    }
}

impl std::fmt::Display for IndexMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IndexMode {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace([' ', '_'], "-").as_str() {
            "auto" => Ok(Self::Auto),
            "specified" => Ok(Self::Specified),
            "from-start" => Ok(Self::FromStart),
            _ => Err(ControllerError::UnknownMode(s.to_string())),
        }
    }
}

/// Everything the host passes to the controller on one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerInputs {
    pub items: Vec<String>,
    /// Declared size of the list; the list itself bounds indexing
    pub total_count: u64,
    /// Upstream configuration hash
    pub config_hash: String,
    pub mode: IndexMode,
    pub start_index: u64,
    /// Ceiling on iterations, at least 1
    pub max_iterations: u64,
    pub node_id: Option<String>,
}

impl ControllerInputs {
    pub fn new(items: Vec<String>, config_hash: impl Into<String>) -> Self {
        let total_count = items.len() as u64;
        Self {
            items,
            total_count,
            config_hash: config_hash.into(),
            mode: IndexMode::Auto,
            start_index: 0,
            max_iterations: DEFAULT_ITERATION_LIMIT,
            node_id: None,
        }
    }

    pub fn with_mode(mut self, mode: IndexMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_start_index(mut self, start_index: u64) -> Self {
        self.start_index = start_index;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn limit(&self) -> u64 {
        effective_limit(self.max_iterations.max(1), self.total_count)
    }
}

/// Pick this run's index, mutating `state`
///
/// `Specified` and `FromStart` only reposition when the mode or the requested
/// index differs from what the previous run used; afterwards they resume.
pub fn choose_index(state: &mut LoopState, inputs: &ControllerInputs) -> Entry {
    let mode_changed = state.last_mode.as_deref() != Some(inputs.mode.as_str());
    let start_changed = state.last_start_index != Some(inputs.start_index);

    let entry = match inputs.mode {
        IndexMode::FromStart if mode_changed => {
            state.reposition(0);
            state.last_input_hash = inputs.config_hash.clone();
            Entry::ModeReset
        }
        IndexMode::Specified if mode_changed || start_changed => {
            state.reposition(inputs.start_index);
            state.last_input_hash = inputs.config_hash.clone();
            Entry::StartOverride
        }
        _ if state.has_input_changed(&inputs.config_hash) => {
            *state = LoopState::starting_at(0, inputs.config_hash.clone());
            Entry::ConfigChanged
        }
        _ if state.is_completed => {
            state.reposition(0);
            Entry::CycleRestart
        }
        _ => Entry::Resume,
    };

    state.last_mode = Some(inputs.mode.as_str().to_string());
    state.last_start_index = Some(inputs.start_index);
    debug!(?entry, mode = %inputs.mode, %state, "choose_index: decided");
    entry
}

/// The auto-queue loop controller
pub struct LoopController<S, E> {
    store: S,
    notifier: SchedulerNotifier<E>,
}

impl<S: StateStore, E: EventSink> LoopController<S, E> {
    pub fn new(store: S, sink: E) -> Self {
        debug!(store = %store.describe(), "LoopController::new: called");
        Self {
            store,
            notifier: SchedulerNotifier::new(sink, CONTROLLER_NODE_NAME),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: StateStore, E: EventSink> LoopNode for LoopController<S, E> {
    type Inputs = ControllerInputs;

    fn compute(&self, inputs: &ControllerInputs) -> StepOutcome {
        debug!(items = inputs.items.len(), mode = %inputs.mode, "LoopController::compute: called");
        let mut state = self.store.load();
        let loaded_index = state.global_index;
        let entry = choose_index(&mut state, inputs);
        let limit = inputs.limit();
        let index = state.global_index;
        let len = inputs.items.len() as u64;

        let Some(prompt) = usize::try_from(index).ok().and_then(|i| inputs.items.get(i)).cloned() else {
            let err = ControllerError::Range { index, len };
            warn!(error = %err, "LoopController::compute: index out of range");
            return StepOutcome {
                prompt: String::new(),
                log: err.to_string(),
                entry,
                phase: entry.phase(),
                status: StepStatus::Failed,
                index: None,
                next_index: loaded_index,
                total: inputs.total_count,
                limit,
                continued: false,
                persisted: false,
            };
        };

        let next_index = index + 1;
        let status = if next_index >= inputs.total_count.min(len).max(1) {
            state.mark_completed();
            info!(index, total = inputs.total_count, "List finished, cursor reset to 0");
            StepStatus::HardStop
        } else if next_index >= limit {
            state.reposition(next_index);
            info!(index, limit, "Iteration limit reached, cursor kept for resume");
            StepStatus::SoftStop
        } else {
            state.reposition(next_index);
            StepStatus::Continue
        };
        state.last_input_hash = inputs.config_hash.clone();

        let persisted = match self.store.save(&state) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to save controller state, continuing in memory");
                false
            }
        };

        let node_id = inputs.node_id.as_deref();
        self.notifier.report_progress(node_id, index + 1, inputs.total_count);
        let continued = status == StepStatus::Continue;
        if continued {
            self.notifier.request_queue(node_id, next_index, "start_index");
        }

        let hash_prefix = inputs.config_hash.get(..8).unwrap_or(&inputs.config_hash);
        let log = format!(
            "=== auto queue loop ===\ncurrent index: {}\ntotal: {}\nlimit: {}\nmode: {}\nconfig hash: {}...\nprogress: {}/{}",
            index,
            inputs.total_count,
            limit,
            inputs.mode,
            hash_prefix,
            index + 1,
            limit
        );

        StepOutcome {
            prompt,
            log,
            entry,
            phase: LoopPhase::Advancing,
            status,
            index: Some(index),
            next_index: state.global_index,
            total: inputs.total_count,
            limit,
            continued,
            persisted,
        }
    }

    fn should_recompute(&self, inputs: &ControllerInputs) -> RecomputeSignal {
        match self.store.try_load() {
            Ok(Some(state)) if state.is_completed || state.global_index >= inputs.limit() => {
                RecomputeSignal::Cached(inputs.config_hash.clone())
            }
            Ok(_) => RecomputeSignal::Force,
            Err(e) => {
                debug!(error = %e, "LoopController::should_recompute: unreadable state, forcing");
                RecomputeSignal::Force
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingSink;
    use loopstore::MemoryStore;

    fn items(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("item {}", i)).collect()
    }

    #[test]
    fn test_index_mode_parse() {
        assert_eq!("Auto".parse::<IndexMode>(), Ok(IndexMode::Auto));
        assert_eq!("From Start".parse::<IndexMode>(), Ok(IndexMode::FromStart));
        assert_eq!("from_start".parse::<IndexMode>(), Ok(IndexMode::FromStart));
        assert_eq!("specified".parse::<IndexMode>(), Ok(IndexMode::Specified));
        assert!("sideways".parse::<IndexMode>().is_err());
    }

    #[test]
    fn test_walks_list_and_completes() {
        let store = MemoryStore::new();
        let sink = RecordingSink::new();
        let controller = LoopController::new(&store, &sink);
        let inputs = ControllerInputs::new(items(3), "abc");

        let outputs: Vec<StepOutcome> = (0..3).map(|_| controller.compute(&inputs)).collect();
        assert_eq!(outputs[0].prompt, "item 0");
        assert_eq!(outputs[2].prompt, "item 2");
        assert_eq!(outputs[2].status, StepStatus::HardStop);
        assert_eq!(sink.queue_requests(), 2);

        let saved = store.snapshot().unwrap();
        assert!(saved.is_completed);
        assert_eq!(saved.global_index, 0);

        assert_eq!(controller.compute(&inputs).entry, Entry::CycleRestart);
    }

    #[test]
    fn test_iteration_limit_keeps_next_index() {
        let store = MemoryStore::new();
        let controller = LoopController::new(&store, RecordingSink::new());
        let inputs = ControllerInputs::new(items(5), "abc").with_max_iterations(2);

        controller.compute(&inputs);
        let second = controller.compute(&inputs);
        assert_eq!(second.status, StepStatus::SoftStop);
        assert_eq!(store.snapshot().unwrap().global_index, 2);
        assert_eq!(
            controller.should_recompute(&inputs),
            RecomputeSignal::Cached("abc".to_string())
        );
    }

    #[test]
    fn test_hash_change_restarts() {
        let store = MemoryStore::new();
        let controller = LoopController::new(&store, RecordingSink::new());
        controller.compute(&ControllerInputs::new(items(5), "abc"));
        controller.compute(&ControllerInputs::new(items(5), "abc"));

        let fresh = controller.compute(&ControllerInputs::new(items(5), "xyz"));
        assert_eq!(fresh.entry, Entry::ConfigChanged);
        assert_eq!(fresh.prompt, "item 0");
    }

    #[test]
    fn test_specified_applies_once() {
        let store = MemoryStore::new();
        let controller = LoopController::new(&store, RecordingSink::new());
        let inputs = ControllerInputs::new(items(5), "abc")
            .with_mode(IndexMode::Specified)
            .with_start_index(3);

        let first = controller.compute(&inputs);
        assert_eq!(first.entry, Entry::StartOverride);
        assert_eq!(first.prompt, "item 3");

        let second = controller.compute(&inputs);
        assert_eq!(second.entry, Entry::Resume);
        assert_eq!(second.prompt, "item 4");
    }

    #[test]
    fn test_from_start_applies_once() {
        let store = MemoryStore::new();
        let controller = LoopController::new(&store, RecordingSink::new());
        let auto = ControllerInputs::new(items(5), "abc");
        controller.compute(&auto);
        controller.compute(&auto);

        let from_start = auto.clone().with_mode(IndexMode::FromStart);
        assert_eq!(controller.compute(&from_start).prompt, "item 0");
        assert_eq!(controller.compute(&from_start).prompt, "item 1");
    }

    #[test]
    fn test_out_of_range_returns_empty() {
        let store = MemoryStore::new();
        let controller = LoopController::new(&store, RecordingSink::new());
        let inputs = ControllerInputs::new(items(2), "abc")
            .with_mode(IndexMode::Specified)
            .with_start_index(7);

        let outcome = controller.compute(&inputs);
        assert_eq!(outcome.status, StepStatus::Failed);
        assert_eq!(outcome.prompt, "");
        assert!(outcome.log.contains("out of range"));
        assert_eq!(outcome.next_index, 0);
        assert!(store.snapshot().is_none());

        controller.compute(&ControllerInputs::new(items(2), "abc"));
        assert_eq!(controller.compute(&inputs).next_index, 1);
        assert_eq!(store.snapshot().unwrap().global_index, 1);
    }

    #[test]
    fn test_should_recompute_without_state() {
        let controller = LoopController::new(MemoryStore::new(), RecordingSink::new());
        assert!(controller.should_recompute(&ControllerInputs::new(items(2), "abc")).is_forced());
    }
}
