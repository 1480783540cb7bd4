//! ExhaustiveCombinationEngine - walks a template's combination space one
//! item per workflow execution
//!
//! Each invocation loads the persisted cursor, reconciles it against the
//! current configuration, resolves the template at the cursor and advances
//! it. The record is read once and saved once per invocation; an invalid
//! configuration returns early without saving, so a later valid run resumes
//! from the untouched record.

use loopstore::{CONTROL_KEYS, LoopState, StateStore, fingerprint};
use tracing::{debug, info, warn};

use crate::node::{Entry, LoopNode, LoopPhase, RecomputeSignal, StepOutcome, StepStatus, effective_limit};
use crate::notify::{EventSink, SchedulerNotifier};
use crate::template::{AnchorTrace, PoolInputs, PreparedTemplate, ReplaceMode};

/// Name used in logs and notifications
pub const ENGINE_NODE_NAME: &str = "ExhaustivePromptCombinator";

/// Widget that mirrors the upcoming index in the host UI
pub const START_INDEX_WIDGET: &str = "start_index";

/// Everything the host passes to the combinator on one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CombinatorInputs {
    /// Template with `[n]` anchors
    pub template: String,
    /// Where a fresh configuration starts; moving it by hand repositions the cursor
    pub start_index: u64,
    /// Ceiling on processed items, 0 for none
    pub max_combinations: u64,
    /// Whether to ask the host for the next run
    pub auto_queue: bool,
    /// Pool texts by pool number
    pub pools: PoolInputs,
    /// Host node id, used to address widget updates
    pub node_id: Option<String>,
}

impl CombinatorInputs {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            ..Default::default()
        }
    }

    pub fn with_pool(mut self, number: u32, text: impl Into<String>) -> Self {
        self.pools.insert(number, text);
        self
    }

    pub fn with_start_index(mut self, start_index: u64) -> Self {
        self.start_index = start_index;
        self
    }

    pub fn with_max_combinations(mut self, max_combinations: u64) -> Self {
        self.max_combinations = max_combinations;
        self
    }

    pub fn with_auto_queue(mut self, auto_queue: bool) -> Self {
        self.auto_queue = auto_queue;
        self
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// All inputs as `key → value` text, control keys included
    pub fn all_inputs(&self) -> Vec<(String, String)> {
        let mut inputs = vec![
            ("template_text".to_string(), self.template.clone()),
            ("start_index".to_string(), self.start_index.to_string()),
            ("max_combinations".to_string(), self.max_combinations.to_string()),
            ("auto_queue".to_string(), self.auto_queue.to_string()),
        ];
        inputs.extend(self.pools.named_pairs());
        inputs
    }

    /// Fingerprint of the combination space these inputs describe
    pub fn fingerprint(&self) -> String {
        fingerprint(self.all_inputs(), CONTROL_KEYS)
    }
}

/// Decide where this invocation starts, mutating `state` accordingly
///
/// A configuration change always wins. A start index is applied when a
/// configuration is first seen and afterwards only when the requested value
/// changes and differs from the cursor.
pub fn reconcile(state: &mut LoopState, fingerprint: &str, requested_start: u64) -> Entry {
    let request_changed = match state.last_start_index {
        Some(previous) => previous != requested_start,
        None => requested_start != 0,
    };

    let entry = if state.has_input_changed(fingerprint) {
        *state = LoopState::starting_at(requested_start, fingerprint);
        Entry::ConfigChanged
    } else if request_changed && requested_start != state.global_index {
        state.reposition(requested_start);
        Entry::StartOverride
    } else if state.is_completed {
        state.reposition(0);
        Entry::CycleRestart
    } else {
        Entry::Resume
    };

    state.last_start_index = Some(requested_start);
    debug!(?entry, %state, "reconcile: decided");
    entry
}

/// The exhaustive prompt combinator
pub struct ExhaustiveCombinationEngine<S, E> {
    store: S,
    notifier: SchedulerNotifier<E>,
}

impl<S: StateStore, E: EventSink> ExhaustiveCombinationEngine<S, E> {
    pub fn new(store: S, sink: E) -> Self {
        debug!(store = %store.describe(), "ExhaustiveCombinationEngine::new: called");
        Self {
            store,
            notifier: SchedulerNotifier::new(sink, ENGINE_NODE_NAME),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn notifier(&self) -> &SchedulerNotifier<E> {
        &self.notifier
    }

    fn persist(&self, state: &LoopState) -> Result<(), String> {
        self.store.save(state).map_err(|e| {
            warn!(store = %self.store.describe(), error = %e, "Failed to save loop state, continuing in memory");
            e.to_string()
        })
    }

    fn run(&self, inputs: &CombinatorInputs) -> StepOutcome {
        let current_hash = inputs.fingerprint();
        let mut state = self.store.load();
        debug!(
            %current_hash,
            saved_hash = %state.last_input_hash,
            saved_index = state.global_index,
            requested_start = inputs.start_index,
            "ExhaustiveCombinationEngine::run: loaded state"
        );

        // Nothing is saved on failure, so the next run resumes from here
        let loaded_index = state.global_index;
        let entry = reconcile(&mut state, &current_hash, inputs.start_index);
        if entry != Entry::Resume {
            info!(%entry, index = state.global_index, "Loop cursor repositioned");
        }

        let prepared = match PreparedTemplate::prepare(&inputs.template, &inputs.pools) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(error = %e, "Template validation failed");
                return failed(inputs, entry, loaded_index, format!("[ERROR] {}", e));
            }
        };

        let total = prepared.total();
        let limit = effective_limit(inputs.max_combinations, total);
        let index = state.global_index;
        debug!(index, total, limit, sizes = ?prepared.pool_sizes(), "ExhaustiveCombinationEngine::run: sized space");

        if index >= total || index >= limit {
            return self.exhausted(inputs, entry, state, total, limit);
        }

        let (prompt, trace) = match prepared.resolve(index, ReplaceMode::First) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(error = %e, index, "Index resolution failed");
                return failed(inputs, entry, loaded_index, format!("[ERROR] {}", e));
            }
        };

        let next_index = index + 1;
        let status = if next_index >= total {
            state.mark_completed();
            info!(index, total, "Combination space exhausted, cursor reset to 0");
            StepStatus::HardStop
        } else if next_index >= limit {
            state.reposition(next_index);
            info!(index, limit, next_index, "Ceiling reached, cursor kept for resume");
            StepStatus::SoftStop
        } else {
            state.reposition(next_index);
            debug!(index, next_index, "ExhaustiveCombinationEngine::run: advanced");
            StepStatus::Continue
        };

        let save_result = self.persist(&state);

        let node_id = inputs.node_id.as_deref();
        self.notifier.report_progress(node_id, index + 1, limit);
        let continued = inputs.auto_queue && status == StepStatus::Continue;
        if continued {
            self.notifier.request_queue(node_id, next_index, START_INDEX_WIDGET);
        } else {
            debug!(?status, auto_queue = inputs.auto_queue, "ExhaustiveCombinationEngine::run: not queueing");
        }

        let log = progress_log(index, total, limit, entry, status, &trace, save_result.as_ref().err());

        StepOutcome {
            prompt,
            log,
            entry,
            phase: LoopPhase::Advancing,
            status,
            index: Some(index),
            next_index: state.global_index,
            total,
            limit,
            continued,
            persisted: save_result.is_ok(),
        }
    }

    fn exhausted(
        &self,
        inputs: &CombinatorInputs,
        entry: Entry,
        mut state: LoopState,
        total: u64,
        limit: u64,
    ) -> StepOutcome {
        // Past the end of the space is a hard stop; past the ceiling only is soft
        let hard = state.global_index >= total;
        let mut log = if hard {
            state.mark_completed();
            format!("[INFO] All {} combinations done; stopping loop.", total)
        } else {
            format!(
                "[INFO] Reached the limit of {} combinations (next index {}); stopping loop. Raise the limit to continue.",
                limit, state.global_index
            )
        };
        info!(hard, total, limit, "Loop exhausted");

        let save_result = self.persist(&state);
        if let Err(e) = &save_result {
            log.push_str(&format!("\n[WARN] State not saved: {}", e));
        }

        StepOutcome {
            prompt: inputs.template.clone(),
            log,
            entry,
            phase: LoopPhase::Exhausted,
            status: StepStatus::Exhausted,
            index: None,
            next_index: state.global_index,
            total,
            limit,
            continued: false,
            persisted: save_result.is_ok(),
        }
    }
}

fn failed(inputs: &CombinatorInputs, entry: Entry, next_index: u64, log: String) -> StepOutcome {
    StepOutcome {
        prompt: inputs.template.clone(),
        log,
        entry,
        phase: entry.phase(),
        status: StepStatus::Failed,
        index: None,
        next_index,
        total: 0,
        limit: 0,
        continued: false,
        persisted: false,
    }
}

fn progress_log(
    index: u64,
    total: u64,
    limit: u64,
    entry: Entry,
    status: StepStatus,
    trace: &[AnchorTrace],
    save_error: Option<&String>,
) -> String {
    let done = index + 1;
    let percent = done as f64 / limit.max(1) as f64 * 100.0;
    let mut log = format!("[progress]: {} / {} ({:.2}%)\n", done, limit, percent);
    log.push_str(&format!("current index: {}\n", index));
    log.push_str(&format!("total combinations: {}\n", total));
    log.push_str(&format!("entry: {}\n", entry));
    match status {
        StepStatus::HardStop => log.push_str("status: all combinations done\n"),
        StepStatus::SoftStop => log.push_str("status: limit reached, resumable\n"),
        _ => log.push_str("status: running\n"),
    }
    if let Some(e) = save_error {
        log.push_str(&format!("[WARN] state not saved: {}\n", e));
    }
    log.push_str("[substitutions]:");
    for line in trace {
        log.push('\n');
        log.push_str(&line.to_string());
    }
    log
}

impl<S: StateStore, E: EventSink> LoopNode for ExhaustiveCombinationEngine<S, E> {
    type Inputs = CombinatorInputs;

    fn compute(&self, inputs: &CombinatorInputs) -> StepOutcome {
        debug!(template = %inputs.template, pools = inputs.pools.len(), "ExhaustiveCombinationEngine::compute: called");
        self.run(inputs)
    }

    /// Cached only when auto-queue is off, or when the cursor sits at a
    /// ceiling for the same configuration and there is nothing new to produce
    fn should_recompute(&self, inputs: &CombinatorInputs) -> RecomputeSignal {
        let current_hash = inputs.fingerprint();
        if !inputs.auto_queue {
            return RecomputeSignal::Cached(current_hash);
        }

        let state = match self.store.try_load() {
            Ok(Some(state)) => state,
            Ok(None) => return RecomputeSignal::Force,
            Err(e) => {
                debug!(error = %e, "should_recompute: unreadable state, forcing");
                return RecomputeSignal::Force;
            }
        };

        if state.has_input_changed(&current_hash) || state.is_completed {
            return RecomputeSignal::Force;
        }

        match PreparedTemplate::prepare(&inputs.template, &inputs.pools) {
            Ok(prepared) if state.global_index >= effective_limit(inputs.max_combinations, prepared.total()) => {
                RecomputeSignal::Cached(current_hash)
            }
            _ => RecomputeSignal::Force,
        }
    }
}
