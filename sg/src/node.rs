//! Looping node contract
//!
//! A looping node is invoked once per workflow execution with no memory of
//! its own. It answers two questions: what to output now (`compute`), and
//! whether a cached output from an earlier run is still good
//! (`should_recompute`).

use tracing::debug;

/// Where an invocation picked up, decided before any output is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    /// Configuration fingerprint differs from the persisted one
    ConfigChanged,
    /// Previous cycle completed; start the same space over
    CycleRestart,
    /// Caller moved the start index by hand
    StartOverride,
    /// Index mode switched to one that repositions the cursor
    ModeReset,
    /// Continue from the persisted index
    Resume,
}

/// Loop state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    FreshStart,
    Resuming,
    Advancing,
    Exhausted,
}

impl Entry {
    /// Phase this entry puts the loop in
    pub fn phase(self) -> LoopPhase {
        match self {
            Self::ConfigChanged | Self::CycleRestart => LoopPhase::FreshStart,
            Self::StartOverride | Self::ModeReset | Self::Resume => LoopPhase::Resuming,
        }
    }
}

impl std::fmt::Display for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigChanged => write!(f, "fresh start (configuration changed)"),
            Self::CycleRestart => write!(f, "fresh start (previous cycle completed)"),
            Self::StartOverride => write!(f, "resume (start index override)"),
            Self::ModeReset => write!(f, "resume (index mode reset)"),
            Self::Resume => write!(f, "resume"),
        }
    }
}

/// How an invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// An item was produced and more remain under the limit
    Continue,
    /// An item was produced and it was the last one under the limit
    SoftStop,
    /// An item was produced and it was the last one in the space
    HardStop,
    /// Nothing left to produce
    Exhausted,
    /// Invalid configuration or index; nothing produced
    Failed,
}

impl StepStatus {
    /// Whether the loop should stop asking for more runs
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Continue)
    }
}

/// Result of one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// Text handed to the next node
    pub prompt: String,
    /// Human readable progress or error report
    pub log: String,
    pub entry: Entry,
    pub phase: LoopPhase,
    pub status: StepStatus,
    /// Index that produced `prompt`, if one did
    pub index: Option<u64>,
    /// Cursor position after this invocation
    pub next_index: u64,
    /// Size of the whole space (or list)
    pub total: u64,
    /// Effective stop point under the caller's ceiling
    pub limit: u64,
    /// Whether another run was requested
    pub continued: bool,
    /// Whether the cursor reached durable storage
    pub persisted: bool,
}

impl StepOutcome {
    /// The `(prompt, log)` pair the host receives
    pub fn into_pair(self) -> (String, String) {
        (self.prompt, self.log)
    }
}

/// Answer to "can the host reuse the previous output?"
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecomputeSignal {
    /// Always run; hosts encode this as NaN, which never equals itself
    Force,
    /// Reuse the cached output while this key stays the same
    Cached(String),
}

impl RecomputeSignal {
    pub fn is_forced(&self) -> bool {
        matches!(self, Self::Force)
    }
}

impl std::fmt::Display for RecomputeSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Force => write!(f, "nan"),
            Self::Cached(key) => write!(f, "{}", key),
        }
    }
}

/// A node that steps through a space one item per workflow execution
pub trait LoopNode {
    type Inputs;

    /// Produce this run's output and move the persisted cursor
    fn compute(&self, inputs: &Self::Inputs) -> StepOutcome;

    /// Decide from persisted state alone whether a cached output is stale
    fn should_recompute(&self, inputs: &Self::Inputs) -> RecomputeSignal;

    /// Host-facing form of [`compute`](Self::compute)
    fn execute(&self, inputs: &Self::Inputs) -> (String, String) {
        debug!("LoopNode::execute: called");
        self.compute(inputs).into_pair()
    }
}

/// `min(ceiling, total)`, where a ceiling of 0 means no ceiling
pub fn effective_limit(ceiling: u64, total: u64) -> u64 {
    if ceiling > 0 { ceiling.min(total) } else { total }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_limit() {
        assert_eq!(effective_limit(0, 12), 12);
        assert_eq!(effective_limit(5, 12), 5);
        assert_eq!(effective_limit(50, 12), 12);
    }

    #[test]
    fn test_recompute_signal_display() {
        assert_eq!(RecomputeSignal::Force.to_string(), "nan");
        assert_eq!(RecomputeSignal::Cached("ab12".to_string()).to_string(), "ab12");
        assert!(RecomputeSignal::Force.is_forced());
    }

    #[test]
    fn test_entry_phase() {
        assert_eq!(Entry::ConfigChanged.phase(), LoopPhase::FreshStart);
        assert_eq!(Entry::CycleRestart.phase(), LoopPhase::FreshStart);
        assert_eq!(Entry::StartOverride.phase(), LoopPhase::Resuming);
        assert_eq!(Entry::Resume.phase(), LoopPhase::Resuming);
    }

    #[test]
    fn test_terminal_status() {
        assert!(!StepStatus::Continue.is_terminal());
        assert!(StepStatus::SoftStop.is_terminal());
        assert!(StepStatus::Failed.is_terminal());
    }
}
