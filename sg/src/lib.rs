//! SuperSugar - exhaustive prompt combination nodes
//!
//! A prompt template refers to line-separated pools through `[n]` anchors.
//! Every combination of pool items is a point in a mixed-radix space, and a
//! looping node walks that space one point per workflow execution, keeping
//! its cursor in a persisted [`loopstore`] record between runs.
//!
//! # Core Concepts
//!
//! - **Stateless invocations**: each run reloads its cursor and reconciles it
//!   against a fingerprint of the current inputs
//! - **Soft and hard stops**: a ceiling pauses the loop resumably, the end of
//!   the space completes it and resets the cursor
//! - **Fire-and-forget notifications**: queue requests and progress go to an
//!   [`EventSink`]; delivery failures never fail a run
//!
//! # Modules
//!
//! - [`radix`] - Mixed-radix index arithmetic
//! - [`template`] - Anchors, pools and substitution
//! - [`node`] - Looping node contract and step outcomes
//! - [`engine`] - The exhaustive combinator
//! - [`controller`] - List-driven auto-queue controller
//! - [`generator`] - Whole-space materialization
//! - [`notify`] - Host event sinks
//! - [`images`] - Batch image loader and image/text saver
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod controller;
pub mod engine;
pub mod generator;
pub mod images;
pub mod node;
pub mod notify;
pub mod radix;
pub mod template;

// Re-export commonly used types
pub use config::Config;
pub use controller::{ControllerError, ControllerInputs, IndexMode, LoopController};
pub use engine::{CombinatorInputs, ExhaustiveCombinationEngine};
pub use generator::{Generated, GeneratorError, generate};
pub use images::{BatchImageLoader, BatchMode, ImageNodeError, ImageWithTextSaver, LoadRequest, SaveFormat};
pub use node::{Entry, LoopNode, LoopPhase, RecomputeSignal, StepOutcome, StepStatus, effective_limit};
pub use notify::{EventSink, HostEvent, JsonlSink, NullSink, QueueSink, SchedulerNotifier, TracingSink};
pub use radix::{RadixError, compose, decompose, total_combinations};
pub use template::{ConfigError, PoolInputs, PreparedTemplate, ReplaceMode};
