//! Integration tests for the looping nodes
//!
//! Each test rebuilds the node between calls so continuity comes only from
//! the file-backed record, as it does across host invocations.

use std::fs;

use loopstore::{JsonFileStore, LoopState, StateStore, StoreError};
use supersugar::notify::RecordingSink;
use supersugar::{
    CombinatorInputs, ControllerInputs, Entry, ExhaustiveCombinationEngine, LoopController, LoopNode, RecomputeSignal,
    StepStatus, generate,
};
use tempfile::TempDir;

fn inputs() -> CombinatorInputs {
    CombinatorInputs::new("a [1] and [2]")
        .with_pool(1, "cat\ndog")
        .with_pool(2, "red\nblue")
        .with_auto_queue(true)
        .with_node_id("7")
}

fn invoke(store_path: &std::path::Path, inputs: &CombinatorInputs) -> supersugar::StepOutcome {
    let engine = ExhaustiveCombinationEngine::new(JsonFileStore::new(store_path), RecordingSink::new());
    engine.compute(inputs)
}

/// Store whose writes always fail
struct ReadOnlyStore(JsonFileStore);

impl StateStore for ReadOnlyStore {
    fn try_load(&self) -> Result<Option<LoopState>, StoreError> {
        self.0.try_load()
    }

    fn save(&self, _state: &LoopState) -> Result<(), StoreError> {
        Err(StoreError::Io {
            path: self.0.path().to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        })
    }

    fn describe(&self) -> String {
        format!("read-only {}", self.0.describe())
    }
}

// =============================================================================
// Combinator across invocations
// =============================================================================

#[test]
fn test_full_cycle_across_invocations() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("exhaustive_state.json");

    let prompts: Vec<String> = (0..4).map(|_| invoke(&path, &inputs()).prompt).collect();
    assert_eq!(
        prompts,
        vec!["a cat and red", "a cat and blue", "a dog and red", "a dog and blue"]
    );

    let saved = JsonFileStore::new(&path).try_load().unwrap().unwrap();
    assert!(saved.is_completed);
    assert_eq!(saved.global_index, 0);

    // Next manual run starts a new cycle
    let restarted = invoke(&path, &inputs());
    assert_eq!(restarted.entry, Entry::CycleRestart);
    assert_eq!(restarted.prompt, "a cat and red");
}

#[test]
fn test_state_file_is_plain_json() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("nested").join("state.json");
    invoke(&path, &inputs());

    let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["global_index"], 1);
    assert_eq!(raw["is_completed"], false);
    assert_eq!(raw["last_input_hash"].as_str().unwrap().len(), 64);
}

#[test]
fn test_config_change_mid_sequence_restarts() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("state.json");

    invoke(&path, &inputs());
    invoke(&path, &inputs());

    let changed = inputs().with_pool(2, "red\nblue\ngreen");
    let outcome = invoke(&path, &changed);
    assert_eq!(outcome.entry, Entry::ConfigChanged);
    assert_eq!(outcome.index, Some(0));
    assert_eq!(outcome.total, 6);
}

#[test]
fn test_raising_ceiling_resumes() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("state.json");

    let capped = inputs().with_max_combinations(2);
    invoke(&path, &capped);
    assert_eq!(invoke(&path, &capped).status, StepStatus::SoftStop);
    assert_eq!(invoke(&path, &capped).status, StepStatus::Exhausted);

    let raised = invoke(&path, &inputs().with_max_combinations(3));
    assert_eq!(raised.index, Some(2));
    assert_eq!(raised.status, StepStatus::SoftStop);
}

#[test]
fn test_start_index_override_then_resume() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("state.json");

    // A fresh configuration starts at the requested index
    let first = invoke(&path, &inputs().with_start_index(1));
    assert_eq!(first.prompt, "a cat and blue");

    // The host mirrors next_index into start_index; that is not an override
    let second = invoke(&path, &inputs().with_start_index(first.next_index));
    assert_eq!(second.entry, Entry::Resume);
    assert_eq!(second.prompt, "a dog and red");

    // Moving it by hand is
    let jumped = invoke(&path, &inputs().with_start_index(0));
    assert_eq!(jumped.entry, Entry::StartOverride);
    assert_eq!(jumped.prompt, "a cat and red");
}

#[test]
fn test_corrupt_state_starts_fresh() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("state.json");
    fs::write(&path, "{ not json").unwrap();

    let engine = ExhaustiveCombinationEngine::new(JsonFileStore::new(&path), RecordingSink::new());
    assert_eq!(engine.should_recompute(&inputs()), RecomputeSignal::Force);

    let outcome = engine.compute(&inputs());
    assert_eq!(outcome.prompt, "a cat and red");
    assert!(outcome.persisted);
}

#[test]
fn test_write_failure_is_not_fatal() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = ReadOnlyStore(JsonFileStore::new(temp_dir.path().join("state.json")));
    let sink = RecordingSink::new();
    let engine = ExhaustiveCombinationEngine::new(store, &sink);

    let outcome = engine.compute(&inputs());
    assert_eq!(outcome.prompt, "a cat and red");
    assert!(!outcome.persisted);
    assert!(outcome.log.contains("not saved"));
    assert_eq!(sink.queue_requests(), 1);
}

// =============================================================================
// Generator + controller
// =============================================================================

#[test]
fn test_controller_walks_generated_list() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("auto_queue_state.json");
    let generated = generate(
        "[1] in [2], [1]",
        &supersugar::PoolInputs::new().with(1, "cat\ndog").with(2, "rain\nsun"),
        0,
    )
    .unwrap();
    let inputs = ControllerInputs::new(generated.combos.clone(), generated.config_hash.clone());

    let mut prompts = Vec::new();
    loop {
        let controller = LoopController::new(JsonFileStore::new(&path), RecordingSink::new());
        let outcome = controller.compute(&inputs);
        prompts.push(outcome.prompt);
        if !outcome.continued {
            break;
        }
    }
    assert_eq!(prompts, generated.combos);
    assert_eq!(prompts[0], "cat in rain, cat");
}
