//! Integration tests for program creation and state transitions.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use stepq::lifecycle::WriteMode;
use stepq::model::{JobDataMap, NewProgram, Program, ProgramFilter, ProgramStatus};
use stepq::store::memory::{MemoryQueue, MemoryStore};
use stepq::store::ProgramStore;
use stepq::{Error, ProgramLifecycle, RunId};

fn setup() -> (Arc<MemoryStore>, Arc<MemoryQueue>, ProgramLifecycle) {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::new());
    let lifecycle = ProgramLifecycle::new(store.clone(), queue.clone());
    (store, queue, lifecycle)
}

async fn create(lifecycle: &ProgramLifecycle, jobs: &[&str]) -> RunId {
    lifecycle
        .create_program(NewProgram::new(jobs.iter().copied()))
        .await
        .unwrap()
}

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_program_persists_row_and_enqueues_first_message() {
    let (_, queue, lifecycle) = setup();
    let mut seed = JobDataMap::new();
    seed.insert("b".to_string(), json!({"offset": 10}));

    let run_id = lifecycle
        .create_program(
            NewProgram::new(["a", "b"])
                .program_data(json!({"hostname": "shop.example.com"}))
                .job_data(seed),
        )
        .await
        .unwrap();

    let program = lifecycle.get_program(&run_id).await.unwrap();
    assert_eq!(program.jobs, vec!["a", "b"]);
    assert_eq!(program.program_data, json!({"hostname": "shop.example.com"}));
    assert_eq!(program.step, 0);
    assert_eq!(program.step_retry_count, 0);
    assert!(program.finished_at.is_none());
    assert!(program.errored_at.is_none());
    assert!(program.error_message.is_none());
    assert_eq!(program.status(), ProgramStatus::Running);
    assert_eq!(
        lifecycle.get_job_data(&run_id, "b").await.unwrap(),
        json!({"offset": 10})
    );

    let messages = queue.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].run_id, run_id);
    assert_eq!(messages[0].jobs, vec!["a", "b"]);
    assert_eq!(messages[0].program_data, json!({"hostname": "shop.example.com"}));
}

#[tokio::test]
async fn each_program_gets_a_distinct_run_id() {
    let (_, _, lifecycle) = setup();
    let a = create(&lifecycle, &["x"]).await;
    let b = create(&lifecycle, &["x"]).await;
    assert_ne!(a, b);
}

#[tokio::test]
async fn empty_job_list_is_rejected() {
    let (_, queue, lifecycle) = setup();

    let err = lifecycle
        .create_program(NewProgram::new(Vec::<String>::new()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidProgram(_)));
    assert!(queue.messages().is_empty());
}

/// A store whose writes always fail.
struct BrokenStore;

#[async_trait]
impl ProgramStore for BrokenStore {
    async fn save(&self, _: &RunId, _: &NewProgram) -> stepq::Result<()> {
        Err(Error::Storage("disk full".to_string()))
    }
    async fn get(&self, run_id: &RunId) -> stepq::Result<Program> {
        Err(Error::NotFound(run_id.to_string()))
    }
    async fn finish(&self, _: &RunId) -> stepq::Result<()> {
        Err(Error::Storage("disk full".to_string()))
    }
    async fn record_error(&self, _: &RunId, _: &str, _: bool) -> stepq::Result<()> {
        Err(Error::Storage("disk full".to_string()))
    }
    async fn increment_step(&self, _: &RunId) -> stepq::Result<()> {
        Err(Error::Storage("disk full".to_string()))
    }
    async fn increment_step_retry_count(&self, _: &RunId) -> stepq::Result<()> {
        Err(Error::Storage("disk full".to_string()))
    }
    async fn set_job_data(&self, _: &RunId, _: &JobDataMap) -> stepq::Result<()> {
        Err(Error::Storage("disk full".to_string()))
    }
    async fn unfinished(&self) -> stepq::Result<Vec<Program>> {
        Ok(Vec::new())
    }
    async fn list(&self, _: &ProgramFilter) -> stepq::Result<Vec<Program>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn failed_write_skips_enqueue() {
    let queue = Arc::new(MemoryQueue::new());
    let lifecycle = ProgramLifecycle::new(Arc::new(BrokenStore), queue.clone());

    let err = lifecycle
        .create_program(NewProgram::new(["a"]))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Storage(_)));
    assert!(queue.messages().is_empty());
}

#[tokio::test]
async fn failed_enqueue_leaves_unstarted_program() {
    let (_, queue, lifecycle) = setup();
    queue.set_failing(true);

    let err = lifecycle
        .create_program(NewProgram::new(["a"]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Queue(_)));

    let orphans = lifecycle.unfinished_programs().await.unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].step, 0);
}

// ---------------------------------------------------------------------------
// Job data
// ---------------------------------------------------------------------------

#[tokio::test]
async fn job_data_defaults_to_empty_object() {
    let (_, _, lifecycle) = setup();
    let run_id = create(&lifecycle, &["a"]).await;

    assert_eq!(lifecycle.get_job_data(&run_id, "a").await.unwrap(), json!({}));
}

#[tokio::test]
async fn job_data_of_unknown_run_is_not_found() {
    let (_, _, lifecycle) = setup();

    let err = lifecycle
        .get_job_data(&RunId::from("nope"), "a")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound(ref id) if id == "nope"));
}

#[tokio::test]
async fn replace_and_merge_job_data() {
    let (_, _, lifecycle) = setup();
    let run_id = create(&lifecycle, &["a", "b"]).await;

    lifecycle
        .update_job_data(&run_id, "a", json!({"x": 1, "y": 2}), WriteMode::Replace)
        .await
        .unwrap();
    lifecycle
        .update_job_data(&run_id, "a", json!({"y": 3, "z": 4}), WriteMode::Merge)
        .await
        .unwrap();
    lifecycle
        .update_job_data(&run_id, "b", json!({"only": true}), WriteMode::Replace)
        .await
        .unwrap();

    assert_eq!(
        lifecycle.get_job_data(&run_id, "a").await.unwrap(),
        json!({"x": 1, "y": 3, "z": 4})
    );
    assert_eq!(
        lifecycle.get_job_data(&run_id, "b").await.unwrap(),
        json!({"only": true})
    );

    lifecycle
        .update_job_data(&run_id, "a", json!({"fresh": true}), WriteMode::Replace)
        .await
        .unwrap();
    assert_eq!(
        lifecycle.get_job_data(&run_id, "a").await.unwrap(),
        json!({"fresh": true})
    );
}

#[tokio::test]
async fn merge_is_shallow() {
    let (_, _, lifecycle) = setup();
    let run_id = create(&lifecycle, &["a"]).await;

    lifecycle
        .update_job_data(&run_id, "a", json!({"nested": {"k1": 1}}), WriteMode::Replace)
        .await
        .unwrap();
    lifecycle
        .update_job_data(&run_id, "a", json!({"nested": {"k2": 2}}), WriteMode::Merge)
        .await
        .unwrap();

    assert_eq!(
        lifecycle.get_job_data(&run_id, "a").await.unwrap(),
        json!({"nested": {"k2": 2}})
    );
}

#[tokio::test]
async fn merge_requires_object_payload() {
    let (_, _, lifecycle) = setup();
    let run_id = create(&lifecycle, &["a"]).await;

    let err = lifecycle
        .update_job_data(&run_id, "a", json!([1, 2]), WriteMode::Merge)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidJobData(_)));
}

#[tokio::test]
async fn merge_over_non_object_starts_fresh() {
    let (_, _, lifecycle) = setup();
    let run_id = create(&lifecycle, &["a"]).await;

    lifecycle
        .update_job_data(&run_id, "a", json!("done"), WriteMode::Replace)
        .await
        .unwrap();
    lifecycle
        .update_job_data(&run_id, "a", json!({"k": 1}), WriteMode::Merge)
        .await
        .unwrap();

    assert_eq!(lifecycle.get_job_data(&run_id, "a").await.unwrap(), json!({"k": 1}));
}

// ---------------------------------------------------------------------------
// Counters and terminal transitions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn step_increment_resets_retry_count() {
    let (_, _, lifecycle) = setup();
    let run_id = create(&lifecycle, &["a", "b"]).await;

    lifecycle.increment_step_retry_count(&run_id).await.unwrap();
    lifecycle.increment_step_retry_count(&run_id).await.unwrap();
    assert_eq!(lifecycle.get_program(&run_id).await.unwrap().step_retry_count, 2);

    lifecycle.increment_step(&run_id).await.unwrap();
    let program = lifecycle.get_program(&run_id).await.unwrap();
    assert_eq!(program.step, 1);
    assert_eq!(program.step_retry_count, 0);
}

#[tokio::test]
async fn finish_sets_timestamp_and_resets_retry_count() {
    let (_, _, lifecycle) = setup();
    let run_id = create(&lifecycle, &["a"]).await;
    lifecycle.increment_step_retry_count(&run_id).await.unwrap();

    lifecycle.finish_program(&run_id).await.unwrap();

    let program = lifecycle.get_program(&run_id).await.unwrap();
    assert!(program.finished_at.is_some());
    assert_eq!(program.step_retry_count, 0);
    assert_eq!(program.status(), ProgramStatus::Finished);
    assert!(program.is_terminal());
    assert!(!lifecycle.is_program_finished_with_error(&run_id).await.unwrap());
}

#[tokio::test]
async fn set_program_to_error_is_terminal_and_truncates() {
    let (_, _, lifecycle) = setup();
    let run_id = create(&lifecycle, &["a"]).await;

    lifecycle
        .set_program_to_error(&run_id, &"e".repeat(400))
        .await
        .unwrap();

    let program = lifecycle.get_program(&run_id).await.unwrap();
    assert!(program.errored_at.is_some());
    assert_eq!(program.error_message.unwrap().len(), 255);
    assert!(lifecycle.is_program_finished_with_error(&run_id).await.unwrap());
}

#[tokio::test]
async fn terminal_states_are_exclusive() {
    let (_, _, lifecycle) = setup();
    let finished = create(&lifecycle, &["a"]).await;
    let errored = create(&lifecycle, &["a"]).await;

    lifecycle.finish_program(&finished).await.unwrap();
    lifecycle.set_program_to_error(&finished, "late").await.unwrap();
    lifecycle.set_program_to_error(&errored, "boom").await.unwrap();
    lifecycle.finish_program(&errored).await.unwrap();

    let finished = lifecycle.get_program(&finished).await.unwrap();
    assert_eq!(finished.status(), ProgramStatus::Finished);
    assert!(finished.errored_at.is_none());
    assert!(lifecycle.is_program_finished(&finished.run_id).await.unwrap());

    let errored = lifecycle.get_program(&errored).await.unwrap();
    assert_eq!(errored.status(), ProgramStatus::Errored);
    assert!(errored.finished_at.is_none());
    assert!(!lifecycle.is_program_finished(&errored.run_id).await.unwrap());
}

#[tokio::test]
async fn retriable_error_message_is_not_terminal() {
    let (_, _, lifecycle) = setup();
    let run_id = create(&lifecycle, &["a"]).await;

    lifecycle
        .set_job_retriable_error_message(&run_id, "try again")
        .await
        .unwrap();

    let program = lifecycle.get_program(&run_id).await.unwrap();
    assert!(program.errored_at.is_none());
    assert_eq!(program.error_message.as_deref(), Some("try again"));
    assert!(!lifecycle.is_program_finished_with_error(&run_id).await.unwrap());
}

#[tokio::test]
async fn transitions_on_unknown_run_are_not_found() {
    let (_, _, lifecycle) = setup();
    let missing = RunId::from("missing");

    assert!(matches!(
        lifecycle.increment_step(&missing).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        lifecycle.finish_program(&missing).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        lifecycle.is_program_finished_with_error(&missing).await,
        Err(Error::NotFound(_))
    ));
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unfinished_excludes_terminal_runs() {
    let (store, _, lifecycle) = setup();
    let running = create(&lifecycle, &["a"]).await;
    let finished = create(&lifecycle, &["a"]).await;
    let errored = create(&lifecycle, &["a"]).await;
    lifecycle.finish_program(&finished).await.unwrap();
    lifecycle.set_program_to_error(&errored, "x").await.unwrap();

    let unfinished = lifecycle.unfinished_programs().await.unwrap();
    assert_eq!(unfinished.len(), 1);
    assert_eq!(unfinished[0].run_id, running);

    let errored_only = store
        .list(&ProgramFilter {
            status: Some(ProgramStatus::Errored),
            ..ProgramFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(errored_only.len(), 1);
    assert_eq!(errored_only[0].run_id, errored);

    let limited = store
        .list(&ProgramFilter {
            limit: 2,
            ..ProgramFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(limited.len(), 2);
}
