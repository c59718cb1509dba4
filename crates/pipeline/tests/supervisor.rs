//! Integration tests for the orchestrator supervisor.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{wait_until, ScriptedClient, TestEnv, REMOTE_UUID};
use orthoflow_core::quality::{ProcessingOptions, ProcessingQuality};
use orthoflow_core::status::ProcessingStatus;
use orthoflow_pipeline::supervisor::MSG_INTERRUPTED_BY_RESTART;
use orthoflow_pipeline::{OrchestratorSupervisor, SupervisorError};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn supervisor(env: &TestEnv, client: &Arc<ScriptedClient>) -> Arc<OrchestratorSupervisor> {
    Arc::new(OrchestratorSupervisor::new(
        env.store.clone(),
        client.clone(),
        env.registry.clone(),
        env.config.clone(),
    ))
}

async fn wait_for_status(env: &TestEnv, task_id: &str, status: ProcessingStatus) {
    let store = env.store.clone();
    let task_id = task_id.to_string();
    wait_until(|| {
        let store = store.clone();
        let task_id = task_id.clone();
        async move { store.project(&task_id).await.status == status }
    })
    .await;
}

async fn wait_for_progress_writes(env: &TestEnv, count: usize) {
    let store = env.store.clone();
    wait_until(|| {
        let store = store.clone();
        async move { store.applied_progress().len() >= count }
    })
    .await;
}

// ---------------------------------------------------------------------------
// Test: Start preconditions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_start_marks_processing_and_completes() {
    let env = TestEnv::new();
    env.seed_pending("task_a", 4, ProcessingQuality::Low).await;
    let client = Arc::new(
        ScriptedClient::new()
            .running(50.0)
            .completed()
            .with_bundle(&["odm_orthophoto/odm_orthophoto.tif"]),
    );
    let supervisor = supervisor(&env, &client);

    supervisor
        .start("task_a", ProcessingOptions::for_quality(ProcessingQuality::High))
        .await
        .unwrap();

    wait_for_status(&env, "task_a", ProcessingStatus::Completed).await;

    let project = env.store.project("task_a").await;
    assert_eq!(project.quality, ProcessingQuality::High);
    let options = project.processing_options.unwrap();
    assert_eq!(options["feature-quality"], "high");
    assert_eq!(options["dsm"], true);

    let sup = supervisor.clone();
    wait_until(|| {
        let sup = sup.clone();
        async move { !sup.is_running("task_a").await }
    })
    .await;
    assert_eq!(supervisor.running_count().await, 0);
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let env = TestEnv::new();
    env.seed_pending("task_a", 3, ProcessingQuality::Medium).await;
    let client = Arc::new(ScriptedClient::new().running(5.0));
    let supervisor = supervisor(&env, &client);

    supervisor
        .start("task_a", ProcessingOptions::default())
        .await
        .unwrap();
    let second = supervisor
        .start("task_a", ProcessingOptions::default())
        .await;

    assert_matches!(second, Err(SupervisorError::Conflict(id)) if id == "task_a");
    assert!(supervisor.is_running("task_a").await);

    let engine = client.clone();
    wait_until(|| {
        let engine = engine.clone();
        async move { engine.submissions().len() == 1 }
    })
    .await;
    wait_for_progress_writes(&env, 2).await;
    assert_eq!(client.submissions().len(), 1);

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_start_requires_existing_pending_record() {
    let env = TestEnv::new();
    env.seed_processing("task_busy", 10, None).await;
    let client = Arc::new(ScriptedClient::new());
    let supervisor = supervisor(&env, &client);

    assert_matches!(
        supervisor
            .start("task_missing", ProcessingOptions::default())
            .await,
        Err(SupervisorError::NotFound(_))
    );
    assert_matches!(
        supervisor
            .start("task_busy", ProcessingOptions::default())
            .await,
        Err(SupervisorError::InvalidState {
            status: ProcessingStatus::Processing,
            ..
        })
    );

    // Failed starts release the slot.
    assert_eq!(supervisor.running_count().await, 0);
}

// ---------------------------------------------------------------------------
// Test: Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cancel_one_stops_writes_and_marks_cancelled() {
    let env = TestEnv::new();
    env.seed_pending("task_a", 3, ProcessingQuality::Medium).await;
    let client = Arc::new(ScriptedClient::new().running(10.0));
    let supervisor = supervisor(&env, &client);
    let mut sub = env.registry.subscribe("task_a");

    supervisor
        .start("task_a", ProcessingOptions::default())
        .await
        .unwrap();
    wait_for_progress_writes(&env, 2).await;

    assert!(supervisor.cancel_one("task_a").await);
    assert!(!supervisor.is_running("task_a").await);

    let project = env.store.project("task_a").await;
    assert_eq!(project.status, ProcessingStatus::Cancelled);
    assert_eq!(client.cancelled_jobs(), vec![REMOTE_UUID.to_string()]);

    let writes = env.store.applied_count();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(env.store.applied_count(), writes);

    let mut last = None;
    while let Ok(event) = sub.receiver.try_recv() {
        last = Some(event);
    }
    assert_eq!(last.unwrap().status, ProcessingStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_one_for_idle_task_is_harmless() {
    let env = TestEnv::new();
    env.seed_pending("task_a", 3, ProcessingQuality::Medium).await;
    let client = Arc::new(ScriptedClient::new());
    let supervisor = supervisor(&env, &client);

    assert!(!supervisor.cancel_one("task_a").await);
    assert!(!supervisor.cancel_one("task_missing").await);
    assert_eq!(
        env.store.project("task_a").await.status,
        ProcessingStatus::Pending
    );
    assert!(client.cancelled_jobs().is_empty());
}

#[tokio::test]
async fn test_slot_stays_reserved_until_cancelled_routine_exits() {
    let env = TestEnv::new();
    env.seed_pending("task_a", 3, ProcessingQuality::Medium).await;
    let client = Arc::new(ScriptedClient::new().running(10.0));
    let supervisor = supervisor(&env, &client);
    env.store.hold_progress_writes();

    supervisor
        .start("task_a", ProcessingOptions::default())
        .await
        .unwrap();
    let store = env.store.clone();
    wait_until(|| {
        let store = store.clone();
        async move { store.held_progress_writes() >= 1 }
    })
    .await;

    // The routine is stuck in a store write and cannot observe its token yet.
    let cancelling = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move { supervisor.cancel_one("task_a").await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(supervisor.is_running("task_a").await);
    assert_matches!(
        supervisor.resume("task_a").await,
        Err(SupervisorError::Conflict(id)) if id == "task_a"
    );

    env.store.release_progress_writes();
    let was_running = tokio::time::timeout(common::WAIT_LIMIT, cancelling)
        .await
        .unwrap()
        .unwrap();

    assert!(was_running);
    assert!(!supervisor.is_running("task_a").await);
    assert_eq!(
        env.store.project("task_a").await.status,
        ProcessingStatus::Cancelled
    );
    assert_eq!(client.submissions().len(), 1);
}

#[tokio::test]
async fn test_stop_all_leaves_records_processing() {
    let env = TestEnv::new();
    for id in ["task_a", "task_b", "task_c"] {
        env.seed_pending(id, 3, ProcessingQuality::Medium).await;
    }
    let client = Arc::new(ScriptedClient::new().running(1.0));
    let supervisor = supervisor(&env, &client);

    for id in ["task_a", "task_b", "task_c"] {
        supervisor
            .start(id, ProcessingOptions::default())
            .await
            .unwrap();
    }
    assert_eq!(supervisor.running_count().await, 3);

    supervisor.stop_all().await;

    assert_eq!(supervisor.running_count().await, 0);
    for id in ["task_a", "task_b", "task_c"] {
        assert_eq!(
            env.store.project(id).await.status,
            ProcessingStatus::Processing
        );
    }

    env.seed_pending("task_d", 3, ProcessingQuality::Medium).await;
    assert_matches!(
        supervisor.start("task_d", ProcessingOptions::default()).await,
        Err(SupervisorError::ShuttingDown)
    );
}

// ---------------------------------------------------------------------------
// Test: Restart recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_recover_interrupted_resumes_or_fails() {
    let env = TestEnv::new();
    env.seed_processing("task_with_job", 20, Some(REMOTE_UUID)).await;
    env.seed_processing("task_orphan", 35, None).await;
    let client = Arc::new(ScriptedClient::new().running(70.0).completed());
    let supervisor = supervisor(&env, &client);

    let report = supervisor.recover_interrupted().await.unwrap();

    assert_eq!(report.resumed, vec!["task_with_job".to_string()]);
    assert_eq!(report.failed, vec!["task_orphan".to_string()]);

    let orphan = env.store.project("task_orphan").await;
    assert_eq!(orphan.status, ProcessingStatus::Failed);
    assert_eq!(orphan.error_message.as_deref(), Some(MSG_INTERRUPTED_BY_RESTART));

    wait_for_status(&env, "task_with_job", ProcessingStatus::Completed).await;
    assert!(client.submissions().is_empty());
}

#[tokio::test]
async fn test_resume_requires_remote_handle() {
    let env = TestEnv::new();
    env.seed_processing("task_orphan", 35, None).await;
    let client = Arc::new(ScriptedClient::new());
    let supervisor = supervisor(&env, &client);

    assert_matches!(
        supervisor.resume("task_orphan").await,
        Err(SupervisorError::InvalidState { .. })
    );
    assert_eq!(supervisor.running_count().await, 0);
}

// ---------------------------------------------------------------------------
// Test: Fan-out through the supervisor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_three_subscribers_receive_identical_sequences() {
    let env = TestEnv::new();
    env.seed_pending("task_a", 3, ProcessingQuality::Medium).await;
    let client = Arc::new(
        ScriptedClient::new()
            .running(10.0)
            .running(25.0)
            .running(55.0)
            .running(80.0)
            .completed(),
    );
    let supervisor = supervisor(&env, &client);
    let mut subs: Vec<_> = (0..3).map(|_| env.registry.subscribe("task_a")).collect();

    supervisor
        .start("task_a", ProcessingOptions::default())
        .await
        .unwrap();

    for sub in &mut subs {
        let mut seen = Vec::new();
        for _ in 0..5 {
            let event = tokio::time::timeout(common::WAIT_LIMIT, sub.receiver.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push((event.status, event.progress));
        }
        assert_eq!(
            seen,
            vec![
                (ProcessingStatus::Processing, 10),
                (ProcessingStatus::Processing, 25),
                (ProcessingStatus::Processing, 55),
                (ProcessingStatus::Processing, 80),
                (ProcessingStatus::Completed, 100),
            ]
        );
    }
}
