//! End-to-end scenarios over the in-memory ports: task created -> operators
//! sign -> quorum -> one submission.

mod common;

use common::{Harness, eventually, task};

use tally_core::domain::{
    IntakeError, OperatorId, OrchestratorError, QuorumNum, TaskIndex, TaskResponse,
};
use tally_core::impls::{HashXorScheme, StaticOperatorRegistry};
use tally_core::{AggregationFailurePolicy, AggregatorConfig};

fn operators_40_30_30() -> StaticOperatorRegistry {
    StaticOperatorRegistry::new()
        .with_operator(QuorumNum(0), OperatorId::from_low_byte(1), 40)
        .with_operator(QuorumNum(0), OperatorId::from_low_byte(2), 30)
        .with_operator(QuorumNum(0), OperatorId::from_low_byte(3), 30)
}

/// One-second sessions: window of 1 block at 1 s per block.
fn short_window(policy: AggregationFailurePolicy) -> AggregatorConfig {
    AggregatorConfig {
        challenge_window_blocks: 1,
        block_time_secs: 1,
        failure_policy: policy,
        ..AggregatorConfig::default()
    }
}

#[tokio::test]
async fn quorum_of_agreeing_operators_is_submitted_once() {
    let harness = Harness::start(AggregatorConfig::default(), operators_40_30_30());
    let answer = serde_json::json!({ "squared": "0xAB" });

    harness.publish_task(task(5, 1000, &[0], 66)).await;
    harness.wait_tracked(5).await;

    let d1 = harness.respond(5, answer.clone(), 1).await.unwrap();
    let d2 = harness.respond(5, answer.clone(), 2).await.unwrap();
    assert_eq!(d1, d2);

    let writer = harness.writer.clone();
    eventually(|| {
        let writer = writer.clone();
        async move { !writer.submitted_indices().is_empty() }
    })
    .await;

    // a third, late signature must not lead to a second submission
    let late = harness.respond(5, answer.clone(), 3).await;
    assert!(matches!(late, Err(IntakeError::Aggregation(_))));

    let stats = harness.metrics.snapshot();
    harness.stop().await.unwrap();

    let submissions = writer.submissions();
    assert_eq!(submissions.len(), 1);
    let submission = &submissions[0];
    assert_eq!(submission.task.index, TaskIndex::new(5));
    assert_eq!(submission.response, TaskResponse::new(TaskIndex::new(5), answer));
    assert_eq!(submission.response.digest(), d1);
    assert_eq!(
        submission.proof.non_signer_pubkeys,
        vec![HashXorScheme::pubkey_for(&OperatorId::from_low_byte(3))]
    );
    assert!(submission.receipt.is_some());

    assert_eq!(stats.tasks_received, 1);
    assert_eq!(stats.responses_accepted, 2);
    assert_eq!(stats.submissions_sent, 1);
}

#[tokio::test]
async fn minority_digest_does_not_win() {
    let harness = Harness::start(AggregatorConfig::default(), operators_40_30_30());
    harness.publish_task(task(8, 10, &[0], 66)).await;
    harness.wait_tracked(8).await;

    // 40% says 48, 60% says 49
    harness.respond(8, serde_json::json!(48), 1).await.unwrap();
    harness.respond(8, serde_json::json!(49), 2).await.unwrap();
    harness.respond(8, serde_json::json!(49), 3).await.unwrap();
    assert_eq!(harness.registry.response_count(TaskIndex::new(8)).await, 2);

    // 60% < 66%: nothing goes out
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(harness.writer.submissions().is_empty());

    harness.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn expired_session_halts_the_loop_without_submitting() {
    let harness = Harness::start(
        short_window(AggregationFailurePolicy::Halt),
        operators_40_30_30(),
    );
    harness.publish_task(task(5, 1000, &[0], 66)).await;
    harness.wait_tracked(5).await;
    // 40% only
    harness
        .respond(5, serde_json::json!("0xAB"), 1)
        .await
        .unwrap();

    let writer = harness.writer.clone();
    let metrics = harness.metrics.clone();
    let result = harness.join().await;

    match result {
        Err(OrchestratorError::AggregationFailed { task_index, .. }) => {
            assert_eq!(task_index, TaskIndex::new(5));
        }
        other => panic!("expected AggregationFailed, got {other:?}"),
    }
    assert!(writer.submissions().is_empty());
    assert_eq!(metrics.snapshot().aggregations_failed, 1);
}

#[tokio::test(start_paused = true)]
async fn skip_policy_keeps_loop_alive_after_expiry() {
    let harness = Harness::start(
        short_window(AggregationFailurePolicy::Skip),
        StaticOperatorRegistry::uniform(&[QuorumNum(0)], 2, 1),
    );

    harness.publish_task(task(1, 1, &[0], 100)).await;
    let metrics = harness.metrics.clone();
    eventually(|| {
        let metrics = metrics.clone();
        async move { metrics.snapshot().aggregations_failed == 1 }
    })
    .await;

    harness.publish_task(task(2, 2, &[0], 50)).await;
    harness.wait_tracked(2).await;
    harness.respond(2, serde_json::json!(4), 1).await.unwrap();

    let writer = harness.writer.clone();
    eventually(|| {
        let writer = writer.clone();
        async move { writer.submitted_indices() == vec![TaskIndex::new(2)] }
    })
    .await;

    // task 1 stays unresolved but registered
    assert!(harness.registry.contains_task(TaskIndex::new(1)).await);
    harness.stop().await.unwrap();
}

#[tokio::test]
async fn failed_submission_leaves_task_unresolved_and_loop_running() {
    let harness = Harness::start(
        AggregatorConfig::default(),
        StaticOperatorRegistry::uniform(&[QuorumNum(0)], 1, 1),
    );
    harness
        .writer
        .set_failure(Some(tally_core::domain::SubmissionError::Reverted(
            "task already responded".into(),
        )));

    harness.publish_task(task(3, 1, &[0], 100)).await;
    harness.wait_tracked(3).await;
    harness.respond(3, serde_json::json!(9), 1).await.unwrap();

    let metrics = harness.metrics.clone();
    eventually(|| {
        let metrics = metrics.clone();
        async move { metrics.snapshot().submissions_failed == 1 }
    })
    .await;
    assert!(harness.writer.submitted_indices().is_empty());
    assert!(harness.registry.contains_task(TaskIndex::new(3)).await);

    // still processing new tasks
    harness.publish_task(task(4, 2, &[0], 100)).await;
    harness.wait_tracked(4).await;
    harness.stop().await.unwrap();
}

#[tokio::test]
async fn finalized_tasks_are_dropped_when_not_retained() {
    let harness = Harness::start(
        AggregatorConfig {
            retain_finalized: false,
            ..AggregatorConfig::default()
        },
        StaticOperatorRegistry::uniform(&[QuorumNum(0)], 1, 1),
    );
    harness.publish_task(task(6, 1, &[0], 100)).await;
    harness.wait_tracked(6).await;
    harness.respond(6, serde_json::json!(36), 1).await.unwrap();

    let registry = harness.registry.clone();
    eventually(|| {
        let registry = registry.clone();
        async move { !registry.contains_task(TaskIndex::new(6)).await }
    })
    .await;
    assert_eq!(harness.writer.submitted_indices(), vec![TaskIndex::new(6)]);
    harness.stop().await.unwrap();
}
