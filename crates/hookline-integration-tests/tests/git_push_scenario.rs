//! Integration tests for the git push scenario
//!
//! Two processors share one route and react to the same push: one emits
//! branch records and one emits folder records.

mod common;

use common::{
    branch_factory, folder_factory, git_push_payload, git_resources, kind, queued_event,
    registry_with, route, RecordingSink,
};
use hookline_core::{
    Authentication, LifecycleStage, PipelineConfig, PipelineRunner, ProcessingStatus, SkipReason,
};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

fn git_runner() -> PipelineRunner {
    PipelineRunner::with_defaults(registry_with(vec![
        branch_factory(Authentication::None),
        folder_factory(Authentication::None),
    ]))
}

/// Verify a push yields one branch upsert and one folder upsert with no failures
#[tokio::test]
async fn test_git_push_produces_branch_and_folder_upserts() {
    // Arrange
    let runner = git_runner();
    let event = queued_event(git_push_payload());

    // Act
    let report = runner
        .run(event.clone(), &route(), &git_resources())
        .await
        .expect("pipeline run should succeed");

    // Assert: one record per kind
    let branches = report.result.get(&kind("branch")).expect("branch entry");
    assert_eq!(
        branches.upserted,
        vec![json!({
            "id": "repo-1:main",
            "name": "main",
            "commit": "9a8b7c6d5e4f3a2b1c0d9e8f7a6b5c4d3e2f1a0b",
        })]
    );
    assert!(branches.deleted.is_empty());

    let folders = report.result.get(&kind("folder")).expect("folder entry");
    assert_eq!(
        folders.upserted,
        vec![json!({ "id": "repo-1:/services/payments", "path": "/services/payments" })]
    );
    assert!(folders.deleted.is_empty());

    // Assert: diagnostics in registration order, none failed
    let names: Vec<_> = report
        .diagnostics
        .iter()
        .map(|d| d.processor_name.as_str())
        .collect();
    assert_eq!(names, vec!["BranchProcessor", "FolderProcessor"]);
    assert_eq!(report.count_status("FAILED"), 0);
    assert_eq!(report.count_status("SUCCEEDED"), 2);
    assert_eq!(report.status_code(), 200);

    // Assert: lifecycle completed
    assert!(event.timestamp(LifecycleStage::Succeeded).is_some());
    assert!(event.timestamp(LifecycleStage::Failed).is_none());
}

/// Verify a deleted branch is reported as a deletion
#[tokio::test]
async fn test_branch_deletion_is_reported_as_delete() {
    // Arrange
    let runner = git_runner();
    let mut payload = git_push_payload();
    payload["resource"]["refUpdates"][0]["newObjectId"] =
        json!("0000000000000000000000000000000000000000");
    payload["resource"]["refUpdates"][0]["changes"] = json!([]);

    // Act
    let report = runner
        .run(queued_event(payload), &route(), &git_resources())
        .await
        .unwrap();

    // Assert
    let branches = report.result.get(&kind("branch")).unwrap();
    assert!(branches.upserted.is_empty());
    assert_eq!(branches.deleted.len(), 1);
    assert_eq!(branches.deleted[0]["id"], "repo-1:main");

    let folders = report.result.get(&kind("folder")).unwrap();
    assert!(folders.upserted.is_empty());
    assert!(folders.deleted.is_empty());
}

/// Verify events of another type are skipped by both processors
#[tokio::test]
async fn test_other_event_types_are_filtered_out() {
    // Arrange
    let runner = git_runner();
    let mut payload = git_push_payload();
    payload["eventType"] = json!("git.pullrequest.created");

    // Act
    let report = runner
        .run(queued_event(payload), &route(), &git_resources())
        .await
        .unwrap();

    // Assert
    assert!(report.result.is_empty());
    assert!(report
        .diagnostics
        .iter()
        .all(|d| d.status == ProcessingStatus::Skipped(SkipReason::FilteredOut)));
    assert_eq!(report.status_code(), 200);
}

/// Verify a malformed push is rejected by validation and mapped to 400
#[tokio::test]
async fn test_malformed_push_is_rejected() {
    // Arrange
    let runner = git_runner();
    let payload = json!({ "eventType": "git.push", "resource": {} });

    // Act
    let report = runner
        .run(queued_event(payload), &route(), &git_resources())
        .await
        .unwrap();

    // Assert
    assert_eq!(report.count_status("REJECTED"), 2);
    assert_eq!(report.status_code(), 400);
}

/// Verify only the resource configs a processor declares are passed to it
#[tokio::test]
async fn test_missing_resource_config_skips_processor() {
    // Arrange: no folder resource configured
    let runner = git_runner();
    let resources = vec![git_resources().remove(0)];

    // Act
    let report = runner
        .run(queued_event(git_push_payload()), &route(), &resources)
        .await
        .unwrap();

    // Assert
    assert!(report.result.get(&kind("branch")).is_some());
    assert!(report.result.get(&kind("folder")).is_none());
    assert_eq!(
        report.diagnostics[1].status,
        ProcessingStatus::Skipped(SkipReason::NoMatchingResourceConfig)
    );
}

/// Verify the sink receives the same result and diagnostics as the report
#[tokio::test]
async fn test_sink_receives_report_contents() {
    // Arrange
    let sink = Arc::new(RecordingSink::default());
    let runner = git_runner().with_sink(sink.clone());
    let event = queued_event(git_push_payload());

    // Act
    let report = runner
        .run(event.clone(), &route(), &git_resources())
        .await
        .unwrap();

    // Assert
    let deliveries = sink.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(&deliveries[0].trace_id, event.trace_id());
    assert_eq!(deliveries[0].result, report.result);
    assert_eq!(deliveries[0].diagnostics, report.diagnostics);
}

/// Verify the report serializes the fields a transport would return
#[tokio::test]
async fn test_report_serializes_for_transport() {
    // Arrange
    let runner = git_runner();

    // Act
    let report = runner
        .run(queued_event(git_push_payload()), &route(), &git_resources())
        .await
        .unwrap();
    let body = serde_json::to_value(&report).unwrap();

    // Assert
    assert_eq!(body["route"], "/integration/webhook");
    assert_eq!(body["diagnostics"][0]["status"], json!({ "status": "SUCCEEDED" }));
    assert!(body["diagnostics"][0].get("error").is_none());
    assert!(body["result"]["kinds"]["branch"]["upserted"].is_array());
    assert!(body["timestamps"]["succeeded"].is_string());
}

/// Verify a runner built from a configuration file processes the push
#[tokio::test]
async fn test_runner_from_configuration_file() {
    // Arrange
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(
        b"dispatch:\n  processor_timeout_ms: 2000\n  max_concurrent_processors: 1\nretry:\n  max_attempts: 2\n",
    )
    .unwrap();
    file.flush().unwrap();

    let config = PipelineConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.dispatch.processor_timeout(), Duration::from_secs(2));

    let runner = PipelineRunner::from_config(
        &config,
        registry_with(vec![
            branch_factory(Authentication::None),
            folder_factory(Authentication::None),
        ]),
    );

    // Act
    let report = runner
        .run(queued_event(git_push_payload()), &route(), &git_resources())
        .await
        .unwrap();

    // Assert
    assert_eq!(report.result.upserted_count(), 2);
    assert_eq!(report.count_status("SUCCEEDED"), 2);
}
