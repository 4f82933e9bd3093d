//! Common test utilities for hookline integration tests
//!
//! This module provides:
//! - Git push processors modelled on a repository hosting integration
//! - A recording result sink
//! - Helper functions for building events, routes and registries

use async_trait::async_trait;
use hookline_core::{
    AggregatedResult, Authentication, Diagnostic, EventHeaders, EventProcessor,
    FnProcessorFactory, Kind, ProcessorError, ProcessorFactory, ProcessorRegistry, RawResults,
    ResourceConfig, ResultSink, Route, SinkError, TraceId, WebhookEvent,
};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

#[allow(dead_code)]
pub const WEBHOOK_ROUTE: &str = "/integration/webhook";
#[allow(dead_code)]
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

const DELETED_OBJECT_ID: &str = "0000000000000000000000000000000000000000";

// ============================================================================
// Fixtures
// ============================================================================

#[allow(dead_code)]
pub fn route() -> Route {
    Route::new(WEBHOOK_ROUTE).unwrap()
}

#[allow(dead_code)]
pub fn kind(name: &str) -> Kind {
    Kind::new(name).unwrap()
}

/// Resource configs for both git push kinds
#[allow(dead_code)]
pub fn git_resources() -> Vec<ResourceConfig> {
    vec![
        ResourceConfig::new(kind("branch"), json!({ "query": "true" })),
        ResourceConfig::new(kind("folder"), json!({ "query": "true" })),
    ]
}

/// A push of one branch carrying one folder-affecting change
#[allow(dead_code)]
pub fn git_push_payload() -> Value {
    json!({
        "eventType": "git.push",
        "resource": {
            "repository": { "id": "repo-1", "name": "catalog" },
            "refUpdates": [
                {
                    "name": "refs/heads/main",
                    "oldObjectId": "4f1c2e0a9b7d6c5e4f3a2b1c0d9e8f7a6b5c4d3e",
                    "newObjectId": "9a8b7c6d5e4f3a2b1c0d9e8f7a6b5c4d3e2f1a0b",
                    "changes": [
                        {
                            "changeType": "add",
                            "item": { "path": "/services/payments", "isFolder": true }
                        },
                        {
                            "changeType": "edit",
                            "item": { "path": "/README.md", "isFolder": false }
                        }
                    ]
                }
            ]
        }
    })
}

#[allow(dead_code)]
pub fn queued_event(payload: Value) -> Arc<WebhookEvent> {
    Arc::new(WebhookEvent::received(
        TraceId::new(),
        payload,
        EventHeaders::new(),
    ))
}

#[allow(dead_code)]
pub fn registry_with(factories: Vec<Arc<dyn ProcessorFactory>>) -> Arc<ProcessorRegistry> {
    let registry = Arc::new(ProcessorRegistry::new());
    for factory in factories {
        registry.register(route(), factory).unwrap();
    }
    registry
}

// ============================================================================
// Git push processors
// ============================================================================

fn is_git_push(event: &WebhookEvent) -> bool {
    event.payload()["eventType"] == "git.push"
}

fn ref_updates(payload: &Value) -> &[Value] {
    payload["resource"]["refUpdates"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn repository_id(payload: &Value) -> &str {
    payload["resource"]["repository"]["id"]
        .as_str()
        .unwrap_or("unknown")
}

fn has_ref_updates(payload: &Value) -> bool {
    payload["resource"]["refUpdates"].is_array()
        && payload["resource"]["repository"]["id"].is_string()
}

/// Emits one branch record per updated `refs/heads/*` ref.
pub struct BranchProcessor {
    event: Arc<WebhookEvent>,
    authentication: Authentication,
}

#[async_trait]
impl EventProcessor for BranchProcessor {
    async fn authenticate(&self, _payload: &Value, _headers: &EventHeaders) -> bool {
        self.authentication.authenticate_event(&self.event)
    }

    fn should_process_event(&self, event: &WebhookEvent) -> bool {
        is_git_push(event)
    }

    fn validate_payload(&self, payload: &Value) -> bool {
        has_ref_updates(payload)
    }

    async fn get_matching_kinds(&self, _event: &WebhookEvent) -> BTreeSet<Kind> {
        BTreeSet::from([kind("branch")])
    }

    async fn handle_event(
        &self,
        payload: &Value,
        _resource_config: &ResourceConfig,
    ) -> Result<RawResults, ProcessorError> {
        let repository = repository_id(payload);
        let mut results = RawResults::default();

        for update in ref_updates(payload) {
            let Some(branch) = update["name"]
                .as_str()
                .and_then(|name| name.strip_prefix("refs/heads/"))
            else {
                continue;
            };

            let record = json!({
                "id": format!("{repository}:{branch}"),
                "name": branch,
                "commit": update["newObjectId"],
            });

            if update["newObjectId"] == DELETED_OBJECT_ID {
                results.deleted.push(record);
            } else {
                results.upserted.push(record);
            }
        }

        Ok(results)
    }
}

/// Emits one folder record per folder touched by a pushed change.
pub struct FolderProcessor {
    event: Arc<WebhookEvent>,
    authentication: Authentication,
}

#[async_trait]
impl EventProcessor for FolderProcessor {
    async fn authenticate(&self, _payload: &Value, _headers: &EventHeaders) -> bool {
        self.authentication.authenticate_event(&self.event)
    }

    fn should_process_event(&self, event: &WebhookEvent) -> bool {
        is_git_push(event)
    }

    fn validate_payload(&self, payload: &Value) -> bool {
        has_ref_updates(payload)
    }

    async fn get_matching_kinds(&self, _event: &WebhookEvent) -> BTreeSet<Kind> {
        BTreeSet::from([kind("folder")])
    }

    async fn handle_event(
        &self,
        payload: &Value,
        _resource_config: &ResourceConfig,
    ) -> Result<RawResults, ProcessorError> {
        let repository = repository_id(payload);
        let mut results = RawResults::default();

        let changes = ref_updates(payload)
            .iter()
            .filter_map(|update| update["changes"].as_array())
            .flatten();

        for change in changes {
            if change["item"]["isFolder"] != true {
                continue;
            }
            let Some(path) = change["item"]["path"].as_str() else {
                continue;
            };

            let record = json!({ "id": format!("{repository}:{path}"), "path": path });
            if change["changeType"] == "delete" {
                results.deleted.push(record);
            } else {
                results.upserted.push(record);
            }
        }

        Ok(results)
    }
}

#[allow(dead_code)]
pub fn branch_factory(authentication: Authentication) -> Arc<dyn ProcessorFactory> {
    Arc::new(FnProcessorFactory::new(
        "BranchProcessor",
        move |event: &Arc<WebhookEvent>| {
            Box::new(BranchProcessor {
                event: Arc::clone(event),
                authentication: authentication.clone(),
            }) as Box<dyn EventProcessor>
        },
    ))
}

#[allow(dead_code)]
pub fn folder_factory(authentication: Authentication) -> Arc<dyn ProcessorFactory> {
    Arc::new(FnProcessorFactory::new(
        "FolderProcessor",
        move |event: &Arc<WebhookEvent>| {
            Box::new(FolderProcessor {
                event: Arc::clone(event),
                authentication: authentication.clone(),
            }) as Box<dyn EventProcessor>
        },
    ))
}

// ============================================================================
// Recording sink
// ============================================================================

/// One captured sink delivery
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct Delivery {
    pub trace_id: TraceId,
    pub result: AggregatedResult,
    pub diagnostics: Vec<Diagnostic>,
}

/// Result sink that records every delivery
#[derive(Default)]
#[allow(dead_code)]
pub struct RecordingSink {
    deliveries: Mutex<Vec<Delivery>>,
}

impl RecordingSink {
    #[allow(dead_code)]
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    async fn deliver(
        &self,
        trace_id: &TraceId,
        result: &AggregatedResult,
        diagnostics: &[Diagnostic],
    ) -> Result<(), SinkError> {
        self.deliveries.lock().unwrap().push(Delivery {
            trace_id: trace_id.clone(),
            result: result.clone(),
            diagnostics: diagnostics.to_vec(),
        });
        Ok(())
    }
}
