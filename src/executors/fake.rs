//! Deterministic in-memory executors (spec §6 default/demo backends).
//!
//! One record shape covers every capability this pipeline resolves
//! against — an id, a searchable summary/description, an optional time
//! window and an optional recurring-series id. Real backends would differ
//! wildly in wire shape; these fakes exist only to give the orchestrator,
//! resolvers and entity resolvers something to list and mutate against in
//! tests and the CLI demo, so one generic record type is enough.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Executor, ExecutorResult};

/// A single listable/mutable item (a calendar event, a reminder, an
/// email, a memory fact — the label is carried by the owning executor,
/// not the record).
#[derive(Debug, Clone)]
pub struct FakeRecord {
    pub id: String,
    pub summary: String,
    pub description: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub recurring_series_id: Option<String>,
}

impl FakeRecord {
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "summary": self.summary,
            "description": self.description,
            "start": self.start,
            "end": self.end,
            "recurringSeriesId": self.recurring_series_id,
        })
    }
}

/// In-memory executor over [`FakeRecord`]s, filtered by an optional
/// `timeMin`/`timeMax` window on `list` and mutated by `create`, `delete`
/// and `update` ops keyed by `id`.
pub struct InMemoryExecutor {
    label: &'static str,
    records: Mutex<Vec<FakeRecord>>,
}

impl InMemoryExecutor {
    pub fn new(label: &'static str) -> Self {
        Self { label, records: Mutex::new(Vec::new()) }
    }

    pub fn seeded(label: &'static str, records: Vec<FakeRecord>) -> Self {
        Self { label, records: Mutex::new(records) }
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Executor for InMemoryExecutor {
    async fn list(&self, filter: serde_json::Value) -> ExecutorResult {
        let guard = self.records.lock().unwrap_or_else(|e| e.into_inner());

        let time_min = filter.get("timeMin").and_then(|v| v.as_str()).and_then(|s| s.parse::<DateTime<Utc>>().ok());
        let time_max = filter.get("timeMax").and_then(|v| v.as_str()).and_then(|s| s.parse::<DateTime<Utc>>().ok());

        let items: Vec<serde_json::Value> = guard
            .iter()
            .filter(|r| match (time_min, r.start) {
                (Some(min), Some(start)) => start >= min,
                _ => true,
            })
            .filter(|r| match (time_max, r.start) {
                (Some(max), Some(start)) => start <= max,
                _ => true,
            })
            .map(FakeRecord::to_json)
            .collect();

        ExecutorResult::ok(serde_json::json!({ "items": items, "source": self.label }))
    }

    async fn mutate(&self, op: &str, args: serde_json::Value) -> ExecutorResult {
        let mut guard = self.records.lock().unwrap_or_else(|e| e.into_inner());
        match op {
            "create" => {
                let id = Uuid::new_v4().to_string();
                let record = FakeRecord {
                    id: id.clone(),
                    summary: args.get("summary").or_else(|| args.get("description")).and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                    description: args.get("description").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                    start: args.get("start").and_then(|v| v.as_str()).and_then(|s| s.parse().ok()),
                    end: args.get("end").and_then(|v| v.as_str()).and_then(|s| s.parse().ok()),
                    recurring_series_id: args.get("recurringSeriesId").and_then(|v| v.as_str()).map(str::to_string),
                };
                guard.push(record);
                ExecutorResult::ok(serde_json::json!({ "id": id }))
            }
            "delete" => {
                let Some(id) = args.get("id").and_then(|v| v.as_str()) else {
                    return ExecutorResult::err("delete requires id");
                };
                let before = guard.len();
                guard.retain(|r| r.id != id && r.recurring_series_id.as_deref() != Some(id));
                if guard.len() == before {
                    ExecutorResult::err("not found")
                } else {
                    ExecutorResult::ok(serde_json::json!({ "deleted": id }))
                }
            }
            "update" => {
                let Some(id) = args.get("id").and_then(|v| v.as_str()) else {
                    return ExecutorResult::err("update requires id");
                };
                if let Some(record) = guard.iter_mut().find(|r| r.id == id) {
                    if let Some(s) = args.get("summary").and_then(|v| v.as_str()) {
                        record.summary = s.to_string();
                    }
                    if let Some(start) = args.get("start").and_then(|v| v.as_str()).and_then(|s| s.parse().ok()) {
                        record.start = Some(start);
                    }
                    if let Some(end) = args.get("end").and_then(|v| v.as_str()).and_then(|s| s.parse().ok()) {
                        record.end = Some(end);
                    }
                    ExecutorResult::ok(record.to_json())
                } else {
                    ExecutorResult::err("not found")
                }
            }
            other => ExecutorResult::err(format!("unsupported operation: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_list_roundtrips() {
        let exec = InMemoryExecutor::new("calendar");
        exec.mutate("create", serde_json::json!({ "summary": "Lunch" })).await;
        let result = exec.list(serde_json::json!({})).await;
        assert!(result.success);
        assert_eq!(result.data["items"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_matching_record() {
        let exec = InMemoryExecutor::new("calendar");
        let created = exec.mutate("create", serde_json::json!({ "summary": "Lunch" })).await;
        let id = created.data["id"].as_str().unwrap().to_string();
        let deleted = exec.mutate("delete", serde_json::json!({ "id": id })).await;
        assert!(deleted.success);
        assert!(exec.is_empty());
    }

    #[tokio::test]
    async fn delete_missing_id_fails() {
        let exec = InMemoryExecutor::new("calendar");
        let result = exec.mutate("delete", serde_json::json!({ "id": "missing" })).await;
        assert!(!result.success);
    }
}
