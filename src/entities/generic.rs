//! Shared entity-resolution algorithm (spec §4.5), parameterized per
//! domain by a [`DomainSpec`] rather than reimplemented per capability.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{EntityResolver, ResolutionContext};
use crate::executors::Executor;
use crate::fuzzy::FuzzyMatcher;
use crate::types::{CandidateMetadata, ResolutionCandidate, ResolutionOutput};

const MAX_DISAMBIGUATION_CANDIDATES: usize = 5;

/// One fetched candidate row, shape-normalized from an executor's JSON.
#[derive(Debug, Clone)]
struct Row {
    id: String,
    summary: String,
    description: String,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    recurring_series_id: Option<String>,
}

fn parse_rows(list_data: &serde_json::Value) -> Vec<Row> {
    list_data
        .get("items")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let id = item.get("id")?.as_str()?.to_string();
                    Some(Row {
                        id,
                        summary: item.get("summary").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        description: item.get("description").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        start: item.get("start").and_then(|v| v.as_str()).and_then(|s| s.parse().ok()),
                        end: item.get("end").and_then(|v| v.as_str()).and_then(|s| s.parse().ok()),
                        recurring_series_id: item.get("recurringSeriesId").and_then(|v| v.as_str()).map(str::to_string),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

impl Row {
    fn to_candidate(&self, score: f64) -> ResolutionCandidate {
        let metadata = match &self.recurring_series_id {
            Some(series_id) => CandidateMetadata::Recurring {
                recurring_series_id: series_id.clone(),
                is_recurring_series: None,
                event_id: Some(self.id.clone()),
                start: self.start,
                end: self.end,
            },
            None => CandidateMetadata::Simple { start: self.start, end: self.end },
        };
        ResolutionCandidate {
            id: self.id.clone(),
            display_text: if self.summary.is_empty() { self.description.clone() } else { self.summary.clone() },
            entity: serde_json::json!({
                "id": self.id,
                "summary": self.summary,
                "description": self.description,
                "start": self.start,
                "end": self.end,
                "recurringSeriesId": self.recurring_series_id,
            }),
            score,
            metadata,
        }
    }
}

/// Static per-domain configuration feeding the shared algorithm.
pub struct DomainSpec {
    pub entity_type: &'static str,
    /// Ops that never reference an existing item (already covered
    /// upstream by [`crate::resolvers::NO_ENTITY_RESOLUTION_OPS`], kept
    /// here only for completeness of the dispatch table).
    pub window_ops: &'static [&'static str],
    pub single_ops: &'static [&'static str],
    pub criteria_ops: &'static [&'static str],
    /// Whether recurring-series disambiguation applies (calendar only).
    pub supports_recurring: bool,
    /// Stricter floor applied to delete-flavored single-entity ops, or
    /// `None` to reuse `fuzzy_match_min`.
    pub delete_threshold: Option<f64>,
    pub fuzzy_match_min: f64,
    pub disambiguation_gap: f64,
}

pub struct GenericEntityResolver {
    spec: DomainSpec,
    executor: Arc<dyn Executor>,
}

impl GenericEntityResolver {
    pub fn new(spec: DomainSpec, executor: Arc<dyn Executor>) -> Self {
        Self { spec, executor }
    }

    fn is_delete_like(&self, operation: &str) -> bool {
        operation.to_lowercase().contains("delete")
    }

    fn threshold_for(&self, operation: &str) -> f64 {
        if self.is_delete_like(operation) {
            self.spec.delete_threshold.unwrap_or(self.spec.fuzzy_match_min).max(self.spec.fuzzy_match_min)
        } else {
            self.spec.fuzzy_match_min
        }
    }

    fn derive_window(&self, args: &serde_json::Value, ctx: &ResolutionContext) -> (DateTime<Utc>, DateTime<Utc>) {
        if let (Some(min), Some(max)) = (
            args.get("timeMin").and_then(|v| v.as_str()).and_then(|s| s.parse::<DateTime<Utc>>().ok()),
            args.get("timeMax").and_then(|v| v.as_str()).and_then(|s| s.parse::<DateTime<Utc>>().ok()),
        ) {
            return (min, max);
        }
        if let (Some(start), Some(end)) = (
            args.get("start").and_then(|v| v.as_str()).and_then(|s| s.parse::<DateTime<Utc>>().ok()),
            args.get("end").and_then(|v| v.as_str()).and_then(|s| s.parse::<DateTime<Utc>>().ok()),
        ) {
            return (start, end);
        }
        if let Some(summary) = args.get("summary").and_then(|v| v.as_str()) {
            let lowered = summary.to_lowercase();
            if lowered.contains("tomorrow") || lowered.contains("מחר") {
                return ctx.now.tomorrow_window();
            }
            if lowered.contains("today") || lowered.contains("היום") {
                return ctx.now.today_window();
            }
        }
        ctx.now.default_wide_window()
    }

    async fn fetch_window(&self, window: (DateTime<Utc>, DateTime<Utc>)) -> Result<Vec<Row>, String> {
        let result = self.executor.list(serde_json::json!({
            "timeMin": window.0.to_rfc3339(),
            "timeMax": window.1.to_rfc3339(),
        })).await;
        if !result.success {
            return Err(result.error.unwrap_or_else(|| "service unavailable".to_string()));
        }
        Ok(parse_rows(&result.data))
    }

    fn apply_optional_filters(&self, rows: Vec<Row>, args: &serde_json::Value) -> Vec<Row> {
        let day_of_week = args.get("dayOfWeek").and_then(|v| v.as_u64());
        let start_time = args.get("startTime").and_then(|v| v.as_str());
        let end_time = args.get("endTime").and_then(|v| v.as_str());

        rows.into_iter()
            .filter(|r| match (day_of_week, r.start) {
                (Some(dow), Some(start)) => {
                    use chrono::Datelike;
                    start.weekday().num_days_from_sunday() as u64 == dow
                }
                _ => true,
            })
            .filter(|r| match (start_time, end_time, r.start) {
                (Some(s), Some(e), Some(start)) => {
                    let hhmm = start.format("%H:%M").to_string();
                    hhmm.as_str() >= s && hhmm.as_str() <= e
                }
                _ => true,
            })
            .collect()
    }

    fn score_rows(&self, rows: &[Row], query: &str) -> Vec<(Row, f64)> {
        let matcher = FuzzyMatcher::with_threshold(self.spec.fuzzy_match_min);
        let mut scored: Vec<(Row, f64)> = rows
            .iter()
            .map(|r| (r.clone(), matcher.score_fields(query, &[&r.summary, &r.description])))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }

    fn nearest_upcoming<'a>(&self, rows: &'a [Row], now: DateTime<Utc>) -> &'a Row {
        let (future, past): (Vec<&Row>, Vec<&Row>) = rows.iter().partition(|r| r.start.map(|s| s >= now).unwrap_or(false));
        let pick_closest = |set: &[&'a Row]| -> Option<&'a Row> {
            set.iter()
                .min_by_key(|r| r.start.map(|s| (s - now).num_seconds().unsigned_abs()).unwrap_or(u64::MAX))
                .copied()
        };
        pick_closest(&future).or_else(|| pick_closest(&past)).unwrap_or(&rows[0])
    }

    fn recurring_disambiguation(&self, row: &Row) -> ResolutionOutput {
        let series_id = row.recurring_series_id.clone().unwrap_or_default();
        ResolutionOutput::Disambiguation {
            candidates: vec![
                ResolutionCandidate {
                    id: "all".to_string(),
                    display_text: "All occurrences in this series".to_string(),
                    entity: serde_json::json!({ "recurringSeriesId": series_id }),
                    score: 1.0,
                    metadata: CandidateMetadata::Recurring {
                        recurring_series_id: series_id.clone(),
                        is_recurring_series: Some(true),
                        event_id: None,
                        start: None,
                        end: None,
                    },
                },
                ResolutionCandidate {
                    id: "single".to_string(),
                    display_text: "Just this occurrence".to_string(),
                    entity: serde_json::json!({ "eventId": row.id }),
                    score: 1.0,
                    metadata: CandidateMetadata::Recurring {
                        recurring_series_id: series_id,
                        is_recurring_series: Some(false),
                        event_id: Some(row.id.clone()),
                        start: row.start,
                        end: row.end,
                    },
                },
            ],
            question: "Do you mean the whole recurring series, or just this one occurrence?".to_string(),
            allow_multiple: false,
        }
    }

    fn resolved_from_row(&self, row: &Row, args: &serde_json::Value, is_series: Option<bool>) -> ResolutionOutput {
        let mut merged = args.clone();
        if let Some(map) = merged.as_object_mut() {
            map.insert("id".to_string(), serde_json::json!(row.id));
            if let Some(series) = &row.recurring_series_id {
                map.insert("recurringSeriesId".to_string(), serde_json::json!(series));
            }
        }
        ResolutionOutput::Resolved {
            resolved_ids: vec![row.id.clone()],
            args: merged,
            is_recurring: is_series,
            series_id: row.recurring_series_id.clone(),
        }
    }

    async fn resolve_single(&self, operation: &str, args: serde_json::Value, ctx: &ResolutionContext) -> ResolutionOutput {
        let query = args.get("summary").and_then(|v| v.as_str()).map(str::to_string);
        let has_window = args.get("timeMin").is_some() || args.get("start").is_some();
        if query.is_none() && !has_window {
            return ResolutionOutput::ClarifyQuery {
                error: "I need either a description or a time to find that.".to_string(),
                searched_for: String::new(),
                suggestions: vec![
                    "Tell me the title, e.g. \"the dentist appointment\"".to_string(),
                    "Or a time, e.g. \"tomorrow afternoon\"".to_string(),
                ],
            };
        }

        let window = self.derive_window(&args, ctx);
        let rows = match self.fetch_window(window).await {
            Ok(rows) => rows,
            Err(_) => return ResolutionOutput::NotFound { error: "service unavailable".to_string(), searched_for: query.unwrap_or_default() },
        };
        let filtered = self.apply_optional_filters(rows, &args);

        let searched_for = query.clone().unwrap_or_else(|| format!("{} .. {}", window.0, window.1));
        let scored = self.score_rows(&filtered, query.as_deref().unwrap_or(""));
        let threshold = self.threshold_for(operation);
        let candidates: Vec<(Row, f64)> = if query.is_some() {
            scored.into_iter().filter(|(_, score)| *score >= threshold).collect()
        } else {
            scored
        };

        match candidates.len() {
            0 => ResolutionOutput::NotFound { error: "not found".to_string(), searched_for },
            1 => {
                let (row, _) = &candidates[0];
                self.finish_single(operation, row, &args)
            }
            _ => {
                let rows_only: Vec<Row> = candidates.iter().map(|(r, _)| r.clone()).collect();
                let same_series = self.spec.supports_recurring
                    && rows_only.first().and_then(|r| r.recurring_series_id.as_ref()).is_some()
                    && rows_only.iter().all(|r| r.recurring_series_id == rows_only[0].recurring_series_id);

                if same_series {
                    let row = self.nearest_upcoming(&rows_only, ctx.now.utc()).clone();
                    return self.finish_single(operation, &row, &args);
                }

                let gap = candidates[0].1 - candidates[1].1;
                if gap >= self.spec.disambiguation_gap {
                    let (row, _) = &candidates[0];
                    self.finish_single(operation, row, &args)
                } else {
                    let top: Vec<ResolutionCandidate> = candidates
                        .into_iter()
                        .take(MAX_DISAMBIGUATION_CANDIDATES)
                        .map(|(row, score)| row.to_candidate(score))
                        .collect();
                    ResolutionOutput::Disambiguation {
                        candidates: top,
                        question: "I found a few matches — which one did you mean?".to_string(),
                        allow_multiple: false,
                    }
                }
            }
        }
    }

    fn finish_single(&self, operation: &str, row: &Row, args: &serde_json::Value) -> ResolutionOutput {
        let recurring_relevant = self.spec.supports_recurring
            && (operation.to_lowercase().contains("delete") || operation.to_lowercase().contains("update"));
        if recurring_relevant && row.recurring_series_id.is_some() {
            if let Some(intent) = args.get("recurringSeriesIntent").and_then(|v| v.as_bool()) {
                return self.resolved_from_row(row, args, Some(intent));
            }
            return self.recurring_disambiguation(row);
        }
        self.resolved_from_row(row, args, Some(false))
    }

    async fn resolve_by_window(&self, operation: &str, args: serde_json::Value, ctx: &ResolutionContext) -> ResolutionOutput {
        let window = self.derive_window(&args, ctx);
        let rows = match self.fetch_window(window).await {
            Ok(rows) => rows,
            Err(_) => return ResolutionOutput::NotFound { error: "service unavailable".to_string(), searched_for: String::new() },
        };

        let exclude: Vec<String> = args
            .get("excludeSummaries")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(|s| s.to_lowercase())).collect())
            .unwrap_or_default();

        let rows: Vec<Row> = rows
            .into_iter()
            .filter(|r| !exclude.iter().any(|needle| r.summary.to_lowercase().contains(needle)))
            .collect();

        let rows = self.apply_optional_filters(rows, &args);

        let rows: Vec<Row> = if let Some(summary) = args.get("summary").and_then(|v| v.as_str()) {
            let matcher = FuzzyMatcher::with_threshold(self.spec.fuzzy_match_min);
            rows.into_iter().filter(|r| matcher.matches(summary, &[&r.summary, &r.description])).collect()
        } else {
            rows
        };

        if rows.is_empty() {
            return ResolutionOutput::NotFound { error: "not found".to_string(), searched_for: args.get("summary").and_then(|v| v.as_str()).unwrap_or_default().to_string() };
        }

        let mut ids: Vec<String> = rows.iter().map(|r| r.recurring_series_id.clone().unwrap_or_else(|| r.id.clone())).collect();
        ids.sort();
        ids.dedup();

        let mut merged = args.clone();
        if let Some(map) = merged.as_object_mut() {
            map.insert("operation".to_string(), serde_json::json!(operation));
            map.insert("ids".to_string(), serde_json::json!(ids.clone()));
        }
        ResolutionOutput::Resolved { resolved_ids: ids, args: merged, is_recurring: None, series_id: None }
    }

    async fn find_by_criteria(&self, operation: &str, args: serde_json::Value, ctx: &ResolutionContext) -> ResolutionOutput {
        self.resolve_single(operation, args, ctx).await
    }
}

#[async_trait]
impl EntityResolver for GenericEntityResolver {
    fn entity_type(&self) -> &'static str {
        self.spec.entity_type
    }

    async fn resolve(&self, operation: &str, args: serde_json::Value, ctx: &ResolutionContext) -> ResolutionOutput {
        if args.get("id").and_then(|v| v.as_str()).is_some() {
            let mut merged = args.clone();
            let id = args.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            if let Some(map) = merged.as_object_mut() {
                map.insert("operation".to_string(), serde_json::json!(operation));
            }
            return ResolutionOutput::Resolved { resolved_ids: vec![id], args: merged, is_recurring: None, series_id: None };
        }

        if self.spec.window_ops.contains(&operation) {
            self.resolve_by_window(operation, args, ctx).await
        } else if self.spec.criteria_ops.contains(&operation) {
            self.find_by_criteria(operation, args, ctx).await
        } else if self.spec.single_ops.contains(&operation) {
            self.resolve_single(operation, args, ctx).await
        } else {
            self.resolve_single(operation, args, ctx).await
        }
    }

    fn apply_selection(
        &self,
        selection: &str,
        candidates: &[ResolutionCandidate],
        args: &serde_json::Value,
    ) -> ResolutionOutput {
        let normalized = selection.trim().to_lowercase();

        let is_recurring_choice = candidates.len() == 2
            && candidates.iter().any(|c| c.id == "all")
            && candidates.iter().any(|c| c.id == "single");

        // "1" is only a select-all-series alias in the recurring-choice
        // payload shape (spec §4.5); in a general disambiguation it is the
        // 1-based numeric form and must fall through to `parse_index_list`.
        let is_all_token = if is_recurring_choice {
            matches!(normalized.as_str(), "both" | "all" | "שניהם" | "הכל" | "1" | "כן")
        } else {
            matches!(normalized.as_str(), "both" | "all" | "שניהם" | "הכל" | "כן")
        };
        let is_single_token = matches!(normalized.as_str(), "2" | "single" | "only this one" | "רק זה");

        if is_recurring_choice {
            return if is_all_token {
                let Some(chosen) = candidates.iter().find(|c| c.id == "all") else {
                    return self.invalid_selection(candidates);
                };
                let CandidateMetadata::Recurring { recurring_series_id, .. } = &chosen.metadata else {
                    unreachable!("recurring candidate always carries Recurring metadata")
                };
                let mut merged = args.clone();
                if let Some(map) = merged.as_object_mut() {
                    map.insert("id".to_string(), serde_json::json!(recurring_series_id));
                }
                ResolutionOutput::Resolved {
                    resolved_ids: vec![recurring_series_id.clone()],
                    args: merged,
                    is_recurring: Some(true),
                    series_id: Some(recurring_series_id.clone()),
                }
            } else if is_single_token {
                let Some(chosen) = candidates.iter().find(|c| c.id == "single") else {
                    return self.invalid_selection(candidates);
                };
                let CandidateMetadata::Recurring { event_id, recurring_series_id, .. } = &chosen.metadata else {
                    unreachable!("recurring candidate always carries Recurring metadata")
                };
                let event_id = event_id.clone().unwrap_or_default();
                let mut merged = args.clone();
                if let Some(map) = merged.as_object_mut() {
                    map.insert("id".to_string(), serde_json::json!(event_id));
                }
                ResolutionOutput::Resolved {
                    resolved_ids: vec![event_id],
                    args: merged,
                    is_recurring: Some(false),
                    series_id: Some(recurring_series_id.clone()),
                }
            } else {
                self.invalid_selection(candidates)
            };
        }

        if is_all_token {
            let ids: Vec<String> = candidates.iter().map(|c| c.id.clone()).collect();
            let mut merged = args.clone();
            if let Some(map) = merged.as_object_mut() {
                map.insert("ids".to_string(), serde_json::json!(ids));
            }
            return ResolutionOutput::Resolved { resolved_ids: ids, args: merged, is_recurring: None, series_id: None };
        }

        if let Ok(indices) = parse_index_list(&normalized) {
            let mut resolved_ids = Vec::new();
            for idx in &indices {
                match candidates.get(idx.saturating_sub(1)) {
                    Some(c) if *idx >= 1 => resolved_ids.push(c.id.clone()),
                    _ => return self.invalid_selection(candidates),
                }
            }
            if resolved_ids.is_empty() {
                return self.invalid_selection(candidates);
            }
            let mut merged = args.clone();
            if let Some(map) = merged.as_object_mut() {
                if resolved_ids.len() == 1 {
                    map.insert("id".to_string(), serde_json::json!(resolved_ids[0]));
                } else {
                    map.insert("ids".to_string(), serde_json::json!(resolved_ids));
                }
            }
            return ResolutionOutput::Resolved { resolved_ids, args: merged, is_recurring: None, series_id: None };
        }

        self.invalid_selection(candidates)
    }
}

impl GenericEntityResolver {
    fn invalid_selection(&self, candidates: &[ResolutionCandidate]) -> ResolutionOutput {
        ResolutionOutput::Disambiguation {
            candidates: candidates.to_vec(),
            question: "I didn't catch that — please reply with a number from the list.".to_string(),
            allow_multiple: false,
        }
    }
}

fn parse_index_list(normalized: &str) -> Result<Vec<usize>, ()> {
    let trimmed = normalized.trim_start_matches('[').trim_end_matches(']');
    let parts: Vec<&str> = if trimmed.contains(',') { trimmed.split(',').collect() } else { vec![trimmed] };
    let mut out = Vec::new();
    for part in parts {
        out.push(part.trim().parse::<usize>().map_err(|_| ())?);
    }
    if out.is_empty() {
        Err(())
    } else {
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::fake::{FakeRecord, InMemoryExecutor};
    use crate::time::TimeContext;
    use crate::types::Language;
    use chrono::{Duration, Utc};

    fn spec() -> DomainSpec {
        DomainSpec {
            entity_type: "calendar_event",
            window_ops: &["deleteByWindow", "updateByWindow"],
            single_ops: &["deleteByDescription", "getByDescription"],
            criteria_ops: &["updateByDescription"],
            supports_recurring: true,
            delete_threshold: Some(0.4),
            fuzzy_match_min: 0.3,
            disambiguation_gap: 0.2,
        }
    }

    fn ctx() -> ResolutionContext {
        ResolutionContext { user_id: "u1".to_string(), language: Language::En, now: TimeContext::at(Utc::now(), 0) }
    }

    #[tokio::test]
    async fn single_unambiguous_match_resolves() {
        let exec = Arc::new(InMemoryExecutor::seeded(
            "calendar",
            vec![FakeRecord {
                id: "e1".to_string(),
                summary: "Dentist appointment".to_string(),
                description: String::new(),
                start: Some(Utc::now() + Duration::hours(2)),
                end: Some(Utc::now() + Duration::hours(3)),
                recurring_series_id: None,
            }],
        ));
        let resolver = GenericEntityResolver::new(spec(), exec);
        let out = resolver.resolve("deleteByDescription", serde_json::json!({ "summary": "dentist" }), &ctx()).await;
        match out {
            ResolutionOutput::Resolved { resolved_ids, .. } => assert_eq!(resolved_ids, vec!["e1".to_string()]),
            other => panic!("expected Resolved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_match_returns_not_found() {
        let exec = Arc::new(InMemoryExecutor::new("calendar"));
        let resolver = GenericEntityResolver::new(spec(), exec);
        let out = resolver.resolve("deleteByDescription", serde_json::json!({ "summary": "nonexistent" }), &ctx()).await;
        assert!(matches!(out, ResolutionOutput::NotFound { .. }));
    }

    #[tokio::test]
    async fn ambiguous_matches_emit_disambiguation() {
        let now = Utc::now();
        let exec = Arc::new(InMemoryExecutor::seeded(
            "calendar",
            vec![
                FakeRecord { id: "e1".to_string(), summary: "Team sync".to_string(), description: String::new(), start: Some(now + Duration::hours(1)), end: None, recurring_series_id: None },
                FakeRecord { id: "e2".to_string(), summary: "Team standup".to_string(), description: String::new(), start: Some(now + Duration::hours(2)), end: None, recurring_series_id: None },
            ],
        ));
        let resolver = GenericEntityResolver::new(spec(), exec);
        let out = resolver.resolve("deleteByDescription", serde_json::json!({ "summary": "team" }), &ctx()).await;
        assert!(matches!(out, ResolutionOutput::Disambiguation { .. }));
    }

    #[tokio::test]
    async fn recurring_candidate_emits_series_choice() {
        let now = Utc::now();
        let exec = Arc::new(InMemoryExecutor::seeded(
            "calendar",
            vec![FakeRecord {
                id: "e1".to_string(),
                summary: "Weekly review".to_string(),
                description: String::new(),
                start: Some(now + Duration::hours(1)),
                end: None,
                recurring_series_id: Some("series-1".to_string()),
            }],
        ));
        let resolver = GenericEntityResolver::new(spec(), exec);
        let out = resolver.resolve("deleteByDescription", serde_json::json!({ "summary": "weekly review" }), &ctx()).await;
        match out {
            ResolutionOutput::Disambiguation { candidates, .. } => {
                assert_eq!(candidates.len(), 2);
                assert!(candidates.iter().any(|c| c.id == "all"));
                assert!(candidates.iter().any(|c| c.id == "single"));
            }
            other => panic!("expected recurring Disambiguation, got {other:?}"),
        }
    }

    #[test]
    fn apply_selection_numeric_picks_candidate() {
        let resolver = GenericEntityResolver::new(spec(), Arc::new(InMemoryExecutor::new("calendar")));
        let candidates = vec![
            ResolutionCandidate { id: "a".to_string(), display_text: "A".to_string(), entity: serde_json::json!({}), score: 0.9, metadata: CandidateMetadata::Simple { start: None, end: None } },
            ResolutionCandidate { id: "b".to_string(), display_text: "B".to_string(), entity: serde_json::json!({}), score: 0.8, metadata: CandidateMetadata::Simple { start: None, end: None } },
        ];
        let out = resolver.apply_selection("2", &candidates, &serde_json::json!({}));
        match out {
            ResolutionOutput::Resolved { resolved_ids, .. } => assert_eq!(resolved_ids, vec!["b".to_string()]),
            other => panic!("expected Resolved, got {other:?}"),
        }
    }

    #[test]
    fn apply_selection_out_of_range_reprompts() {
        let resolver = GenericEntityResolver::new(spec(), Arc::new(InMemoryExecutor::new("calendar")));
        let candidates = vec![ResolutionCandidate { id: "a".to_string(), display_text: "A".to_string(), entity: serde_json::json!({}), score: 0.9, metadata: CandidateMetadata::Simple { start: None, end: None } }];
        let out = resolver.apply_selection("9", &candidates, &serde_json::json!({}));
        assert!(matches!(out, ResolutionOutput::Disambiguation { .. }));
    }

    #[test]
    fn apply_selection_all_token_resolves_every_candidate() {
        let resolver = GenericEntityResolver::new(spec(), Arc::new(InMemoryExecutor::new("calendar")));
        let candidates = vec![
            ResolutionCandidate { id: "a".to_string(), display_text: "A".to_string(), entity: serde_json::json!({}), score: 0.9, metadata: CandidateMetadata::Simple { start: None, end: None } },
            ResolutionCandidate { id: "b".to_string(), display_text: "B".to_string(), entity: serde_json::json!({}), score: 0.8, metadata: CandidateMetadata::Simple { start: None, end: None } },
        ];
        let out = resolver.apply_selection("all", &candidates, &serde_json::json!({}));
        match out {
            ResolutionOutput::Resolved { resolved_ids, .. } => assert_eq!(resolved_ids.len(), 2),
            other => panic!("expected Resolved, got {other:?}"),
        }
    }

    #[test]
    fn apply_selection_numeric_one_picks_first_candidate_not_all() {
        let resolver = GenericEntityResolver::new(spec(), Arc::new(InMemoryExecutor::new("calendar")));
        let candidates = vec![
            ResolutionCandidate { id: "a".to_string(), display_text: "A".to_string(), entity: serde_json::json!({}), score: 0.9, metadata: CandidateMetadata::Simple { start: None, end: None } },
            ResolutionCandidate { id: "b".to_string(), display_text: "B".to_string(), entity: serde_json::json!({}), score: 0.8, metadata: CandidateMetadata::Simple { start: None, end: None } },
        ];
        let out = resolver.apply_selection("1", &candidates, &serde_json::json!({}));
        match out {
            ResolutionOutput::Resolved { resolved_ids, .. } => assert_eq!(resolved_ids, vec!["a".to_string()]),
            other => panic!("expected Resolved with only the first candidate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_summary_and_window_clarifies() {
        let resolver = GenericEntityResolver::new(spec(), Arc::new(InMemoryExecutor::new("calendar")));
        let out = resolver.resolve("deleteByDescription", serde_json::json!({}), &ctx()).await;
        assert!(matches!(out, ResolutionOutput::ClarifyQuery { .. }));
    }

    #[tokio::test]
    async fn already_has_id_skips_resolution() {
        let resolver = GenericEntityResolver::new(spec(), Arc::new(InMemoryExecutor::new("calendar")));
        let out = resolver.resolve("deleteByDescription", serde_json::json!({ "id": "e1" }), &ctx()).await;
        match out {
            ResolutionOutput::Resolved { resolved_ids, .. } => assert_eq!(resolved_ids, vec!["e1".to_string()]),
            other => panic!("expected Resolved, got {other:?}"),
        }
    }
}
