//! Entity resolver construction per domain (spec §4.5 calendar example,
//! generalized to task/email/memory).
//!
//! Calendar is the only domain where recurring-series handling and the
//! stricter delete threshold (`calendar_delete_threshold`) apply — the
//! other domains reuse the same [`super::generic::GenericEntityResolver`]
//! with those two knobs turned off.

use std::sync::Arc;

use super::generic::{DomainSpec, GenericEntityResolver};
use super::EntityResolver;
use crate::config::ThresholdsConfig;
use crate::executors::Executor;

pub fn calendar_entity_resolver(executor: Arc<dyn Executor>, thresholds: &ThresholdsConfig) -> Arc<dyn EntityResolver> {
    let spec = DomainSpec {
        entity_type: "calendar_event",
        window_ops: &["deleteByWindow", "updateByWindow"],
        single_ops: &["deleteByDescription", "getByDescription"],
        criteria_ops: &["updateByDescription"],
        supports_recurring: true,
        delete_threshold: Some(thresholds.calendar_delete_threshold),
        fuzzy_match_min: thresholds.fuzzy_match_min,
        disambiguation_gap: thresholds.disambiguation_gap,
    };
    Arc::new(GenericEntityResolver::new(spec, executor))
}

pub fn task_entity_resolver(executor: Arc<dyn Executor>, thresholds: &ThresholdsConfig) -> Arc<dyn EntityResolver> {
    let spec = DomainSpec {
        entity_type: "task",
        window_ops: &["deleteByWindow", "updateByWindow"],
        single_ops: &["deleteByDescription", "getByDescription"],
        criteria_ops: &["updateByDescription"],
        supports_recurring: false,
        delete_threshold: None,
        fuzzy_match_min: thresholds.fuzzy_match_min,
        disambiguation_gap: thresholds.disambiguation_gap,
    };
    Arc::new(GenericEntityResolver::new(spec, executor))
}

pub fn email_entity_resolver(executor: Arc<dyn Executor>, thresholds: &ThresholdsConfig) -> Arc<dyn EntityResolver> {
    let spec = DomainSpec {
        entity_type: "email",
        window_ops: &[],
        single_ops: &["archiveByDescription", "getByDescription"],
        criteria_ops: &[],
        supports_recurring: false,
        delete_threshold: None,
        fuzzy_match_min: thresholds.fuzzy_match_min,
        disambiguation_gap: thresholds.disambiguation_gap,
    };
    Arc::new(GenericEntityResolver::new(spec, executor))
}

pub fn memory_entity_resolver(executor: Arc<dyn Executor>, thresholds: &ThresholdsConfig) -> Arc<dyn EntityResolver> {
    let spec = DomainSpec {
        entity_type: "memory_fact",
        window_ops: &[],
        single_ops: &["deleteByDescription", "getByDescription"],
        criteria_ops: &[],
        supports_recurring: false,
        delete_threshold: None,
        fuzzy_match_min: thresholds.fuzzy_match_min,
        disambiguation_gap: thresholds.disambiguation_gap,
    };
    Arc::new(GenericEntityResolver::new(spec, executor))
}
