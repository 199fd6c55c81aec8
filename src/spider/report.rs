use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use super::state::{UrlOutcome, UrlState};
use crate::error::SpiderError;

/// Aggregate result of one spider run, complete or cut short.
#[derive(Debug, Clone, PartialEq)]
pub struct SpiderReport {
    pub name: String,
    /// Every URL the spider scheduled, by URL.
    pub urls: BTreeMap<String, UrlState>,
    pub items_extracted: usize,
    pub errors: Vec<SpiderError>,
    pub elapsed: Duration,
}

impl SpiderReport {
    pub fn urls_total(&self) -> usize {
        self.urls.len()
    }

    pub fn urls_processed(&self) -> BTreeSet<&str> {
        self.urls.keys().map(String::as_str).collect()
    }

    pub fn urls_failed(&self) -> BTreeSet<&str> {
        self.with_outcome(|outcome| matches!(outcome, UrlOutcome::Failed))
    }

    pub fn urls_invalid(&self) -> BTreeSet<&str> {
        self.with_outcome(|outcome| matches!(outcome, UrlOutcome::Invalid))
    }

    /// URLs still in flight when the run was cancelled.
    pub fn urls_unfinished(&self) -> BTreeSet<&str> {
        self.urls
            .iter()
            .filter(|(_, state)| state.outcome().is_none())
            .map(|(url, _)| url.as_str())
            .collect()
    }

    pub fn was_cancelled(&self) -> bool {
        self.errors
            .iter()
            .any(|err| matches!(err, SpiderError::Cancelled { .. }))
    }

    fn with_outcome(&self, predicate: impl Fn(&UrlOutcome) -> bool) -> BTreeSet<&str> {
        self.urls
            .iter()
            .filter(|(_, state)| state.outcome().is_some_and(&predicate))
            .map(|(url, _)| url.as_str())
            .collect()
    }

    pub fn write_to_log(&self) {
        tracing::info!(
            spider = %self.name,
            urls_total = self.urls_total(),
            urls_failed = self.urls_failed().len(),
            urls_invalid = self.urls_invalid().len(),
            items_extracted = self.items_extracted,
            errors = self.errors.len(),
            running_time = ?self.elapsed,
            "statistics"
        );
    }
}
