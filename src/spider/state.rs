use std::{collections::HashMap, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;

use super::{report::SpiderReport, TaskOutput};
use crate::error::SpiderError;

/// What happened to one registered URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UrlState {
    queued: DateTime<Utc>,
    model: String,
    finished_at: Option<DateTime<Utc>>,
    outcome: Option<UrlOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "outcome")]
pub enum UrlOutcome {
    /// Valid page with this many items.
    Extracted(usize),
    Failed,
    Invalid,
    Error(String),
}

impl UrlState {
    fn queued(model: &str) -> Self {
        Self {
            queued: Utc::now(),
            model: model.to_owned(),
            finished_at: None,
            outcome: None,
        }
    }

    pub fn queued_at(&self) -> DateTime<Utc> {
        self.queued
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// `None` while the URL was still being processed.
    pub fn outcome(&self) -> Option<&UrlOutcome> {
        self.outcome.as_ref()
    }

    fn finish(&mut self, outcome: UrlOutcome) {
        self.finished_at = Some(Utc::now());
        self.outcome = Some(outcome);
    }
}

/// Mutable state of one spider run, owned by its control loop.
#[derive(Default)]
pub(crate) struct RunState {
    urls: HashMap<String, UrlState>,
    pub(crate) tasks: JoinSet<TaskOutput>,
    pub(crate) tasks_done: usize,
    pub(crate) items_extracted: usize,
    pub(crate) errors: Vec<SpiderError>,
}

impl RunState {
    /// Adds `url` to the processed set; false if it was already there.
    pub(crate) fn register(&mut self, url: &str, model: &str) -> bool {
        if self.urls.contains_key(url) {
            return false;
        }
        self.urls.insert(url.to_owned(), UrlState::queued(model));
        true
    }

    pub(crate) fn finish(&mut self, url: &str, outcome: UrlOutcome) {
        self.tasks_done += 1;
        match self.urls.get_mut(url) {
            Some(state) => state.finish(outcome),
            None => tracing::warn!(url, "spider: finished url that was never registered"),
        }
    }

    pub(crate) fn into_report(self, name: &str, elapsed: Duration) -> SpiderReport {
        SpiderReport {
            name: name.to_owned(),
            urls: self.urls.into_iter().collect(),
            items_extracted: self.items_extracted,
            errors: self.errors,
            elapsed,
        }
    }
}
