//! The crawl-job engine.
//!
//! A [`Spider`] seeds its frontier with the configured start URLs, runs one
//! task per new URL and waits on whichever task finishes next. Finished tasks
//! hand their catalogue and detail links back to the control loop, which
//! registers the new ones and spawns more tasks. The run ends when no task is
//! left, or early when its cancellation token fires.

mod report;
mod state;

use std::sync::Arc;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub use report::SpiderReport;
pub use state::{UrlOutcome, UrlState};

use self::state::RunState;
use crate::{
    config::SpiderConfig,
    error::{ExtractError, SpiderError},
    events::{Event, EventSender},
    fetch::{Fetcher, HttpClient},
    page::{PageExtraction, PageMetadata, PageModel, PageOutcome},
};

pub struct Spider {
    config: SpiderConfig,
    fetcher: Fetcher,
    events: EventSender,
}

/// Result of processing one URL, handed back to the control loop.
pub(crate) struct TaskOutput {
    url: String,
    visit: Result<Visit, ExtractError>,
}

enum Visit {
    Failed,
    Invalid,
    Valid(PageExtraction),
}

impl Spider {
    pub fn new(config: SpiderConfig, client: Arc<dyn HttpClient>, events: &EventSender) -> Self {
        let events = events.named(config.name());
        let fetcher = Fetcher::new(
            client,
            config.concurrency(),
            config.request(),
            events.clone(),
        );
        events.emit(Event::SpiderRegistered);
        Self {
            config,
            fetcher,
            events,
        }
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub fn config(&self) -> &SpiderConfig {
        &self.config
    }

    /// Crawls until the frontier is exhausted or `token` is cancelled.
    ///
    /// A cancelled run aborts its tasks and still reports what it got.
    pub async fn run(self, token: CancellationToken) -> SpiderReport {
        tracing::info!("running spider '{}'", self.name());
        let started = Instant::now();
        self.events.emit(Event::SpiderStarted);

        let mut state = RunState::default();
        for url in self.config.start_urls() {
            tracing::info!(spider = self.name(), start_url = url);
        }
        self.create_tasks(
            &mut state,
            self.config.start_urls(),
            self.config.start_model(),
            false,
        );

        let period = self.config.concurrency().task_check_interval;
        let mut ticks = interval_at(started + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !state.tasks.is_empty() {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    let pending = state.tasks.len();
                    tracing::warn!(spider = self.name(), pending, "spider: cancelled");
                    state.tasks.abort_all();
                    state.errors.push(SpiderError::Cancelled { pending });
                    break;
                }
                _ = ticks.tick() => {
                    self.events.emit(Event::SpiderTicked {
                        done: state.tasks_done,
                        pending: state.tasks.len(),
                    });
                }
                Some(joined) = state.tasks.join_next() => match joined {
                    Ok(output) => self.complete(&mut state, output),
                    Err(err) => {
                        state.tasks_done += 1;
                        tracing::error!(spider = self.name(), "spider: task failed: {:?}", err);
                        state.errors.push(SpiderError::TaskPanicked(err.to_string()));
                    }
                },
            }
        }

        tracing::info!("spider '{}': control loop exited", self.name());
        let report = state.into_report(self.name(), started.elapsed());
        self.events.emit(Event::SpiderEnded {
            urls_failed: report.urls_failed().len(),
            urls_invalid: report.urls_invalid().len(),
            urls_total: report.urls_total(),
            items_extracted: report.items_extracted,
            errors: report.errors.iter().map(ToString::to_string).collect(),
        });
        report.write_to_log();
        report
    }

    /// Registers the URLs not seen before and spawns a task for each.
    /// Discovered links outside the allowed domains are dropped.
    fn create_tasks<'u>(
        &self,
        state: &mut RunState,
        urls: impl IntoIterator<Item = &'u String>,
        model: &Arc<PageModel>,
        discovered: bool,
    ) {
        for url in urls {
            let url = model.modify_url(url);
            if discovered && !self.config.allows(&url) {
                tracing::debug!(spider = self.name(), url, "spider: outside allowed domains");
                continue;
            }
            if !state.register(&url, model.name()) {
                continue;
            }
            tracing::debug!("queueing: {}", url);
            self.events.emit(Event::UrlRegistered {
                url: url.clone(),
                model: model.name().to_owned(),
            });
            state.tasks.spawn(process_url(
                self.fetcher.clone(),
                self.events.clone(),
                self.config.domain().to_owned(),
                url,
                model.clone(),
            ));
        }
    }

    fn complete(&self, state: &mut RunState, TaskOutput { url, visit }: TaskOutput) {
        match visit {
            Ok(Visit::Failed) => state.finish(&url, UrlOutcome::Failed),
            Ok(Visit::Invalid) => state.finish(&url, UrlOutcome::Invalid),
            Ok(Visit::Valid(extraction)) => {
                state.items_extracted += extraction.items.len();
                state.finish(&url, UrlOutcome::Extracted(extraction.items.len()));
                if let Some(model) = self.config.catalogue_model() {
                    self.create_tasks(state, &extraction.catalogue_links, model, true);
                }
                if let Some(model) = self.config.detail_model() {
                    self.create_tasks(state, &extraction.detail_links, model, true);
                }
            }
            Err(source) => {
                tracing::error!(spider = self.name(), url, "Extraction error: {}", source);
                state.finish(&url, UrlOutcome::Error(source.to_string()));
                state.errors.push(SpiderError::Extraction { url, source });
            }
        }
    }
}

async fn process_url(
    fetcher: Fetcher,
    events: EventSender,
    site_domain: String,
    url: String,
    model: Arc<PageModel>,
) -> TaskOutput {
    events.emit(Event::UrlProcessingStarted {
        url: url.clone(),
        model: model.name().to_owned(),
    });
    let Some(response) = fetcher.fetch_with_retry(&url).await else {
        return TaskOutput {
            url,
            visit: Ok(Visit::Failed),
        };
    };

    let status = response.status;
    let metadata = PageMetadata::new(url.clone(), site_domain, response.body);
    let visit = model.parse(&metadata).map(|outcome| match outcome {
        PageOutcome::Invalid => {
            events.emit(Event::UrlResponseInvalid {
                url: url.clone(),
                status,
            });
            Visit::Invalid
        }
        PageOutcome::Valid(extraction) => {
            events.emit(Event::UrlResponseValid {
                url: url.clone(),
                status,
            });
            if !extraction.items.is_empty() {
                events.emit(Event::ItemsExtracted {
                    url: url.clone(),
                    items: extraction.items.clone(),
                });
            }
            Visit::Valid(extraction)
        }
    });
    TaskOutput { url, visit }
}
