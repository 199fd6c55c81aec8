//! Runs the selected spiders of one process together under a global timeout.

use std::{future::Future, sync::Arc, time::Duration};

use futures::future::join_all;
use tokio::time::{sleep, Instant};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    config::{select_configs, ProcessState, SpiderConfig},
    error::SpiderError,
    events::{Event, EventSender},
    fetch::HttpClient,
    spider::{Spider, SpiderReport},
};

pub struct Process {
    state: ProcessState,
    client: Arc<dyn HttpClient>,
    events: EventSender,
}

#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub spiders: Vec<SpiderReport>,
    pub errors: Vec<String>,
    pub elapsed: Duration,
    pub timed_out: bool,
    pub interrupted: bool,
}

impl ProcessReport {
    pub fn items_extracted(&self) -> usize {
        self.spiders.iter().map(|report| report.items_extracted).sum()
    }
}

impl Process {
    pub fn new(state: ProcessState, client: Arc<dyn HttpClient>, events: &EventSender) -> Self {
        Self {
            state,
            client,
            events: events.named("process"),
        }
    }

    pub fn state(&self) -> &ProcessState {
        &self.state
    }

    /// Runs every config selected for this process until all spiders end,
    /// the process timeout passes or `shutdown` resolves. Spiders cut short
    /// still contribute their partial reports.
    pub async fn run<F>(&self, configs: Vec<SpiderConfig>, shutdown: F) -> ProcessReport
    where
        F: Future,
    {
        let started = Instant::now();
        let spiders: Vec<Spider> = select_configs(configs, &self.state)
            .into_iter()
            .map(|config| Spider::new(config, self.client.clone(), &self.events))
            .collect();
        tracing::info!(spiders = spiders.len(), "process: starting");
        self.events.emit(Event::ProcessStarted {
            spiders: spiders.iter().map(|spider| spider.name().to_owned()).collect(),
        });

        let token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let handles: Vec<_> = spiders
            .into_iter()
            .map(|spider| tracker.spawn(spider.run(token.child_token())))
            .collect();
        tracker.close();

        let mut timed_out = false;
        let mut interrupted = false;
        tokio::select! {
            _ = tracker.wait() => {}
            _ = sleep(self.state.timeout) => timed_out = true,
            _ = shutdown => interrupted = true,
        }

        let mut errors = Vec::new();
        if timed_out || interrupted {
            let error = if timed_out {
                format!("process timed out after {:?}", self.state.timeout)
            } else {
                "process interrupted".to_owned()
            };
            tracing::error!("process: {error}, cancelling spiders");
            self.events.emit(Event::ProcessError {
                error: error.clone(),
            });
            errors.push(error);
            token.cancel();
        }

        let mut spiders = Vec::with_capacity(handles.len());
        for joined in join_all(handles).await {
            match joined {
                Ok(report) => spiders.push(report),
                Err(err) => {
                    tracing::error!("process: spider task failed: {:?}", err);
                    errors.push(format!("spider task failed: {err}"));
                }
            }
        }

        let task_errors: Vec<String> = spiders
            .iter()
            .flat_map(|report| {
                report
                    .errors
                    .iter()
                    .filter(|err| !matches!(err, SpiderError::Cancelled { .. }))
                    .map(move |err| format!("{}: {err}", report.name))
            })
            .collect();
        if !task_errors.is_empty() {
            self.events.emit(Event::ProcessError {
                error: task_errors.join("; "),
            });
            errors.extend(task_errors);
        }

        let elapsed = started.elapsed();
        self.events.emit(Event::ProcessFinished { elapsed });
        tracing::info!(running_time = ?elapsed, "process: finished");
        ProcessReport {
            spiders,
            errors,
            elapsed,
            timed_out,
            interrupted,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future;

    use super::*;
    use crate::{
        config::ConcurrencyPolicy,
        events::{self, Dispatcher, Envelope},
        fetch::fake::ScriptedClient,
        page::{CleanError, Field, PageModel},
    };

    fn config(name: &str, domain: &str) -> SpiderConfig {
        let model = PageModel::builder("Start")
            .field(Field::css("title", "title::text"))
            .build()
            .unwrap();
        SpiderConfig::builder(name, domain)
            .start_model(model)
            .concurrency(ConcurrencyPolicy {
                url_retries: 1,
                ..ConcurrencyPolicy::default()
            })
            .build()
            .unwrap()
    }

    fn by_name(spiders: &[&str]) -> ProcessState {
        ProcessState {
            scheduler_on: false,
            spiders_chosen: spiders.iter().map(|name| name.to_string()).collect(),
            timeout: Duration::from_secs(60),
            ..ProcessState::default()
        }
    }

    fn process_events(dispatcher: &mut Dispatcher) -> Vec<Envelope> {
        dispatcher
            .drain()
            .into_iter()
            .filter(|envelope| &*envelope.sender == "process")
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn chosen_spiders_run_to_completion() {
        let client = Arc::new(
            ScriptedClient::new()
                .page("http://one.test", "<title>One</title>")
                .page("http://two.test", "<title>Two</title>"),
        );
        let (events, mut dispatcher) = events::channel();
        let process = Process::new(by_name(&["one", "two"]), client.clone(), &events);

        let report = process
            .run(
                vec![
                    config("one", "http://one.test"),
                    config("two", "http://two.test"),
                    config("three", "http://three.test"),
                ],
                future::pending::<()>(),
            )
            .await;

        assert!(!report.timed_out && !report.interrupted);
        assert!(report.errors.is_empty());
        let mut names: Vec<&str> = report.spiders.iter().map(|spider| spider.name.as_str()).collect();
        names.sort();
        assert_eq!(names, ["one", "two"]);
        assert_eq!(client.calls("http://three.test"), 0);

        let envelopes = process_events(&mut dispatcher);
        assert!(matches!(
            &envelopes[0].event,
            Event::ProcessStarted { spiders } if spiders.len() == 2
        ));
        assert_eq!(envelopes.last().map(|envelope| envelope.event.name()), Some("process_finished"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cancels_spiders_and_keeps_partial_reports() {
        let client = Arc::new(
            ScriptedClient::new()
                .with_latency(Duration::from_secs(3600))
                .page("http://one.test", "<title>One</title>"),
        );
        let (events, mut dispatcher) = events::channel();
        let process = Process::new(by_name(&["one"]), client, &events);

        let report = process
            .run(vec![config("one", "http://one.test")], future::pending::<()>())
            .await;

        assert!(report.timed_out);
        assert_eq!(report.spiders.len(), 1);
        assert!(report.spiders[0].was_cancelled());
        assert!(report.elapsed < Duration::from_secs(3600));
        assert!(process_events(&mut dispatcher)
            .iter()
            .any(|envelope| envelope.event.name() == "process_error"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_the_run() {
        let client = Arc::new(
            ScriptedClient::new()
                .with_latency(Duration::from_secs(30))
                .page("http://one.test", "<title>One</title>"),
        );
        let (events, _dispatcher) = events::channel();
        let process = Process::new(by_name(&["one"]), client, &events);

        let report = process
            .run(
                vec![config("one", "http://one.test")],
                sleep(Duration::from_secs(5)),
            )
            .await;

        assert!(report.interrupted);
        assert!(!report.timed_out);
        assert_eq!(report.errors, ["process interrupted"]);
    }

    #[tokio::test(start_paused = true)]
    async fn spider_task_errors_are_reported() {
        let client = Arc::new(ScriptedClient::new().page("http://one.test", "<title>One</title>"));
        let model = PageModel::builder("Start")
            .detail_links(Field::css("next", "a::attr(href)").clean(|_, _| {
                Err(CleanError::failed("unexpected layout"))
            }))
            .build()
            .unwrap();
        let config = SpiderConfig::builder("one", "http://one.test")
            .start_model(model)
            .build()
            .unwrap();
        let (events, _dispatcher) = events::channel();
        let process = Process::new(by_name(&["one"]), client, &events);

        let report = process.run(vec![config], future::pending::<()>()).await;

        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("one: extraction of 'http://one.test' failed"));
    }
}
