//! Crawl events and the channel that delivers them to listeners.
//!
//! Every spider, fetcher and process holds an [`EventSender`] tagged with its
//! name. Events travel over one unbounded channel, so the order in which a
//! single sender emits them is the order in which listeners see them. The
//! [`Dispatcher`] owns the listeners and runs until every sender is gone.

use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::{future, StreamExt};
use serde::Serialize;
use tokio::{sync::mpsc, time::Instant};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::Level;

use crate::{config::seconds, page::Record};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    ProcessStarted {
        spiders: Vec<String>,
    },
    ProcessError {
        error: String,
    },
    ProcessFinished {
        #[serde(with = "seconds")]
        elapsed: Duration,
    },
    SpiderRegistered,
    SpiderStarted,
    SpiderTicked {
        done: usize,
        pending: usize,
    },
    UrlRegistered {
        url: String,
        model: String,
    },
    UrlProcessingStarted {
        url: String,
        model: String,
    },
    UrlFetchingStarted {
        url: String,
    },
    UrlFetched {
        url: String,
        status: u16,
        attempt: usize,
        timing: Timing,
    },
    UrlError {
        url: String,
        attempt: usize,
        status: Option<u16>,
        error: Option<String>,
        timing: Timing,
    },
    UrlFailed {
        url: String,
        tries: usize,
        last_status: Option<u16>,
    },
    UrlResponseValid {
        url: String,
        status: u16,
    },
    UrlResponseInvalid {
        url: String,
        status: u16,
    },
    ItemsExtracted {
        url: String,
        items: Vec<Record>,
    },
    SpiderEnded {
        urls_failed: usize,
        urls_invalid: usize,
        urls_total: usize,
        items_extracted: usize,
        errors: Vec<String>,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::ProcessStarted { .. } => "process_started",
            Event::ProcessError { .. } => "process_error",
            Event::ProcessFinished { .. } => "process_finished",
            Event::SpiderRegistered => "spider_registered",
            Event::SpiderStarted => "spider_started",
            Event::SpiderTicked { .. } => "spider_ticked",
            Event::UrlRegistered { .. } => "url_registered",
            Event::UrlProcessingStarted { .. } => "url_processing_started",
            Event::UrlFetchingStarted { .. } => "url_fetching_started",
            Event::UrlFetched { .. } => "url_fetched",
            Event::UrlError { .. } => "url_error",
            Event::UrlFailed { .. } => "url_failed",
            Event::UrlResponseValid { .. } => "url_response_valid",
            Event::UrlResponseInvalid { .. } => "url_response_invalid",
            Event::ItemsExtracted { .. } => "items_extracted",
            Event::SpiderEnded { .. } => "spider_ended",
        }
    }

    /// Level at which [`TracingListener`] logs the event.
    pub fn level(&self) -> Level {
        match self {
            Event::ProcessError { .. } => Level::ERROR,
            Event::UrlError { .. } | Event::UrlFailed { .. } | Event::UrlResponseInvalid { .. } => {
                Level::WARN
            }
            Event::ProcessStarted { .. }
            | Event::ProcessFinished { .. }
            | Event::SpiderStarted
            | Event::UrlResponseValid { .. }
            | Event::ItemsExtracted { .. }
            | Event::SpiderEnded { .. } => Level::INFO,
            Event::SpiderRegistered
            | Event::SpiderTicked { .. }
            | Event::UrlRegistered { .. }
            | Event::UrlProcessingStarted { .. }
            | Event::UrlFetchingStarted { .. }
            | Event::UrlFetched { .. } => Level::DEBUG,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::ProcessStarted { spiders } => write!(f, "process started: {}", spiders.join(", ")),
            Event::ProcessError { error } => write!(f, "process error: {error}"),
            Event::ProcessFinished { elapsed } => write!(f, "process finished in {elapsed:?}"),
            Event::SpiderRegistered => f.write_str("spider registered"),
            Event::SpiderStarted => f.write_str("spider started"),
            Event::SpiderTicked { done, pending } => {
                write!(f, "tasks done: {done}, pending: {pending}")
            }
            Event::UrlRegistered { url, model } => write!(f, "registered '{url}' as {model}"),
            Event::UrlProcessingStarted { url, model } => {
                write!(f, "processing '{url}' as {model}")
            }
            Event::UrlFetchingStarted { url } => write!(f, "fetching '{url}'"),
            Event::UrlFetched {
                url,
                status,
                attempt,
                timing,
            } => write!(
                f,
                "fetched '{url}' with status {status} on attempt {attempt} in {:?}",
                timing.elapsed
            ),
            Event::UrlError {
                url,
                attempt,
                status,
                error,
                ..
            } => {
                write!(f, "attempt {attempt} for '{url}' failed")?;
                if let Some(status) = status {
                    write!(f, " with status {status}")?;
                }
                if let Some(error) = error {
                    write!(f, ": {error}")?;
                }
                Ok(())
            }
            Event::UrlFailed {
                url,
                tries,
                last_status,
            } => match last_status {
                Some(status) => write!(f, "giving up '{url}' after {tries} tries, last status {status}"),
                None => write!(f, "giving up '{url}' after {tries} tries"),
            },
            Event::UrlResponseValid { url, status } => {
                write!(f, "valid response from '{url}' ({status})")
            }
            Event::UrlResponseInvalid { url, status } => {
                write!(f, "invalid response from '{url}' ({status})")
            }
            Event::ItemsExtracted { url, items } => {
                write!(f, "{} item(s) extracted from '{url}'", items.len())
            }
            Event::SpiderEnded {
                urls_failed,
                urls_invalid,
                urls_total,
                items_extracted,
                errors,
            } => write!(
                f,
                "spider ended: {urls_total} url(s), {urls_failed} failed, {urls_invalid} invalid, \
                 {items_extracted} item(s), {} error(s)",
                errors.len()
            ),
        }
    }
}

/// Wall-clock start and duration of one fetch attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timing {
    pub started: DateTime<Utc>,
    #[serde(with = "seconds")]
    pub elapsed: Duration,
}

pub(crate) struct Stopwatch {
    started: DateTime<Utc>,
    instant: Instant,
}

impl Stopwatch {
    pub(crate) fn start() -> Self {
        Self {
            started: Utc::now(),
            instant: Instant::now(),
        }
    }

    pub(crate) fn stop(&self) -> Timing {
        Timing {
            started: self.started,
            elapsed: self.instant.elapsed(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub sender: Arc<str>,
    pub at: DateTime<Utc>,
    pub event: Event,
}

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Envelope>,
    sender: Arc<str>,
}

impl EventSender {
    /// A sender on the same channel with another name.
    pub fn named(&self, sender: impl Into<Arc<str>>) -> Self {
        Self {
            tx: self.tx.clone(),
            sender: sender.into(),
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn emit(&self, event: Event) {
        let envelope = Envelope {
            sender: self.sender.clone(),
            at: Utc::now(),
            event,
        };
        if self.tx.send(envelope).is_err() {
            tracing::trace!(sender = %self.sender, "event dropped, dispatcher is gone");
        }
    }
}

pub trait Listener: Send {
    fn on_event(&mut self, envelope: &Envelope);
}

impl<F> Listener for F
where
    F: FnMut(&Envelope) + Send,
{
    fn on_event(&mut self, envelope: &Envelope) {
        self(envelope)
    }
}

pub struct Dispatcher {
    rx: mpsc::UnboundedReceiver<Envelope>,
    listeners: Vec<Box<dyn Listener>>,
}

impl Dispatcher {
    pub fn register(&mut self, listener: impl Listener + 'static) -> &mut Self {
        self.listeners.push(Box::new(listener));
        self
    }

    /// Delivers events to the listeners, in registration order, until every
    /// [`EventSender`] has been dropped.
    pub async fn run(self) {
        let mut listeners = self.listeners;
        UnboundedReceiverStream::new(self.rx)
            .for_each(|envelope| {
                for listener in listeners.iter_mut() {
                    listener.on_event(&envelope);
                }
                future::ready(())
            })
            .await;
        tracing::debug!("events: all senders dropped");
    }

    /// Everything sent so far, without waiting for more.
    #[cfg(test)]
    pub(crate) fn drain(&mut self) -> Vec<Envelope> {
        let mut envelopes = Vec::new();
        while let Ok(envelope) = self.rx.try_recv() {
            envelopes.push(envelope);
        }
        envelopes
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Sender named `root` and its dispatcher.
pub fn channel() -> (EventSender, Dispatcher) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventSender {
            tx,
            sender: Arc::from("root"),
        },
        Dispatcher {
            rx,
            listeners: Vec::new(),
        },
    )
}

/// Logs every event through `tracing` at the event's level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl Listener for TracingListener {
    fn on_event(&mut self, envelope: &Envelope) {
        let Envelope { sender, event, .. } = envelope;
        let name = event.name();
        match event.level() {
            Level::ERROR => tracing::error!(sender = %sender, event = name, "{event}"),
            Level::WARN => tracing::warn!(sender = %sender, event = name, "{event}"),
            Level::INFO => tracing::info!(sender = %sender, event = name, "{event}"),
            Level::DEBUG => tracing::debug!(sender = %sender, event = name, "{event}"),
            _ => tracing::trace!(sender = %sender, event = name, "{event}"),
        }
    }
}
