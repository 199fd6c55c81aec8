//! Retried, throttled HTTP GETs.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::Semaphore, time::sleep};

use crate::{
    config::{ConcurrencyPolicy, RequestPolicy},
    error::TransportError,
    events::{Event, EventSender, Stopwatch},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

/// The transport a [`Fetcher`] issues its requests through.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<Response, TransportError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<Response, TransportError> {
        let mut request = self.client.get(url).timeout(timeout);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_owned(), value.to_owned()))
            })
            .collect();
        let body = response.text().await?;
        Ok(Response {
            status,
            body,
            headers,
        })
    }
}

/// Fetches URLs for one spider. Clones share the permit pool.
#[derive(Clone)]
pub struct Fetcher {
    client: Arc<dyn HttpClient>,
    permits: Arc<Semaphore>,
    concurrency: ConcurrencyPolicy,
    headers: Arc<[(String, String)]>,
    timeout: Duration,
    events: EventSender,
}

impl Fetcher {
    pub fn new(
        client: Arc<dyn HttpClient>,
        concurrency: &ConcurrencyPolicy,
        request: &RequestPolicy,
        events: EventSender,
    ) -> Self {
        Self {
            client,
            permits: Arc::new(Semaphore::new(concurrency.task_limit)),
            concurrency: concurrency.clone(),
            headers: request.headers().into(),
            timeout: request.timeout,
            events,
        }
    }

    /// Permits not held by a request in flight.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// GETs `url` until it answers below 400 or the retries run out.
    ///
    /// Each attempt holds a permit only while the request is in flight, so a
    /// dropped future gives its permit back.
    pub async fn fetch_with_retry(&self, url: &str) -> Option<Response> {
        sleep(self.concurrency.request_delay).await;
        self.events.emit(Event::UrlFetchingStarted {
            url: url.to_owned(),
        });

        let mut last_status = None;
        for attempt in 1..=self.concurrency.url_retries {
            if attempt > 1 {
                sleep(self.concurrency.retry_delay).await;
            }
            let (result, timing) = {
                let Ok(_permit) = self.permits.acquire().await else {
                    tracing::error!(url, "fetcher: permit pool closed");
                    return None;
                };
                let stopwatch = Stopwatch::start();
                let result = self.client.get(url, &self.headers, self.timeout).await;
                (result, stopwatch.stop())
            };

            match result {
                Ok(response) if response.is_success() => {
                    self.events.emit(Event::UrlFetched {
                        url: url.to_owned(),
                        status: response.status,
                        attempt,
                        timing,
                    });
                    return Some(response);
                }
                Ok(response) => {
                    last_status = Some(response.status);
                    self.events.emit(Event::UrlError {
                        url: url.to_owned(),
                        attempt,
                        status: Some(response.status),
                        error: None,
                        timing,
                    });
                }
                Err(err) => {
                    last_status = None;
                    self.events.emit(Event::UrlError {
                        url: url.to_owned(),
                        attempt,
                        status: None,
                        error: Some(err.to_string()),
                        timing,
                    });
                }
            }
        }

        self.events.emit(Event::UrlFailed {
            url: url.to_owned(),
            tries: self.concurrency.url_retries,
            last_status,
        });
        None
    }
}


#[cfg(test)]
mod tests {
    use futures::future::join_all;

    use super::{
        fake::{Reply, ScriptedClient},
        *,
    };
    use crate::events::{self, Envelope};

    fn policy(task_limit: usize, url_retries: usize) -> ConcurrencyPolicy {
        ConcurrencyPolicy {
            task_limit,
            url_retries,
            ..ConcurrencyPolicy::default()
        }
    }

    fn names(envelopes: &[Envelope]) -> Vec<&'static str> {
        envelopes.iter().map(|envelope| envelope.event.name()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn failing_url_is_tried_exactly_url_retries_times() {
        let client = Arc::new(
            ScriptedClient::new().script("http://shop.test/", vec![Reply::Status(500, String::new())]),
        );
        let (events, mut dispatcher) = events::channel();
        let fetcher = Fetcher::new(client.clone(), &policy(3, 3), &RequestPolicy::default(), events);

        assert_eq!(fetcher.fetch_with_retry("http://shop.test/").await, None);
        assert_eq!(client.calls("http://shop.test/"), 3);

        let envelopes = dispatcher.drain();
        assert_eq!(
            names(&envelopes),
            ["url_fetching_started", "url_error", "url_error", "url_error", "url_failed"]
        );
        assert_eq!(
            envelopes[4].event,
            Event::UrlFailed {
                url: "http://shop.test/".into(),
                tries: 3,
                last_status: Some(500),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_second_attempt_stops_retrying() {
        let client = Arc::new(ScriptedClient::new().script(
            "http://shop.test/",
            vec![
                Reply::Transport(TransportError::Timeout),
                Reply::Status(200, "<p>ok</p>".into()),
                Reply::Status(500, String::new()),
            ],
        ));
        let (events, mut dispatcher) = events::channel();
        let fetcher = Fetcher::new(client.clone(), &policy(3, 5), &RequestPolicy::default(), events);

        let response = fetcher.fetch_with_retry("http://shop.test/").await.unwrap();
        assert_eq!(response.body, "<p>ok</p>");
        assert_eq!(client.calls("http://shop.test/"), 2);
        assert_eq!(
            names(&dispatcher.drain()),
            ["url_fetching_started", "url_error", "url_fetched"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_retried_too() {
        let client = Arc::new(ScriptedClient::new());
        let (events, _dispatcher) = events::channel();
        let fetcher = Fetcher::new(client.clone(), &policy(1, 2), &RequestPolicy::default(), events);

        assert_eq!(fetcher.fetch_with_retry("http://shop.test/missing").await, None);
        assert_eq!(client.calls("http://shop.test/missing"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_requests_never_exceed_task_limit() {
        let mut client = ScriptedClient::new().with_latency(Duration::from_millis(300));
        for n in 0..10 {
            client = client.page(&format!("http://shop.test/{n}"), "ok");
        }
        let client = Arc::new(client);
        let (events, _dispatcher) = events::channel();
        let fetcher = Fetcher::new(client.clone(), &policy(2, 1), &RequestPolicy::default(), events);

        let urls: Vec<String> = (0..10).map(|n| format!("http://shop.test/{n}")).collect();
        let responses = join_all(urls.iter().map(|url| fetcher.fetch_with_retry(url))).await;

        assert!(responses.iter().all(Option::is_some));
        assert_eq!(client.total_calls(), 10);
        assert_eq!(client.max_in_flight(), 2);
        assert_eq!(fetcher.available_permits(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_fetch_gives_its_permit_back() {
        let client = Arc::new(
            ScriptedClient::new()
                .with_latency(Duration::from_secs(60))
                .page("http://shop.test/slow", "late"),
        );
        let (events, _dispatcher) = events::channel();
        let fetcher = Fetcher::new(client, &policy(1, 1), &RequestPolicy::default(), events);

        let task = tokio::spawn({
            let fetcher = fetcher.clone();
            async move { fetcher.fetch_with_retry("http://shop.test/slow").await }
        });
        sleep(Duration::from_secs(5)).await;
        assert_eq!(fetcher.available_permits(), 0);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(fetcher.available_permits(), 1);
    }
}
