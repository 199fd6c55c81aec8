//! Crawl job configuration and process-level scheduling.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};

use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, page::PageModel, urls};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyPolicy {
    /// How often a running spider reports progress.
    #[serde(with = "seconds")]
    pub task_check_interval: Duration,
    /// Fetch attempts allowed in flight at once.
    pub task_limit: usize,
    /// Pause before the first attempt of every URL. Each URL waits on its
    /// own, so this is not a shared rate limit across tasks.
    #[serde(with = "seconds")]
    pub request_delay: Duration,
    /// Attempts per URL before it is given up.
    pub url_retries: usize,
    #[serde(with = "seconds")]
    pub retry_delay: Duration,
}

impl Default for ConcurrencyPolicy {
    fn default() -> Self {
        Self {
            task_check_interval: Duration::from_secs(5),
            task_limit: 3,
            request_delay: Duration::from_millis(500),
            url_retries: 2,
            retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestPolicy {
    pub user_agent: String,
    #[serde(with = "seconds")]
    pub timeout: Duration,
    pub extra_headers: BTreeMap<String, String>,
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            user_agent: concat!("shopcrawler/", env!("CARGO_PKG_VERSION")).to_owned(),
            timeout: Duration::from_secs(5),
            extra_headers: BTreeMap::new(),
        }
    }
}

impl RequestPolicy {
    pub fn headers(&self) -> Vec<(String, String)> {
        std::iter::once(("user-agent".to_owned(), self.user_agent.clone()))
            .chain(
                self.extra_headers
                    .iter()
                    .map(|(name, value)| (name.clone(), value.clone())),
            )
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulePolicy {
    pub expected_start: NaiveTime,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            expected_start: NaiveTime::MIN,
        }
    }
}

/// State of one run of the whole process.
#[derive(Debug, Clone)]
pub struct ProcessState {
    pub start: NaiveDateTime,
    /// Length of the slot in which scheduled spiders may start.
    pub interval: TimeDelta,
    /// Hard limit for all spiders together.
    pub timeout: Duration,
    /// Pick spiders by schedule; otherwise by `spiders_chosen`.
    pub scheduler_on: bool,
    pub spiders_chosen: BTreeSet<String>,
}

impl Default for ProcessState {
    fn default() -> Self {
        Self {
            start: Local::now().naive_local(),
            interval: TimeDelta::minutes(15),
            timeout: Duration::from_secs(3600),
            scheduler_on: true,
            spiders_chosen: BTreeSet::new(),
        }
    }
}

/// Parameters of one crawl job.
#[derive(Debug, Clone)]
pub struct SpiderConfig {
    name: String,
    domain: String,
    allowed_domains: BTreeSet<String>,
    start_urls: Vec<String>,
    is_active: bool,
    start_model: Arc<PageModel>,
    catalogue_model: Option<Arc<PageModel>>,
    detail_model: Option<Arc<PageModel>>,
    concurrency: ConcurrencyPolicy,
    request: RequestPolicy,
    schedule: SchedulePolicy,
}

impl SpiderConfig {
    pub fn builder(name: impl Into<String>, domain: impl Into<String>) -> SpiderConfigBuilder {
        SpiderConfigBuilder {
            name: name.into(),
            domain: domain.into(),
            allowed_domains: BTreeSet::new(),
            start_urls: None,
            is_active: true,
            start_model: None,
            catalogue_model: None,
            detail_model: None,
            concurrency: ConcurrencyPolicy::default(),
            request: RequestPolicy::default(),
            schedule: SchedulePolicy::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn start_urls(&self) -> &[String] {
        &self.start_urls
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn start_model(&self) -> &Arc<PageModel> {
        &self.start_model
    }

    pub fn catalogue_model(&self) -> Option<&Arc<PageModel>> {
        self.catalogue_model.as_ref()
    }

    pub fn detail_model(&self) -> Option<&Arc<PageModel>> {
        self.detail_model.as_ref()
    }

    pub fn concurrency(&self) -> &ConcurrencyPolicy {
        &self.concurrency
    }

    pub fn request(&self) -> &RequestPolicy {
        &self.request
    }

    pub fn schedule(&self) -> &SchedulePolicy {
        &self.schedule
    }

    /// Whether a discovered link may join the frontier: its host is one of
    /// the allowed domains or a subdomain of one. An empty set allows all.
    pub fn allows(&self, url: &str) -> bool {
        if self.allowed_domains.is_empty() {
            return true;
        }
        let Some(host) = urls::host(url) else {
            return false;
        };
        let host = host.to_lowercase();
        self.allowed_domains
            .iter()
            .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
    }

    /// Active and the process started inside this job's time slot.
    pub fn should_start(&self, state: &ProcessState) -> bool {
        let expected_start = state.start.date().and_time(self.schedule.expected_start);
        let expected_end = expected_start + state.interval;
        self.is_active && expected_start <= state.start && state.start <= expected_end
    }
}

/// Configs the process should run: by schedule, or by name.
pub fn select_configs(configs: Vec<SpiderConfig>, state: &ProcessState) -> Vec<SpiderConfig> {
    configs
        .into_iter()
        .filter(|config| {
            if state.scheduler_on {
                config.should_start(state)
            } else {
                state.spiders_chosen.contains(config.name())
            }
        })
        .collect()
}

#[derive(Debug)]
pub struct SpiderConfigBuilder {
    name: String,
    domain: String,
    allowed_domains: BTreeSet<String>,
    start_urls: Option<Vec<String>>,
    is_active: bool,
    start_model: Option<Arc<PageModel>>,
    catalogue_model: Option<Arc<PageModel>>,
    detail_model: Option<Arc<PageModel>>,
    concurrency: ConcurrencyPolicy,
    request: RequestPolicy,
    schedule: SchedulePolicy,
}

impl SpiderConfigBuilder {
    /// Restricts frontier expansion to these hosts and their subdomains.
    /// Defaults to the host of the spider's domain.
    pub fn allowed_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_domains = domains
            .into_iter()
            .map(|domain| domain.into().to_lowercase())
            .collect();
        self
    }

    pub fn start_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.start_urls = Some(urls.into_iter().map(Into::into).collect());
        self
    }

    pub fn active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    pub fn start_model(mut self, model: Arc<PageModel>) -> Self {
        self.start_model = Some(model);
        self
    }

    pub fn catalogue_model(mut self, model: Arc<PageModel>) -> Self {
        self.catalogue_model = Some(model);
        self
    }

    pub fn detail_model(mut self, model: Arc<PageModel>) -> Self {
        self.detail_model = Some(model);
        self
    }

    pub fn concurrency(mut self, policy: ConcurrencyPolicy) -> Self {
        self.concurrency = policy;
        self
    }

    pub fn request(mut self, policy: RequestPolicy) -> Self {
        self.request = policy;
        self
    }

    pub fn schedule(mut self, policy: SchedulePolicy) -> Self {
        self.schedule = policy;
        self
    }

    pub fn build(self) -> Result<SpiderConfig, ConfigError> {
        let start_model = self
            .start_model
            .or_else(|| self.catalogue_model.clone())
            .ok_or_else(|| ConfigError::MissingModel(self.name.clone()))?;
        if self.concurrency.task_limit == 0 {
            return Err(ConfigError::ZeroTaskLimit(self.name));
        }
        if self.concurrency.url_retries == 0 {
            return Err(ConfigError::ZeroRetries(self.name));
        }
        if self.concurrency.task_check_interval.is_zero() {
            return Err(ConfigError::ZeroCheckInterval(self.name));
        }
        let start_urls = self.start_urls.unwrap_or_else(|| vec![self.domain.clone()]);
        let mut allowed_domains = self.allowed_domains;
        if allowed_domains.is_empty() {
            allowed_domains.extend(urls::host(&self.domain).map(|host| host.to_lowercase()));
        }
        Ok(SpiderConfig {
            name: self.name,
            domain: self.domain,
            allowed_domains,
            start_urls,
            is_active: self.is_active,
            start_model,
            catalogue_model: self.catalogue_model,
            detail_model: self.detail_model,
            concurrency: self.concurrency,
            request: self.request,
            schedule: self.schedule,
        })
    }
}

/// Durations as fractional seconds.
pub(crate) mod seconds {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::page::Field;

    fn model(name: &str) -> Arc<PageModel> {
        PageModel::builder(name)
            .field(Field::css("title", "title::text"))
            .build()
            .unwrap()
    }

    fn process_at(hour: u32, minute: u32) -> ProcessState {
        ProcessState {
            start: NaiveDate::from_ymd_opt(2019, 8, 14)
                .unwrap()
                .and_hms_opt(hour, minute, 32)
                .unwrap(),
            ..ProcessState::default()
        }
    }

    fn scheduled(hour: u32, minute: u32) -> SpiderConfigBuilder {
        SpiderConfig::builder("name", "https://domain.test")
            .start_model(model("Start"))
            .schedule(SchedulePolicy {
                expected_start: NaiveTime::from_hms_opt(hour, minute, 0).unwrap(),
            })
    }

    #[test]
    fn minimal_config_defaults() {
        let config = SpiderConfig::builder("name", "https://domain.test")
            .catalogue_model(model("Catalogue"))
            .build()
            .unwrap();
        assert_eq!(config.start_urls(), ["https://domain.test".to_owned()]);
        assert_eq!(config.start_model().name(), "Catalogue");
        assert!(config.is_active());
        assert!(config.allows("https://domain.test/x"));
        assert!(!config.allows("https://anywhere.test/x"));
        assert_eq!(config.concurrency(), &ConcurrencyPolicy::default());
    }

    #[test]
    fn config_without_models_is_rejected() {
        let err = SpiderConfig::builder("name", "https://domain.test").build().unwrap_err();
        assert_eq!(err, ConfigError::MissingModel("name".into()));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let err = SpiderConfig::builder("name", "https://domain.test")
            .start_model(model("Start"))
            .concurrency(ConcurrencyPolicy {
                url_retries: 0,
                ..ConcurrencyPolicy::default()
            })
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::ZeroRetries("name".into()));
    }

    #[test]
    fn allowed_domains_include_subdomains() {
        let config = SpiderConfig::builder("name", "https://shop.test")
            .start_model(model("Start"))
            .allowed_domains(["Shop.test"])
            .build()
            .unwrap();
        assert!(config.allows("https://shop.test/a"));
        assert!(config.allows("https://www.shop.test/a"));
        assert!(!config.allows("https://othershop.test/a"));
        assert!(!config.allows("not a url"));
    }

    #[test]
    fn should_start_inside_the_time_slot() {
        let process = process_at(12, 30);
        assert!(scheduled(12, 20).build().unwrap().should_start(&process));
        assert!(!scheduled(12, 20).active(false).build().unwrap().should_start(&process));
        assert!(!scheduled(10, 0).build().unwrap().should_start(&process));
        assert!(!scheduled(15, 0).build().unwrap().should_start(&process));

        let short = ProcessState {
            interval: TimeDelta::minutes(1),
            ..process
        };
        assert!(!scheduled(12, 20).build().unwrap().should_start(&short));
    }

    #[test]
    fn select_configs_by_schedule_or_name() {
        let configs = || {
            vec![
                scheduled(12, 20).build().unwrap(),
                SpiderConfig::builder("other", "https://other.test")
                    .start_model(model("Start"))
                    .schedule(SchedulePolicy {
                        expected_start: NaiveTime::from_hms_opt(3, 0, 0).unwrap(),
                    })
                    .build()
                    .unwrap(),
            ]
        };
        let by_schedule = select_configs(configs(), &process_at(12, 30));
        assert_eq!(by_schedule.len(), 1);
        assert_eq!(by_schedule[0].name(), "name");

        let by_name = ProcessState {
            scheduler_on: false,
            spiders_chosen: ["other".to_owned()].into(),
            ..process_at(12, 30)
        };
        let chosen = select_configs(configs(), &by_name);
        assert_eq!(chosen.len(), 1);
        assert_eq!(chosen[0].name(), "other");
    }

    #[test]
    fn policies_read_durations_as_seconds() {
        let policy: ConcurrencyPolicy =
            serde_json::from_str(r#"{"task_limit": 8, "request_delay": 0.25}"#).unwrap();
        assert_eq!(policy.task_limit, 8);
        assert_eq!(policy.request_delay, Duration::from_millis(250));
        assert_eq!(policy.url_retries, 2);

        let request: RequestPolicy = serde_json::from_str(
            r#"{"user_agent": "bot", "extra_headers": {"accept-language": "pl"}}"#,
        )
        .unwrap();
        assert_eq!(
            request.headers(),
            vec![
                ("user-agent".to_owned(), "bot".to_owned()),
                ("accept-language".to_owned(), "pl".to_owned()),
            ]
        );
    }
}
