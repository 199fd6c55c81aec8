use thiserror::Error;

use crate::page::SelectorKind;

/// A model definition that cannot be registered.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("model '{model}': invalid css expression '{expression}': {message}")]
    InvalidCss {
        model: String,
        expression: String,
        message: String,
    },

    #[error("model '{model}': invalid regex '{expression}': {source}")]
    InvalidRegex {
        model: String,
        expression: String,
        #[source]
        source: regex::Error,
    },

    #[error("model '{model}': duplicate field '{field}'")]
    DuplicateField { model: String, field: String },

    #[error("model '{model}': field '{field}' has both a sub-model and a clean function")]
    CleanWithSubModel { model: String, field: String },
}

/// A crawl job configuration that cannot be turned into a spider.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("spider '{0}': one of models - either `start_model` or `catalogue_model` - is needed")]
    MissingModel(String),

    #[error("spider '{0}': task limit must be at least 1")]
    ZeroTaskLimit(String),

    #[error("spider '{0}': url retries must be at least 1")]
    ZeroRetries(String),

    #[error("spider '{0}': task check interval must be positive")]
    ZeroCheckInterval(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("{kind:?} expressions are not supported by this document ('{expression}')")]
    Unsupported {
        kind: SelectorKind,
        expression: String,
    },
}

/// Fatal failure while extracting one page.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("model '{model}', field '{field}': {source}")]
    Selector {
        model: String,
        field: String,
        #[source]
        source: SelectorError,
    },

    #[error("model '{model}', field '{field}': clean failed: {message}")]
    Clean {
        model: String,
        field: String,
        message: String,
    },

    #[error("model '{model}', field '{field}': sub-model '{sub_model}' needs an element match")]
    NotANode {
        model: String,
        field: String,
        sub_model: String,
    },

    #[error("model '{model}': no field named '{field}'")]
    UnknownField { model: String, field: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// Task-level failure collected into a spider's report.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpiderError {
    #[error("extraction of '{url}' failed: {source}")]
    Extraction {
        url: String,
        #[source]
        source: ExtractError,
    },

    #[error("task panicked: {0}")]
    TaskPanicked(String),

    #[error("run cancelled with {pending} task(s) pending")]
    Cancelled { pending: usize },
}

/// Failure of a one-off [`test_url`](crate::tester::test_url) run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TestUrlError {
    #[error("fetching '{url}' failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("'{url}' answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("extraction of '{url}' failed: {source}")]
    Extract {
        url: String,
        #[source]
        source: ExtractError,
    },
}
