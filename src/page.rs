//! Declarative page extraction.
//!
//! A [`Model`] is a named, ordered list of [`Field`]s, built once and shared.
//! Binding it to a parsed document and the [`PageMetadata`] of the fetched
//! page gives a [`Page`], which evaluates fields lazily, memoizes each value
//! and assembles them into a [`Record`]. A [`PageModel`] adds the roles that
//! drive crawling: catalogue links, detail links and items.

pub mod clean;
mod field;
mod html;
mod model;

use serde::Serialize;

pub use field::{Cardinality, CleanError, CleanFn, Field, MetadataAttr};
pub use html::{HtmlDocument, Match, NodeHandle, Query, Selector, SelectorKind};
pub use model::{
    Model, ModelBuilder, Page, PageExtraction, PageInstance, PageModel, PageModelBuilder,
    PageOutcome,
};

/// One extracted record: field name to value.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Result of evaluating a field or a whole model.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted<T> {
    Value(T),
    /// A clean function raised the ignore signal.
    Skipped,
}

impl<T> Extracted<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Extracted::Value(value) => Some(value),
            Extracted::Skipped => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Extracted::Skipped)
    }
}

/// Data about a fetched page other than its parsed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageMetadata {
    source_url: String,
    site_domain: String,
    raw_html: String,
}

impl PageMetadata {
    pub fn new(
        source_url: impl Into<String>,
        site_domain: impl Into<String>,
        raw_html: impl Into<String>,
    ) -> Self {
        Self {
            source_url: source_url.into(),
            site_domain: site_domain.into(),
            raw_html: raw_html.into(),
        }
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn site_domain(&self) -> &str {
        &self.site_domain
    }

    pub fn raw_html(&self) -> &str {
        &self.raw_html
    }

    pub fn attr(&self, attr: MetadataAttr) -> &str {
        match attr {
            MetadataAttr::SourceUrl => &self.source_url,
            MetadataAttr::SiteDomain => &self.site_domain,
            MetadataAttr::RawHtml => &self.raw_html,
        }
    }
}
