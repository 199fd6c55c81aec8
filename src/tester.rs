//! Checks a page model against one live URL.

use serde::Serialize;

use crate::{
    config::RequestPolicy,
    error::{ExtractError, TestUrlError},
    fetch::HttpClient,
    page::{HtmlDocument, PageMetadata, PageModel, Record},
    urls,
};

/// Everything a model gets out of one page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UrlReport {
    pub url: String,
    pub status: u16,
    pub valid: bool,
    /// `None` when a field raised the ignore signal.
    pub record: Option<Record>,
    pub catalogue_links: Vec<String>,
    pub detail_links: Vec<String>,
    pub items: Vec<Record>,
}

/// Fetches `url` once, without retries, and extracts it with `model`.
pub async fn test_url(
    client: &dyn HttpClient,
    request: &RequestPolicy,
    model: &PageModel,
    url: &str,
) -> Result<UrlReport, TestUrlError> {
    let response = client
        .get(url, &request.headers(), request.timeout)
        .await
        .map_err(|source| TestUrlError::Transport {
            url: url.to_owned(),
            source,
        })?;
    if !response.is_success() {
        return Err(TestUrlError::Status {
            url: url.to_owned(),
            status: response.status,
        });
    }

    let site_domain = urls::domain(url).unwrap_or_else(|| url.to_owned());
    let metadata = PageMetadata::new(url, site_domain, response.body);
    inspect(model, &metadata, response.status).map_err(|source| TestUrlError::Extract {
        url: url.to_owned(),
        source,
    })
}

fn inspect(model: &PageModel, metadata: &PageMetadata, status: u16) -> Result<UrlReport, ExtractError> {
    let document = HtmlDocument::parse(metadata.raw_html());
    let page = model.bind(&document, metadata);
    Ok(UrlReport {
        url: metadata.source_url().to_owned(),
        status,
        valid: page.is_valid_response()?,
        record: page.extract()?.into_option(),
        catalogue_links: page.catalogue_links()?,
        detail_links: page.detail_links()?,
        items: page.items()?,
    })
}
