//! Reusable clean functions for [`Field::clean`](super::Field::clean).

use serde_json::{json, Value};

use super::{CleanError, Match, Page};
use crate::urls;

/// First match resolved against the site domain.
pub fn absolute_url(page: &Page<'_>, matches: Vec<Match>) -> Result<Value, CleanError> {
    match matches.first() {
        Some(found) => resolve(page, &page.text(found)).map(Value::String),
        None => Ok(Value::Null),
    }
}

/// Every match resolved against the site domain.
pub fn absolute_urls(page: &Page<'_>, matches: Vec<Match>) -> Result<Value, CleanError> {
    matches
        .iter()
        .map(|found| resolve(page, &page.text(found)).map(Value::String))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

/// Every match except in-page `#anchor` links.
pub fn skip_fragments(page: &Page<'_>, matches: Vec<Match>) -> Result<Value, CleanError> {
    Ok(Value::Array(
        matches
            .iter()
            .map(|found| page.text(found))
            .filter(|href| !href.starts_with('#'))
            .map(Value::String)
            .collect(),
    ))
}

/// First match that is not only whitespace, trimmed.
pub fn first_non_blank(page: &Page<'_>, matches: Vec<Match>) -> Result<Value, CleanError> {
    Ok(non_blank(page, &matches)
        .map(Value::String)
        .unwrap_or(Value::Null))
}

/// `"49,9 PLN"` as `{"amount": "49.9", "currency": "PLN"}`.
pub fn money(page: &Page<'_>, matches: Vec<Match>) -> Result<Value, CleanError> {
    let Some(text) = non_blank(page, &matches) else {
        return Ok(Value::Null);
    };
    let Some((amount, currency)) = text.split_once(char::is_whitespace) else {
        return Err(CleanError::failed(format!("'{text}' is not an amount with a currency")));
    };
    Ok(json!({
        "amount": amount.replace(',', "."),
        "currency": currency.trim(),
    }))
}

/// Raises the ignore signal when nothing matched, else the first match.
pub fn required(page: &Page<'_>, matches: Vec<Match>) -> Result<Value, CleanError> {
    match matches.first() {
        Some(found) => Ok(Value::String(page.text(found))),
        None => Err(CleanError::Ignore),
    }
}

fn non_blank(page: &Page<'_>, matches: &[Match]) -> Option<String> {
    matches
        .iter()
        .map(|found| page.text(found).trim().to_owned())
        .find(|text| !text.is_empty())
}

fn resolve(page: &Page<'_>, href: &str) -> Result<String, CleanError> {
    urls::join(page.metadata().site_domain(), href.trim()).map_err(CleanError::failed)
}
