//! The selector capability the extraction layer runs against, and its
//! `scraper`-backed implementation.

use ego_tree::NodeId;
use regex::Regex;
use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};

use crate::error::SelectorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorKind {
    /// XPath-like path expression.
    Path,
    Css,
    Regex,
}

/// Opaque reference to a node of the document it was selected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(NodeId);

/// One raw selector result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Match {
    Node(NodeHandle),
    Text(String),
}

#[derive(Debug, Clone)]
enum Pseudo {
    Node,
    Text,
    Attr(String),
}

#[derive(Debug, Clone)]
enum Compiled {
    Path,
    Css {
        selector: scraper::Selector,
        pseudo: Pseudo,
    },
    Regex(Regex),
}

/// A selector expression compiled for repeated evaluation.
#[derive(Debug, Clone)]
pub struct Query {
    expression: String,
    compiled: Compiled,
}

pub(crate) enum CompileError {
    Css(String),
    Regex(regex::Error),
}

impl Query {
    pub(crate) fn compile(kind: SelectorKind, expression: &str) -> Result<Self, CompileError> {
        let compiled = match kind {
            SelectorKind::Path => Compiled::Path,
            SelectorKind::Css => {
                let (css, pseudo) = split_pseudo(expression);
                scraper::Selector::parse(css).map_err(|err| CompileError::Css(format!("{err:?}")))?;
                let selector = scraper::Selector::parse(&anchor_to_scope(css))
                    .map_err(|err| CompileError::Css(format!("{err:?}")))?;
                Compiled::Css { selector, pseudo }
            }
            SelectorKind::Regex => Compiled::Regex(Regex::new(expression).map_err(CompileError::Regex)?),
        };
        Ok(Self {
            expression: expression.to_owned(),
            compiled,
        })
    }

    pub fn kind(&self) -> SelectorKind {
        match self.compiled {
            Compiled::Path => SelectorKind::Path,
            Compiled::Css { .. } => SelectorKind::Css,
            Compiled::Regex(_) => SelectorKind::Regex,
        }
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn regex(&self) -> Option<&Regex> {
        match &self.compiled {
            Compiled::Regex(regex) => Some(regex),
            _ => None,
        }
    }
}

/// Splits a trailing `::text` or `::attr(name)` off a css expression.
fn split_pseudo(expression: &str) -> (&str, Pseudo) {
    let expression = expression.trim();
    if let Some(css) = expression.strip_suffix("::text") {
        return (css, Pseudo::Text);
    }
    if let Some(start) = expression.rfind("::attr(") {
        if let Some(name) = expression[start + 7..].strip_suffix(')') {
            return (&expression[..start], Pseudo::Attr(name.trim().to_owned()));
        }
    }
    (expression, Pseudo::Node)
}

/// Rewrites a selector list so every complex selector starts at the scope
/// element or one of its descendants: `table td` becomes
/// `table:scope td, :scope table td`. Ancestors above the scope never take
/// part in a match.
fn anchor_to_scope(css: &str) -> String {
    split_top_level(css, |c| c == ',')
        .into_iter()
        .map(str::trim)
        .filter(|complex| !complex.is_empty())
        .flat_map(|complex| {
            let first = split_top_level(complex, |c| c.is_whitespace() || matches!(c, '>' | '+' | '~'))[0];
            let rest = &complex[first.len()..];
            let mut anchored = Vec::with_capacity(2);
            if !first.is_empty() && !matches!(rest.trim_start().chars().next(), Some('+' | '~')) {
                anchored.push(format!("{first}:scope{rest}"));
            }
            anchored.push(format!(":scope {complex}"));
            anchored
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Splits on `separator` outside brackets, parentheses and quotes.
fn split_top_level(css: &str, separator: impl Fn(char) -> bool) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote = None;
    let mut start = 0;
    for (index, c) in css.char_indices() {
        match (quote, c) {
            (Some(open), c) if c == open => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(' | '[') => depth += 1,
            (None, ')' | ']') => depth = depth.saturating_sub(1),
            (None, c) if depth == 0 && separator(c) => {
                parts.push(&css[start..index]);
                start = index + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&css[start..]);
    parts
}

/// Select-one, select-all and regex matching against a parsed document.
pub trait Selector {
    fn root(&self) -> NodeHandle;

    fn select_all(&self, scope: NodeHandle, query: &Query) -> Result<Vec<Match>, SelectorError>;

    fn select_one(&self, scope: NodeHandle, query: &Query) -> Result<Option<Match>, SelectorError> {
        Ok(self.select_all(scope, query)?.into_iter().next())
    }

    fn match_regex(&self, scope: NodeHandle, pattern: &Regex) -> Vec<String>;

    /// Serialized markup of a node, empty for handles not in this document.
    fn node_html(&self, node: NodeHandle) -> String;
}

pub struct HtmlDocument<'s> {
    html: Html,
    source: &'s str,
}

impl<'s> HtmlDocument<'s> {
    pub fn parse(source: &'s str) -> Self {
        Self {
            html: Html::parse_document(source),
            source,
        }
    }

    fn element(&self, node: NodeHandle) -> Option<ElementRef<'_>> {
        self.html.tree.get(node.0).and_then(ElementRef::wrap)
    }

    fn select_css(&self, scope: NodeHandle, selector: &scraper::Selector, pseudo: &Pseudo) -> Vec<Match> {
        let Some(scope) = self.element(scope) else {
            return Vec::new();
        };
        let elements = std::iter::once(scope)
            .filter(|element| selector.matches_with_scope(element, Some(scope)))
            .chain(scope.select(selector));

        let mut matches = Vec::new();
        for element in elements {
            match pseudo {
                Pseudo::Node => matches.push(Match::Node(NodeHandle(element.id()))),
                Pseudo::Text => matches.extend(
                    element
                        .children()
                        .filter_map(|child| child.value().as_text())
                        .map(|text| Match::Text(text.to_string())),
                ),
                Pseudo::Attr(name) => {
                    if let Some(value) = element.value().attr(name) {
                        matches.push(Match::Text(value.to_owned()));
                    }
                }
            }
        }
        matches
    }
}

impl Selector for HtmlDocument<'_> {
    fn root(&self) -> NodeHandle {
        NodeHandle(self.html.root_element().id())
    }

    fn select_all(&self, scope: NodeHandle, query: &Query) -> Result<Vec<Match>, SelectorError> {
        match &query.compiled {
            Compiled::Css { selector, pseudo } => Ok(self.select_css(scope, selector, pseudo)),
            Compiled::Regex(regex) => Ok(self
                .match_regex(scope, regex)
                .into_iter()
                .map(Match::Text)
                .collect()),
            Compiled::Path => Err(SelectorError::Unsupported {
                kind: SelectorKind::Path,
                expression: query.expression.clone(),
            }),
        }
    }

    fn match_regex(&self, scope: NodeHandle, pattern: &Regex) -> Vec<String> {
        if scope == self.root() {
            extract_regex(pattern, self.source)
        } else {
            extract_regex(pattern, &self.node_html(scope))
        }
    }

    fn node_html(&self, node: NodeHandle) -> String {
        self.element(node)
            .map(|element| element.html())
            .unwrap_or_default()
    }
}

/// Capture groups when the pattern has any, whole matches otherwise.
fn extract_regex(pattern: &Regex, haystack: &str) -> Vec<String> {
    if pattern.captures_len() > 1 {
        pattern
            .captures_iter(haystack)
            .flat_map(|captures| {
                captures
                    .iter()
                    .skip(1)
                    .flatten()
                    .map(|group| group.as_str().to_owned())
                    .collect::<Vec<_>>()
            })
            .collect()
    } else {
        pattern
            .find_iter(haystack)
            .map(|found| found.as_str().to_owned())
            .collect()
    }
}
