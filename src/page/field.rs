use std::{fmt, sync::Arc};

use serde_json::Value;

use super::{
    html::{CompileError, Query, SelectorKind},
    model::Model,
    Match, Page,
};
use crate::error::SchemaError;

/// Turns raw matches into a field value.
pub type CleanFn = Arc<dyn Fn(&Page<'_>, Vec<Match>) -> Result<Value, CleanError> + Send + Sync>;

/// Outcome of a clean function other than a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanError {
    /// Drop the record this field belongs to.
    Ignore,
    /// Abort extraction of the whole page.
    Failed(String),
}

impl CleanError {
    pub fn failed(message: impl fmt::Display) -> Self {
        CleanError::Failed(message.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Single,
    Many,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataAttr {
    SourceUrl,
    SiteDomain,
    RawHtml,
}

#[derive(Debug, Clone)]
enum Source {
    Query { kind: SelectorKind, expression: String },
    Metadata(MetadataAttr),
    Scope,
}

/// Declaration of one output field of a [`Model`].
///
/// ```rust,ignore
/// Field::css("price", ".price::text").clean(clean::money)
/// Field::css("rows", "table tr").many().model(row_model)
/// ```
#[derive(Clone)]
pub struct Field {
    name: String,
    source: Source,
    cardinality: Cardinality,
    sub_model: Option<Arc<Model>>,
    clean: Option<CleanFn>,
    excluded: bool,
}

impl Field {
    fn new(name: impl Into<String>, source: Source) -> Self {
        Self {
            name: name.into(),
            source,
            cardinality: Cardinality::Single,
            sub_model: None,
            clean: None,
            excluded: false,
        }
    }

    pub fn css(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::new(
            name,
            Source::Query {
                kind: SelectorKind::Css,
                expression: expression.into(),
            },
        )
    }

    pub fn path(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::new(
            name,
            Source::Query {
                kind: SelectorKind::Path,
                expression: expression.into(),
            },
        )
    }

    pub fn regex(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(
            name,
            Source::Query {
                kind: SelectorKind::Regex,
                expression: pattern.into(),
            },
        )
    }

    /// Reads an attribute of the page metadata instead of the document.
    pub fn metadata(name: impl Into<String>, attr: MetadataAttr) -> Self {
        Self::new(name, Source::Metadata(attr))
    }

    /// Hands the bound node itself to the clean function.
    pub fn scope(name: impl Into<String>) -> Self {
        Self::new(name, Source::Scope)
    }

    pub fn many(mut self) -> Self {
        self.cardinality = Cardinality::Many;
        self
    }

    pub fn model(mut self, sub_model: Arc<Model>) -> Self {
        self.sub_model = Some(sub_model);
        self
    }

    pub fn clean<F>(mut self, clean: F) -> Self
    where
        F: Fn(&Page<'_>, Vec<Match>) -> Result<Value, CleanError> + Send + Sync + 'static,
    {
        self.clean = Some(Arc::new(clean));
        self
    }

    /// Evaluated on demand but left out of the extracted record.
    pub fn excluded(mut self) -> Self {
        self.excluded = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn resolve(self, model: &str) -> Result<FieldRule, SchemaError> {
        if self.sub_model.is_some() && self.clean.is_some() {
            return Err(SchemaError::CleanWithSubModel {
                model: model.to_owned(),
                field: self.name,
            });
        }
        let source = match self.source {
            Source::Query { kind, expression } => {
                let query = Query::compile(kind, &expression).map_err(|err| match err {
                    CompileError::Css(message) => SchemaError::InvalidCss {
                        model: model.to_owned(),
                        expression: expression.clone(),
                        message,
                    },
                    CompileError::Regex(source) => SchemaError::InvalidRegex {
                        model: model.to_owned(),
                        expression: expression.clone(),
                        source,
                    },
                })?;
                RuleSource::Query(query)
            }
            Source::Metadata(attr) => RuleSource::Metadata(attr),
            Source::Scope => RuleSource::Scope,
        };
        Ok(FieldRule {
            name: self.name,
            source,
            cardinality: self.cardinality,
            sub_model: self.sub_model,
            clean: self.clean,
            excluded: self.excluded,
        })
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("cardinality", &self.cardinality)
            .field("sub_model", &self.sub_model.as_ref().map(|model| model.name()))
            .field("clean", &self.clean.is_some())
            .field("excluded", &self.excluded)
            .finish()
    }
}

pub(crate) enum RuleSource {
    Query(Query),
    Metadata(MetadataAttr),
    Scope,
}

/// A [`Field`] with its query compiled, owned by a built [`Model`].
pub(crate) struct FieldRule {
    pub(crate) name: String,
    pub(crate) source: RuleSource,
    pub(crate) cardinality: Cardinality,
    pub(crate) sub_model: Option<Arc<Model>>,
    pub(crate) clean: Option<CleanFn>,
    pub(crate) excluded: bool,
}
