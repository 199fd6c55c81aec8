use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    fmt,
    ops::Deref,
    sync::Arc,
};

use serde_json::Value;

use super::{
    field::{Cardinality, CleanError, Field, FieldRule, RuleSource},
    html::{HtmlDocument, Match, NodeHandle, Selector},
    Extracted, PageMetadata, Record,
};
use crate::error::{ExtractError, SchemaError};

/// A named, ordered set of fields producing a flat record.
pub struct Model {
    name: String,
    fields: Vec<FieldRule>,
}

impl Model {
    pub fn builder(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the fields that end up in the extracted record, in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|field| !field.excluded)
            .map(|field| field.name.as_str())
    }

    fn rule(&self, name: &str) -> Option<&FieldRule> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Binds the model to the root of a document.
    pub fn bind<'d>(&'d self, document: &'d dyn Selector, metadata: &'d PageMetadata) -> Page<'d> {
        Page::new(self, document, document.root(), metadata)
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("fields", &self.fields.iter().map(|field| &field.name).collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug)]
pub struct ModelBuilder {
    name: String,
    fields: Vec<Field>,
}

impl ModelBuilder {
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Compiles every field query; this is where schema mistakes surface.
    pub fn build(self) -> Result<Arc<Model>, SchemaError> {
        self.build_model().map(Arc::new)
    }

    fn build_model(self) -> Result<Model, SchemaError> {
        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(self.fields.len());
        for field in self.fields {
            if !seen.insert(field.name().to_owned()) {
                return Err(SchemaError::DuplicateField {
                    model: self.name,
                    field: field.name().to_owned(),
                });
            }
            fields.push(field.resolve(&self.name)?);
        }
        Ok(Model {
            name: self.name,
            fields,
        })
    }
}

/// A model bound to one node of one document and the page metadata.
pub struct Page<'d> {
    model: &'d Model,
    document: &'d dyn Selector,
    scope: NodeHandle,
    metadata: &'d PageMetadata,
    cache: RefCell<HashMap<String, Extracted<Value>>>,
}

impl<'d> Page<'d> {
    pub fn new(
        model: &'d Model,
        document: &'d dyn Selector,
        scope: NodeHandle,
        metadata: &'d PageMetadata,
    ) -> Self {
        Self {
            model,
            document,
            scope,
            metadata,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn model(&self) -> &'d Model {
        self.model
    }

    pub fn document(&self) -> &'d dyn Selector {
        self.document
    }

    pub fn scope(&self) -> NodeHandle {
        self.scope
    }

    pub fn metadata(&self) -> &'d PageMetadata {
        self.metadata
    }

    /// String form of a raw match; nodes render as their markup.
    pub fn text(&self, found: &Match) -> String {
        match found {
            Match::Text(text) => text.clone(),
            Match::Node(node) => self.document.node_html(*node),
        }
    }

    /// Value of one field, computed on first access.
    pub fn get(&self, name: &str) -> Result<Extracted<Value>, ExtractError> {
        if let Some(cached) = self.cache.borrow().get(name) {
            return Ok(cached.clone());
        }
        let rule = self.model.rule(name).ok_or_else(|| ExtractError::UnknownField {
            model: self.model.name.clone(),
            field: name.to_owned(),
        })?;
        let value = self.evaluate(rule)?;
        self.cache
            .borrow_mut()
            .insert(name.to_owned(), value.clone());
        Ok(value)
    }

    /// All non-excluded fields as one record, or `Skipped` when any of them
    /// raised the ignore signal.
    pub fn extract(&self) -> Result<Extracted<Record>, ExtractError> {
        let mut record = Record::new();
        for name in self.model.field_names() {
            match self.get(name)? {
                Extracted::Value(value) => {
                    record.insert(name.to_owned(), value);
                }
                Extracted::Skipped => return Ok(Extracted::Skipped),
            }
        }
        Ok(Extracted::Value(record))
    }

    fn evaluate(&self, rule: &'d FieldRule) -> Result<Extracted<Value>, ExtractError> {
        let Some(sub_model) = rule.sub_model.as_deref() else {
            let matches = self.raw_matches(rule)?;
            return match &rule.clean {
                Some(clean) => match clean(self, matches) {
                    Ok(value) => Ok(Extracted::Value(value)),
                    Err(CleanError::Ignore) => Ok(Extracted::Skipped),
                    Err(CleanError::Failed(message)) => Err(ExtractError::Clean {
                        model: self.model.name.clone(),
                        field: rule.name.clone(),
                        message,
                    }),
                },
                None => Ok(Extracted::Value(self.pass_through(rule.cardinality, matches))),
            };
        };

        let value = match rule.cardinality {
            Cardinality::Single => match self.first_match(rule)? {
                None => Value::Null,
                Some(found) => match self.child(rule, sub_model, found)?.extract()? {
                    Extracted::Value(record) => Value::Object(record),
                    Extracted::Skipped => Value::Null,
                },
            },
            Cardinality::Many => {
                let mut records = Vec::new();
                for found in self.raw_matches(rule)? {
                    if let Extracted::Value(record) = self.child(rule, sub_model, found)?.extract()? {
                        records.push(Value::Object(record));
                    }
                }
                Value::Array(records)
            }
        };
        Ok(Extracted::Value(value))
    }

    fn raw_matches(&self, rule: &FieldRule) -> Result<Vec<Match>, ExtractError> {
        match &rule.source {
            RuleSource::Query(query) => match query.regex() {
                Some(pattern) => Ok(self
                    .document
                    .match_regex(self.scope, pattern)
                    .into_iter()
                    .map(Match::Text)
                    .collect()),
                None => self
                    .document
                    .select_all(self.scope, query)
                    .map_err(|source| self.selector_error(rule, source)),
            },
            RuleSource::Metadata(attr) => Ok(vec![Match::Text(self.metadata.attr(*attr).to_owned())]),
            RuleSource::Scope => Ok(vec![Match::Node(self.scope)]),
        }
    }

    fn first_match(&self, rule: &FieldRule) -> Result<Option<Match>, ExtractError> {
        match &rule.source {
            RuleSource::Query(query) if query.regex().is_none() => self
                .document
                .select_one(self.scope, query)
                .map_err(|source| self.selector_error(rule, source)),
            _ => Ok(self.raw_matches(rule)?.into_iter().next()),
        }
    }

    fn selector_error(&self, rule: &FieldRule, source: crate::error::SelectorError) -> ExtractError {
        ExtractError::Selector {
            model: self.model.name.clone(),
            field: rule.name.clone(),
            source,
        }
    }

    fn child(&self, rule: &FieldRule, sub_model: &'d Model, found: Match) -> Result<Page<'d>, ExtractError> {
        match found {
            Match::Node(node) => Ok(Page::new(sub_model, self.document, node, self.metadata)),
            Match::Text(_) => Err(ExtractError::NotANode {
                model: self.model.name.clone(),
                field: rule.name.clone(),
                sub_model: sub_model.name.clone(),
            }),
        }
    }

    fn pass_through(&self, cardinality: Cardinality, matches: Vec<Match>) -> Value {
        match cardinality {
            Cardinality::Single => matches
                .first()
                .map(|found| Value::String(self.text(found)))
                .unwrap_or(Value::Null),
            Cardinality::Many => Value::Array(
                matches
                    .iter()
                    .map(|found| Value::String(self.text(found)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Debug for Page<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("model", &self.model.name)
            .field("scope", &self.scope)
            .field("source_url", &self.metadata.source_url())
            .finish()
    }
}

pub type Validator = Arc<dyn Fn(&Page<'_>) -> Result<bool, ExtractError> + Send + Sync>;
pub type UrlModifier = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// A model plus the roles that drive further crawling.
pub struct PageModel {
    model: Arc<Model>,
    catalogue_links: Option<String>,
    detail_links: Option<String>,
    items: Option<String>,
    validator: Option<Validator>,
    url_modifier: Option<UrlModifier>,
}

impl PageModel {
    pub fn builder(name: impl Into<String>) -> PageModelBuilder {
        PageModelBuilder {
            model: Model::builder(name),
            catalogue_links: None,
            detail_links: None,
            items: None,
            validator: None,
            url_modifier: None,
        }
    }

    pub fn name(&self) -> &str {
        self.model.name()
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Normalizes a URL before it is checked against the dedup set.
    pub fn modify_url(&self, url: &str) -> String {
        match &self.url_modifier {
            Some(modifier) => modifier(url),
            None => url.to_owned(),
        }
    }

    pub fn bind<'d>(&'d self, document: &'d dyn Selector, metadata: &'d PageMetadata) -> PageInstance<'d> {
        PageInstance {
            page: self.model.bind(document, metadata),
            roles: self,
        }
    }

    /// Parses the fetched page and runs everything the spider needs from it.
    pub fn parse(&self, metadata: &PageMetadata) -> Result<PageOutcome, ExtractError> {
        let document = HtmlDocument::parse(metadata.raw_html());
        let page = self.bind(&document, metadata);
        if !page.is_valid_response()? {
            return Ok(PageOutcome::Invalid);
        }
        Ok(PageOutcome::Valid(PageExtraction {
            catalogue_links: page.catalogue_links()?,
            detail_links: page.detail_links()?,
            items: page.items()?,
        }))
    }
}

impl fmt::Debug for PageModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageModel")
            .field("model", &self.model)
            .field("catalogue_links", &self.catalogue_links)
            .field("detail_links", &self.detail_links)
            .field("items", &self.items)
            .finish()
    }
}

pub struct PageModelBuilder {
    model: ModelBuilder,
    catalogue_links: Option<String>,
    detail_links: Option<String>,
    items: Option<String>,
    validator: Option<Validator>,
    url_modifier: Option<UrlModifier>,
}

impl PageModelBuilder {
    pub fn field(mut self, field: Field) -> Self {
        self.model = self.model.field(field);
        self
    }

    /// Field whose value lists links to crawl with the catalogue model.
    pub fn catalogue_links(mut self, field: Field) -> Self {
        self.catalogue_links = Some(field.name().to_owned());
        self.field(field)
    }

    /// Field whose value lists links to crawl with the detail model.
    pub fn detail_links(mut self, field: Field) -> Self {
        self.detail_links = Some(field.name().to_owned());
        self.field(field)
    }

    /// Field whose records are emitted as extracted items.
    pub fn items(mut self, field: Field) -> Self {
        self.items = Some(field.name().to_owned());
        self.field(field)
    }

    /// Predicate rejecting malformed pages before extraction.
    pub fn validate<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Page<'_>) -> Result<bool, ExtractError> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn url_modifier<F>(mut self, modifier: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.url_modifier = Some(Arc::new(modifier));
        self
    }

    pub fn build(self) -> Result<Arc<PageModel>, SchemaError> {
        Ok(Arc::new(PageModel {
            model: self.model.build()?,
            catalogue_links: self.catalogue_links,
            detail_links: self.detail_links,
            items: self.items,
            validator: self.validator,
            url_modifier: self.url_modifier,
        }))
    }
}

/// A [`Page`] whose model carries crawl roles.
#[derive(Debug)]
pub struct PageInstance<'d> {
    page: Page<'d>,
    roles: &'d PageModel,
}

impl<'d> PageInstance<'d> {
    pub fn is_valid_response(&self) -> Result<bool, ExtractError> {
        match &self.roles.validator {
            Some(validator) => validator(&self.page),
            None => Ok(true),
        }
    }

    pub fn catalogue_links(&self) -> Result<Vec<String>, ExtractError> {
        self.links(self.roles.catalogue_links.as_deref())
    }

    pub fn detail_links(&self) -> Result<Vec<String>, ExtractError> {
        self.links(self.roles.detail_links.as_deref())
    }

    /// Item records, without the ones that were skipped.
    pub fn items(&self) -> Result<Vec<Record>, ExtractError> {
        let Some(name) = self.roles.items.as_deref() else {
            return Ok(Vec::new());
        };
        Ok(match self.page.get(name)?.into_option() {
            Some(Value::Array(values)) => values
                .into_iter()
                .filter_map(|value| match value {
                    Value::Object(record) => Some(record),
                    _ => None,
                })
                .collect(),
            Some(Value::Object(record)) => vec![record],
            _ => Vec::new(),
        })
    }

    fn links(&self, role: Option<&str>) -> Result<Vec<String>, ExtractError> {
        let Some(name) = role else {
            return Ok(Vec::new());
        };
        Ok(match self.page.get(name)?.into_option() {
            Some(Value::Array(values)) => values
                .into_iter()
                .filter_map(|value| match value {
                    Value::String(url) => Some(url),
                    _ => None,
                })
                .collect(),
            Some(Value::String(url)) => vec![url],
            _ => Vec::new(),
        })
    }
}

impl<'d> Deref for PageInstance<'d> {
    type Target = Page<'d>;

    fn deref(&self) -> &Self::Target {
        &self.page
    }
}

/// What the spider gets out of one fetched page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    Invalid,
    Valid(PageExtraction),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageExtraction {
    pub catalogue_links: Vec<String>,
    pub detail_links: Vec<String>,
    pub items: Vec<Record>,
}
