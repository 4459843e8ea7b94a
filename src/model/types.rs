//! Core data model: entities, schema configs, queries, and results.
//!
//! Entities carry a dynamic bag of typed properties keyed by property id.
//! The bag is interpreted strictly through the schema registry's
//! [`PropertyConfig`]s, never by inspecting the value shape alone.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A typed value in an entity's property bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    String(String),
    Number(f64),
    Boolean(bool),
    StringArray(Vec<String>),
}

impl PropertyValue {
    /// Render the value the way it appears in searchable text and facet buckets.
    pub fn to_display_string(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Number(n) => format_number(*n),
            Self::Boolean(b) => b.to_string(),
            Self::StringArray(items) => items.join(" "),
        }
    }

    /// Coerce to a number, if the value carries one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Render a number without a trailing `.0` for whole values.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// One document in the compendium collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable unique id.
    pub id: String,
    /// Class id (entity type).
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Open bag of typed properties, keyed by property id.
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
    /// Millisecond timestamp of the last modification. Only used for cache
    /// invalidation, never for ranking.
    pub updated_at: i64,
}

impl Entity {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            name: name.into(),
            description: None,
            content: None,
            tags: Vec::new(),
            properties: BTreeMap::new(),
            updated_at: 0,
        }
    }

    pub fn with_property(
        mut self,
        id: impl Into<String>,
        value: PropertyValue,
    ) -> Self {
        self.properties.insert(id.into(), value);
        self
    }
}

/// Declared datatype of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyDatatype {
    String,
    Number,
    Boolean,
}

/// Schema for one property id on a class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyConfig {
    /// Property id, possibly namespaced with dots (e.g. `monster.level`).
    pub id: String,
    /// Display name shown in UI, matched during query resolution.
    pub name: String,
    pub datatype: PropertyDatatype,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Value may be an array of strings.
    #[serde(default)]
    pub is_multi: bool,
    /// Participates in facet aggregation and in the searchable text blob.
    #[serde(default)]
    pub is_facet: bool,
    #[serde(default)]
    pub is_sortable: bool,
}

impl PropertyConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, datatype: PropertyDatatype) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            datatype,
            aliases: Vec::new(),
            is_multi: false,
            is_facet: false,
            is_sortable: false,
        }
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn multi(mut self) -> Self {
        self.is_multi = true;
        self
    }

    pub fn facet(mut self) -> Self {
        self.is_facet = true;
        self
    }

    pub fn sortable(mut self) -> Self {
        self.is_sortable = true;
        self
    }

    /// The segment after the last `.` of the property id, lowercased.
    /// Used by the query parser's suffix and prefix resolution steps.
    pub fn id_suffix(&self) -> String {
        self.id
            .rsplit('.')
            .next()
            .unwrap_or(&self.id)
            .to_lowercase()
    }
}

/// Schema for one entity class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub properties: Vec<PropertyConfig>,
}

/// A string property filter: a single expected value or a comma-split list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyFilter {
    One(String),
    Many(Vec<String>),
}

impl PropertyFilter {
    pub fn expected_values(&self) -> Vec<&str> {
        match self {
            Self::One(v) => vec![v.as_str()],
            Self::Many(vs) => vs.iter().map(String::as_str).collect(),
        }
    }
}

/// Numeric filter. `exact` short-circuits the range check when it matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NumberFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<Vec<f64>>,
}

impl NumberFilter {
    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none() && self.exact.is_none()
    }

    /// Whether a candidate value passes this filter.
    ///
    /// Exact values win outright; otherwise the value must lie in the
    /// inclusive `[min, max]` range, with absent bounds unbounded.
    pub fn matches(&self, value: f64) -> bool {
        if value.is_nan() {
            return false;
        }
        if let Some(exact) = &self.exact {
            if exact.iter().any(|e| (e - value).abs() < 1e-9) {
                return true;
            }
            // An exact set that misses still allows a range match only if a
            // range was actually given.
            if self.min.is_none() && self.max.is_none() {
                return false;
            }
        }
        if let Some(min) = self.min {
            if value < min {
                return false;
            }
        }
        if let Some(max) = self.max {
            if value > max {
                return false;
            }
        }
        true
    }
}

/// Output of the smart-query parser.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedSearchQuery {
    /// Residual free text, whitespace-normalized.
    pub text: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyFilter>,
    #[serde(default)]
    pub number_filters: BTreeMap<String, NumberFilter>,
}

impl ParsedSearchQuery {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.properties.is_empty() && self.number_filters.is_empty()
    }
}

/// What to sort search results by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    Name,
    Score,
    /// Sort by the value of a property id.
    #[serde(untagged)]
    Property(String),
}

impl Default for SortKey {
    fn default() -> Self {
        Self::Name
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Full search request as produced by filter UI plus the search box.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchCriteria {
    /// Raw search-box text; may itself contain smart-query filter tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Restrict to one entity class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyFilter>,
    #[serde(default)]
    pub number_filters: BTreeMap<String, NumberFilter>,
    #[serde(default)]
    pub sort_by: Option<SortKey>,
    #[serde(default)]
    pub sort_direction: SortDirection,
}

/// One search result: the entity plus its relevance score, when ranked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub entity: Entity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedSearchResult {
    pub results: Vec<SearchHit>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}
