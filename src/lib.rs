//! Entity search and indexing engine for compendium collections.
//!
//! The engine maintains a full-text inverted index over a dynamically typed
//! entity collection, persists index fragments to a local SQLite cache gated
//! by a content fingerprint, interprets a compact query mini-language mixing
//! free text with typed property filters, and executes faceted
//! filter/sort/paginate queries against the result.
//!
//! ```no_run
//! use compendium_search::model::types::{ClassConfig, SearchCriteria};
//! use compendium_search::schema::SchemaRegistry;
//! use compendium_search::search::engine::SearchEngine;
//!
//! let registry = SchemaRegistry::new(vec![ClassConfig {
//!     id: "monster".into(),
//!     name: "Monster".into(),
//!     properties: vec![],
//! }]);
//! let engine = SearchEngine::new(registry);
//! engine.update_entities(vec![]);
//!
//! let criteria = SearchCriteria {
//!     text: Some("goblin level:5-10 role:boss".into()),
//!     ..Default::default()
//! };
//! let page = engine.search_paginated(&criteria, 1, 20);
//! println!("{} of {} results", page.results.len(), page.total);
//! ```

pub mod config;
pub mod model;
pub mod schema;
pub mod search;
pub mod storage;

pub use model::types::{
    Entity, NumberFilter, PaginatedSearchResult, ParsedSearchQuery, PropertyConfig,
    PropertyDatatype, PropertyFilter, PropertyValue, SearchCriteria, SearchHit, SortDirection,
    SortKey,
};
pub use schema::SchemaRegistry;
pub use search::engine::SearchEngine;
pub use search::facets::{Facet, FacetSelections, FacetValue, aggregate_facets};
pub use storage::IndexCache;
pub use storage::sqlite::SqliteCache;
