//! Search layer facade.
//!
//! - **[`query`]**: smart-query parsing (free text plus `property:value` tokens).
//! - **[`text_index`]**: the inverted tf-idf index and its chunk serialization.
//! - **[`engine`]**: build/rebuild lifecycle, cache gating, and paginated search.
//! - **[`facets`]**: facet aggregation and filter-selection state.

pub mod engine;
pub mod facets;
pub mod query;
pub mod text_index;
