//! Search engine orchestration.
//!
//! [`SearchEngine`] owns the entity snapshot, the inverted index, and the
//! build state machine. Index builds are gated by a content fingerprint over
//! `(id, updated_at)` pairs: an unchanged collection never rebuilds, a
//! matching cached fingerprint restores the index from persisted chunks, and
//! everything else builds from scratch and re-persists.
//!
//! The engine favors availability over ranking correctness: every cache
//! failure is logged and degraded to a miss, and `search_paginated` always
//! returns a result set — unranked when the index is not ready.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};

use anyhow::{Context, Result};
use itertools::Itertools;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::model::types::{
    Entity, NumberFilter, PaginatedSearchResult, ParsedSearchQuery, PropertyDatatype,
    PropertyFilter, PropertyValue, SearchCriteria, SearchHit, SortDirection, SortKey,
};
use crate::schema::{PropertyResolver, SchemaRegistry};
use crate::search::facets::natural_cmp;
use crate::search::query::parse_query;
use crate::search::text_index::TextIndex;
use crate::storage::IndexCache;
use crate::storage::sqlite::SqliteCache;

#[derive(Default)]
struct Snapshot {
    entities: Vec<Entity>,
    by_id: HashMap<String, usize>,
}

impl Snapshot {
    fn new(entities: Vec<Entity>) -> Self {
        let by_id = entities
            .iter()
            .enumerate()
            .map(|(idx, e)| (e.id.clone(), idx))
            .collect();
        Self { entities, by_id }
    }

    fn get(&self, id: &str) -> Option<&Entity> {
        self.by_id.get(id).map(|&idx| &self.entities[idx])
    }
}

/// Entity search engine: index lifecycle plus query execution.
pub struct SearchEngine {
    registry: SchemaRegistry,
    cache: Option<Box<dyn IndexCache>>,
    entities: RwLock<Snapshot>,
    index: RwLock<Option<TextIndex>>,
    committed_hash: Mutex<Option<String>>,
    ready: AtomicBool,
    indexing: AtomicBool,
    default_page_size: usize,
}

/// Clears the `indexing` flag on every exit path of a build.
struct IndexingGuard<'a>(&'a AtomicBool);

impl Drop for IndexingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, SeqCst);
    }
}

impl SearchEngine {
    pub fn new(registry: SchemaRegistry) -> Self {
        Self::build(registry, None)
    }

    pub fn with_cache(registry: SchemaRegistry, cache: Box<dyn IndexCache>) -> Self {
        Self::build(registry, Some(cache))
    }

    /// Wire an engine from a loaded [`EngineConfig`]: the cache opens at the
    /// configured path, or persistence is skipped when none is set.
    pub fn from_config(registry: SchemaRegistry, config: &EngineConfig) -> Result<Self> {
        let mut engine = match &config.cache_path {
            Some(path) => {
                let cache = SqliteCache::open(path)
                    .with_context(|| format!("opening index cache at {}", path.display()))?;
                Self::with_cache(registry, Box::new(cache))
            }
            None => Self::new(registry),
        };
        engine.default_page_size = config.default_page_size.max(1);
        Ok(engine)
    }

    fn build(registry: SchemaRegistry, cache: Option<Box<dyn IndexCache>>) -> Self {
        Self {
            registry,
            cache,
            entities: RwLock::new(Snapshot::default()),
            index: RwLock::new(None),
            committed_hash: Mutex::new(None),
            ready: AtomicBool::new(false),
            indexing: AtomicBool::new(false),
            default_page_size: EngineConfig::default().default_page_size,
        }
    }

    pub fn default_page_size(&self) -> usize {
        self.default_page_size
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn is_index_ready(&self) -> bool {
        self.ready.load(SeqCst)
    }

    pub fn is_indexing(&self) -> bool {
        self.indexing.load(SeqCst)
    }

    /// Replace the entity snapshot and refresh the index. The hash gate in
    /// [`Self::build_index`] makes this cheap when nothing changed.
    pub fn update_entities(&self, entities: Vec<Entity>) {
        *self.entities.write() = Snapshot::new(entities);
        self.build_index();
    }

    /// Build or refresh the index for the current snapshot.
    ///
    /// No-ops when the content hash is unchanged and the index is ready.
    /// A build requested while another is in flight is dropped, not queued.
    pub fn build_index(&self) {
        if self
            .indexing
            .compare_exchange(false, true, SeqCst, SeqCst)
            .is_err()
        {
            debug!("index build already in flight, dropping request");
            return;
        }
        let _guard = IndexingGuard(&self.indexing);

        let snapshot = self.entities.read();
        let hash = content_hash(&snapshot.entities);

        if self.committed_hash.lock().as_deref() == Some(hash.as_str()) && self.ready.load(SeqCst) {
            debug!(%hash, "content unchanged, skipping rebuild");
            return;
        }

        if let Some(index) = self.try_restore_from_cache(&hash) {
            info!(docs = index.doc_count(), %hash, "index restored from cache");
            self.commit(index, hash);
            return;
        }

        let mut index = TextIndex::new();
        for entity in &snapshot.entities {
            index.insert(&entity.id, &self.searchable_blob(entity));
        }

        self.persist(&index, &hash);
        info!(docs = index.doc_count(), %hash, "index built");
        self.commit(index, hash);
    }

    /// Force a cache-busting full rebuild, regardless of the content hash.
    ///
    /// The previous index keeps serving searches until the new one commits;
    /// clearing the committed hash is enough to defeat the no-op gate.
    pub fn rebuild_index(&self) {
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.clear() {
                warn!("failed to clear index cache: {err:#}");
            }
        }
        *self.committed_hash.lock() = None;
        self.build_index();
    }

    fn commit(&self, index: TextIndex, hash: String) {
        *self.index.write() = Some(index);
        *self.committed_hash.lock() = Some(hash);
        self.ready.store(true, SeqCst);
    }

    /// Restore the index from persisted chunks when the cached hash matches.
    /// Every failure along the way degrades to a miss.
    fn try_restore_from_cache(&self, hash: &str) -> Option<TextIndex> {
        let cache = self.cache.as_ref()?;

        let stored = match cache.load_hash() {
            Ok(stored) => stored,
            Err(err) => {
                warn!("failed to read cached index hash: {err:#}");
                return None;
            }
        };
        if stored.as_deref() != Some(hash) {
            return None;
        }

        let chunks = match cache.load_chunks() {
            Ok(chunks) => chunks,
            Err(err) => {
                warn!("failed to load index chunks: {err:#}");
                return None;
            }
        };

        let mut index = TextIndex::new();
        for (key, value) in &chunks {
            if let Err(err) = index.import_chunk(key, value) {
                // Best effort: a bad chunk is absent, not fatal.
                warn!(%key, "skipping unreadable index chunk: {err:#}");
            }
        }
        Some(index)
    }

    /// Persist a freshly built index. Failures are logged and swallowed;
    /// the engine keeps serving from memory.
    fn persist(&self, index: &TextIndex, hash: &str) {
        let Some(cache) = &self.cache else {
            return;
        };

        let chunks = match index.export_chunks() {
            Ok(chunks) => chunks,
            Err(err) => {
                warn!("failed to export index chunks: {err:#}");
                return;
            }
        };
        if let Err(err) = cache.store_chunks(&chunks) {
            warn!("failed to persist index chunks: {err:#}");
            return;
        }
        if let Err(err) = cache.store_hash(hash) {
            warn!("failed to persist content hash: {err:#}");
        }
    }

    /// The text blob indexed for one entity: name, description, content,
    /// tags, and the values of every facet-flagged property of its class.
    fn searchable_blob(&self, entity: &Entity) -> String {
        let mut parts: Vec<&str> = vec![&entity.name];
        if let Some(description) = &entity.description {
            parts.push(description);
        }
        if let Some(content) = &entity.content {
            parts.push(content);
        }
        for tag in &entity.tags {
            parts.push(tag);
        }

        let mut blob = parts.join(" ");
        for config in self.registry.class_properties(&entity.kind) {
            if !config.is_facet {
                continue;
            }
            if let Some(value) = entity.properties.get(&config.id) {
                blob.push(' ');
                blob.push_str(&value.to_display_string());
            }
        }
        blob
    }

    /// Parse a smart query against the property configs of `kind`, or all
    /// known configs when no kind is given. Exposed for query preview.
    pub fn parse(&self, query: &str, kind: Option<&str>) -> ParsedSearchQuery {
        match kind {
            Some(kind) => {
                let resolver = PropertyResolver::new(self.registry.class_properties(kind));
                parse_query(query, &resolver)
            }
            None => {
                let resolver = PropertyResolver::new(self.registry.all_properties());
                parse_query(query, &resolver)
            }
        }
    }

    /// Execute a faceted search and return one page of results.
    ///
    /// Smart-query tokens inside `criteria.text` are extracted first;
    /// explicit criteria filters win over parsed ones on key collision.
    /// A `page_size` of zero falls back to the configured default.
    /// Never fails: with no ready index the full snapshot is scanned
    /// unranked.
    pub fn search_paginated(
        &self,
        criteria: &SearchCriteria,
        page: usize,
        page_size: usize,
    ) -> PaginatedSearchResult {
        let page_size = if page_size == 0 {
            self.default_page_size
        } else {
            page_size
        };
        let parsed = self.parse(criteria.text.as_deref().unwrap_or(""), criteria.kind.as_deref());

        let mut properties = parsed.properties;
        properties.extend(criteria.properties.clone());
        let mut number_filters = parsed.number_filters;
        number_filters.extend(criteria.number_filters.clone());

        let snapshot = self.entities.read();
        let has_text = !parsed.text.is_empty();

        // Candidate list: ranked ids from the index, or the whole snapshot.
        let mut hits: Vec<SearchHit> = if has_text && self.is_index_ready() {
            let index = self.index.read();
            match index.as_ref() {
                Some(index) => index
                    .search(&parsed.text)
                    .into_iter()
                    .filter_map(|(id, score)| {
                        // Stale index entries may reference removed entities.
                        snapshot.get(&id).map(|entity| SearchHit {
                            entity: entity.clone(),
                            score: Some(score),
                        })
                    })
                    .collect(),
                None => Vec::new(),
            }
        } else {
            snapshot
                .entities
                .iter()
                .map(|entity| SearchHit {
                    entity: entity.clone(),
                    score: None,
                })
                .collect()
        };

        if let Some(kind) = &criteria.kind {
            hits.retain(|hit| &hit.entity.kind == kind);
        }

        hits.retain(|hit| {
            self.matches_properties(&hit.entity, criteria.kind.as_deref(), &properties)
                && matches_number_filters(&hit.entity, &number_filters)
        });

        self.sort_hits(&mut hits, criteria, has_text);
        paginate(hits, page, page_size)
    }

    fn matches_properties(
        &self,
        entity: &Entity,
        kind: Option<&str>,
        properties: &BTreeMap<String, PropertyFilter>,
    ) -> bool {
        for (property_id, filter) in properties {
            let class_id = kind.unwrap_or(&entity.kind);
            // Unknown keys and absent values fail closed.
            let Some(config) = self.registry.property(class_id, property_id) else {
                return false;
            };
            let Some(value) = entity.properties.get(property_id) else {
                return false;
            };

            let expected = filter.expected_values();
            let matched = match value {
                PropertyValue::StringArray(items) if config.is_multi => expected
                    .iter()
                    .all(|exp| items.iter().any(|item| strings_overlap(item, exp))),
                scalar => expected.iter().any(|exp| scalar_matches(scalar, exp)),
            };
            if !matched {
                return false;
            }
        }
        true
    }

    fn sort_hits(&self, hits: &mut [SearchHit], criteria: &SearchCriteria, has_text: bool) {
        let default_key = if has_text { SortKey::Score } else { SortKey::Name };
        let sort_by = criteria.sort_by.clone().unwrap_or(default_key);
        let direction = criteria.sort_direction;

        match sort_by {
            SortKey::Score => {
                // Relevance stays descending regardless of direction; with no
                // per-result score there is nothing meaningful to invert.
                hits.sort_by(|a, b| {
                    let sa = a.score.unwrap_or(f64::NEG_INFINITY);
                    let sb = b.score.unwrap_or(f64::NEG_INFINITY);
                    sb.partial_cmp(&sa).unwrap_or(Ordering::Equal)
                });
            }
            SortKey::Name => sort_by_name(hits, direction),
            SortKey::Property(property_id) => {
                let Some(datatype) = self.sort_datatype(criteria.kind.as_deref(), &property_id)
                else {
                    // Unresolvable sort property falls back to name order.
                    sort_by_name(hits, direction);
                    return;
                };
                hits.sort_by(|a, b| {
                    let va = sort_value(&a.entity, &property_id, datatype);
                    let vb = sort_value(&b.entity, &property_id, datatype);
                    compare_sort_values(va, vb, direction)
                });
            }
        }
    }

    /// Datatype of a sort property: looked up on the explicit kind, or on
    /// any class carrying the property when no kind is active.
    fn sort_datatype(&self, kind: Option<&str>, property_id: &str) -> Option<PropertyDatatype> {
        match kind {
            Some(kind) => self.registry.property(kind, property_id).map(|c| c.datatype),
            None => self
                .registry
                .all_properties()
                .iter()
                .find(|c| c.id == property_id)
                .map(|c| c.datatype),
        }
    }
}

/// Stable content fingerprint over `(id, updated_at)` pairs.
pub fn content_hash(entities: &[Entity]) -> String {
    let joined = entities
        .iter()
        .map(|e| format!("{}:{}", e.id, e.updated_at))
        .sorted()
        .join("|");
    format!("{:08x}", crc32fast::hash(joined.as_bytes()))
}

/// Case-insensitive bidirectional substring containment.
fn strings_overlap(a: &str, b: &str) -> bool {
    let (a, b) = (a.to_lowercase(), b.to_lowercase());
    a.contains(&b) || b.contains(&a)
}

/// Match one scalar property value against one expected filter string.
/// Strings compare by bidirectional containment, everything else strictly.
fn scalar_matches(value: &PropertyValue, expected: &str) -> bool {
    match value {
        PropertyValue::String(s) => strings_overlap(s, expected),
        PropertyValue::Number(n) => expected
            .trim()
            .parse::<f64>()
            .map(|e| (e - n).abs() < 1e-9)
            .unwrap_or(false),
        PropertyValue::Boolean(b) => expected
            .trim()
            .to_lowercase()
            .parse::<bool>()
            .map(|e| e == *b)
            .unwrap_or(false),
        // Arrays on non-multi configs still match element-wise.
        PropertyValue::StringArray(items) => items.iter().any(|item| strings_overlap(item, expected)),
    }
}

fn matches_number_filters(
    entity: &Entity,
    filters: &BTreeMap<String, NumberFilter>,
) -> bool {
    for (property_id, filter) in filters {
        let value = entity
            .properties
            .get(property_id)
            .and_then(coerce_number);
        match value {
            Some(n) if filter.matches(n) => {}
            _ => return false,
        }
    }
    true
}

fn coerce_number(value: &PropertyValue) -> Option<f64> {
    match value {
        PropertyValue::StringArray(items) => {
            items.first().and_then(|s| s.trim().parse().ok())
        }
        other => other.as_number(),
    }
}

fn sort_by_name(hits: &mut [SearchHit], direction: SortDirection) {
    hits.sort_by(|a, b| {
        let ord = natural_cmp(&a.entity.name, &b.entity.name);
        apply_direction(ord, direction)
    });
}

#[derive(Debug, PartialEq)]
enum SortValue {
    Number(f64),
    Boolean(bool),
    Text(String),
}

/// Extract an entity's comparable value for a sort property. Multi-valued
/// properties contribute only their first element.
fn sort_value(entity: &Entity, property_id: &str, datatype: PropertyDatatype) -> Option<SortValue> {
    let value = entity.properties.get(property_id)?;
    let scalar: std::borrow::Cow<'_, PropertyValue> = match value {
        PropertyValue::StringArray(items) => {
            std::borrow::Cow::Owned(PropertyValue::String(items.first()?.clone()))
        }
        other => std::borrow::Cow::Borrowed(other),
    };

    match datatype {
        PropertyDatatype::Number => scalar.as_number().map(SortValue::Number),
        PropertyDatatype::Boolean => match scalar.as_ref() {
            PropertyValue::Boolean(b) => Some(SortValue::Boolean(*b)),
            PropertyValue::String(s) => s.trim().parse().ok().map(SortValue::Boolean),
            _ => None,
        },
        PropertyDatatype::String => Some(SortValue::Text(scalar.to_display_string())),
    }
}

/// Missing values sort to the end irrespective of direction; only present
/// pairs are flipped for descending order.
fn compare_sort_values(
    a: Option<SortValue>,
    b: Option<SortValue>,
    direction: SortDirection,
) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            let ord = match (a, b) {
                (SortValue::Number(x), SortValue::Number(y)) => {
                    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
                }
                (SortValue::Boolean(x), SortValue::Boolean(y)) => x.cmp(&y),
                (SortValue::Text(x), SortValue::Text(y)) => natural_cmp(&x, &y),
                // Mixed types should not occur under one config; order by
                // display text to stay deterministic.
                (x, y) => natural_cmp(&sort_value_text(&x), &sort_value_text(&y)),
            };
            apply_direction(ord, direction)
        }
    }
}

fn sort_value_text(value: &SortValue) -> String {
    match value {
        SortValue::Number(n) => crate::model::types::format_number(*n),
        SortValue::Boolean(b) => b.to_string(),
        SortValue::Text(s) => s.clone(),
    }
}

fn apply_direction(ord: Ordering, direction: SortDirection) -> Ordering {
    match direction {
        SortDirection::Asc => ord,
        SortDirection::Desc => ord.reverse(),
    }
}

fn paginate(hits: Vec<SearchHit>, page: usize, page_size: usize) -> PaginatedSearchResult {
    let page = page.max(1);
    let page_size = page_size.max(1);
    let total = hits.len();
    let total_pages = total.div_ceil(page_size);

    let offset = (page - 1).saturating_mul(page_size);
    let results = if offset >= total {
        Vec::new()
    } else {
        hits.into_iter().skip(offset).take(page_size).collect()
    };

    PaginatedSearchResult {
        results,
        total,
        page,
        page_size,
        total_pages,
    }
}
