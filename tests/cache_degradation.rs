mod util;

use anyhow::{Result, anyhow};
use compendium_search::model::types::{
    ClassConfig, Entity, PropertyConfig, PropertyDatatype, PropertyValue, SearchCriteria,
};
use compendium_search::schema::SchemaRegistry;
use compendium_search::search::engine::{SearchEngine, content_hash};
use compendium_search::storage::IndexCache;
use compendium_search::storage::sqlite::SqliteCache;
use util::TestTracing;

fn registry() -> SchemaRegistry {
    SchemaRegistry::new(vec![ClassConfig {
        id: "monster".into(),
        name: "Monster".into(),
        properties: vec![
            PropertyConfig::new("monster.level", "Level", PropertyDatatype::Number).facet(),
        ],
    }])
}

fn entities() -> Vec<Entity> {
    let mut goblin = Entity::new("a", "monster", "Goblin")
        .with_property("monster.level", PropertyValue::Number(3.0));
    goblin.updated_at = 100;
    vec![goblin]
}

/// A cache whose every operation fails.
struct BrokenCache;

impl IndexCache for BrokenCache {
    fn load_hash(&self) -> Result<Option<String>> {
        Err(anyhow!("disk on fire"))
    }

    fn store_hash(&self, _hash: &str) -> Result<()> {
        Err(anyhow!("disk on fire"))
    }

    fn load_chunks(&self) -> Result<Vec<(String, String)>> {
        Err(anyhow!("disk on fire"))
    }

    fn store_chunks(&self, _chunks: &[(String, String)]) -> Result<()> {
        Err(anyhow!("disk on fire"))
    }

    fn clear(&self) -> Result<()> {
        Err(anyhow!("disk on fire"))
    }
}

#[test]
fn broken_cache_degrades_to_miss_and_logs() {
    let trace = TestTracing::new();
    let _guard = trace.install();

    let engine = SearchEngine::with_cache(registry(), Box::new(BrokenCache));
    engine.update_entities(entities());

    // The engine still comes up ready and ranked.
    assert!(engine.is_index_ready());
    assert!(!engine.is_indexing());

    let criteria = SearchCriteria {
        text: Some("goblin".into()),
        ..Default::default()
    };
    let result = engine.search_paginated(&criteria, 1, 10);
    assert_eq!(result.total, 1);
    assert!(result.results[0].score.is_some());

    let out = trace.output();
    assert!(out.contains("failed to read cached index hash"));
    assert!(out.contains("failed to persist index chunks"));
}

#[test]
fn corrupt_chunk_is_skipped_not_fatal() {
    let trace = TestTracing::new();
    let _guard = trace.install();

    let cache = SqliteCache::open_in_memory().unwrap();
    let list = entities();
    cache.store_hash(&content_hash(&list)).unwrap();
    cache
        .store_chunks(&[
            ("terms/00".into(), "{definitely not json".into()),
            ("docs".into(), "{\"docs\":{\"a\":2}}".into()),
        ])
        .unwrap();

    let engine = SearchEngine::with_cache(registry(), Box::new(cache));
    engine.update_entities(list);

    // Restore succeeded with the bad chunk absent.
    assert!(engine.is_index_ready());
    let out = trace.output();
    assert!(out.contains("skipping unreadable index chunk"));
    assert!(out.contains("index restored from cache"));

    // Searches still answer; the missing postings just mean no text hits.
    let result = engine.search_paginated(&SearchCriteria::default(), 1, 10);
    assert_eq!(result.total, 1);
}

#[test]
fn rebuild_recovers_after_corrupt_restore() {
    let cache = SqliteCache::open_in_memory().unwrap();
    let list = entities();
    cache.store_hash(&content_hash(&list)).unwrap();
    cache
        .store_chunks(&[("terms/00".into(), "garbage".into())])
        .unwrap();

    let engine = SearchEngine::with_cache(registry(), Box::new(cache));
    engine.update_entities(list);

    let criteria = SearchCriteria {
        text: Some("goblin".into()),
        ..Default::default()
    };
    // The restored index lost its postings, so the ranked path finds nothing.
    assert_eq!(engine.search_paginated(&criteria, 1, 10).total, 0);

    // Manual rebuild re-indexes from the snapshot.
    engine.rebuild_index();
    assert_eq!(engine.search_paginated(&criteria, 1, 10).total, 1);
}
