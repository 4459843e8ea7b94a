//! Inverted text index over entity blobs.
//!
//! A small in-memory tf-idf index: terms map to per-document frequencies.
//! The index serializes to opaque key/value chunks for the durable cache —
//! postings are sharded across a fixed number of term chunks plus one
//! document-metadata chunk. Chunk payloads are JSON; a chunk that fails to
//! parse on import is simply absent from the restored index.

use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Number of term shards in the chunk export.
const CHUNK_SHARDS: u32 = 16;

const DOCS_CHUNK_KEY: &str = "docs";
const TERMS_CHUNK_PREFIX: &str = "terms/";

/// Minimum token length kept by the tokenizer.
const MIN_TOKEN_LEN: usize = 2;

/// Weight applied to prefix (search-as-you-type) term matches.
const PREFIX_MATCH_WEIGHT: f64 = 0.7;

#[derive(Debug, Clone, Default)]
pub struct TextIndex {
    /// term -> doc id -> term frequency.
    postings: BTreeMap<String, BTreeMap<String, u32>>,
    /// doc id -> total token count.
    doc_lens: BTreeMap<String, u32>,
}

/// Tokenize into lowercase alphanumeric terms, dropping short tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.len() >= MIN_TOKEN_LEN)
        .map(String::from)
        .collect()
}

impl TextIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn doc_count(&self) -> usize {
        self.doc_lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lens.is_empty()
    }

    /// Insert one document's searchable blob. Re-inserting an id replaces
    /// its previous postings.
    pub fn insert(&mut self, id: &str, text: &str) {
        if self.doc_lens.contains_key(id) {
            self.remove(id);
        }

        let tokens = tokenize(text);
        self.doc_lens.insert(id.to_string(), tokens.len() as u32);
        for token in tokens {
            *self
                .postings
                .entry(token)
                .or_default()
                .entry(id.to_string())
                .or_insert(0) += 1;
        }
    }

    pub fn remove(&mut self, id: &str) {
        self.doc_lens.remove(id);
        self.postings.retain(|_, docs| {
            docs.remove(id);
            !docs.is_empty()
        });
    }

    /// Relevance-ordered lookup: OR semantics over query terms, tf-idf
    /// scoring, with the final query token also matching by term prefix.
    /// Ties break on document id so results are deterministic.
    pub fn search(&self, query: &str) -> Vec<(String, f64)> {
        let terms = tokenize(query);
        if terms.is_empty() || self.doc_lens.is_empty() {
            return Vec::new();
        }

        let doc_count = self.doc_lens.len() as f64;
        let mut scores: BTreeMap<&str, f64> = BTreeMap::new();
        let last = terms.len() - 1;

        for (pos, term) in terms.iter().enumerate() {
            if let Some(docs) = self.postings.get(term) {
                let idf = (1.0 + doc_count / docs.len() as f64).ln();
                for (doc, tf) in docs {
                    *scores.entry(doc.as_str()).or_insert(0.0) += idf * f64::from(*tf);
                }
            }

            // Search-as-you-type: the trailing token matches term prefixes.
            if pos == last {
                let upper = next_prefix(term);
                let range = match &upper {
                    Some(end) => self.postings.range(term.clone()..end.clone()),
                    None => self.postings.range(term.clone()..),
                };
                for (indexed_term, docs) in range {
                    if indexed_term == term || !indexed_term.starts_with(term.as_str()) {
                        continue;
                    }
                    let idf = (1.0 + doc_count / docs.len() as f64).ln();
                    for (doc, tf) in docs {
                        *scores.entry(doc.as_str()).or_insert(0.0) +=
                            PREFIX_MATCH_WEIGHT * idf * f64::from(*tf);
                    }
                }
            }
        }

        let mut ranked: Vec<(String, f64)> = scores
            .into_iter()
            .map(|(doc, score)| (doc.to_string(), score))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked
    }

    /// Export the full index as chunk key/value pairs. Empty shards are
    /// omitted; an empty index exports only the docs chunk.
    pub fn export_chunks(&self) -> Result<Vec<(String, String)>> {
        let mut shards: Vec<BTreeMap<&String, &BTreeMap<String, u32>>> =
            vec![BTreeMap::new(); CHUNK_SHARDS as usize];
        for (term, docs) in &self.postings {
            let shard = (crc32fast::hash(term.as_bytes()) % CHUNK_SHARDS) as usize;
            shards[shard].insert(term, docs);
        }

        let mut chunks = Vec::new();
        for (idx, shard) in shards.iter().enumerate() {
            if shard.is_empty() {
                continue;
            }
            let value = serde_json::to_string(shard)
                .with_context(|| format!("serializing term shard {idx}"))?;
            chunks.push((format!("{TERMS_CHUNK_PREFIX}{idx:02}"), value));
        }

        let docs = DocsChunk {
            docs: self.doc_lens.clone(),
        };
        chunks.push((
            DOCS_CHUNK_KEY.to_string(),
            serde_json::to_string(&docs).context("serializing docs chunk")?,
        ));
        Ok(chunks)
    }

    /// Merge one persisted chunk into this index.
    pub fn import_chunk(&mut self, key: &str, value: &str) -> Result<()> {
        if key == DOCS_CHUNK_KEY {
            let chunk: DocsChunk =
                serde_json::from_str(value).context("parsing docs chunk")?;
            self.doc_lens.extend(chunk.docs);
            return Ok(());
        }

        if key.starts_with(TERMS_CHUNK_PREFIX) {
            let shard: BTreeMap<String, BTreeMap<String, u32>> =
                serde_json::from_str(value).with_context(|| format!("parsing chunk {key}"))?;
            for (term, docs) in shard {
                self.postings.entry(term).or_default().extend(docs);
            }
            return Ok(());
        }

        Err(anyhow!("unknown index chunk key {key}"))
    }
}

/// Smallest string strictly greater than every string with this prefix.
fn next_prefix(s: &str) -> Option<String> {
    let mut chars: Vec<char> = s.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(next) = char::from_u32(last as u32 + 1) {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

#[derive(Debug, Serialize, Deserialize)]
struct DocsChunk {
    docs: BTreeMap<String, u32>,
}
