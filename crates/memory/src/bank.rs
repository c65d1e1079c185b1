use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::embedding::{Embedder, HashEmbedder, SharedEmbedder, cosine_similarity};
use crate::memory::Memory;

/// Shared handle used across agents. Writes serialize through the write
/// guard; searches take read guards and may proceed concurrently.
pub type SharedMemoryBank = Arc<tokio::sync::RwLock<MemoryBank>>;

/// A search hit with its cosine similarity to the query.
#[derive(Debug, Clone)]
pub struct MemoryHit {
    pub memory: Memory,
    pub similarity: f32,
}

/// Append-only content-addressed store of atomic memories.
pub struct MemoryBank {
    memories: Vec<Memory>,
    by_id: HashMap<String, usize>,
    embedder: SharedEmbedder,
    session_id: u32,
}

#[derive(Serialize, Deserialize)]
struct ContentSnapshot {
    memories: Vec<Memory>,
}

impl MemoryBank {
    pub fn new(embedder: SharedEmbedder, session_id: u32) -> Self {
        Self {
            memories: Vec::new(),
            by_id: HashMap::new(),
            embedder,
            session_id,
        }
    }

    /// The session stamped onto newly minted memories.
    pub fn set_session_id(&mut self, session_id: u32) {
        self.session_id = session_id;
    }

    pub fn len(&self) -> usize {
        self.memories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
    }

    pub fn all(&self) -> &[Memory] {
        &self.memories
    }

    /// Mint a new identifier, compute an embedding, and store the record.
    /// No deduplication happens here.
    pub fn add_memory(
        &mut self,
        title: impl Into<String>,
        text: impl Into<String>,
        importance: u8,
        source_quote: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> Memory {
        let text = text.into();
        let memory = Memory {
            id: self.mint_id(),
            title: title.into(),
            embedding: self.embedder.embed(&text),
            text,
            importance: importance.clamp(1, 10),
            metadata,
            source_quote: source_quote.into(),
            session_id: self.session_id,
            created_at: Utc::now(),
        };

        debug!(id = %memory.id, title = %memory.title, "memory added");
        self.by_id.insert(memory.id.clone(), self.memories.len());
        self.memories.push(memory.clone());
        memory
    }

    fn mint_id(&self) -> String {
        loop {
            let candidate = format!("MEM_{}", &Uuid::new_v4().simple().to_string()[..8]);
            if !self.by_id.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    pub fn get_by_id(&self, id: &str) -> Option<&Memory> {
        self.by_id.get(id).and_then(|&idx| self.memories.get(idx))
    }

    /// Lookup preserving the input order; unknown ids are skipped.
    pub fn get_by_ids(&self, ids: &[String]) -> Vec<&Memory> {
        ids.iter().filter_map(|id| self.get_by_id(id)).collect()
    }

    /// Top-k by cosine similarity; ties broken by importance, then recency.
    pub fn search(&self, query: &str, k: usize) -> Vec<MemoryHit> {
        let query_vec = self.embedder.embed(query);
        let mut hits: Vec<MemoryHit> = self
            .memories
            .iter()
            .map(|memory| MemoryHit {
                similarity: cosine_similarity(&memory.embedding, &query_vec),
                memory: memory.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| b.memory.importance.cmp(&a.memory.importance))
                .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
        });
        hits.truncate(k);
        hits
    }

    /// Deterministic tagged serialization of the selected memories, used
    /// when feeding them into prompts.
    pub fn format_for_prompt(&self, ids: &[String], include_source: bool) -> String {
        let memories = self.get_by_ids(ids);
        if memories.is_empty() {
            return "No relevant memories available.".to_string();
        }
        memories
            .iter()
            .map(|memory| memory.to_prompt_xml(include_source))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    // ── Persistence ──────────────────────────────────────────────────────────

    fn content_path(dir: &Path) -> PathBuf {
        dir.join("memory_bank_content.json")
    }

    fn embedding_path(dir: &Path) -> PathBuf {
        dir.join("memory_bank_embeddings.json")
    }

    /// Snapshot content and embeddings under the user's logs directory.
    pub fn save(&self, user_logs_dir: impl AsRef<Path>) -> Result<()> {
        let dir = user_logs_dir.as_ref();
        fs::create_dir_all(dir)?;

        let snapshot = ContentSnapshot {
            memories: self.memories.clone(),
        };
        write_json_atomic(&Self::content_path(dir), &snapshot)?;

        let embeddings: BTreeMap<&str, &[f32]> = self
            .memories
            .iter()
            .map(|memory| (memory.id.as_str(), memory.embedding.as_slice()))
            .collect();
        write_json_atomic(&Self::embedding_path(dir), &embeddings)?;

        info!(count = self.memories.len(), dir = %dir.display(), "memory bank saved");
        Ok(())
    }

    /// Load a bank snapshot, tolerating a missing store (returns an empty
    /// bank). Embeddings missing from the sibling store are recomputed.
    pub fn load(
        user_logs_dir: impl AsRef<Path>,
        embedder: SharedEmbedder,
        session_id: u32,
    ) -> Result<Self> {
        let dir = user_logs_dir.as_ref();
        let mut bank = Self::new(embedder, session_id);

        let content_path = Self::content_path(dir);
        if !content_path.exists() {
            return Ok(bank);
        }

        let raw = fs::read_to_string(&content_path)
            .with_context(|| format!("read {}", content_path.display()))?;
        let snapshot: ContentSnapshot = serde_json::from_str(&raw)?;

        let stored_embeddings: BTreeMap<String, Vec<f32>> = fs::read_to_string(Self::embedding_path(dir))
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        for mut memory in snapshot.memories {
            memory.embedding = stored_embeddings
                .get(&memory.id)
                .cloned()
                .unwrap_or_else(|| bank.embedder.embed(&memory.text));
            bank.by_id.insert(memory.id.clone(), bank.memories.len());
            bank.memories.push(memory);
        }

        info!(count = bank.memories.len(), "memory bank loaded");
        Ok(bank)
    }
}

impl Default for MemoryBank {
    fn default() -> Self {
        Self::new(Arc::new(HashEmbedder::default()), 1)
    }
}

/// Write JSON to a `.tmp` sibling, then rename over the target so a crash
/// never leaves a half-written snapshot.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp_path = {
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "snapshot.json".to_string());
        path.with_file_name(format!("{filename}.tmp"))
    };

    let rendered = serde_json::to_string_pretty(value)?;
    if let Err(err) = fs::write(&tmp_path, rendered) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn bank() -> MemoryBank {
        MemoryBank::new(Arc::new(HashEmbedder::default()), 1)
    }

    #[test]
    fn add_memory_mints_unique_ids() {
        let mut bank = bank();
        let a = bank.add_memory("a", "first fact", 5, "quote", BTreeMap::new());
        let b = bank.add_memory("b", "second fact", 5, "quote", BTreeMap::new());
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("MEM_"));
        assert_eq!(a.session_id, 1);
    }

    #[test]
    fn get_by_ids_preserves_input_order_and_identity() {
        let mut bank = bank();
        let a = bank.add_memory("a", "alpha", 5, "q", BTreeMap::new());
        let b = bank.add_memory("b", "beta", 5, "q", BTreeMap::new());

        let fetched = bank.get_by_ids(&[b.id.clone(), a.id.clone(), "MEM_missing".to_string()]);
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].id, b.id);
        assert_eq!(fetched[1], &a);
    }

    #[test]
    fn importance_is_clamped_to_valid_range() {
        let mut bank = bank();
        let low = bank.add_memory("low", "x", 0, "q", BTreeMap::new());
        let high = bank.add_memory("high", "y", 42, "q", BTreeMap::new());
        assert_eq!(low.importance, 1);
        assert_eq!(high.importance, 10);
    }

    #[test]
    fn search_ranks_by_similarity() {
        let mut bank = bank();
        bank.add_memory("college", "studied physics in college", 5, "q", BTreeMap::new());
        bank.add_memory("cooking", "bakes sourdough every weekend", 5, "q", BTreeMap::new());

        let hits = bank.search("what did you study in college", 2);
        assert_eq!(hits[0].memory.title, "college");
        assert!(hits[0].similarity > hits[1].similarity);
    }

    #[test]
    fn search_ties_break_by_importance() {
        let mut bank = bank();
        // Identical text, identical similarity to any query.
        bank.add_memory("minor", "summer trip to the lake", 3, "q", BTreeMap::new());
        let major = bank.add_memory("major", "summer trip to the lake", 9, "q", BTreeMap::new());

        let hits = bank.search("summer trip", 2);
        assert_eq!(hits[0].memory.id, major.id);
    }

    #[test]
    fn format_for_prompt_is_stable() {
        let mut bank = bank();
        let a = bank.add_memory("Title A", "Fact A.", 5, "Quote A.", BTreeMap::new());
        let rendered = bank.format_for_prompt(&[a.id.clone()], true);
        assert_eq!(
            rendered,
            format!(
                "<memory>\n  <id>{}</id>\n  <title>Title A</title>\n  <content>Fact A.</content>\n  <source>Quote A.</source>\n</memory>",
                a.id
            )
        );
    }

    #[test]
    fn format_for_prompt_empty_ids() {
        let bank = bank();
        assert_eq!(
            bank.format_for_prompt(&[], false),
            "No relevant memories available."
        );
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut bank = bank();
        let mut metadata = BTreeMap::new();
        metadata.insert("topic".to_string(), "education".to_string());
        let a = bank.add_memory("a", "alpha fact", 6, "quote a", metadata);
        bank.save(dir.path()).unwrap();

        let loaded = MemoryBank::load(dir.path(), Arc::new(HashEmbedder::default()), 2).unwrap();
        assert_eq!(loaded.len(), 1);
        let fetched = loaded.get_by_id(&a.id).unwrap();
        assert_eq!(fetched.text, "alpha fact");
        assert_eq!(fetched.session_id, 1, "session of origin preserved");
        assert_eq!(fetched.metadata.get("topic").unwrap(), "education");
        assert_eq!(fetched.embedding, a.embedding, "embeddings come from the sibling store");
    }

    #[test]
    fn load_missing_store_returns_empty_bank() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = MemoryBank::load(
            dir.path().join("nonexistent"),
            Arc::new(HashEmbedder::default()),
            1,
        )
        .unwrap();
        assert!(loaded.is_empty());
    }
}
