use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::bank::write_json_atomic;
use crate::embedding::{SharedEmbedder, cosine_similarity};

pub type SharedQuestionBank = Arc<tokio::sync::RwLock<QuestionBank>>;

/// One interview question, historical or proposed. Both kinds share this
/// record shape; `answered_by` is populated only for historical questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub id: String,
    pub content: String,
    /// Agent that proposed or asked the question.
    pub proposer: String,
    pub session_id: u32,
    pub created_at: DateTime<Utc>,
    /// Ids of the memories that answered this question (historical only).
    #[serde(default)]
    pub answered_by: Vec<String>,
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

/// A search hit with its cosine similarity to the query.
#[derive(Debug, Clone)]
pub struct QuestionHit {
    pub record: QuestionRecord,
    pub similarity: f32,
}

/// Similarity-searchable store of questions.
///
/// Two instances exist per session: the *historical* bank survives across
/// sessions and is append-only within one; the *proposed* bank is scoped to
/// the current session and never persisted.
pub struct QuestionBank {
    questions: Vec<QuestionRecord>,
    embedder: SharedEmbedder,
    session_id: u32,
}

#[derive(Serialize, Deserialize)]
struct ContentSnapshot {
    questions: Vec<QuestionRecord>,
}

impl QuestionBank {
    pub fn new(embedder: SharedEmbedder, session_id: u32) -> Self {
        Self {
            questions: Vec::new(),
            embedder,
            session_id,
        }
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn all(&self) -> &[QuestionRecord] {
        &self.questions
    }

    /// Register a proposed question (no answering memories yet).
    pub fn add_question(
        &mut self,
        content: impl Into<String>,
        proposer: impl Into<String>,
    ) -> QuestionRecord {
        self.insert(content.into(), proposer.into(), Vec::new())
    }

    /// Register a question actually asked in this session, together with
    /// the ids of the memories it produced.
    pub fn add_historical(
        &mut self,
        content: impl Into<String>,
        proposer: impl Into<String>,
        answered_by: Vec<String>,
    ) -> QuestionRecord {
        self.insert(content.into(), proposer.into(), answered_by)
    }

    fn insert(&mut self, content: String, proposer: String, answered_by: Vec<String>) -> QuestionRecord {
        let record = QuestionRecord {
            id: format!("Q_{}", &Uuid::new_v4().simple().to_string()[..8]),
            embedding: self.embedder.embed(&content),
            content,
            proposer,
            session_id: self.session_id,
            created_at: Utc::now(),
            answered_by,
        };
        self.questions.push(record.clone());
        record
    }

    /// Top-k by cosine similarity, most similar first.
    pub fn search_questions(&self, query: &str, k: usize) -> Vec<QuestionHit> {
        let query_vec = self.embedder.embed(query);
        let mut hits: Vec<QuestionHit> = self
            .questions
            .iter()
            .map(|record| QuestionHit {
                similarity: cosine_similarity(&record.embedding, &query_vec),
                record: record.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(k);
        hits
    }

    // ── Persistence (historical bank only) ───────────────────────────────────

    fn content_path(dir: &Path) -> PathBuf {
        dir.join("historical_question_bank_content.json")
    }

    fn embedding_path(dir: &Path) -> PathBuf {
        dir.join("historical_question_bank_embeddings.json")
    }

    pub fn save(&self, user_logs_dir: impl AsRef<Path>) -> Result<()> {
        let dir = user_logs_dir.as_ref();
        fs::create_dir_all(dir)?;

        let snapshot = ContentSnapshot {
            questions: self.questions.clone(),
        };
        write_json_atomic(&Self::content_path(dir), &snapshot)?;

        let embeddings: BTreeMap<&str, &[f32]> = self
            .questions
            .iter()
            .map(|record| (record.id.as_str(), record.embedding.as_slice()))
            .collect();
        write_json_atomic(&Self::embedding_path(dir), &embeddings)?;

        info!(count = self.questions.len(), "question bank saved");
        Ok(())
    }

    /// Missing store loads as an empty bank.
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

        let stored_embeddings: HashMap<String, Vec<f32>> = fs::read_to_string(Self::embedding_path(dir))
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        for mut record in snapshot.questions {
            record.embedding = stored_embeddings
                .get(&record.id)
                .cloned()
                .unwrap_or_else(|| bank.embedder.embed(&record.content));
            bank.questions.push(record);
        }

        Ok(bank)
    }
}

/// Search both banks and merge: duplicates (by content string) are dropped,
/// the survivors sorted by similarity, and the top `k` returned. Used by the
/// scribe to detect near-duplicate follow-ups before committing them.
pub fn combined_search(
    historical: &QuestionBank,
    proposed: &QuestionBank,
    query: &str,
    k: usize,
) -> Vec<QuestionHit> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged: Vec<QuestionHit> = Vec::new();

    for hit in historical
        .search_questions(query, k)
        .into_iter()
        .chain(proposed.search_questions(query, k))
    {
        if seen.insert(hit.record.content.clone()) {
            merged.push(hit);
        }
    }

    merged.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    merged.truncate(k);
    merged
}

// ── Tests ────────────────────────────────────────────────────────────────────
