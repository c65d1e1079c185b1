//! Memory and question banks.
//!
//! Both banks share the same shape: append-only records with embedding
//! vectors, cosine top-k search, and JSON snapshots split into a content
//! file and a sibling embedding store. The memory bank never deduplicates
//! at insert time; semantic dedup is an orchestrator concern.

mod bank;
mod embedding;
mod memory;
mod question;

pub use bank::{MemoryBank, MemoryHit, SharedMemoryBank};
pub use embedding::{Embedder, HashEmbedder, SharedEmbedder, cosine_similarity};
pub use memory::Memory;
pub use question::{QuestionBank, QuestionHit, QuestionRecord, SharedQuestionBank, combined_search};
