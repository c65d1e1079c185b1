//! Shared fixtures for agent tests.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use memoir_agenda::SessionAgenda;
use memoir_biography::Biography;
use memoir_config::AppConfig;
use memoir_core::{EvaluationLogger, MessageRouter, SessionSignals};
use memoir_llm::SharedEngine;
use memoir_memory::{HashEmbedder, MemoryBank, QuestionBank};

use crate::SessionContext;

/// A full session context over temp storage and the given engine.
/// The backing directory is leaked for the life of the test process.
pub(crate) async fn test_context(engine: SharedEngine) -> Arc<SessionContext> {
    test_context_with_config(engine, AppConfig::default()).await
}

pub(crate) async fn test_context_with_config(
    engine: SharedEngine,
    mut config: AppConfig,
) -> Arc<SessionContext> {
    let dir: &'static tempfile::TempDir =
        Box::leak(Box::new(tempfile::tempdir().expect("create tempdir")));
    config.storage.data_dir = dir.path().join("data").to_string_lossy().to_string();
    config.storage.logs_dir = dir.path().join("logs").to_string_lossy().to_string();

    let user_id = "test_user".to_string();
    let session_id = 1;
    let embedder = Arc::new(HashEmbedder::default());
    let signals = Arc::new(SessionSignals::new());

    let mut agenda = SessionAgenda::initial(&user_id);
    agenda.session_id = session_id;

    Arc::new(SessionContext {
        user_id: user_id.clone(),
        session_id,
        signals: signals.clone(),
        router: Arc::new(MessageRouter::new(signals)),
        engine,
        memory_bank: Arc::new(RwLock::new(MemoryBank::new(embedder.clone(), session_id))),
        historical_questions: Arc::new(RwLock::new(QuestionBank::new(embedder.clone(), session_id))),
        proposed_questions: Arc::new(RwLock::new(QuestionBank::new(embedder, session_id))),
        agenda: Arc::new(Mutex::new(agenda)),
        biography: Arc::new(Biography::new(&user_id, config.user_data_dir(&user_id))),
        eval: Arc::new(EvaluationLogger::new(config.user_logs_dir(&user_id), session_id)),
        config,
    })
}
