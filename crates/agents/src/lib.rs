//! The session's agents: interviewer, session scribe, and the biography
//! orchestrator with its planner / section-writer subteam, plus the user
//! channels they talk to.
//!
//! Agents are plain structs sharing a [`SessionContext`]; there is no
//! inheritance hierarchy. Each agent owns its event stream exclusively and
//! touches shared stores only through the context handles.

mod base;
mod interviewer;
mod orchestrator;
mod scribe;
pub mod speech;
#[cfg(test)]
pub(crate) mod testutil;
mod tools;
mod user;

pub use base::AgentCore;
pub use interviewer::Interviewer;
pub use orchestrator::{BiographyOrchestrator, FollowUpQuestion, Plan, UpdatePhase};
pub use scribe::SessionScribe;
pub use tools::RecallTool;
pub use user::{SimulatedUser, TerminalUser};

use std::sync::Arc;

use tokio::sync::Mutex;

use memoir_agenda::SessionAgenda;
use memoir_biography::Biography;
use memoir_config::AppConfig;
use memoir_core::{EvaluationLogger, MessageRouter, SessionSignals};
use memoir_llm::SharedEngine;
use memoir_memory::{SharedMemoryBank, SharedQuestionBank};

pub type SharedAgenda = Arc<Mutex<SessionAgenda>>;

/// Everything an agent needs, threaded in at construction.
///
/// Ownership mirrors the engine's: the agenda and banks belong to the
/// session, the biography accepts writes only through the orchestrator's
/// workers, and each agent keeps its own event stream.
pub struct SessionContext {
    pub config: AppConfig,
    pub user_id: String,
    pub session_id: u32,
    pub signals: Arc<SessionSignals>,
    pub router: Arc<MessageRouter>,
    pub engine: SharedEngine,
    pub memory_bank: SharedMemoryBank,
    pub historical_questions: SharedQuestionBank,
    pub proposed_questions: SharedQuestionBank,
    pub agenda: SharedAgenda,
    pub biography: Arc<Biography>,
    pub eval: Arc<EvaluationLogger>,
}

impl SessionContext {
    /// Render the user portrait without holding the agenda lock across an
    /// await point.
    pub async fn portrait_str(&self) -> String {
        self.agenda.lock().await.get_user_portrait_str()
    }

    pub async fn questions_and_notes_str(&self, hide_answered: bool) -> String {
        self.agenda
            .lock()
            .await
            .get_questions_and_notes_str(hide_answered)
    }

    pub async fn last_meeting_summary(&self) -> String {
        self.agenda.lock().await.last_meeting_summary.clone()
    }
}
