//! Evaluation CSV logging.
//!
//! Every session writes append-mode CSVs under
//! `{logs_dir}/{user}/evaluations/session_{id}/`. Headers are written when
//! a file is created; rows carry ISO-8601 timestamps. External analysis
//! scripts consume these files; the engine and agents only append.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::warn;

/// Appends evaluation rows for one session. Clone-cheap (path + id only);
/// callers share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct EvaluationLogger {
    eval_dir: PathBuf,
    session_id: u32,
}

impl EvaluationLogger {
    pub fn new(user_logs_dir: impl AsRef<Path>, session_id: u32) -> Self {
        Self {
            eval_dir: user_logs_dir
                .as_ref()
                .join("evaluations")
                .join(format!("session_{session_id}")),
            session_id,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.eval_dir
    }

    fn append(&self, file: &str, headers: &[&str], row: &[String]) -> Result<()> {
        fs::create_dir_all(&self.eval_dir)
            .with_context(|| format!("create {}", self.eval_dir.display()))?;
        let path = self.eval_dir.join(file);
        let is_new = !path.exists();

        let handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(handle);
        if is_new {
            writer.write_record(headers)?;
        }
        writer.write_record(row)?;
        writer.flush()?;
        Ok(())
    }

    /// Append, demoting failures to a warning. Evaluation logging never
    /// breaks the session.
    fn append_best_effort(&self, file: &str, headers: &[&str], row: &[String]) {
        if let Err(err) = self.append(file, headers, row) {
            warn!(file, %err, "failed to append evaluation row");
        }
    }

    pub fn log_question_similarity(
        &self,
        proposer: &str,
        target_question: &str,
        similar_questions: &[String],
        similarity_scores: &[f32],
        proceeded: bool,
        explanation: &str,
    ) {
        self.append_best_effort(
            "question_similarity.csv",
            &[
                "Timestamp",
                "Proposer",
                "Session ID",
                "Target Question",
                "Similar Questions",
                "Similarity Scores",
                "Proceeded",
                "Explanation",
            ],
            &[
                Utc::now().to_rfc3339(),
                proposer.to_string(),
                self.session_id.to_string(),
                target_question.to_string(),
                similar_questions.join("; "),
                similarity_scores
                    .iter()
                    .map(|score| format!("{score:.2}"))
                    .collect::<Vec<_>>()
                    .join("; "),
                proceeded.to_string(),
                explanation.to_string(),
            ],
        );
    }

    pub fn log_response_latency(&self, message_id: &str, latency_secs: f64, message_len: usize) {
        self.append_best_effort(
            "response_latency.csv",
            &["Timestamp", "Session ID", "Message ID", "Latency Seconds", "Message Length"],
            &[
                Utc::now().to_rfc3339(),
                self.session_id.to_string(),
                message_id.to_string(),
                format!("{latency_secs:.3}"),
                message_len.to_string(),
            ],
        );
    }

    pub fn log_conversation_statistics(
        &self,
        user_messages: usize,
        interviewer_messages: usize,
        memories_created: usize,
        duration_secs: f64,
    ) {
        self.append_best_effort(
            "conversation_statistics.csv",
            &[
                "Timestamp",
                "Session ID",
                "User Messages",
                "Interviewer Messages",
                "Memories Created",
                "Duration Seconds",
            ],
            &[
                Utc::now().to_rfc3339(),
                self.session_id.to_string(),
                user_messages.to_string(),
                interviewer_messages.to_string(),
                memories_created.to_string(),
                format!("{duration_secs:.1}"),
            ],
        );
    }

    pub fn log_biography_update(&self, kind: &str, memory_count: usize, duration_secs: f64) {
        self.append_best_effort(
            "biography_update_times.csv",
            &["Timestamp", "Session ID", "Kind", "Memory Count", "Duration Seconds"],
            &[
                Utc::now().to_rfc3339(),
                self.session_id.to_string(),
                kind.to_string(),
                memory_count.to_string(),
                format!("{duration_secs:.2}"),
            ],
        );
    }

    /// Skip/like feedback against the message it reacts to.
    pub fn log_feedback(&self, previous_content: &str, feedback_kind: &str) {
        self.append_best_effort(
            "comparison_votes.csv",
            &["Timestamp", "Session ID", "Previous Message", "Feedback"],
            &[
                Utc::now().to_rfc3339(),
                self.session_id.to_string(),
                previous_content.to_string(),
                feedback_kind.to_string(),
            ],
        );
    }

    pub fn log_groundedness_summary(&self, version: u32, section_count: usize, score: f64) {
        self.append_best_effort(
            "groundedness_summary.csv",
            &["Timestamp", "Session ID", "Biography Version", "Sections", "Score"],
            &[
                Utc::now().to_rfc3339(),
                self.session_id.to_string(),
                version.to_string(),
                section_count.to_string(),
                format!("{score:.3}"),
            ],
        );
    }

    pub fn log_completeness_summary(&self, version: u32, memories_total: usize, memories_cited: usize) {
        self.append_best_effort(
            "completeness_summary.csv",
            &[
                "Timestamp",
                "Session ID",
                "Biography Version",
                "Total Memories",
                "Cited Memories",
            ],
            &[
                Utc::now().to_rfc3339(),
                self.session_id.to_string(),
                version.to_string(),
                memories_total.to_string(),
                memories_cited.to_string(),
            ],
        );
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_written_once_and_rows_append() {
        let dir = tempfile::tempdir().unwrap();
        let logger = EvaluationLogger::new(dir.path(), 3);

        logger.log_response_latency("m1", 1.25, 42);
        logger.log_response_latency("m2", 0.5, 10);

        let path = dir
            .path()
            .join("evaluations/session_3/response_latency.csv");
        let raw = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Timestamp,Session ID"));
        assert!(lines[1].contains(",m1,1.250,42"));
        assert!(lines[2].contains(",m2,0.500,10"));
    }

    #[test]
    fn files_land_in_per_session_directory() {
        let dir = tempfile::tempdir().unwrap();
        let logger = EvaluationLogger::new(dir.path(), 7);
        logger.log_biography_update("auto", 4, 12.5);
        logger.log_feedback("a question", "like");
        logger.log_question_similarity(
            "SessionScribe",
            "What did you study?",
            &["Where did you go to college?".to_string()],
            &[0.91],
            true,
            "agent chose to proceed",
        );
        logger.log_groundedness_summary(2, 5, 0.8);
        logger.log_completeness_summary(2, 10, 9);
        logger.log_conversation_statistics(4, 5, 6, 300.0);

        let session_dir = dir.path().join("evaluations/session_7");
        for file in [
            "biography_update_times.csv",
            "comparison_votes.csv",
            "question_similarity.csv",
            "groundedness_summary.csv",
            "completeness_summary.csv",
            "conversation_statistics.csv",
        ] {
            assert!(session_dir.join(file).exists(), "{file} missing");
        }
    }

    #[test]
    fn fields_with_commas_are_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let logger = EvaluationLogger::new(dir.path(), 1);
        logger.log_feedback("a, tricky, message", "skip");

        let raw = fs::read_to_string(
            dir.path().join("evaluations/session_1/comparison_votes.csv"),
        )
        .unwrap();
        assert!(raw.contains("\"a, tricky, message\""));
    }
}
