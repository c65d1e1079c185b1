//! The biography orchestrator: plans and applies biography updates from new
//! memories, and runs the end-of-session pass that also rewrites the
//! agenda for the next session.
//!
//! Per update the phase machine runs
//! `idle → planning → dispatching → writing (→ planning once more on an
//! invariant rejection) → idle`, with `saving` entered only by the final
//! pass. At most one incremental update is in flight at any time.

mod planner;
mod summary;
mod writer;

pub use planner::Plan;
pub use writer::FollowUpQuestion;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use memoir_memory::Memory;

use crate::SessionContext;
use crate::scribe::SessionScribe;

use planner::Planner;
use summary::SessionSummaryWriter;
use writer::{FollowUpSink, SectionWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    Idle,
    Planning,
    Dispatching,
    Writing,
    Saving,
}

pub struct BiographyOrchestrator {
    ctx: Arc<SessionContext>,
    update_in_progress: AtomicBool,
    agenda_update_in_progress: AtomicBool,
    phase: StdMutex<UpdatePhase>,
    /// Gap questions proposed by section writers, consumed by the final
    /// agenda rewrite.
    follow_ups: FollowUpSink,
}

impl BiographyOrchestrator {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self {
            ctx,
            update_in_progress: AtomicBool::new(false),
            agenda_update_in_progress: AtomicBool::new(false),
            phase: StdMutex::new(UpdatePhase::Idle),
            follow_ups: FollowUpSink::default(),
        }
    }

    pub fn update_in_progress(&self) -> bool {
        self.update_in_progress.load(Ordering::SeqCst)
    }

    pub fn agenda_update_in_progress(&self) -> bool {
        self.agenda_update_in_progress.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> UpdatePhase {
        *self.phase.lock().expect("phase lock poisoned")
    }

    fn set_phase(&self, phase: UpdatePhase) {
        debug!(?phase, "orchestrator phase");
        *self.phase.lock().expect("phase lock poisoned") = phase;
    }

    pub fn follow_up_questions(&self) -> Vec<FollowUpQuestion> {
        self.follow_ups
            .lock()
            .expect("follow-up sink poisoned")
            .clone()
    }

    /// Incremental (auto) update over a batch of new memories.
    ///
    /// Returns `Ok(false)` when another update is already in flight; the
    /// scheduler polls and tries again on a later cycle. The tree is
    /// mutated but not saved; versioned snapshots happen in the final pass.
    pub async fn incremental_update(
        &self,
        memories: Vec<Memory>,
        conversation_summary: String,
    ) -> Result<bool> {
        if self
            .update_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("incremental update already in flight, skipping");
            return Ok(false);
        }

        info!(memories = memories.len(), "incremental biography update started");
        let started = Instant::now();
        let count = memories.len();
        let result = self.run_update(&memories, &conversation_summary).await;

        self.set_phase(UpdatePhase::Idle);
        self.update_in_progress.store(false, Ordering::SeqCst);
        self.ctx
            .eval
            .log_biography_update("auto", count, started.elapsed().as_secs_f64());
        info!(
            elapsed_secs = started.elapsed().as_secs_f64(),
            "incremental biography update finished"
        );
        result.map(|()| true)
    }

    async fn run_update(&self, memories: &[Memory], conversation_summary: &str) -> Result<()> {
        self.set_phase(UpdatePhase::Planning);
        let planner = Planner::new(self.ctx.clone());
        let plans = planner.plan(memories, conversation_summary).await;
        if plans.is_empty() {
            debug!("planner produced no plans");
            return Ok(());
        }

        self.set_phase(UpdatePhase::Dispatching);
        let failures = self.dispatch(plans).await;

        // A writer hitting a tree invariant sends the update back to
        // planning exactly once; plans that fail again are discarded.
        if !failures.is_empty() {
            self.set_phase(UpdatePhase::Planning);
            let revised = planner.replan(&failures, conversation_summary).await;
            if !revised.is_empty() {
                let leftover = self.dispatch(revised).await;
                for (plan, error) in leftover {
                    warn!(target = plan.target(), %error, "revised plan failed; discarded");
                }
            }
        }
        Ok(())
    }

    /// Run one section writer per plan, in parallel. Writers share the tree
    /// through its write guard. Returns the plans rejected by a tree
    /// invariant (candidates for one re-planning pass); other failures are
    /// logged and dropped.
    async fn dispatch(&self, plans: Vec<Plan>) -> Vec<(Plan, String)> {
        let mut workers = JoinSet::new();
        for plan in plans {
            let ctx = self.ctx.clone();
            let sink = self.follow_ups.clone();
            workers.spawn(async move {
                let writer = SectionWriter::new(ctx, sink);
                let outcome = writer.execute(&plan).await;
                (plan, outcome)
            });
        }

        self.set_phase(UpdatePhase::Writing);
        let mut failures = Vec::new();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((plan, outcome)) => {
                    if outcome.success {
                        debug!(target = plan.target(), "plan applied");
                    } else if outcome.needs_replan {
                        failures.push((plan, outcome.message));
                    } else {
                        warn!(target = plan.target(), message = %outcome.message, "plan failed");
                    }
                }
                Err(err) => warn!(%err, "section writer task panicked"),
            }
        }
        failures
    }

    /// End-of-session pass: drain the scribe, fold the remaining memories
    /// into the biography, rewrite the agenda for the next session, and
    /// write the versioned snapshot.
    pub async fn final_update(
        &self,
        scribe: &SessionScribe,
        selected_topics: &[String],
    ) -> Result<()> {
        // An incremental update may still be running; give it the same
        // bounded drain the scribe gets.
        let deadline =
            Instant::now() + Duration::from_secs(self.ctx.config.session.drain_timeout_secs);
        while self.update_in_progress() {
            if Instant::now() > deadline {
                warn!("timed out waiting for in-flight biography update");
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let conversation_summary = self.ctx.router.rendered_history(40);
        let remaining = scribe.get_session_memories(false, true, true).await;
        if !remaining.is_empty() {
            info!(memories = remaining.len(), "final incremental pass");
            self.incremental_update(remaining, conversation_summary.clone())
                .await?;
        }

        // Agenda rewrite for the next session.
        self.agenda_update_in_progress.store(true, Ordering::SeqCst);
        let rewrite_result = async {
            let session_memories = scribe.get_session_memories(true, false, false).await;
            let summary_writer = SessionSummaryWriter::new(self.ctx.clone());
            let topics = if selected_topics.is_empty() {
                summary_writer
                    .extract_session_topics(&session_memories)
                    .await
            } else {
                selected_topics.to_vec()
            };
            summary_writer
                .rewrite_agenda(&session_memories, &self.follow_up_questions(), &topics)
                .await?;
            self.ctx
                .agenda
                .lock()
                .await
                .save(self.ctx.config.user_logs_dir(&self.ctx.user_id))
        }
        .await;
        self.agenda_update_in_progress.store(false, Ordering::SeqCst);
        rewrite_result?;

        // Versioned snapshot; failures here are fatal and propagate.
        self.set_phase(UpdatePhase::Saving);
        let started = Instant::now();
        let version = self.ctx.biography.save(true).await;
        self.set_phase(UpdatePhase::Idle);
        let version = version?;
        self.ctx.eval.log_biography_update(
            "final",
            scribe.get_session_memories(true, false, false).await.len(),
            started.elapsed().as_secs_f64(),
        );
        info!(version, "final biography update complete");
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
