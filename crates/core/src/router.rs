use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::message::{Message, MessageType, Role};
use crate::signals::SessionSignals;

/// Receives routed messages. Implementations log their own failures; the
/// router never lets one subscriber abort another or the session.
#[async_trait]
pub trait Subscriber: Send + Sync {
    fn name(&self) -> &str;
    async fn on_message(&self, message: Message);
}

/// Called with `(previous message, feedback message)` for skip/like
/// feedback. The engine wires this to the evaluation CSV.
pub type FeedbackHook = Arc<dyn Fn(&Message, &Message) + Send + Sync>;

struct Subscription {
    name: String,
    roles: Vec<Role>,
    tx: mpsc::UnboundedSender<Message>,
}

/// Pub/sub dispatch of typed messages to per-role subscribers.
///
/// Each subscription owns an unbounded channel drained by a dedicated
/// worker task: delivery to a single subscriber follows post order, while
/// subscribers progress independently of each other. Messages posted after
/// the session has ended are dropped silently.
pub struct MessageRouter {
    signals: Arc<SessionSignals>,
    subscriptions: Mutex<Vec<Subscription>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    history: Mutex<Vec<Message>>,
    feedback_hook: Mutex<Option<FeedbackHook>>,
}

impl MessageRouter {
    pub fn new(signals: Arc<SessionSignals>) -> Self {
        Self {
            signals,
            subscriptions: Mutex::new(Vec::new()),
            workers: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            feedback_hook: Mutex::new(None),
        }
    }

    pub fn set_feedback_hook(&self, hook: FeedbackHook) {
        *self.feedback_hook.lock().expect("router lock poisoned") = Some(hook);
    }

    /// Register a subscriber for messages authored by any of `roles` and
    /// start its delivery worker. One channel serves all roles so the
    /// subscriber observes a single post-ordered stream.
    pub fn subscribe(&self, roles: &[Role], subscriber: Arc<dyn Subscriber>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let name = subscriber.name().to_string();
        debug!(subscriber = %name, ?roles, "subscribed");

        let worker_name = name.clone();
        let worker = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                subscriber.on_message(message).await;
            }
            debug!(subscriber = %worker_name, "delivery worker stopped");
        });

        self.subscriptions
            .lock()
            .expect("router lock poisoned")
            .push(Subscription {
                name,
                roles: roles.to_vec(),
                tx,
            });
        self.workers
            .lock()
            .expect("router lock poisoned")
            .push(worker);
    }

    /// Post a message. Returns `true` when the message was accepted
    /// (recorded and, for conversation/skip, fanned out).
    pub fn post(&self, message: Message) -> bool {
        if !self.signals.is_in_progress() {
            debug!(role = %message.role, "session not in progress, dropping message");
            return false;
        }

        // Feedback types are logged against the previous message.
        if message.kind != MessageType::Conversation {
            let previous = self
                .history
                .lock()
                .expect("router lock poisoned")
                .last()
                .cloned();
            if let (Some(previous), Some(hook)) = (
                previous,
                self.feedback_hook
                    .lock()
                    .expect("router lock poisoned")
                    .clone(),
            ) {
                hook(&previous, &message);
            }
            if message.kind == MessageType::Like {
                // Recorded only; no history entry, no fan-out.
                return true;
            }
        }

        // History append happens before fan-out.
        info!(target: "chat_history", role = %message.role, content = %message.content);
        self.history
            .lock()
            .expect("router lock poisoned")
            .push(message.clone());

        if message.role == Role::User {
            self.signals.note_user_message();
        }

        let subscriptions = self.subscriptions.lock().expect("router lock poisoned");
        let mut delivered = 0usize;
        for subscription in subscriptions.iter().filter(|s| s.roles.contains(&message.role)) {
            if subscription.tx.send(message.clone()).is_err() {
                warn!(subscriber = %subscription.name, "delivery channel closed");
            } else {
                delivered += 1;
            }
        }
        debug!(role = %message.role, delivered, "message fanned out");
        true
    }

    pub fn history(&self) -> Vec<Message> {
        self.history.lock().expect("router lock poisoned").clone()
    }

    /// `Role: content` lines for the most recent `limit` conversation
    /// messages, i.e. the chat-history window fed into prompts.
    pub fn rendered_history(&self, limit: usize) -> String {
        let history = self.history.lock().expect("router lock poisoned");
        let start = history.len().saturating_sub(limit);
        history[start..]
            .iter()
            .map(|message| format!("{}: {}", message.role, message.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Close every delivery channel and wait for the workers to drain.
    pub async fn shutdown(&self) {
        self.subscriptions
            .lock()
            .expect("router lock poisoned")
            .clear();
        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .expect("router lock poisoned")
            .drain(..)
            .collect();
        for worker in workers {
            let _ = worker.await;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
