use chrono::{DateTime, Utc};

/// One entry in an agent's private event stream: prompts sent, responses
/// received, tool results, errors. The stream is the agent's working memory
/// for prompt construction and its debugging trail.
#[derive(Debug, Clone)]
pub struct AgentEvent {
    pub sender: String,
    pub tag: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Matches events by sender and/or tag; a `None` field matches anything.
/// A filter list is OR-ed.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub sender: Option<String>,
    pub tag: Option<String>,
}

impl EventFilter {
    pub fn sender(sender: impl Into<String>) -> Self {
        Self {
            sender: Some(sender.into()),
            tag: None,
        }
    }

    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            sender: None,
            tag: Some(tag.into()),
        }
    }

    pub fn sender_and_tag(sender: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            sender: Some(sender.into()),
            tag: Some(tag.into()),
        }
    }

    fn matches(&self, event: &AgentEvent) -> bool {
        self.sender
            .as_ref()
            .is_none_or(|sender| *sender == event.sender)
            && self.tag.as_ref().is_none_or(|tag| *tag == event.tag)
    }
}

/// An agent's append-only event stream. All events are retained for
/// debugging; prompt construction reads a bounded replay window.
#[derive(Debug, Default)]
pub struct EventStream {
    events: Vec<AgentEvent>,
}

impl EventStream {
    pub fn add(
        &mut self,
        sender: impl Into<String>,
        tag: impl Into<String>,
        content: impl Into<String>,
    ) {
        let event = AgentEvent {
            sender: sender.into(),
            tag: tag.into(),
            content: content.into(),
            timestamp: Utc::now(),
        };
        tracing::debug!(sender = %event.sender, tag = %event.tag, "agent event");
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn all(&self) -> &[AgentEvent] {
        &self.events
    }

    /// Rendered lines (`<Sender>\ncontent\n</Sender>`) for events passing
    /// any of the filters, in stream order. An empty filter list passes
    /// everything.
    pub fn rendered(&self, filters: &[EventFilter]) -> Vec<String> {
        self.events
            .iter()
            .filter(|event| filters.is_empty() || filters.iter().any(|f| f.matches(event)))
            .map(|event| format!("<{0}>\n{1}\n</{0}>", event.sender, event.content))
            .collect()
    }

    /// Like [`rendered`], truncated to the last `window` entries (the
    /// replay window used in prompts).
    pub fn rendered_window(&self, filters: &[EventFilter], window: usize) -> Vec<String> {
        let mut lines = self.rendered(filters);
        if lines.len() > window {
            lines.drain(..lines.len() - window);
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> EventStream {
        let mut stream = EventStream::default();
        stream.add("Interviewer", "message", "Where did you grow up?");
        stream.add("User", "message", "In Boston.");
        stream.add("SessionScribe", "recall_response", "no prior memories");
        stream
    }

    #[test]
    fn renders_in_sender_tags() {
        let lines = stream().rendered(&[EventFilter::sender("User")]);
        assert_eq!(lines, vec!["<User>\nIn Boston.\n</User>".to_string()]);
    }

    #[test]
    fn filter_list_is_or_ed() {
        let lines = stream().rendered(&[
            EventFilter::tag("message"),
            EventFilter::sender_and_tag("SessionScribe", "recall_response"),
        ]);
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn empty_filters_pass_everything() {
        assert_eq!(stream().rendered(&[]).len(), 3);
    }

    #[test]
    fn window_keeps_most_recent() {
        let mut stream = EventStream::default();
        for i in 0..10 {
            stream.add("User", "message", format!("answer {i}"));
        }
        let lines = stream.rendered_window(&[], 3);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("answer 7"));
        assert!(lines[2].contains("answer 9"));
        // The underlying stream still retains everything.
        assert_eq!(stream.len(), 10);
    }
}
