//! Completion detection over a backend event stream.
//!
//! A prompt is complete on `execution_success`, on `executing` with a
//! null node, or on a `status` reporting an empty queue once any event of
//! the prompt has been seen. Error and interrupt events for the prompt are
//! failures. Events of other prompts are ignored.

use std::time::Duration;

use futures::StreamExt;

use crate::backend::{BackendError, EventStream};
use crate::messages::ComfyUIMessage;

/// Outcome of one message for the prompt being watched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Pending,
    Complete,
}

/// Tracks one prompt's lifecycle across messages.
#[derive(Debug)]
pub struct CompletionTracker<'a> {
    prompt_id: &'a str,
    seen: bool,
}

impl<'a> CompletionTracker<'a> {
    pub fn new(prompt_id: &'a str) -> Self {
        Self {
            prompt_id,
            seen: false,
        }
    }

    /// Whether any event of the prompt has been observed.
    pub fn seen(&self) -> bool {
        self.seen
    }

    pub fn observe(&mut self, message: &ComfyUIMessage) -> Result<Progress, BackendError> {
        if let ComfyUIMessage::Status(data) = message {
            let drained = data.status.exec_info.queue_remaining == 0;
            return Ok(if drained && self.seen {
                Progress::Complete
            } else {
                Progress::Pending
            });
        }

        if message.prompt_id() != Some(self.prompt_id) {
            return Ok(Progress::Pending);
        }
        self.seen = true;

        match message {
            ComfyUIMessage::ExecutionSuccess(_) => Ok(Progress::Complete),
            ComfyUIMessage::Executing(data) if data.node.is_none() => Ok(Progress::Complete),
            ComfyUIMessage::ExecutionError(data) => Err(BackendError::Execution {
                node_id: data.node_id.clone(),
                message: format!("{}: {}", data.exception_type, data.exception_message),
            }),
            ComfyUIMessage::ExecutionInterrupted(data) => {
                Err(BackendError::Interrupted(data.prompt_id.clone()))
            }
            ComfyUIMessage::Progress(data) => {
                tracing::debug!(
                    prompt_id = %self.prompt_id,
                    value = data.value,
                    max = data.max,
                    "Generation progress",
                );
                Ok(Progress::Pending)
            }
            _ => Ok(Progress::Pending),
        }
    }
}

/// Read `events` until `prompt_id` completes, fails, or `limit` elapses.
pub async fn await_completion(
    events: &mut EventStream,
    prompt_id: &str,
    limit: Duration,
) -> Result<(), BackendError> {
    match tokio::time::timeout(limit, watch(events, prompt_id)).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout(limit)),
    }
}

async fn watch(events: &mut EventStream, prompt_id: &str) -> Result<(), BackendError> {
    let mut tracker = CompletionTracker::new(prompt_id);
    while let Some(message) = events.next().await {
        if tracker.observe(&message?)? == Progress::Complete {
            return Ok(());
        }
    }
    Err(BackendError::StreamClosed)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::messages::parse_message;

    fn msg(json: &str) -> ComfyUIMessage {
        parse_message(json).unwrap()
    }

    fn status(remaining: i32) -> ComfyUIMessage {
        msg(&format!(
            r#"{{"type":"status","data":{{"status":{{"exec_info":{{"queue_remaining":{remaining}}}}}}}}}"#
        ))
    }

    fn executing(node: Option<&str>, prompt: &str) -> ComfyUIMessage {
        let node = node.map_or("null".to_string(), |n| format!("\"{n}\""));
        msg(&format!(
            r#"{{"type":"executing","data":{{"node":{node},"prompt_id":"{prompt}"}}}}"#
        ))
    }

    fn stream(messages: Vec<ComfyUIMessage>) -> EventStream {
        futures::stream::iter(messages.into_iter().map(Ok)).boxed()
    }

    #[tokio::test]
    async fn executing_null_node_completes() {
        let mut events = stream(vec![
            status(1),
            executing(Some("3"), "p1"),
            executing(None, "p1"),
        ]);
        assert!(await_completion(&mut events, "p1", Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn execution_success_completes() {
        let mut events = stream(vec![msg(
            r#"{"type":"execution_success","data":{"prompt_id":"p1"}}"#,
        )]);
        assert!(await_completion(&mut events, "p1", Duration::from_secs(1)).await.is_ok());
    }

    #[test]
    fn empty_queue_counts_only_after_prompt_was_seen() {
        let mut tracker = CompletionTracker::new("p1");
        assert_eq!(tracker.observe(&status(0)).unwrap(), Progress::Pending);
        assert_eq!(tracker.observe(&executing(Some("3"), "p1")).unwrap(), Progress::Pending);
        assert!(tracker.seen());
        assert_eq!(tracker.observe(&status(0)).unwrap(), Progress::Complete);
    }

    #[test]
    fn other_prompts_are_ignored() {
        let mut tracker = CompletionTracker::new("p1");
        assert_eq!(tracker.observe(&executing(None, "p0")).unwrap(), Progress::Pending);
        assert!(!tracker.seen());
    }

    #[tokio::test]
    async fn execution_error_fails() {
        let mut events = stream(vec![msg(
            r#"{"type":"execution_error","data":{"prompt_id":"p1","node_id":"5","exception_message":"oom","exception_type":"RuntimeError"}}"#,
        )]);
        let result = await_completion(&mut events, "p1", Duration::from_secs(1)).await;
        assert_matches!(result, Err(BackendError::Execution { node_id, .. }) if node_id == "5");
    }

    #[tokio::test]
    async fn interrupt_fails() {
        let mut events = stream(vec![msg(
            r#"{"type":"execution_interrupted","data":{"prompt_id":"p1"}}"#,
        )]);
        assert_matches!(
            await_completion(&mut events, "p1", Duration::from_secs(1)).await,
            Err(BackendError::Interrupted(_))
        );
    }

    #[tokio::test]
    async fn exhausted_stream_is_stream_closed() {
        let mut events = stream(vec![executing(Some("3"), "p1")]);
        assert_matches!(
            await_completion(&mut events, "p1", Duration::from_secs(1)).await,
            Err(BackendError::StreamClosed)
        );
    }

    #[tokio::test]
    async fn silent_stream_times_out() {
        let mut events: EventStream = futures::stream::pending().boxed();
        assert_matches!(
            await_completion(&mut events, "p1", Duration::from_millis(20)).await,
            Err(BackendError::Timeout(_))
        );
    }
}
