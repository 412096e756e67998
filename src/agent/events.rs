use crate::transcript::ToolCallRecord;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// What a streaming run reports to its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    TextDelta(String),
    ToolCallStart(ToolCallRecord),
    ToolCallComplete { id: String, result: String },
    ToolCallError { id: String, error: String },
}

/// Receives the events of one `stream_run`.
#[async_trait]
pub trait EventSink: Send {
    async fn emit(&mut self, event: AgentEvent);
}

#[async_trait]
impl EventSink for mpsc::Sender<AgentEvent> {
    async fn emit(&mut self, event: AgentEvent) {
        // A dropped receiver means the caller stopped listening.
        let _ = self.send(event).await;
    }
}

#[async_trait]
impl EventSink for Vec<AgentEvent> {
    async fn emit(&mut self, event: AgentEvent) {
        self.push(event);
    }
}

type Callback<T> = Option<Box<dyn FnMut(T) + Send>>;

/// Callback form of [`EventSink`]. Unset callbacks drop their events.
#[derive(Default)]
pub struct StreamCallbacks {
    on_text_chunk: Callback<String>,
    on_tool_call_start: Callback<ToolCallRecord>,
    on_tool_call_complete: Callback<(String, String)>,
    on_tool_call_error: Callback<(String, String)>,
}

impl StreamCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_text_chunk(mut self, f: impl FnMut(String) + Send + 'static) -> Self {
        self.on_text_chunk = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_tool_call_start(mut self, f: impl FnMut(ToolCallRecord) + Send + 'static) -> Self {
        self.on_tool_call_start = Some(Box::new(f));
        self
    }

    /// `f` receives `(id, result)`.
    #[must_use]
    pub fn on_tool_call_complete(mut self, f: impl FnMut((String, String)) + Send + 'static) -> Self {
        self.on_tool_call_complete = Some(Box::new(f));
        self
    }

    /// `f` receives `(id, error)`.
    #[must_use]
    pub fn on_tool_call_error(mut self, f: impl FnMut((String, String)) + Send + 'static) -> Self {
        self.on_tool_call_error = Some(Box::new(f));
        self
    }
}

#[async_trait]
impl EventSink for StreamCallbacks {
    async fn emit(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::TextDelta(delta) => {
                if let Some(f) = &mut self.on_text_chunk {
                    f(delta);
                }
            }
            AgentEvent::ToolCallStart(record) => {
                if let Some(f) = &mut self.on_tool_call_start {
                    f(record);
                }
            }
            AgentEvent::ToolCallComplete { id, result } => {
                if let Some(f) = &mut self.on_tool_call_complete {
                    f((id, result));
                }
            }
            AgentEvent::ToolCallError { id, error } => {
                if let Some(f) = &mut self.on_tool_call_error {
                    f((id, error));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_callbacks_route_by_kind() {
        let text = Arc::new(Mutex::new(String::new()));
        let done = Arc::new(Mutex::new(Vec::new()));

        let mut callbacks = StreamCallbacks::new()
            .on_text_chunk({
                let text = text.clone();
                move |d| text.lock().unwrap().push_str(&d)
            })
            .on_tool_call_complete({
                let done = done.clone();
                move |(id, _)| done.lock().unwrap().push(id)
            });

        callbacks.emit(AgentEvent::TextDelta("Hi".into())).await;
        callbacks
            .emit(AgentEvent::ToolCallError {
                id: "x".into(),
                error: "no handler".into(),
            })
            .await;
        callbacks
            .emit(AgentEvent::ToolCallComplete {
                id: "t1".into(),
                result: "ok".into(),
            })
            .await;

        assert_eq!(*text.lock().unwrap(), "Hi");
        assert_eq!(*done.lock().unwrap(), ["t1"]);
    }

    #[tokio::test]
    async fn test_channel_sink_survives_closed_receiver() {
        let (mut tx, rx) = mpsc::channel(1);
        drop(rx);
        tx.emit(AgentEvent::TextDelta("lost".into())).await;
    }
}
