//! Built-in engine: model turns interleaved with parallel tool execution.

use super::engine::{EngineFactory, EngineResult, ExecutionEngine, StepEvent, StepStream};
use super::reducer::MODEL_NODE;
use super::retry::{MAX_RETRIES, retry_delay, retryable_category};
use crate::config::Settings;
use crate::provider::{
    self, ChatRequest, ContentBlock, LlmApi, Message, Role, StreamEvent, ToolCallEvent, Usage,
};
use crate::tool::{self, Tool, ToolContext};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Node whose messages carry tool results.
pub const TOOLS_NODE: &str = "tools";

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are agentlite, a terminal coding agent. You help users with software engineering tasks \
using the tools available to you. Be concise and direct. Read code before changing it, \
and prefer small, focused changes.";

pub const DEFAULT_MAX_TURNS: usize = 25;

/// Interval of empty steps published while tools run.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(15);
const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

type Publisher = mpsc::Sender<Result<StepEvent>>;

struct TurnOutput {
    text: String,
    calls: Vec<ToolCallEvent>,
    usage: Usage,
}

struct ToolOutcome {
    id: String,
    name: String,
    content: String,
    is_error: bool,
}

#[derive(Clone)]
pub struct AgentLoop {
    model: Arc<dyn LlmApi>,
    tools: Arc<Vec<Arc<dyn Tool>>>,
    system_prompt: String,
    max_turns: usize,
    heartbeat: Duration,
}

impl AgentLoop {
    pub fn new(model: Arc<dyn LlmApi>, tools: Vec<Arc<dyn Tool>>) -> Self {
        Self {
            model,
            tools: Arc::new(tools),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_turns: DEFAULT_MAX_TURNS,
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    /// How often a streaming run reports liveness while its tools execute.
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = interval.max(MIN_HEARTBEAT);
        self
    }

    fn request(&self, messages: &[Message]) -> ChatRequest {
        let mut request = ChatRequest::new(messages.to_vec());
        request.model = self.model.model().to_string();
        request.system = Some(Cow::Owned(self.system_prompt.clone()));
        request.tools = Arc::new(tool::definitions(&self.tools));
        request
    }

    /// Run model turns until the model stops calling tools.
    ///
    /// With a publisher the model is streamed and every step is sent to it.
    async fn drive(
        &self,
        mut messages: Vec<Message>,
        out: Option<&Publisher>,
        cancel: &CancellationToken,
    ) -> Result<EngineResult> {
        let start = messages.len();
        let mut usage = Usage::default();

        for turn in 1..=self.max_turns {
            if cancel.is_cancelled() || out.is_some_and(mpsc::Sender::is_closed) {
                return Err(Error::Cancelled);
            }
            debug!(turn, model = %self.model.model(), "Model turn");

            let message_id = format!("msg_{}", Uuid::new_v4());
            let request = self.request(&messages);
            let mut output = match out {
                Some(tx) => self.stream_turn(request, tx, &message_id, cancel).await?,
                None => self.complete_turn(request, cancel).await?,
            };
            usage.input_tokens += output.usage.input_tokens;
            usage.output_tokens += output.usage.output_tokens;

            for call in &mut output.calls {
                if call.id.is_empty() {
                    call.id = format!("call_{}", Uuid::new_v4());
                }
            }
            if let Some(tx) = out {
                publish(tx, model_step(&message_id, &output.text, &output.calls)).await;
            }
            messages.push(assistant_message(&output));

            if output.calls.is_empty() {
                return Ok(EngineResult {
                    messages: messages.split_off(start),
                    usage,
                });
            }

            let outcomes =
                execute_tools(&self.tools, output.calls, cancel, out, self.heartbeat).await?;
            if let Some(tx) = out {
                publish(tx, tools_step(&outcomes)).await;
            }
            messages.push(Message {
                role: Role::ToolResult,
                content: Arc::new(
                    outcomes
                        .into_iter()
                        .map(|o| ContentBlock::ToolResult {
                            tool_call_id: o.id,
                            content: o.content,
                            is_error: o.is_error,
                        })
                        .collect(),
                ),
            });
        }

        warn!(max_turns = self.max_turns, "Turn limit reached, stopping");
        Ok(EngineResult {
            messages: messages.split_off(start),
            usage,
        })
    }

    async fn stream_turn(
        &self,
        request: ChatRequest,
        tx: &Publisher,
        message_id: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutput> {
        let mut attempt = 0;

        'retry: loop {
            let (stream_tx, mut stream_rx) = mpsc::channel(100);
            let model = self.model.clone();
            let request_clone = request.clone();
            let handle = tokio::spawn(async move { model.stream(request_clone, stream_tx).await });

            let mut output = TurnOutput {
                text: String::new(),
                calls: Vec::new(),
                usage: Usage::default(),
            };
            let mut failure: Option<provider::Error> = None;

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        handle.abort();
                        return Err(Error::Cancelled);
                    }
                    event = stream_rx.recv() => match event {
                        Some(StreamEvent::TextDelta(delta)) => {
                            output.text.push_str(&delta);
                            publish(tx, model_step(message_id, &output.text, &[])).await;
                        }
                        Some(StreamEvent::ToolCall(call)) => output.calls.push(call),
                        Some(StreamEvent::Usage(usage)) => output.usage = usage,
                        Some(StreamEvent::Error(e)) => {
                            handle.abort();
                            failure = Some(provider::Error::Stream(e));
                            break;
                        }
                        Some(StreamEvent::Done) => {}
                        None => {
                            match handle.await {
                                Ok(Err(e)) => failure = Some(e),
                                Err(join_err) if join_err.is_panic() => {
                                    failure = Some(provider::Error::Stream(
                                        "Provider task panicked".to_string(),
                                    ));
                                }
                                _ => {}
                            }
                            break;
                        }
                    }
                }
            }

            let Some(err) = failure else {
                return Ok(output);
            };
            let untouched = output.text.is_empty() && output.calls.is_empty();
            if untouched
                && attempt < MAX_RETRIES
                && let Some(reason) = retryable_category(&err)
            {
                attempt += 1;
                let delay = retry_delay(&err, attempt);
                warn!(
                    "{reason}, retrying in {}s (attempt {attempt}/{MAX_RETRIES})",
                    delay.as_secs()
                );
                tokio::select! {
                    () = cancel.cancelled() => return Err(Error::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
                continue 'retry;
            }
            error!("Stream error: {err}");
            return Err(err.into());
        }
    }

    async fn complete_turn(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<TurnOutput> {
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                result = self.model.complete(request.clone()) => result,
            };
            match result {
                Ok(response) => {
                    let calls = response
                        .message
                        .tool_calls()
                        .map(|(id, name, arguments)| ToolCallEvent {
                            id: id.to_string(),
                            name: name.to_string(),
                            arguments: arguments.clone(),
                        })
                        .collect();
                    return Ok(TurnOutput {
                        text: response.message.text_content(),
                        calls,
                        usage: response.usage,
                    });
                }
                Err(err) => {
                    let Some(reason) = retryable_category(&err).filter(|_| attempt < MAX_RETRIES)
                    else {
                        error!("Completion error: {err}");
                        return Err(err.into());
                    };
                    attempt += 1;
                    let delay = retry_delay(&err, attempt);
                    warn!(
                        "{reason}, retrying in {}s (attempt {attempt}/{MAX_RETRIES})",
                        delay.as_secs()
                    );
                    tokio::select! {
                        () = cancel.cancelled() => return Err(Error::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ExecutionEngine for AgentLoop {
    async fn invoke(&self, history: Vec<Message>) -> Result<EngineResult> {
        self.drive(history, None, &CancellationToken::new()).await
    }

    async fn stream(&self, history: Vec<Message>, cancel: CancellationToken) -> Result<StepStream> {
        let (tx, rx) = mpsc::channel(64);
        let engine = self.clone();
        tokio::spawn(async move {
            match engine.drive(history, Some(&tx), &cancel).await {
                Ok(_) | Err(Error::Cancelled) => {}
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                }
            }
        });
        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}

/// Builds an [`AgentLoop`] from the session settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentLoopFactory;

impl EngineFactory for AgentLoopFactory {
    fn build(
        &self,
        model: Arc<dyn LlmApi>,
        tools: Vec<Arc<dyn Tool>>,
        settings: &Settings,
    ) -> Arc<dyn ExecutionEngine> {
        let mut engine = AgentLoop::new(model, tools)
            .with_max_turns(settings.max_turns)
            .with_heartbeat(settings.stream_stale_timeout() / 4);
        if let Some(prompt) = &settings.system_prompt {
            engine = engine.with_system_prompt(prompt.clone());
        }
        Arc::new(engine)
    }
}

async fn publish(tx: &Publisher, step: StepEvent) {
    // The consumer may have gone away; the next turn notices via is_closed.
    let _ = tx.send(Ok(step)).await;
}

fn model_step(id: &str, text: &str, calls: &[ToolCallEvent]) -> StepEvent {
    let mut message = json!({ "id": id, "type": "ai", "content": text });
    if !calls.is_empty() {
        message["tool_calls"] = calls
            .iter()
            .map(|c| json!({ "id": c.id, "name": c.name, "args": c.arguments }))
            .collect::<Vec<_>>()
            .into();
    }
    StepEvent::single(MODEL_NODE, json!({ "messages": [message] }))
}

fn tools_step(outcomes: &[ToolOutcome]) -> StepEvent {
    let messages: Vec<Value> = outcomes
        .iter()
        .map(|o| {
            json!({
                "type": "tool",
                "tool_call_id": o.id,
                "name": o.name,
                "content": o.content,
                "status": if o.is_error { "error" } else { "success" },
            })
        })
        .collect();
    StepEvent::single(TOOLS_NODE, json!({ "messages": messages }))
}

fn assistant_message(output: &TurnOutput) -> Message {
    let mut blocks = Vec::with_capacity(output.calls.len() + 1);
    if !output.text.is_empty() {
        blocks.push(ContentBlock::Text {
            text: output.text.clone(),
        });
    }
    blocks.extend(output.calls.iter().map(|c| ContentBlock::ToolCall {
        id: c.id.clone(),
        name: c.name.clone(),
        arguments: c.arguments.clone(),
    }));
    Message {
        role: Role::Assistant,
        content: Arc::new(blocks),
    }
}

/// Run the requested tools concurrently, keeping results in request order.
///
/// While they run, an empty step goes to `out` every `heartbeat`.
async fn execute_tools(
    tools: &Arc<Vec<Arc<dyn Tool>>>,
    calls: Vec<ToolCallEvent>,
    cancel: &CancellationToken,
    out: Option<&Publisher>,
    heartbeat: Duration,
) -> Result<Vec<ToolOutcome>> {
    let ctx = ToolContext {
        abort_signal: cancel.clone(),
    };
    let mut set = JoinSet::new();
    let count = calls.len();

    for (index, call) in calls.into_iter().enumerate() {
        let tool = tool::find(tools, &call.name).cloned();
        let ctx = ctx.clone();
        set.spawn(async move {
            debug!(tool = %call.name, id = %call.id, "Executing tool");
            let (content, is_error) = match tool {
                None => (format!("Unknown tool: {}", call.name), true),
                Some(tool) => match tool.execute(call.arguments, &ctx).await {
                    Ok(result) => (result.content, result.is_error),
                    Err(e) => (e.to_string(), true),
                },
            };
            let outcome = ToolOutcome {
                id: call.id,
                name: call.name,
                content,
                is_error,
            };
            (index, outcome)
        });
    }

    let mut results: Vec<Option<ToolOutcome>> = (0..count).map(|_| None).collect();
    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                set.abort_all();
                return Err(Error::Cancelled);
            }
            _ = ticker.tick(), if out.is_some() => {
                if let Some(tx) = out {
                    publish(tx, StepEvent::default()).await;
                }
            }
            joined = set.join_next() => match joined {
                Some(Ok((index, outcome))) => results[index] = Some(outcome),
                Some(Err(e)) if e.is_panic() => {
                    return Err(Error::Engine("Tool task panicked".to_string()));
                }
                Some(Err(_)) => return Err(Error::Engine("Tool task cancelled".to_string())),
                None => break,
            }
        }
    }

    results
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| Error::Engine("Tool execution incomplete".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentEvent, EventStreamReducer};
    use crate::provider::CompletionResponse;
    use crate::tool::{ToolError, ToolResult};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    type Turn = std::result::Result<Vec<StreamEvent>, provider::Error>;

    struct Scripted {
        turns: Mutex<VecDeque<Turn>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(turns: Vec<Turn>) -> Arc<Self> {
            Arc::new(Self {
                turns: Mutex::new(turns.into()),
                calls: Mutex::new(0),
            })
        }

        fn next(&self) -> Turn {
            *self.calls.lock().unwrap() += 1;
            self.turns.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()))
        }
    }

    #[async_trait]
    impl LlmApi for Scripted {
        fn id(&self) -> &str {
            "scripted"
        }
        fn model(&self) -> &str {
            "scripted-1"
        }
        async fn stream(
            &self,
            _request: ChatRequest,
            tx: mpsc::Sender<StreamEvent>,
        ) -> std::result::Result<(), provider::Error> {
            for event in self.next()? {
                let _ = tx.send(event).await;
            }
            let _ = tx.send(StreamEvent::Done).await;
            Ok(())
        }
        async fn complete(
            &self,
            _request: ChatRequest,
        ) -> std::result::Result<CompletionResponse, provider::Error> {
            let mut blocks = Vec::new();
            for event in self.next()? {
                match event {
                    StreamEvent::TextDelta(text) => blocks.push(ContentBlock::Text { text }),
                    StreamEvent::ToolCall(c) => blocks.push(ContentBlock::ToolCall {
                        id: c.id,
                        name: c.name,
                        arguments: c.arguments,
                    }),
                    _ => {}
                }
            }
            Ok(CompletionResponse {
                message: Message {
                    role: Role::Assistant,
                    content: Arc::new(blocks),
                },
                usage: Usage::default(),
            })
        }
    }

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "Uppercase text"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        async fn execute(
            &self,
            args: Value,
            _ctx: &ToolContext,
        ) -> std::result::Result<ToolResult, ToolError> {
            let text = args["text"]
                .as_str()
                .ok_or_else(|| ToolError::InvalidArgs("text is required".into()))?;
            Ok(ToolResult::text(text.to_uppercase()))
        }
    }

    fn call(id: &str, name: &str, args: Value) -> StreamEvent {
        StreamEvent::ToolCall(ToolCallEvent {
            id: id.into(),
            name: name.into(),
            arguments: args,
        })
    }

    fn text(s: &str) -> StreamEvent {
        StreamEvent::TextDelta(s.into())
    }

    fn engine(model: Arc<Scripted>) -> AgentLoop {
        AgentLoop::new(model, vec![Arc::new(Upper)])
    }

    async fn collect(engine: &AgentLoop) -> Vec<AgentEvent> {
        let mut steps = engine
            .stream(vec![Message::user("go")], CancellationToken::new())
            .await
            .unwrap();
        let mut reducer = EventStreamReducer::new();
        let mut events = Vec::new();
        while let Some(step) = steps.next().await {
            match step {
                Ok(step) => events.extend(reducer.apply(&step)),
                Err(e) => events.extend(reducer.fail_pending(&e.to_string())),
            }
        }
        events
    }

    #[tokio::test]
    async fn test_stream_tool_round_trip() {
        let model = Scripted::new(vec![
            Ok(vec![text("Let me "), text("check."), call("t1", "upper", json!({"text": "hi"}))]),
            Ok(vec![text("It says HI.")]),
        ]);
        let events = collect(&engine(model)).await;

        assert_eq!(events[0], AgentEvent::TextDelta("Let me ".into()));
        assert_eq!(events[1], AgentEvent::TextDelta("check.".into()));
        assert!(matches!(&events[2], AgentEvent::ToolCallStart(r) if r.id == "t1" && r.name == "upper"));
        assert_eq!(
            events[3],
            AgentEvent::ToolCallComplete {
                id: "t1".into(),
                result: "HI".into()
            }
        );
        assert_eq!(events[4], AgentEvent::TextDelta("It says HI.".into()));
        assert_eq!(events.len(), 5);
    }

    #[tokio::test]
    async fn test_tool_failures_marked_error() {
        let model = Scripted::new(vec![
            Ok(vec![
                call("a", "missing", json!({})),
                call("b", "upper", json!({})),
            ]),
            Ok(vec![text("Both failed.")]),
        ]);
        let events = collect(&engine(model)).await;
        let errors: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::ToolCallError { id, error } => Some((id.as_str(), error.as_str())),
                _ => None,
            })
            .collect();
        assert_eq!(
            errors,
            [
                ("a", "Unknown tool: missing"),
                ("b", "Invalid arguments: text is required")
            ]
        );
    }

    #[tokio::test]
    async fn test_invoke_collects_messages() {
        let model = Scripted::new(vec![
            Ok(vec![call("", "upper", json!({"text": "x"}))]),
            Ok(vec![text("X")]),
        ]);
        let result = engine(model).invoke(vec![Message::user("go")]).await.unwrap();

        let roles: Vec<_> = result.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::Assistant, Role::ToolResult, Role::Assistant]);
        let (id, _, _) = result.messages[0].tool_calls().next().unwrap();
        assert!(id.starts_with("call_"));
        assert_eq!(result.final_text(), "X");
    }

    #[tokio::test]
    async fn test_transient_error_retried() {
        let model = Scripted::new(vec![
            Err(provider::Error::RateLimited {
                retry_after: Some(0),
            }),
            Ok(vec![text("ok")]),
        ]);
        let events = collect(&engine(model.clone())).await;
        assert_eq!(events, [AgentEvent::TextDelta("ok".into())]);
        assert_eq!(*model.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_fatal_error_ends_stream() {
        let model = Scripted::new(vec![Err(provider::Error::Api(
            "HTTP 401 Unauthorized: bad key".into(),
        ))]);
        let mut steps = engine(model)
            .stream(vec![Message::user("go")], CancellationToken::new())
            .await
            .unwrap();
        let first = steps.next().await.unwrap();
        assert!(matches!(first, Err(Error::Provider(provider::Error::Api(_)))));
        assert!(steps.next().await.is_none());
    }

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Sleeps briefly"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(
            &self,
            _args: Value,
            _ctx: &ToolContext,
        ) -> std::result::Result<ToolResult, ToolError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(ToolResult::text("slept"))
        }
    }

    #[tokio::test]
    async fn test_heartbeat_while_tools_run() {
        let model = Scripted::new(vec![Ok(vec![call("t1", "slow", json!({}))]), Ok(vec![])]);
        let engine = AgentLoop::new(model, vec![Arc::new(Slow)])
            .with_heartbeat(Duration::from_millis(20));
        let steps: Vec<StepEvent> = engine
            .stream(vec![Message::user("go")], CancellationToken::new())
            .await
            .unwrap()
            .map(|step| step.unwrap())
            .collect()
            .await;

        let beats = steps.iter().filter(|s| s.nodes.is_empty()).count();
        assert!(beats >= 3, "only {beats} heartbeats");
        assert_eq!(steps.last().unwrap().nodes[0].node, MODEL_NODE);
    }

    #[tokio::test]
    async fn test_turn_limit() {
        let turn = || Ok(vec![call("", "upper", json!({"text": "again"}))]);
        let model = Scripted::new(vec![turn(), turn(), turn()]);
        let result = engine(model.clone())
            .with_max_turns(2)
            .invoke(vec![Message::user("loop")])
            .await
            .unwrap();
        assert_eq!(result.messages.len(), 4);
        assert_eq!(*model.calls.lock().unwrap(), 2);
    }
}
