//! The agent session: provider and tool-server wiring around an execution engine.

mod engine;
mod events;
mod reducer;
mod retry;
mod runner;

pub use engine::{
    EngineFactory, EngineResult, ExecutionEngine, NodeOutput, StepEvent, StepStream,
};
pub use events::{AgentEvent, EventSink, StreamCallbacks};
pub use reducer::{EventStreamReducer, MODEL_NODE};
pub use runner::{
    AgentLoop, AgentLoopFactory, DEFAULT_MAX_TURNS, DEFAULT_SYSTEM_PROMPT, TOOLS_NODE,
};

use crate::config::{ProviderStore, Settings, ToolServerStore};
use crate::mcp::{
    MultiServerClient, ServerConnectionState, ToolServerConnectionManager, ToolServerConnector,
};
use crate::provider::{Env, Message, ProviderResolver, SystemEnv, create_model};
use crate::{Error, Result};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Uninitialized,
    Initializing,
    Ready,
    Error(String),
}

/// One conversation backend: resolves the provider, connects tool servers,
/// and runs the engine.
///
/// `initialize` may be called concurrently; overlapping callers wait for the
/// one in flight. `run` and `stream_run` hold the engine for their duration,
/// so `reinitialize` waits for them to finish before replacing it.
pub struct AgentSession {
    settings: Settings,
    resolver: ProviderResolver,
    servers: ToolServerStore,
    factory: Arc<dyn EngineFactory>,
    manager: Mutex<ToolServerConnectionManager>,
    init_lock: Mutex<()>,
    status: std::sync::Mutex<SessionStatus>,
    engine: RwLock<Option<Arc<dyn ExecutionEngine>>>,
}

impl AgentSession {
    pub fn new(settings: Settings, providers: ProviderStore, servers: ToolServerStore) -> Self {
        let connector = Arc::new(MultiServerClient::new(settings.handshake_timeout()));
        Self {
            resolver: ProviderResolver::new(providers, Arc::new(SystemEnv)),
            servers,
            factory: Arc::new(AgentLoopFactory),
            manager: Mutex::new(ToolServerConnectionManager::new(connector)),
            init_lock: Mutex::new(()),
            status: std::sync::Mutex::new(SessionStatus::Uninitialized),
            engine: RwLock::new(None),
            settings,
        }
    }

    /// Read provider keys from `env` instead of the process environment.
    #[must_use]
    pub fn with_env(mut self, env: Arc<dyn Env>) -> Self {
        self.resolver = self.resolver.with_env(env);
        self
    }

    #[must_use]
    pub fn with_engine_factory(mut self, factory: Arc<dyn EngineFactory>) -> Self {
        self.factory = factory;
        self
    }

    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn ToolServerConnector>) -> Self {
        self.manager = Mutex::new(ToolServerConnectionManager::new(connector));
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn resolver(&self) -> &ProviderResolver {
        &self.resolver
    }

    pub fn status(&self) -> SessionStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_status(&self, status: SessionStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Connect tool servers and build the engine. A no-op once ready.
    ///
    /// Fails with [`Error::NoProviderConfigured`] when no provider resolves.
    /// Tool-server failures are logged and the session continues without them.
    pub async fn initialize(&self) -> Result<()> {
        let _init = self.init_lock.lock().await;
        if self.status() == SessionStatus::Ready {
            return Ok(());
        }
        let mut engine = self.engine.write().await;
        self.initialize_locked(&mut engine).await
    }

    /// Disconnect tool servers, drop the engine and initialize again.
    pub async fn reinitialize(&self) -> Result<()> {
        let _init = self.init_lock.lock().await;
        let mut engine = self.engine.write().await;
        self.manager.lock().await.disconnect();
        *engine = None;
        self.set_status(SessionStatus::Uninitialized);
        self.initialize_locked(&mut engine).await
    }

    async fn initialize_locked(&self, slot: &mut Option<Arc<dyn ExecutionEngine>>) -> Result<()> {
        self.set_status(SessionStatus::Initializing);

        let tools = {
            let servers = self.servers.enabled_servers();
            let mut manager = self.manager.lock().await;
            if servers.is_empty() {
                manager.disconnect();
            } else if let Err(e) = manager.connect(&servers).await {
                warn!("Failed to connect to tool servers: {e}");
            }
            manager.tools()
        };

        let model = match self.resolver.resolve().and_then(|cfg| {
            debug!(provider = %cfg.name, model = %cfg.model, "Resolved provider");
            create_model(&cfg)
        }) {
            Ok(model) => model,
            Err(e) => {
                error!("Agent initialization failed: {e}");
                self.set_status(SessionStatus::Error(e.to_string()));
                return Err(e);
            }
        };

        info!(model = %model.model(), tools = tools.len(), "Agent session ready");
        *slot = Some(self.factory.build(model, tools, &self.settings));
        self.set_status(SessionStatus::Ready);
        Ok(())
    }

    async fn ready_engine(
        &self,
    ) -> Result<tokio::sync::RwLockReadGuard<'_, Option<Arc<dyn ExecutionEngine>>>> {
        self.initialize().await?;
        Ok(self.engine.read().await)
    }

    /// One non-streaming invocation over `history`.
    pub async fn run(&self, history: Vec<Message>) -> Result<EngineResult> {
        let guard = self.ready_engine().await?;
        let engine = guard
            .as_ref()
            .ok_or_else(|| Error::Engine("Agent not initialized".to_string()))?;
        engine.invoke(history).await
    }

    /// Stream one invocation over `history`, delivering events to `sink`.
    ///
    /// Engine errors mid-stream fail the calls still pending and consumption
    /// goes on. Cancellation and a stalled stream also fail pending calls, then
    /// return [`Error::Cancelled`] or [`Error::StreamStalled`].
    pub async fn stream_run<S>(
        &self,
        history: Vec<Message>,
        sink: &mut S,
        cancel: Option<CancellationToken>,
    ) -> Result<()>
    where
        S: EventSink + ?Sized,
    {
        let guard = self.ready_engine().await?;
        let engine = guard
            .as_ref()
            .ok_or_else(|| Error::Engine("Agent not initialized".to_string()))?;
        let cancel = cancel.unwrap_or_default();
        let stale = self.settings.stream_stale_timeout();

        let engine_cancel = cancel.child_token();
        let mut steps = engine.stream(history, engine_cancel.clone()).await?;
        let mut reducer = EventStreamReducer::new();

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    emit_all(sink, reducer.fail_pending("Cancelled")).await;
                    return Err(Error::Cancelled);
                }
                next = tokio::time::timeout(stale, steps.next()) => next,
            };
            match next {
                Err(_) => {
                    warn!("Stream stale: no step for {}s", stale.as_secs());
                    engine_cancel.cancel();
                    emit_all(sink, reducer.fail_pending("Stream stalled")).await;
                    return Err(Error::StreamStalled(stale));
                }
                Ok(None) => break,
                Ok(Some(Ok(step))) => emit_all(sink, reducer.apply(&step)).await,
                Ok(Some(Err(e))) => {
                    warn!("Engine error during stream: {e}");
                    emit_all(sink, reducer.fail_pending(&e.to_string())).await;
                }
            }
        }
        Ok(())
    }

    pub async fn mcp_server_states(&self) -> HashMap<String, ServerConnectionState> {
        self.manager.lock().await.server_states()
    }

    pub async fn is_mcp_connected(&self) -> bool {
        self.manager.lock().await.is_connected()
    }
}

async fn emit_all<S>(sink: &mut S, events: Vec<AgentEvent>)
where
    S: EventSink + ?Sized,
{
    for event in events {
        sink.emit(event).await;
    }
}
