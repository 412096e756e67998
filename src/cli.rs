//! Command-line surface for manual use: one-shot runs and config inspection.

use crate::agent::{AgentEvent, AgentSession};
use crate::config::{FileStore, ProviderStore, Settings, ToolServerStore};
use crate::mcp::{ServerConnectionState, ToolServerDraft, Transport};
use crate::provider::{Protocol, ProviderDraft, ProviderKind, ProviderResolver, SystemEnv};
use crate::transcript::Transcript;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Session core for a terminal coding agent
#[derive(Parser, Debug)]
#[command(name = "agentlite", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding config.toml and the provider/server documents
    #[arg(long, global = true, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stream a one-shot answer
    Run(RunArgs),
    /// List or edit model providers
    Providers(ProvidersArgs),
    /// List or edit tool servers, or connect and show their states
    Servers(ServersArgs),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// The prompt (use "-" to read from stdin)
    #[arg(required = true)]
    pub prompt: String,

    /// Output format
    #[arg(short = 'o', long, default_value = "text", value_enum)]
    pub output_format: OutputFormat,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    StreamJson,
}

#[derive(Parser, Debug)]
pub struct ProvidersArgs {
    #[command(subcommand)]
    pub action: Option<ProviderAction>,
}

#[derive(Subcommand, Debug)]
pub enum ProviderAction {
    /// List providers and the one that would be used (default)
    List,
    /// Add a provider
    Add(AddProviderArgs),
    /// Remove a provider
    Remove { id: String },
    /// Make a provider the default
    Default { id: String },
    /// Enable or disable a provider
    Toggle { id: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum KindArg {
    Openai,
    Anthropic,
    Custom,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum ProtocolArg {
    #[default]
    Openai,
    Anthropic,
}

#[derive(Parser, Debug)]
pub struct AddProviderArgs {
    #[arg(long)]
    pub name: String,

    #[arg(long = "type", value_enum)]
    pub kind: KindArg,

    #[arg(long)]
    pub model: String,

    /// Leave unset to read {TYPE}_API_KEY at run time
    #[arg(long)]
    pub api_key: Option<String>,

    #[arg(long)]
    pub base_url: Option<String>,

    /// Wire protocol of a custom provider
    #[arg(long, value_enum, default_value = "openai")]
    pub protocol: ProtocolArg,

    #[arg(long)]
    pub temperature: Option<f32>,

    #[arg(long)]
    pub max_tokens: Option<u32>,
}

impl AddProviderArgs {
    fn into_draft(self) -> ProviderDraft {
        let kind = match self.kind {
            KindArg::Openai => ProviderKind::OpenAI,
            KindArg::Anthropic => ProviderKind::Anthropic,
            KindArg::Custom => ProviderKind::Custom {
                protocol: match self.protocol {
                    ProtocolArg::Openai => Protocol::OpenAI,
                    ProtocolArg::Anthropic => Protocol::Anthropic,
                },
            },
        };
        let mut draft = ProviderDraft::new(self.name, kind, self.model);
        draft.api_key = self.api_key.unwrap_or_default();
        draft.base_url = self.base_url;
        draft.temperature = self.temperature;
        draft.max_tokens = self.max_tokens;
        draft
    }
}

#[derive(Parser, Debug)]
pub struct ServersArgs {
    #[command(subcommand)]
    pub action: Option<ServerAction>,
}

#[derive(Subcommand, Debug)]
pub enum ServerAction {
    /// Connect to the enabled servers and print their states (default)
    Status,
    /// List configured servers without connecting
    List,
    /// Add a server launched as a child process
    AddStdio {
        #[arg(long)]
        name: String,
        command: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Add a server reached over HTTP
    AddHttp {
        #[arg(long)]
        name: String,
        url: String,
    },
    /// Remove a server
    Remove { id: String },
    /// Enable or disable a server
    Toggle { id: String },
}

/// Settings, honoring a `--config-dir` override.
pub fn load_settings(config_dir: Option<PathBuf>) -> Result<Settings> {
    let Some(dir) = config_dir else {
        return Settings::load().context("failed to load settings");
    };
    let mut settings =
        Settings::load_from(&dir.join("config.toml")).context("failed to load settings")?;
    settings.config_dir = dir;
    Ok(settings)
}

fn stores(settings: &Settings) -> (ProviderStore, ToolServerStore) {
    let store = Arc::new(FileStore::new(settings.config_dir.clone()));
    (ProviderStore::new(store.clone()), ToolServerStore::new(store))
}

pub async fn run(cli: Cli) -> Result<ExitCode> {
    let settings = load_settings(cli.config_dir)?;
    match cli.command {
        Commands::Run(args) => run_prompt(settings, args).await,
        Commands::Providers(args) => providers(&settings, args.action.unwrap_or(ProviderAction::List)),
        Commands::Servers(args) => servers(settings, args.action.unwrap_or(ServerAction::Status)).await,
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum JsonEvent<'a> {
    TextDelta { text: &'a str },
    ToolCallStart { id: &'a str, name: &'a str },
    ToolCallComplete { id: &'a str },
    ToolCallError { id: &'a str, error: &'a str },
}

impl<'a> From<&'a AgentEvent> for JsonEvent<'a> {
    fn from(event: &'a AgentEvent) -> Self {
        match event {
            AgentEvent::TextDelta(text) => Self::TextDelta { text },
            AgentEvent::ToolCallStart(record) => Self::ToolCallStart {
                id: &record.id,
                name: &record.name,
            },
            AgentEvent::ToolCallComplete { id, .. } => Self::ToolCallComplete { id },
            AgentEvent::ToolCallError { id, error } => Self::ToolCallError { id, error },
        }
    }
}

fn render(event: &AgentEvent, format: OutputFormat) -> Result<()> {
    let mut stdout = io::stdout().lock();
    match format {
        OutputFormat::StreamJson => {
            writeln!(stdout, "{}", serde_json::to_string(&JsonEvent::from(event))?)?;
        }
        OutputFormat::Text => match event {
            AgentEvent::TextDelta(text) => write!(stdout, "{text}")?,
            AgentEvent::ToolCallStart(record) => eprintln!("\n[tool] {} ({})", record.name, record.id),
            AgentEvent::ToolCallComplete { .. } => {}
            AgentEvent::ToolCallError { id, error } => eprintln!("[tool {id} failed] {error}"),
        },
    }
    stdout.flush()?;
    Ok(())
}

async fn run_prompt(settings: Settings, args: RunArgs) -> Result<ExitCode> {
    let prompt = if args.prompt == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer.trim().to_string()
    } else {
        args.prompt
    };
    if prompt.is_empty() {
        anyhow::bail!("Empty prompt");
    }

    let (providers, servers) = stores(&settings);
    let session = AgentSession::new(settings, providers, servers);

    let mut transcript = Transcript::new();
    transcript.push_user(prompt);
    let history = transcript.to_chat_history();
    let message_id = transcript.start_assistant();

    let (mut tx, mut rx) = mpsc::channel(64);
    let format = args.output_format;
    let printer = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            if let Err(e) = render(&event, format) {
                tracing::warn!("Failed to write output: {e}");
            }
            events.push(event);
        }
        events
    });

    let result = session.stream_run(history, &mut tx, None).await;
    drop(tx);
    let events = printer.await.context("output task failed")?;
    for event in &events {
        transcript.apply(&message_id, event);
    }
    transcript.finish_streaming(&message_id);
    if matches!(format, OutputFormat::Text) {
        println!();
    }

    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) if e.is_setup_required() => {
            eprintln!("{e}");
            eprintln!("Add one with `agentlite providers add`.");
            Ok(ExitCode::from(2))
        }
        Err(e) => Err(e.into()),
    }
}

fn providers(settings: &Settings, action: ProviderAction) -> Result<ExitCode> {
    let (store, _) = stores(settings);
    match action {
        ProviderAction::List => {
            let resolver = ProviderResolver::new(store.clone(), Arc::new(SystemEnv));
            let list = store.providers();
            if list.is_empty() {
                println!("No providers configured.");
            }
            for p in &list {
                println!(
                    "{} {:<24} {:<10} {:<28} {}{}",
                    if p.is_default { "*" } else { " " },
                    p.name,
                    p.kind.type_name(),
                    p.model,
                    p.id,
                    if p.enabled { "" } else { " (disabled)" },
                );
            }
            match resolver.resolve() {
                Ok(active) => println!("\nActive: {} ({})", active.name, active.model),
                Err(e) => println!("\n{e}"),
            }
        }
        ProviderAction::Add(args) => {
            let draft = args.into_draft();
            draft.validate(&SystemEnv)?;
            let config = store.add(draft)?;
            println!("Added {} ({})", config.name, config.id);
        }
        ProviderAction::Remove { id } => {
            store.delete(&id)?;
            println!("Removed {id}");
        }
        ProviderAction::Default { id } => {
            store.set_default(&id)?;
            println!("Default provider is now {id}");
        }
        ProviderAction::Toggle { id } => {
            let enabled = store.toggle(&id)?;
            println!("{id} {}", if enabled { "enabled" } else { "disabled" });
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn servers(settings: Settings, action: ServerAction) -> Result<ExitCode> {
    let (providers, store) = stores(&settings);
    match action {
        ServerAction::Status => {
            let configured = store.servers();
            let session = AgentSession::new(settings, providers, store);
            if let Err(e) = session.initialize().await {
                eprintln!("{e}");
            }
            let states = session.mcp_server_states().await;
            if configured.is_empty() {
                println!("No tool servers configured.");
            }
            for server in &configured {
                let state = states
                    .get(&server.id)
                    .cloned()
                    .unwrap_or(ServerConnectionState::Disconnected);
                println!("{:<24} {:<6} {state}", server.name, server.transport.kind());
            }
        }
        ServerAction::List => {
            for server in store.servers() {
                println!(
                    "{:<24} {:<6} {}{}",
                    server.name,
                    server.transport.kind(),
                    server.id,
                    if server.enabled { "" } else { " (disabled)" },
                );
            }
        }
        ServerAction::AddStdio {
            name,
            command,
            args,
        } => {
            let transport = Transport::Stdio {
                command,
                args,
                env: None,
                cwd: None,
            };
            add_server(&store, ToolServerDraft::new(name, transport))?;
        }
        ServerAction::AddHttp { name, url } => {
            add_server(&store, ToolServerDraft::new(name, Transport::http(url)))?;
        }
        ServerAction::Remove { id } => {
            store.delete(&id)?;
            println!("Removed {id}");
        }
        ServerAction::Toggle { id } => {
            let enabled = store.toggle(&id)?;
            println!("{id} {}", if enabled { "enabled" } else { "disabled" });
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn add_server(store: &ToolServerStore, draft: ToolServerDraft) -> Result<()> {
    draft.validate()?;
    let config = store.add(draft)?;
    println!("Added {} ({})", config.name, config.id);
    Ok(())
}
