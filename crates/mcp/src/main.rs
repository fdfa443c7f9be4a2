use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use gsuite_tools_core::{
    http_client, CredentialManager, GatewayConfig, GoogleAuthFlow, GoogleServiceFactory,
    ServiceRegistry, TokenStore,
};
use gsuite_tools_mcp::{http, list_tools, Dispatcher, McpServer};

#[derive(Parser)]
#[command(name = "gsuite-tools-mcp")]
#[command(version)]
#[command(about = "Google Calendar and Gmail tools over MCP or HTTP")]
struct Cli {
    #[arg(long, global = true, env = "GSUITE_TOOLS_CONFIG", help = "JSON config file")]
    config: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        env = "GSUITE_TOOLS_CLIENT_SECRET",
        help = "OAuth client secret file"
    )]
    client_secret: Option<PathBuf>,
    #[arg(long, global = true, env = "GSUITE_TOOLS_TOKEN", help = "Token store file")]
    token: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        env = "GSUITE_TOOLS_TIMEOUT",
        help = "Provider request timeout in seconds"
    )]
    timeout: Option<u64>,
    #[arg(long, global = true, help = "Fail instead of opening the browser consent flow")]
    non_interactive: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve MCP over stdin/stdout
    Stdio,
    /// Serve the HTTP adapter
    Http {
        #[arg(
            short,
            long,
            env = "GSUITE_TOOLS_BIND",
            help = "Listen address [default: from config]"
        )]
        bind: Option<String>,
    },
    /// Run the consent flow now and store the token
    Auth,
    /// Print the tool catalog
    Tools,
}

impl Cli {
    fn gateway_config(&self) -> Result<GatewayConfig> {
        let mut config = GatewayConfig::load_or_default(self.config.as_deref())?;
        if let Some(path) = &self.client_secret {
            config.client_secret_path = path.clone();
        }
        if let Some(path) = &self.token {
            config.token_path = path.clone();
        }
        if let Some(secs) = self.timeout {
            config.request_timeout_secs = secs;
        }
        if self.non_interactive {
            config.interactive_consent = false;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = cli.gateway_config()?;

    match cli.command.unwrap_or(Commands::Stdio) {
        Commands::Stdio => run_stdio(build_registry(&config)?),
        Commands::Http { bind } => {
            let bind = bind.unwrap_or_else(|| config.http_bind.clone());
            run_http(build_registry(&config)?, &bind)
        }
        Commands::Auth => {
            let registry = build_registry(&config)?;
            registry.credentials().reauthorize()?;
            eprintln!("Token saved to {}", config.token_path.display());
            Ok(())
        }
        Commands::Tools => {
            let tools: Vec<_> = list_tools().iter().map(|t| t.definition()).collect();
            println!("{}", serde_json::to_string_pretty(&tools)?);
            Ok(())
        }
    }
}

/// Logs go to stderr; stdout carries the protocol.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// The blocking client is built here, outside any async runtime.
fn build_registry(config: &GatewayConfig) -> Result<ServiceRegistry> {
    let client = http_client(config.request_timeout())?;
    let flow = GoogleAuthFlow::new(
        client.clone(),
        config.client_secret_path.clone(),
        config.consent_timeout(),
    );
    let credentials = CredentialManager::new(
        TokenStore::new(config.token_path.clone()),
        Arc::new(flow),
        config.interactive_consent,
    );
    Ok(ServiceRegistry::new(
        credentials,
        Box::new(GoogleServiceFactory::new(client)),
    ))
}

fn run_stdio(registry: ServiceRegistry) -> Result<()> {
    let mut server = McpServer::new(Arc::new(Dispatcher::new(Arc::new(registry))));
    tracing::info!("serving MCP on stdio");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let response = server.handle_request(&line);
        if let Some(resp) = response {
            writeln!(stdout, "{}", resp)?;
            stdout.flush()?;
        }
    }

    tracing::info!("stdin closed, exiting");
    Ok(())
}

fn run_http(registry: ServiceRegistry, bind: &str) -> Result<()> {
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(registry)));
    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;

    runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind(bind)
            .await
            .with_context(|| format!("failed to bind {}", bind))?;
        http::serve(listener, dispatcher.clone())
            .await
            .context("http server failed")
    })?;

    // The blocking client must not be dropped inside the runtime.
    drop(runtime);
    drop(dispatcher);
    Ok(())
}
