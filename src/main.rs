use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use erniebot_backend::BackendAdapter as _;
use erniebot_client::{ApiResponse, ErnieClient};
use erniebot_config::Config;
use futures_util::StreamExt as _;
use serde_json::{Value, json};
use std::{io::Write as _, path::PathBuf};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "erniebot", about = "erniebot: one-shot ERNIE Bot chat and embedding requests")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,
    /// Backend to use (aistudio / qianfan), overriding the configuration.
    #[arg(long, global = true)]
    api_type: Option<String>,
    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send a single chat message.
    Chat {
        /// Model name (ernie-bot / ernie-bot-turbo / ernie-bot-4).
        #[arg(short, long, default_value = "ernie-bot")]
        model: String,
        /// The user message.
        prompt: String,
        /// Print the answer as it streams in.
        #[arg(long)]
        stream: bool,
    },
    /// Compute embeddings for one or more texts.
    Embed {
        #[arg(short, long, default_value = "ernie-text-embedding")]
        model: String,
        #[arg(required = true)]
        inputs: Vec<String>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("erniebot=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(api_type) = cli.api_type {
        config.api_type = api_type;
    }
    let client = ErnieClient::from_config(&config).context("failed to set up client")?;
    tracing::info!(backend = %client.backend().kind(), "client ready");

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, cancelling request");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Chat {
            model,
            prompt,
            stream,
        } => cmd_chat(&client, model, prompt, stream, cancel).await,
        Commands::Embed { model, inputs } => cmd_embed(&client, model, inputs, cancel).await,
    }
}

async fn cmd_chat(
    client: &ErnieClient,
    model: String,
    prompt: String,
    stream: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let body = json!({
        "model": model,
        "messages": [{"role": "user", "content": prompt}],
        "stream": stream,
    });
    let response = client
        .chat_completions(body, cancel)
        .await
        .context("chat request failed")?;

    match response {
        ApiResponse::Stream(events) => {
            let mut events = events.json::<Value>();
            let mut stdout = std::io::stdout();
            while let Some(chunk) = events.next().await {
                let chunk = chunk.context("chat stream failed")?;
                if let Some(text) = chunk.get("result").and_then(Value::as_str) {
                    write!(stdout, "{text}")?;
                    stdout.flush()?;
                }
            }
            writeln!(stdout)?;
        }
        ApiResponse::Json { body, .. } => match body.get("result").and_then(Value::as_str) {
            Some(text) => println!("{text}"),
            None => println!("{}", serde_json::to_string_pretty(&body)?),
        },
        ApiResponse::Text { body, .. } => println!("{body}"),
    }
    Ok(())
}

async fn cmd_embed(
    client: &ErnieClient,
    model: String,
    inputs: Vec<String>,
    cancel: CancellationToken,
) -> Result<()> {
    let body = json!({"model": model, "input": inputs});
    let json = client
        .embeddings(body, cancel)
        .await
        .context("embedding request failed")?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
