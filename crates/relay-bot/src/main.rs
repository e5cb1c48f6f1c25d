mod config;
mod console;

use std::sync::Arc;

use relay_core::{Assistant, Dispatcher, InboundMessage};
use serde_json::Map;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, LoggingConfig};
use crate::console::{ConsoleOperator, ConsoleTransport, Input, HELP};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let config = Config::load()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    init_logging(&config.logging);

    tracing::info!(
        provider = %config.assistant.provider,
        model = %config.assistant.default_model,
        storage = %config.assistant.storage_provider,
        "Starting relay bot"
    );

    let assistant = Arc::new(
        Assistant::builder()
            .config(config.assistant.clone())
            .human_handlers(Arc::new(ConsoleOperator))
            .build()
            .await?,
    );

    let dispatcher = Dispatcher::new(assistant.clone())
        .with_transport(Arc::new(ConsoleTransport))
        .with_options(config.dispatch_options());

    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                None
            }
        };
        let Some(line) = line else {
            break;
        };

        match Input::parse(&line) {
            Ok(Input::Quit) => break,
            Ok(input) => run_input(&dispatcher, input).await,
            Err(message) => println!("?? {}", message),
        }
    }

    assistant.shutdown().await?;
    Ok(())
}

async fn run_input(dispatcher: &Dispatcher, input: Input) {
    let assistant = dispatcher.assistant();

    match input {
        Input::Message { chat_id, text } => {
            let event = InboundMessage::new(chat_id, text);
            match dispatcher.handle_event(&event).await {
                Ok(Some(result)) if result.data.is_some() => {
                    let data = serde_json::to_string(&result.data).unwrap_or_default();
                    println!("[{}] {:?} {}", event.chat_id, result.kind, data);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(chat_id = %event.chat_id, error = %e, "Dispatch failed");
                    println!("?? {}", e);
                }
            }
        }
        Input::Handoffs => {
            let chats = assistant.human_mode_chats();
            if chats.is_empty() {
                println!("No chats with a human agent");
            }
            for state in chats {
                println!(
                    "{}  since {}  {}",
                    state.thread_id,
                    state.handoff_time.format("%H:%M:%S"),
                    state.reason
                );
            }
        }
        Input::Handoff { chat_id, reason } => {
            let mut metadata = Map::new();
            metadata.insert("source".to_string(), "operator".into());
            if let Err(e) = assistant.handoff_to_human(&chat_id, &reason, metadata).await {
                println!("?? {}", e);
            }
        }
        Input::Release { chat_id, summary } => {
            match assistant.release_to_ai(&chat_id, &summary, Map::new()).await {
                Ok(true) => {}
                Ok(false) => println!("?? {} is not with a human agent", chat_id),
                Err(e) => println!("?? {}", e),
            }
        }
        Input::Stats => match serde_json::to_string_pretty(&assistant.stats()) {
            Ok(stats) => println!("{}", stats),
            Err(e) => println!("?? {}", e),
        },
        Input::Help => println!("{}", HELP),
        Input::Quit | Input::Empty => {}
    }
}

fn init_logging(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Logs go to stderr so they do not interleave with the conversation
    let registry = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                .init();
        }
    }
}
