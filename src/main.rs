use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use cthulu_stream::config::Config;
use cthulu_stream::messages::{self, ProcessingResult};
use cthulu_stream::processor::{MessageProcessor, RawFrame};
use cthulu_stream::session::{ChatSession, Session, SessionHandle, StepSession, spawn_session};
use cthulu_stream::transport;

#[derive(Parser)]
#[command(name = "cthulu-stream", about = "Replay agent workflow frame logs")]
enum Cli {
    /// Feed a frame log (one frame per line) through a session and print its state
    Replay {
        /// Frame log to read; stdin when omitted or "-"
        file: Option<PathBuf>,
        /// Run a step-by-step session instead of a chat session
        #[arg(long)]
        step: bool,
        /// URL substituted into image content blocks
        #[arg(long)]
        image_url: Option<String>,
        /// Print every state update instead of only the final state
        #[arg(long)]
        follow: bool,
        /// Answer step control requests with continue
        #[arg(long)]
        auto_continue: bool,
    },
    /// Run a single frame through the processor and print the result
    Decode {
        frame: String,
        #[arg(long)]
        image_url: Option<String>,
        /// Print a participants roster in the `{all, users}` shape
        #[arg(long)]
        legacy_participants: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    let mut config = Config::from_env();
    let _guard = init_tracing(&config);

    match cli {
        Cli::Replay {
            file,
            step,
            image_url,
            follow,
            auto_continue,
        } => {
            if image_url.is_some() {
                config.image_url = image_url;
            }
            if step {
                let session = StepSession::new(&config).with_auto_continue(auto_continue);
                replay(spawn_session(session), file, follow).await
            } else {
                replay(spawn_session(ChatSession::new(&config)), file, follow).await
            }
        }
        Cli::Decode {
            frame,
            image_url,
            legacy_participants,
        } => {
            let processor = MessageProcessor::new(config.processor_config());
            let image_url = image_url.or(config.image_url);
            let result = processor.process(&RawFrame::Text(frame), None, image_url.as_deref());
            match result {
                Some(ProcessingResult::Participants(roster)) if legacy_participants => {
                    print_json(&json!({ "participants": messages::legacy_participants(&roster) }))
                }
                other => print_json(&other),
            }
        }
    }
}

fn init_tracing(config: &Config) -> sentry::ClientInitGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cthulu_stream=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_tree::HierarchicalLayer::new(2).with_targets(true).with_bracketed_fields(false))
        .with(sentry::integrations::tracing::layer().event_filter(
            |metadata| match *metadata.level() {
                tracing::Level::ERROR => sentry::integrations::tracing::EventFilter::Event,
                tracing::Level::WARN | tracing::Level::INFO => {
                    sentry::integrations::tracing::EventFilter::Breadcrumb
                }
                _ => sentry::integrations::tracing::EventFilter::Ignore,
            },
        ))
        .init();

    sentry::init((
        config.sentry_dsn.clone().unwrap_or_default(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(config.environment.clone().into()),
            send_default_pii: false,
            enable_logs: true,
            ..Default::default()
        },
    ))
}

async fn replay<S>(handle: SessionHandle<S>, file: Option<PathBuf>, follow: bool) -> Result<()>
where
    S: Session,
    S::Snapshot: Serialize,
{
    let SessionHandle {
        input,
        mut snapshots,
        mut outbound,
        task,
    } = handle;

    let printer = follow.then(|| {
        tokio::spawn(async move {
            loop {
                match snapshots.recv().await {
                    Ok(snapshot) => {
                        if let Err(e) = print_json(&snapshot) {
                            tracing::warn!(error = %e, "failed to print snapshot");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "snapshot printer lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    });

    // A replay has no backend to answer, so responses are only logged.
    let responder = tokio::spawn(async move {
        while let Some(response) = outbound.recv().await {
            match serde_json::to_string(&response) {
                Ok(json) => tracing::info!(response = %json, "outbound response"),
                Err(e) => tracing::warn!(error = %e, "failed to encode response"),
            }
        }
    });

    let read = match file.filter(|p| p.as_os_str() != "-") {
        Some(path) => transport::replay_file(&path, &input).await,
        None => transport::forward_lines(tokio::io::stdin(), &input).await,
    };
    drop(input);

    let state = task.await.context("session task failed")?;
    responder.await.context("response logger failed")?;
    match printer {
        Some(printer) => printer.await.context("snapshot printer failed")?,
        None => print_json(&state)?,
    }

    let forwarded = read?;
    tracing::info!(frames = forwarded, "replay finished");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to encode state")?;
    println!("{json}");
    Ok(())
}
