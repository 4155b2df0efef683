#![deny(clippy::all)]

//! Headless interview recorder
//!
//! Records one interview session: opens a realtime transcription session,
//! prints the live transcript to the terminal, and finalizes on Ctrl-C.
//! The session id is taken from the first argument, or generated.

use anyhow::Context;
use intervox::api::HttpBackend;
use intervox::config::Settings;
use intervox::interview::{FlowEvent, InterviewFlow};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    // Initialize tracing for structured logging
    tracing_subscriber::fmt::init();

    let settings = Settings::load().context("Failed to load configuration")?;
    let backend = Arc::new(
        HttpBackend::new(
            &settings.backend.base_url,
            settings.backend.auth_token.clone(),
        )
        .context("Failed to build backend client")?,
    );

    let session_id = std::env::args()
        .nth(1)
        .unwrap_or_else(|| format!("session-{}", chrono::Local::now().format("%Y%m%d-%H%M%S")));

    let mut flow =
        match InterviewFlow::resume(backend.clone(), &session_id, settings.realtime_options())
            .await
        {
            Ok(flow) => flow,
            Err(e) => {
                info!("No stored session ({}), starting fresh", e);
                let mut flow =
                    InterviewFlow::new(backend, &session_id, settings.realtime_options());
                flow.set_title(format!(
                    "Interview {}",
                    chrono::Local::now().format("%Y-%m-%d %H:%M")
                ));
                flow
            }
        };
    flow.set_buttons(settings.action_buttons());

    let mut events = flow.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(FlowEvent::Partial { full_text }) => {
                    // Redraw the in-progress line in place
                    let line = full_text.lines().last().unwrap_or_default().to_string();
                    print!("\r\x1b[2K{line}");
                    let _ = std::io::stdout().flush();
                }
                Ok(FlowEvent::Utterance { utterance, .. }) => {
                    println!("\r\x1b[2K{utterance}");
                }
                Ok(FlowEvent::Connected) => info!("Transcription connected"),
                Ok(FlowEvent::Disconnected) => info!("Transcription disconnected"),
                Ok(FlowEvent::Warning { message }) => warn!("{}", message),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Display fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    flow.start_recording()
        .await
        .context("Failed to start recording")?;
    info!(session_id = %session_id, "Recording, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    println!();
    info!("Stopping");

    if let Err(e) = flow.stop_recording().await {
        error!("Stop failed: {}", e);
    }
    match flow.finalize().await {
        Ok(diarized) => {
            println!("\n--- Diarized transcript ---\n{diarized}");
        }
        Err(e) => error!("Finalize failed: {}", e),
    }

    printer.abort();
    Ok(())
}
