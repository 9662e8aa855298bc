//! Command-line driver for a single interview session.
//!
//! Connects a session for the given candidate, prints state changes and
//! coaching suggestions as they arrive, and ends the session on Ctrl-C
//! (or when the remote side hangs up).

use std::io::IsTerminal;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use intervox::session::{InterviewSession, SessionDeps, SessionPhase};
use intervox::SessionSettings;

#[derive(Parser)]
#[command(name = "intervox", version, about = "Live interview session runner")]
struct Cli {
    /// Candidate to interview
    #[arg(short, long)]
    candidate: String,

    /// Log filter (overrides RUST_LOG)
    #[arg(long, default_value = "intervox=info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env first so settings and the log filter can come from it.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log)),
        )
        .with_ansi(std::io::stdout().is_terminal())
        .init();

    let settings = SessionSettings::from_env().context("loading session settings")?;
    let deps = SessionDeps::from_settings(&settings);
    let session = InterviewSession::new(cli.candidate, settings, deps);
    info!(session_id = %session.session_id(), "session created");

    session.start().await.context("starting session")?;

    let mut snapshots = session.subscribe();
    let mut last_suggestion_count = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, ending session");
                session.end().await;
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if snapshot.phase.is_terminal() {
                    session.end().await;
                    break;
                }
                let suggestions = session.suggestions();
                // Newest first, so new entries since the last print lead.
                for entry in suggestions.iter().take(suggestions.len().saturating_sub(last_suggestion_count)) {
                    println!("[coach/{}] {}", entry.category, entry.suggestion_text);
                }
                last_suggestion_count = suggestions.len();
            }
        }
    }

    let transcript = session.transcript_text();
    if transcript.is_empty() {
        println!("(no transcript captured)");
    } else {
        println!("--- transcript ---");
        println!("{transcript}");
    }
    let final_phase = session.phase();
    if final_phase == SessionPhase::Failed {
        if let Some(error) = session.snapshot().error {
            anyhow::bail!("session failed: {error}");
        }
    }
    Ok(())
}
