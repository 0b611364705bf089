// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use relational_roster::auth::{AuthError, SessionMonitor, SessionRefresher};
use relational_roster::backend::SignUpOutcome;
use relational_roster::config::{ClientConfig, ConfigError, LogFormat};
use relational_roster::coordinator::{RosterCoordinator, RosterSnapshot, RosterState};
use relational_roster::error::{ProviderError, RosterError};
use relational_roster::models::{AssetUpload, RecordId};
use relational_roster::providers::SupabaseClient;
use relational_roster::telemetry::init_tracing;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "roster")]
#[command(about = "Manage your roster of records")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in with email and password
    SignIn {
        #[arg(long)]
        email: String,
        #[arg(long, env = "ROSTER_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account
    SignUp {
        #[arg(long)]
        email: String,
        #[arg(long, env = "ROSTER_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign out and clear the local roster
    SignOut,
    /// List your records, newest first
    List,
    /// Add a record, optionally with an image
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        score: String,
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Delete a record and its image
    Delete { id: i64 },
    /// Keep the session fresh and print every roster change until Ctrl-C
    Watch,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Roster(#[from] RosterError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("failed to read image: {0}")]
    Image(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing(LogFormat::from_env());
    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<(), CliError> {
    let config = ClientConfig::from_env()?;
    let backend = Arc::new(SupabaseClient::from_config(&config)?);
    let monitor = Arc::new(SessionMonitor::start(backend).await);
    let roster = Arc::new(RosterCoordinator::new(
        Arc::clone(&monitor),
        &config.collections,
    ));

    match command {
        Command::SignIn { email, password } => {
            let session = monitor.sign_in(&email, &password).await?;
            println!(
                "Signed in as {}",
                session.email.as_deref().unwrap_or(&session.user_id)
            );
        }
        Command::SignUp { email, password } => match monitor.sign_up(&email, &password).await? {
            SignUpOutcome::SignedIn(session) => {
                println!("Account created; signed in as {}", session.user_id);
            }
            SignUpOutcome::ConfirmationRequired { email } => {
                println!("Account created; follow the link sent to {email} before signing in");
            }
        },
        Command::SignOut => {
            roster.logout().await?;
            println!("Signed out");
        }
        Command::List => {
            load(&roster, &monitor).await?;
            print_state(&roster.state());
        }
        Command::Add { name, score, image } => {
            load(&roster, &monitor).await?;
            let upload = match image {
                Some(path) => Some(AssetUpload::from_path(path).await?),
                None => None,
            };
            let record = roster.add_record(&name, &score, upload).await?;
            println!("Added record {}", record.id);
            print_state(&roster.state());
        }
        Command::Delete { id } => {
            load(&roster, &monitor).await?;
            roster.delete_record(RecordId(id)).await?;
            println!("Deleted record {id}");
            print_state(&roster.state());
        }
        Command::Watch => watch(roster, monitor).await,
    }
    Ok(())
}

/// Load the roster for the restored session; fails when signed out.
async fn load(
    roster: &RosterCoordinator<SupabaseClient>,
    monitor: &SessionMonitor<SupabaseClient>,
) -> Result<(), CliError> {
    let Some(session) = monitor.current_session() else {
        return Err(RosterError::Unauthenticated.into());
    };
    roster.on_session_change(Some(session)).await?;
    Ok(())
}

async fn watch(
    roster: Arc<RosterCoordinator<SupabaseClient>>,
    monitor: Arc<SessionMonitor<SupabaseClient>>,
) {
    let shutdown = CancellationToken::new();
    let mut snapshots = roster.subscribe();

    let refresher = tokio::spawn(SessionRefresher::new(monitor).run(shutdown.clone()));
    let coordinator = tokio::spawn(Arc::clone(&roster).run(shutdown.clone()));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                print_snapshot(&snapshot);
            }
            _ = &mut ctrl_c => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    shutdown.cancel();
    for task in [refresher, coordinator] {
        if let Err(e) = task.await {
            error!(error = %e, "Background task failed");
        }
    }
}

fn print_snapshot(snapshot: &RosterSnapshot) {
    match &snapshot.owner_id {
        Some(owner) => println!("[{}] {}", snapshot.state.label(), owner),
        None => println!("[{}]", snapshot.state.label()),
    }
    print_state(&snapshot.state);
}

fn print_state(state: &RosterState) {
    if let Some(message) = state.error_message() {
        println!("! {message}");
    }
    if state.records().is_empty() {
        println!("(no records)");
        return;
    }
    for record in state.records() {
        println!(
            "{}\t{}\t{}\t{}",
            record.id,
            record.display_name,
            record.score,
            record.asset_address.as_deref().unwrap_or("-")
        );
    }
}
