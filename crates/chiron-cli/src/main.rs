//! Chiron command-line front end.
//!
//! Drives the offline-first data layer against the on-device SQLite store.
//! No remote backend is configured in this build, so signed-in sessions
//! degrade to local-only writes exactly as they would with no network.
//!
//! ## Usage
//!
//! ```bash
//! chiron guest                          # continue without an account
//! chiron assess "twisted ankle" --severity minor
//! chiron history
//! chiron contacts add Alex 555-1111 --relationship sister
//! chiron contacts list
//! chiron contacts rm <id>
//! chiron chat add <assessment-id> "can I walk on it?" "rest it for 48h"
//! chiron chat list <assessment-id>
//! chiron status
//! chiron sign-out
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use chiron_store::LocalStore;
use chiron_sync::{
    ConnectivityMonitor, DetachedRemote, IdentityResolver, MemoryAuthProvider, MutationOutcome,
    RemoteOutcome, RemoteStore, RetryingRemote, SyncConfig, SyncEngine,
};
use chiron_types::{Assessment, ContactDraft, EntityId, Severity};

/// Offline-first emergency assessment data.
#[derive(Parser, Debug)]
#[command(name = "chiron")]
#[command(about = "Offline-first data layer for Chiron")]
struct Args {
    /// Config file (RON). Defaults to the platform config dir.
    #[arg(long)]
    config: Option<PathBuf>,

    /// SQLite database path; overrides the config file.
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show identity mode and what is stored.
    Status,
    /// Continue as guest (remembered across runs).
    Guest,
    /// Sign out and clear guest mode.
    SignOut,
    /// Record a new assessment.
    Assess {
        description: String,
        #[arg(long, default_value = "unknown")]
        severity: String,
    },
    /// List assessment history, newest first.
    History,
    /// Manage emergency contacts.
    #[command(subcommand)]
    Contacts(ContactsCommand),
    /// Follow-up questions on an assessment.
    #[command(subcommand)]
    Chat(ChatCommand),
}

#[derive(Subcommand, Debug)]
enum ContactsCommand {
    List,
    Add {
        name: String,
        phone: String,
        #[arg(long)]
        relationship: Option<String>,
    },
    Rm {
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum ChatCommand {
    Add {
        assessment: String,
        message: String,
        response: String,
    },
    List {
        assessment: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    let db_path = args
        .db
        .clone()
        .or_else(|| config.database_path())
        .context("no database path configured and no platform data dir")?;
    tracing::debug!(path = %db_path.display(), "opening local store");
    let local = LocalStore::open(&db_path)
        .with_context(|| format!("opening {}", db_path.display()))?;

    let remote: Arc<dyn RemoteStore> =
        Arc::new(RetryingRemote::new(DetachedRemote, config.retry.clone()));
    let identity = IdentityResolver::new(
        Arc::new(MemoryAuthProvider::new()),
        local.clone(),
        remote.clone(),
    );
    let engine = SyncEngine::new(
        local,
        remote,
        identity.clone(),
        ConnectivityMonitor::new(false),
        config,
    );
    identity.resolve().await;

    run(&engine, args.command).await
}

fn load_config(path: Option<&std::path::Path>) -> Result<SyncConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match SyncConfig::default_path() {
            Some(p) => p,
            None => return Ok(SyncConfig::default()),
        },
    };
    SyncConfig::load_or_default(&path).with_context(|| format!("loading {}", path.display()))
}

async fn run(engine: &SyncEngine, command: Command) -> Result<()> {
    match command {
        Command::Status => {
            let report = engine.load_user_data().await?;
            let state = engine.snapshot();
            println!("identity:    {}", report.identity);
            println!("offline:     {}", state.is_offline);
            println!("assessments: {}", state.assessment_history.len());
            println!("contacts:    {}", state.contacts.len());
        }
        Command::Guest => {
            engine.identity().continue_as_guest()?;
            println!("continuing as guest");
        }
        Command::SignOut => {
            engine.identity().sign_out().await?;
            println!("signed out");
        }
        Command::Assess {
            description,
            severity,
        } => {
            let severity = Severity::from_str(&severity)
                .map_err(|_| anyhow!("unknown severity: {severity}"))?;
            let out = engine
                .save_assessment(Assessment::new(description).with_severity(severity))
                .await?;
            report_remote(&out);
            println!("{}", out.entity.id);
        }
        Command::History => {
            engine.load_user_data().await?;
            for a in &engine.snapshot().assessment_history {
                println!(
                    "{}  {:<8}  {:<9}  {}",
                    a.id.short(),
                    a.severity.as_str(),
                    a.triage_status.as_str(),
                    a.description
                );
            }
        }
        Command::Contacts(ContactsCommand::List) => {
            engine.load_user_data().await?;
            for c in engine.snapshot().contacts.values() {
                let relationship = c.relationship.as_deref().unwrap_or("-");
                println!("{}  {}  {}  ({relationship})", c.id, c.name, c.phone);
            }
        }
        Command::Contacts(ContactsCommand::Add {
            name,
            phone,
            relationship,
        }) => {
            let mut draft = ContactDraft::new(name, phone);
            if let Some(r) = relationship {
                draft = draft.with_relationship(r);
            }
            let out = engine.save_contact(draft).await?;
            report_remote(&out);
            println!("{}", out.entity.id);
        }
        Command::Contacts(ContactsCommand::Rm { id }) => {
            let out = engine.remove_contact(&EntityId::new(id)).await?;
            report_remote(&out);
        }
        Command::Chat(ChatCommand::Add {
            assessment,
            message,
            response,
        }) => {
            let out = engine
                .save_chat_message(&EntityId::new(assessment), &message, &response)
                .await?;
            report_remote(&out);
            println!("{}", out.entity.id);
        }
        Command::Chat(ChatCommand::List { assessment }) => {
            for m in engine.chat_messages(&EntityId::new(assessment)).await? {
                println!("> {}\n  {}", m.message, m.response);
            }
        }
    }
    Ok(())
}

/// Surface a remote failure as a notice; the local write already succeeded.
fn report_remote<T>(out: &MutationOutcome<T>) {
    match &out.remote {
        RemoteOutcome::Failed(e) if e.is_retryable() => {
            eprintln!("saved on this device only ({e}); will not sync until retried");
        }
        RemoteOutcome::Failed(e) => {
            eprintln!("saved on this device, but the server refused it: {e}");
        }
        RemoteOutcome::Synced | RemoteOutcome::Skipped(_) => {}
    }
}
