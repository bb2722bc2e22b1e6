//! hallpass - command-line access to the community site's admin back-office.
//!
//! Logs the admin in and out, reports the stored session, keeps a session
//! under watch, and reviews messages left through the contact form.

mod navigator;

use std::future::Future;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hallpass_core::auth::{FileStore, SessionStore};
use hallpass_core::models::ContactSubmission;
use hallpass_core::{ApiClient, AuthState, Config, RouteDecision, RouteGuard, SessionGuard, SessionScope};

use navigator::TerminalNavigator;

// ============================================================================
// Constants
// ============================================================================

/// View the CLI pretends to be on for admin commands
const CONTACTS_VIEW: &str = "/admin/contacts";

/// Log file written by `watch`
const LOG_FILE: &str = "hallpass.log";

/// How often `watch` re-reads the session file
const SESSION_REREAD: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "hallpass")]
#[command(version)]
#[command(about = "Admin session tool for the community site back-office")]
struct Cli {
    /// Override the admin API base URL
    #[arg(long, global = true, value_name = "URL")]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show whether a valid session is stored
    Status,
    /// Log in to the admin back-office
    Login {
        /// Admin email (defaults to HALLPASS_EMAIL or the last one used)
        #[arg(long, env = "HALLPASS_EMAIL")]
        email: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Keep the session under watch until Ctrl-C, reporting changes
    Watch,
    /// Review contact-form messages (requires login)
    Contacts {
        #[command(subcommand)]
        action: ContactsAction,
    },
    /// Use the public contact form
    Contact {
        #[command(subcommand)]
        action: ContactAction,
    },
}

#[derive(Subcommand)]
enum ContactsAction {
    /// List messages, newest first
    List {
        /// Only unread messages
        #[arg(long)]
        unread: bool,
    },
    /// Mark a message as read
    Read { id: String },
    /// Delete a message
    Delete { id: String },
}

#[derive(Subcommand)]
enum ContactAction {
    /// Send a message through the contact form
    Submit {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        message: String,
    },
}

/// Initialize the tracing subscriber for logging.
/// Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug).
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config ({}), using defaults", e);
            Config::default()
        }
    };
    if let Some(url) = cli.api_url.clone() {
        config.api_base_url = url;
    }

    let log_dir = match cli.command {
        Commands::Watch => config.cache_dir().ok(),
        _ => None,
    };
    if let Some(ref dir) = log_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    }
    let _log_guard = init_tracing(log_dir.as_deref());
    info!(api = %config.api_base_url, "hallpass starting");

    match cli.command {
        Commands::Status => status(&config),
        Commands::Login { email } => login(&mut config, email).await,
        Commands::Logout => logout(&config),
        Commands::Watch => watch(&config).await,
        Commands::Contacts { action } => contacts(&config, action).await,
        Commands::Contact { action } => contact(&config, action).await,
    }
}

/// Build the session guard over the on-disk store and start it
fn open_session(config: &Config, current_path: &str) -> Result<SessionScope> {
    let store: Arc<dyn SessionStore> = Arc::new(FileStore::new(config.session_path()?));
    let navigator = Arc::new(TerminalNavigator::new(current_path, config.admin_routes()));
    let api = ApiClient::new(&config.api_base_url, config.request_timeout())?;

    let guard = SessionGuard::new(store, navigator, config.admin_routes(), api);
    Ok(guard.start(config.sweep_interval()))
}

fn status(config: &Config) -> Result<()> {
    let scope = open_session(config, "/")?;
    let guard = scope.guard();

    println!("API:     {}", config.api_base_url);
    println!("Session: {}", guard.state().label());

    if guard.is_authenticated() {
        match guard.claims().and_then(|c| c.expires_at()) {
            Some(expires) => {
                let remaining = expires - chrono::Utc::now();
                println!(
                    "Expires: {} ({} minutes left)",
                    expires.format("%Y-%m-%d %H:%M UTC"),
                    remaining.num_minutes().max(0)
                );
            }
            None => println!("Expires: never (token has no expiry)"),
        }
    }
    Ok(())
}

async fn login(config: &mut Config, email: Option<String>) -> Result<()> {
    let login_path = config.login_path.clone();
    let scope = open_session(config, &login_path)?;

    let email = match email.or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    let password = match std::env::var("HALLPASS_PASSWORD") {
        Ok(password) if !password.is_empty() => password,
        _ => rpassword::prompt_password("Password: ")?,
    };

    if email.trim().is_empty() || password.is_empty() {
        anyhow::bail!("Email and password required");
    }

    scope
        .guard()
        .login(email.trim(), &password)
        .await
        .map_err(|e| anyhow::anyhow!("Login failed: {}", e))?;

    config.last_email = Some(email.trim().to_string());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("Logged in as {}", email.trim());
    Ok(())
}

fn logout(config: &Config) -> Result<()> {
    let scope = open_session(config, "/")?;
    scope.guard().logout();
    println!("Logged out");
    Ok(())
}

async fn watch(config: &Config) -> Result<()> {
    let scope = open_session(config, "/admin")?;

    println!("Session: {} (Ctrl-C to stop)", scope.guard().state().label());
    watch_session(scope.guard(), SESSION_REREAD, tokio::signal::ctrl_c(), |state| {
        println!("Session: {}", state.label());
    })
    .await;

    scope.shutdown();
    Ok(())
}

/// Report state changes until `stop` resolves.
///
/// Other hallpass processes write the session file without notifying this
/// one, so storage is re-read every `reread`.
async fn watch_session<S>(
    guard: &SessionGuard,
    reread: Duration,
    stop: S,
    mut report: impl FnMut(AuthState),
) where
    S: Future,
{
    let mut changes = guard.subscribe();
    let mut ticker = tokio::time::interval(reread);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                guard.validate();
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *changes.borrow_and_update();
                report(state);
            }
            _ = &mut stop => break,
        }
    }
}

/// Admin commands run behind the route guard, like an admin view would
async fn contacts(config: &Config, action: ContactsAction) -> Result<()> {
    let scope = open_session(config, CONTACTS_VIEW)?;

    match RouteGuard::new(Arc::clone(scope.guard())).check() {
        RouteDecision::Render => {}
        RouteDecision::Placeholder | RouteDecision::Redirect { .. } => {
            anyhow::bail!("Not logged in. Run `hallpass login` first.");
        }
    }

    let api = scope.api();
    match action {
        ContactsAction::List { unread } => {
            let mut messages = api.list_contacts().await?;
            messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            let shown: Vec<_> = messages.iter().filter(|m| !unread || !m.read).collect();

            if shown.is_empty() {
                println!("No messages");
            }
            for msg in shown {
                let when = msg
                    .created_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{} {} {}  {} <{}>  {}",
                    if msg.read { " " } else { "*" },
                    msg.id,
                    when,
                    msg.name,
                    msg.email,
                    msg.subject_display()
                );
                println!("    {}", msg.message.replace('\n', "\n    "));
            }
        }
        ContactsAction::Read { id } => {
            api.mark_contact_read(&id).await?;
            println!("Marked {} as read", id);
        }
        ContactsAction::Delete { id } => {
            api.delete_contact(&id).await?;
            println!("Deleted {}", id);
        }
    }

    if scope.guard().state() == AuthState::Unauthenticated {
        warn!("Session ended during command");
    }
    Ok(())
}

async fn contact(config: &Config, action: ContactAction) -> Result<()> {
    let ContactAction::Submit {
        name,
        email,
        subject,
        message,
    } = action;

    let form = ContactSubmission {
        name,
        email,
        subject,
        message,
    };
    if let Err(errors) = form.validate() {
        for error in &errors {
            eprintln!("  - {}", error);
        }
        anyhow::bail!("Contact form has {} problem(s)", errors.len());
    }

    let scope = open_session(config, "/contact")?;
    scope.api().submit_contact(&form.normalized()).await?;
    println!("Thanks! Your message has been sent.");
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}
