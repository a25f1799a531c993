//! taskdeck: command-line front end for the task dashboard backend.
//!
//! Tokens persist between invocations in `<config dir>/taskdeck/tokens.json`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use taskdeck::session::{FileStore, TokenStore};
use taskdeck::{
    ClientConfig, Dashboard, SessionEvent, SessionManager, TaskRecord, TaskSubmissionGateway,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Submit tasks and follow their results
#[derive(Parser)]
#[command(name = "taskdeck")]
#[command(about = "Submit tasks to a taskdeck backend and follow their results", long_about = None)]
#[command(version)]
struct Cli {
    /// Backend base URL, e.g. https://tasks.example.com:443 (overrides config and env)
    #[arg(long, global = true)]
    server: Option<String>,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Token file (defaults to the user config directory)
    #[arg(long, global = true)]
    token_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the token pair
    Login {
        /// Account name
        username: String,

        /// Password (read from stdin when omitted)
        #[arg(long, env = "TASKDECK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Forget the stored tokens
    Logout,

    /// Show the logged-in user and token expiry
    Whoami,

    /// Submit a generate_random_number task
    Random {
        /// Lower bound (inclusive)
        #[arg(long, default_value = "1", allow_negative_numbers = true)]
        min: i64,

        /// Upper bound (inclusive)
        #[arg(long, default_value = "100", allow_negative_numbers = true)]
        max: i64,
    },

    /// Submit a reverse_string task
    Reverse {
        /// Text to reverse
        text: String,
    },

    /// List tasks known to the server
    Tasks,

    /// Show one task from the server
    Show {
        /// Task id
        task_id: String,
    },

    /// Follow task updates live until Ctrl-C
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    let token_path = match cli.token_file {
        Some(path) => path,
        None => default_token_path()?,
    };
    let store = FileStore::open(&token_path)
        .with_context(|| format!("opening token store {}", token_path.display()))?;
    let session = SessionManager::with_reqwest(config, TokenStore::new(Arc::new(store)))?;
    let gateway = TaskSubmissionGateway::new(session.clone());

    match cli.command {
        Commands::Login { username, password } => {
            let password = match password {
                Some(password) => password,
                None => read_password()?,
            };
            let claims = session.login(&username, &password).await?;
            println!(
                "Logged in as {}",
                claims.username().unwrap_or(username.as_str())
            );
        },
        Commands::Logout => {
            session.logout()?;
            println!("Logged out");
        },
        Commands::Whoami => whoami(&session),
        Commands::Random { min, max } => {
            let submitted = with_relogin_hint(gateway.generate_random_number(min, max).await)?;
            println!("Submitted {}", submitted.task_id);
        },
        Commands::Reverse { text } => {
            let submitted = with_relogin_hint(gateway.reverse_string(&text).await)?;
            println!("Submitted {}", submitted.task_id);
        },
        Commands::Tasks => {
            let tasks = with_relogin_hint(gateway.list_tasks().await)?;
            println!("{}", serde_json::to_string_pretty(&tasks)?);
        },
        Commands::Show { task_id } => {
            let task = with_relogin_hint(gateway.get_task(&task_id).await)?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        },
        Commands::Watch => watch(session).await?,
    }

    Ok(())
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let config = match (&cli.server, &cli.config) {
        (Some(server), _) => ClientConfig::from_base_url(server)?,
        (None, Some(path)) => ClientConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        (None, None) => ClientConfig::from_env(),
    };
    Ok(config)
}

fn default_token_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().context("no user config directory on this platform")?;
    Ok(dir.join("taskdeck").join("tokens.json"))
}

fn read_password() -> Result<String> {
    eprint!("Password: ");
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("reading password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn with_relogin_hint<T>(result: taskdeck::Result<T>) -> Result<T> {
    result.map_err(|e| {
        if e.is_session_expired() {
            eprintln!("Your session has expired. Run `taskdeck login <username>` again.");
        }
        anyhow::Error::new(e)
    })
}

fn whoami(session: &SessionManager) {
    match session.current_user() {
        Some(claims) => {
            let name = claims
                .username()
                .map(str::to_string)
                .or_else(|| claims.user_id())
                .unwrap_or_else(|| "unknown user".to_string());
            let expiry = claims
                .exp
                .and_then(|exp| chrono::DateTime::from_timestamp(exp, 0))
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "never".to_string());
            let state = if claims.is_valid() { "valid" } else { "expired" };
            println!("{name} (access token {state}, expires {expiry})");
        },
        None => println!("Not logged in"),
    }
}

async fn watch(session: SessionManager) -> Result<()> {
    let mut events = session.subscribe();
    let dashboard = Dashboard::with_tungstenite(session);
    with_relogin_hint(dashboard.mount().await)?;
    println!("Watching task updates, Ctrl-C to stop");

    let mut revisions = dashboard.watch();
    let mut seen: HashMap<String, TaskRecord> = HashMap::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                // Oldest first so new tasks print in arrival order
                for task in dashboard.tasks().into_iter().rev() {
                    if seen.get(&task.task_id) != Some(&task) {
                        print_task(&task);
                        seen.insert(task.task_id.clone(), task);
                    }
                }
            },
            event = events.recv() => {
                if let Ok(SessionEvent::Expired) = event {
                    eprintln!("Your session has expired. Run `taskdeck login <username>` again.");
                    break;
                }
            },
        }
    }

    dashboard.unmount().await;
    Ok(())
}

fn print_task(task: &TaskRecord) {
    let detail = match (&task.result, &task.error) {
        (Some(result), _) => format!(" -> {result}"),
        (None, Some(error)) => format!(" ({error})"),
        (None, None) => String::new(),
    };
    println!(
        "[{}] {} {} {}{}",
        task.received_at.format("%H:%M:%S"),
        task.task_id,
        task.task_type,
        task.status,
        detail
    );
}
