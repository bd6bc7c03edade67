//! taskflow - task manager with AI assistance
//!
//! Serves the task store and AI proxy over HTTP, and drives the same
//! mutation engine and AI gateway from the command line.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use taskflow::ai::transport::http_client;
use taskflow::ai::{AiGateway, DirectTransport, TransportChain};
use taskflow::api;
use taskflow::cache::QueryCache;
use taskflow::config::{self, Config};
use taskflow::db::Database;
use taskflow::engine::MutationEngine;
use taskflow::format::{TaskStats, format_due, is_overdue};
use taskflow::models::{NewTask, Priority, Status, Task, TaskPatch, ViewFilter, ViewSort};
use taskflow::session::Session;

#[derive(Parser)]
#[command(name = "taskflow")]
#[command(about = "Task manager with optimistic sync and AI assistance")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the task and AI proxy server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Generate a new API token
    Token {
        /// User the token authenticates as
        #[arg(short, long)]
        name: Option<String>,

        /// List all configured tokens
        #[arg(long)]
        list: bool,

        /// Revoke a token by name
        #[arg(long)]
        revoke: Option<String>,
    },

    /// Initialize a new config file
    Init {
        /// Output path for config file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage tasks in the local database
    Task {
        /// User whose tasks to manage
        #[arg(short, long, env = "TASKFLOW_USER")]
        user: String,

        #[command(subcommand)]
        action: TaskCommand,
    },

    /// AI assistance
    Ai {
        /// User whose tasks to read or add to
        #[arg(short, long, env = "TASKFLOW_USER")]
        user: String,

        #[command(subcommand)]
        action: AiCommand,
    },
}

#[derive(Subcommand)]
enum TaskCommand {
    /// Add a task
    Add {
        title: String,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long)]
        priority: Option<Priority>,
        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<NaiveDate>,
    },

    /// List tasks
    List {
        /// all, active or completed
        #[arg(short, long, default_value = "all")]
        filter: ViewFilter,
        /// newest, oldest, priority or due_date
        #[arg(short, long, default_value = "newest")]
        sort: ViewSort,
    },

    /// Mark a task completed
    Done { id: String },

    /// Mark a task not completed
    Reopen { id: String },

    /// Move a task to a status column (todo, in_progress, completed)
    Move { id: String, status: Status },

    /// Edit task fields
    Edit {
        id: String,
        #[arg(short, long)]
        title: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long)]
        priority: Option<Priority>,
        #[arg(long)]
        due: Option<NaiveDate>,
        /// Remove the due date
        #[arg(long, conflicts_with = "due")]
        clear_due: bool,
    },

    /// Delete a task
    Rm { id: String },
}

#[derive(Subcommand)]
enum AiCommand {
    /// Productivity suggestions for the current task list
    Suggest,

    /// Turn a terse title into a complete task
    Enhance {
        title: String,
        /// Save the enhanced task
        #[arg(long)]
        save: bool,
    },

    /// Create tasks from free text
    Add { input: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "taskflow=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, bind } => {
            let mut cfg = Config::resolve(cli.config.as_deref())?;

            // Override with CLI args
            if let Some(p) = port {
                cfg.server.port = p;
            }
            if let Some(b) = bind {
                cfg.server.bind = b;
            }

            run_server(cfg).await
        }

        Commands::Token { name, list, revoke } => {
            let config_path = match cli.config {
                Some(path) => path,
                None => Config::default_path()?,
            };
            manage_tokens(config_path, name, list, revoke)
        }

        Commands::Init { output } => {
            let path = output.unwrap_or_else(|| PathBuf::from("config.toml"));
            Config::default().save_to(&path)?;

            println!("Created config file: {}", path.display());
            println!();
            println!("Next steps:");
            println!("  1. Generate a token: taskflow token --name <user>");
            println!("  2. Set {} or [ai] api_key for the proxy", config::API_KEY_ENV);
            println!(
                "  3. Start the server: taskflow serve --config {}",
                path.display()
            );

            Ok(())
        }

        Commands::Task { user, action } => {
            let cfg = Config::resolve(cli.config.as_deref())?;
            let engine = local_engine(&cfg, &user)?;
            run_task_command(&engine, action).await
        }

        Commands::Ai { user, action } => {
            let cfg = Config::resolve(cli.config.as_deref())?;
            let engine = local_engine(&cfg, &user)?;
            let transport = TransportChain::from_config(&cfg.ai)?;
            let gateway = AiGateway::new(Arc::new(transport));
            run_ai_command(&engine, &gateway, action).await
        }
    }
}

async fn run_server(config: Config) -> Result<()> {
    let db = Database::open(&config.database.path).context("Failed to open database")?;
    let upstream = DirectTransport::from_config(http_client(config.ai.timeout())?, &config.ai);
    if !upstream.has_credential() {
        tracing::warn!(
            "No AI provider key configured; /api/v1/ai/proxy will refuse requests (set {})",
            config::API_KEY_ENV
        );
    }

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let state = api::AppState::new(Arc::new(db), config, upstream);
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("taskflow server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn local_engine(cfg: &Config, user: &str) -> Result<MutationEngine<Database>> {
    let db = Database::open(&cfg.database.path).context("Failed to open database")?;
    let session = Session::signed_in(user);
    Ok(MutationEngine::new(
        Arc::new(db),
        Arc::new(QueryCache::new()),
        session.handle(),
    ))
}

async fn run_task_command(engine: &MutationEngine<Database>, action: TaskCommand) -> Result<()> {
    match action {
        TaskCommand::Add {
            title,
            description,
            priority,
            due,
        } => {
            let task = engine
                .create(NewTask {
                    title,
                    description,
                    priority,
                    due_date: due,
                })
                .await?;
            println!("Added {}", task.id);
        }

        TaskCommand::List { filter, sort } => {
            let tasks = engine.view(filter, sort).await?;
            print_tasks(&tasks);
        }

        TaskCommand::Done { id } => {
            engine.update(&id, TaskPatch::completed(true)).await?;
            println!("Completed {}", id);
        }

        TaskCommand::Reopen { id } => {
            engine.update(&id, TaskPatch::completed(false)).await?;
            println!("Reopened {}", id);
        }

        TaskCommand::Move { id, status } => {
            engine.update(&id, TaskPatch::status(status)).await?;
            println!("Moved {} to {}", id, status);
        }

        TaskCommand::Edit {
            id,
            title,
            description,
            priority,
            due,
            clear_due,
        } => {
            let patch = TaskPatch {
                title,
                description: description.map(Some),
                priority,
                due_date: if clear_due { Some(None) } else { due.map(Some) },
                ..Default::default()
            };
            if patch.is_empty() {
                println!("Nothing to change.");
                return Ok(());
            }
            let task = engine.update(&id, patch).await?;
            println!("Updated {} ({})", task.id, task.title);
        }

        TaskCommand::Rm { id } => {
            engine.delete(&id).await?;
            println!("Deleted {}", id);
        }
    }
    Ok(())
}

async fn run_ai_command(
    engine: &MutationEngine<Database>,
    gateway: &AiGateway,
    action: AiCommand,
) -> Result<()> {
    match action {
        AiCommand::Suggest => {
            let tasks = engine.view(ViewFilter::All, ViewSort::Newest).await?;
            for suggestion in gateway.suggestions(&tasks).await {
                println!("[{:?}] {}", suggestion.kind, suggestion.title);
                println!("    {}", suggestion.description);
            }
        }

        AiCommand::Enhance { title, save } => {
            let enhanced = gateway.enhance_task(&title).await?;
            println!("{} ({})", enhanced.title, enhanced.priority);
            if !enhanced.description.is_empty() {
                println!("    {}", enhanced.description);
            }
            if let Some(due) = enhanced.due_date {
                println!("    Due {}", format_due(due));
            }
            if save {
                let task = engine.create(enhanced.into()).await?;
                println!("Added {}", task.id);
            }
        }

        AiCommand::Add { input } => {
            let parsed = gateway.parse_tasks(&input).await?;
            for new_task in parsed {
                let task = engine.create(new_task.into()).await?;
                println!("Added {} {}", task.id, task.title);
            }
        }
    }
    Ok(())
}

fn print_tasks(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("No tasks.");
        return;
    }

    let today = Local::now().date_naive();
    for task in tasks {
        let check = if task.is_completed { "x" } else { " " };
        let due = match task.due_date {
            Some(date) if !task.is_completed && is_overdue(Some(date), today) => {
                format!("  overdue: {}", format_due(date))
            }
            Some(date) => format!("  due: {}", format_due(date)),
            None => String::new(),
        };
        println!(
            "[{}] {}  {:<6} {}{}",
            check,
            task.id,
            task.priority.as_str(),
            task.title,
            due
        );
    }

    let stats = TaskStats::compute(tasks, today);
    println!();
    println!(
        "{} tasks, {} completed ({}%)",
        stats.total, stats.completed, stats.completion_rate
    );
}

fn manage_tokens(
    config_path: PathBuf,
    name: Option<String>,
    list: bool,
    revoke: Option<String>,
) -> Result<()> {
    if !config_path.exists() {
        println!("No config file found at {}", config_path.display());
        println!("Run 'taskflow init' to create one.");
        return Ok(());
    }
    let mut cfg = Config::load_from(&config_path)?;

    if list {
        if cfg.tokens.is_empty() {
            println!("No tokens configured.");
            println!("Generate one with: taskflow token --name <user>");
        } else {
            println!("Configured tokens:");
            for token in &cfg.tokens {
                let hash_preview: String = token.token_hash.chars().take(20).collect();
                println!("  {} - {}...", token.name, hash_preview);
            }
        }
        return Ok(());
    }

    if let Some(token_name) = revoke {
        let original_len = cfg.tokens.len();
        cfg.tokens.retain(|t| t.name != token_name);

        if cfg.tokens.len() == original_len {
            println!("Token '{}' not found.", token_name);
        } else {
            cfg.save_to(&config_path)?;
            println!("Revoked token '{}'.", token_name);
        }
        return Ok(());
    }

    let label = name.unwrap_or_else(|| "default".to_string());
    if cfg.tokens.iter().any(|t| t.name == label) {
        println!(
            "Token '{}' already exists. Use --revoke first to replace it.",
            label
        );
        return Ok(());
    }

    let token = generate_token();
    cfg.tokens.push(config::TokenConfig {
        name: label.clone(),
        token_hash: config::hash_token(&token)?,
    });
    cfg.save_to(&config_path)?;

    println!("Generated API token for '{}'\n", label);
    println!("Token: {}\n", token);
    println!("Point a client at the proxy with:");
    println!("  [ai]");
    println!("  proxy_url = \"http://YOUR_SERVER:{}/api/v1/ai/proxy\"", cfg.server.port);
    println!("  proxy_token = \"{}\"\n", token);
    println!("Save this token now - it cannot be retrieved later!");
    Ok(())
}

fn generate_token() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();

    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

    let token_body: String = bytes
        .iter()
        .map(|b| ALPHABET[(*b as usize) % ALPHABET.len()] as char)
        .collect();

    format!("tfk_{}", token_body)
}
