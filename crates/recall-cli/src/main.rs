//! `recall-cli` – recall Command Line Interface
//!
//! This binary is a reference chat front end for the memory core.  It:
//!
//! 1. Checks for `~/.recall/config.toml`; runs a **First-Run Wizard** when the
//!    file is absent.
//! 2. Probes the completion endpoint and reports available models.
//! 3. Opens the SQLite memory database and wires the
//!    [`ContextAssemblyService`] to it.
//! 4. Greets a returning user with the cross-session opening context.
//! 5. Drops the user into an **interactive chat REPL** with slash-commands
//!    for every memory operation (`/help` lists them).
//! 6. Intercepts **Ctrl-C** and drains background distillation before exit.

mod config;
mod ollama;
mod repl;

use colored::Colorize;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use recall_memory::semantic::SqliteSemanticStore;
use recall_memory::sessions::SqliteSessionStore;
use recall_memory::store::{Database, SemanticStore};
use recall_memory::turns::SqliteTurnStore;
use recall_runtime::{AssemblyStores, CompletionService, ContextAssemblyService, LlmDriver};

/// How long queued distillation may keep running after the user quits.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

fn main() {
    let _otel_guard = recall_runtime::init_tracing("recall");

    print_banner();

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – finishing background memory work …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── First-Run Wizard ──────────────────────────────────────────────────
    match config::load() {
        Ok(None) => run_first_run_wizard(),
        Ok(Some(_)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
        }
    }

    let cfg = config::load_or_default().unwrap_or_else(|_| {
        let mut cfg = config::Config::default();
        config::apply_env_overrides(&mut cfg);
        cfg
    });
    info!(config = ?cfg, "configuration resolved");

    // ── Endpoint discovery ────────────────────────────────────────────────
    print!("\n  Probing completion endpoint at {} … ", cfg.completion_url.dimmed());
    let key = Some(cfg.api_key.expose()).filter(|k| !k.is_empty());
    match ollama::fetch_models(&cfg.completion_url, key) {
        Ok(models) => {
            println!("{} ({} model(s) available)", "online".green(), models.len());
            if !models.iter().any(|m| m.name == cfg.model || m.name.starts_with(&format!("{}:", cfg.model))) {
                println!(
                    "  {} model {} not listed; chat replies may fail.",
                    "Warning:".yellow(),
                    cfg.model.bold()
                );
            }
        }
        Err(_) => {
            println!("{}", "offline".yellow());
            println!(
                "  {}  Memory still works; chat replies and distillation will fail until `{}` is running.",
                "No completion endpoint detected.".dimmed(),
                "ollama serve".bold()
            );
        }
    }

    // ── Runtime & memory ──────────────────────────────────────────────────
    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            println!("{}: {}", "Failed to start async runtime".red(), e);
            return;
        }
    };

    print!("  Opening memory at {} … ", cfg.database.dimmed());
    let db = match open_database(&cfg.database) {
        Ok(db) => {
            println!("{}", "OK".green());
            db
        }
        Err(e) => {
            println!("{}: {}", "FAILED".red(), e);
            return;
        }
    };

    let semantic: Arc<dyn SemanticStore> = Arc::new(SqliteSemanticStore::new(db.clone()));
    let stores = AssemblyStores {
        turns: Arc::new(SqliteTurnStore::new(db.clone())),
        semantic: Arc::clone(&semantic),
        sessions: Arc::new(SqliteSessionStore::new(db)),
    };

    let mut driver = LlmDriver::new(cfg.completion_url.clone(), cfg.model.clone())
        .with_timeout(cfg.completion_timeout());
    if !cfg.api_key.is_empty() {
        driver = driver.with_api_key(cfg.api_key.expose());
    }
    let chat: Arc<dyn CompletionService> = Arc::new(driver);
    let service = Arc::new(ContextAssemblyService::new(
        stores,
        Arc::clone(&chat),
        cfg.assembly_config(),
    ));

    // ── Returning user ────────────────────────────────────────────────────
    let opening = rt.block_on(service.continuity().opening_context(cfg.user_id));
    if !opening.context.is_empty() {
        println!();
        println!("{}", "Welcome back.".bold().green());
        if !opening.active_topics.is_empty() {
            println!("  Recent topics: {}", opening.active_topics.join(", ").yellow());
        }
        for prompt in &opening.continuity_prompts {
            println!("  • {}", prompt);
        }
    }

    println!();
    println!(
        "  Type a message to chat, or {} for a list of commands.\n",
        "/help".bold().cyan()
    );

    // ── Interactive REPL ──────────────────────────────────────────────────
    let mut shell = repl::Shell { rt: &rt, service: Arc::clone(&service), semantic, chat, config: cfg };
    shell.run(shutdown);

    let pending = service.pending_background();
    if pending > 0 {
        println!("  Finishing {} background memory job(s) …", pending);
    }
    let report = rt.block_on(service.shutdown(SHUTDOWN_GRACE));
    if report.aborted > 0 {
        println!("  {} {} job(s) abandoned.", "⚠".yellow(), report.aborted);
    }
    println!("{}", "  ✓ Memory saved. Exiting recall.".green());
}

fn open_database(path: &str) -> Result<Database, String> {
    if path != ":memory:"
        && let Some(parent) = Path::new(path).parent()
    {
        config::ensure_private_dir(parent)?;
    }
    Database::open(path).map_err(|e| e.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║       recall First-Run Wizard        ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up recall.\n");

    let mut cfg = config::Config::default();

    println!("  Where is your completion endpoint?");
    println!("    Local Ollama is the default; any OpenAI-compatible URL works.");
    cfg.completion_url = repl::prompt_str(
        &format!("  Completion URL [{}]: ", cfg.completion_url),
        &cfg.completion_url,
    );

    if !cfg.completion_url.contains("localhost") && !cfg.completion_url.contains("127.0.0.1") {
        let key = repl::prompt_str("  API key (leave empty for none): ", "");
        cfg.api_key = config::ApiKey::new(key);
    }

    let key = Some(cfg.api_key.expose()).filter(|k| !k.is_empty());
    if let Ok(models) = ollama::fetch_models(&cfg.completion_url, key)
        && let Some(first) = models.first()
    {
        println!("  Available models:");
        for m in &models {
            println!("    • {}", m.name.bold());
        }
        cfg.model = first.name.clone();
    }
    cfg.model = repl::prompt_str(&format!("  Model [{}]: ", cfg.model), &cfg.model);

    cfg.database = repl::prompt_str(&format!("  Memory database [{}]: ", cfg.database), &cfg.database);

    let user = repl::prompt_str(&format!("  Your user id [{}]: ", cfg.user_id), &cfg.user_id.to_string());
    if let Ok(id) = user.trim().parse() {
        cfg.user_id = id;
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"                     ____"#.bold().cyan());
    println!("{}", r#"   ________  _________ _/ / /"#.bold().cyan());
    println!("{}", r#"  / ___/ _ \/ ___/ __ `/ / / "#.bold().cyan());
    println!("{}", r#" / /  /  __/ /__/ /_/ / / /  "#.bold().cyan());
    println!("{}", r#"/_/   \___/\___/\__,_/_/_/   "#.bold().cyan());
    println!();
    println!("  {} {}",
        "recall".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Conversational memory that survives the session");
    println!();
}
