//! REPL – Read-Eval-Print Loop for the recall chat shell.
//!
//! Plain lines are chat: each one is captured as a user turn, answered by
//! the completion service on the assembled context, and the answer is
//! captured as an assistant turn (which queues distillation).
//!
//! Supported slash-commands:
//!   /help             – show this list
//!   /context          – print the context block the model sees
//!   /opening          – cross-session opening context
//!   /close            – summarise and close the active session
//!   /search <text>    – free-text semantic memory search
//!   /feel <emotion>   – memories with a matching emotional context
//!   /patterns         – recurring patterns
//!   /progress         – progress markers
//!   /insights         – generate insights from recent memories
//!   /thread <topic>   – start or bump a conversation thread
//!   /stats            – memory statistics
//!   /user [id]        – show or switch the active user
//!   /settings         – interactively edit `~/.recall/config.toml`
//!   /quit | /exit     – drain background work and exit

use colored::Colorize;
use recall_memory::store::SemanticStore;
use recall_runtime::{AssembledContext, ChatMessage, CompletionService, ContextAssemblyService, Role};
use recall_types::{JsonMap, MemoryInsight, SemanticMemoryUnit, UserId};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Runtime;
use tracing::warn;

use crate::config::{self, Config};
use crate::ollama;

const SEARCH_LIMIT: usize = 5;
const PROGRESS_LIMIT: usize = 5;
const PREVIEW_CHARS: usize = 120;

// ─────────────────────────────────────────────────────────────────────────────
// Command parsing
// ─────────────────────────────────────────────────────────────────────────────

/// One line of input, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Chat(&'a str),
    Help,
    Context,
    Opening,
    Close,
    Search(&'a str),
    Feel(&'a str),
    Patterns,
    Progress,
    Insights,
    Thread(&'a str),
    Stats,
    User(&'a str),
    Settings,
    Quit,
    Unknown(&'a str),
}

impl<'a> Command<'a> {
    /// `None` for blank input.
    pub fn parse(line: &'a str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if !line.starts_with('/') {
            return Some(Command::Chat(line));
        }
        let (name, arg) = match line.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (line, ""),
        };
        Some(match name {
            "/help" => Command::Help,
            "/context" => Command::Context,
            "/opening" => Command::Opening,
            "/close" => Command::Close,
            "/search" => Command::Search(arg),
            "/feel" => Command::Feel(arg),
            "/patterns" => Command::Patterns,
            "/progress" => Command::Progress,
            "/insights" => Command::Insights,
            "/thread" => Command::Thread(arg),
            "/stats" => Command::Stats,
            "/user" => Command::User(arg),
            "/settings" => Command::Settings,
            "/quit" | "/exit" => Command::Quit,
            other => Command::Unknown(other),
        })
    }
}

/// Messages for one chat completion: the context block as the system
/// message, then the turn history.  `line` is appended when the history
/// does not already end with it (the user turn may have failed to persist).
pub fn compose_messages(context: &AssembledContext, line: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(context.turn_history.len() + 2);
    messages.push(ChatMessage::system(context.context_string.clone()));
    messages.extend(context.turn_history.iter().cloned());
    let already_there = context
        .turn_history
        .last()
        .is_some_and(|m| m.role == Role::User && m.content == line);
    if !already_there {
        messages.push(ChatMessage::user(line));
    }
    messages
}

// ─────────────────────────────────────────────────────────────────────────────
// Shell
// ─────────────────────────────────────────────────────────────────────────────

/// Everything the REPL needs.  Async calls run on `rt`; the loop itself
/// stays on the calling thread so blocking prompts never stall a worker.
pub struct Shell<'rt> {
    pub rt: &'rt Runtime,
    pub service: Arc<ContextAssemblyService>,
    pub semantic: Arc<dyn SemanticStore>,
    pub chat: Arc<dyn CompletionService>,
    pub config: Config,
}

impl Shell<'_> {
    fn user(&self) -> UserId {
        self.config.user_id
    }

    /// Entry point for the interactive REPL.
    ///
    /// `shutdown` is polled each iteration; when set the REPL exits cleanly.
    pub fn run(&mut self, shutdown: Arc<AtomicBool>) {
        let mut editor = match DefaultEditor::new() {
            Ok(editor) => editor,
            Err(e) => {
                eprintln!("{}: {}", "Terminal error".red(), e);
                return;
            }
        };

        loop {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }

            let prompt = format!("{} ", format!("recall[{}]>", self.user()).bold().cyan());
            let line = match editor.readline(&prompt) {
                Ok(line) => line,
                Err(ReadlineError::Interrupted) => {
                    shutdown.store(true, Ordering::SeqCst);
                    break;
                }
                Err(ReadlineError::Eof) => break,
                Err(e) => {
                    eprintln!("{}: {}", "Read error".red(), e);
                    break;
                }
            };

            let Some(command) = Command::parse(&line) else {
                continue;
            };
            let _ = editor.add_history_entry(line.trim());

            match command {
                Command::Chat(text) => self.cmd_chat(text),
                Command::Help => cmd_help(),
                Command::Context => self.cmd_context(),
                Command::Opening => self.cmd_opening(),
                Command::Close => self.cmd_close(),
                Command::Search(text) => self.cmd_search(text),
                Command::Feel(emotion) => self.cmd_feel(emotion),
                Command::Patterns => self.cmd_patterns(),
                Command::Progress => self.cmd_progress(),
                Command::Insights => self.cmd_insights(),
                Command::Thread(topic) => self.cmd_thread(topic),
                Command::Stats => self.cmd_stats(),
                Command::User(arg) => self.cmd_user(arg),
                Command::Settings => self.cmd_settings(),
                Command::Quit => {
                    println!("{}", "Goodbye.".green());
                    shutdown.store(true, Ordering::SeqCst);
                    break;
                }
                Command::Unknown(other) => {
                    println!(
                        "{} '{}'. Type {} for available commands.",
                        "Unknown command:".red(),
                        other.yellow(),
                        "/help".bold()
                    );
                }
            }
        }
    }

    // ── chat ─────────────────────────────────────────────────────────────────

    fn cmd_chat(&self, line: &str) {
        let user_id = self.user();
        let timeout = self.config.completion_timeout();
        let result = self.rt.block_on(async {
            if let Err(failure) = self.service.capture(user_id, line, false).await {
                warn!(user_id, cause = %failure.cause, persisted = failure.turn_persisted, "user turn captured on degraded context");
            }
            let context = self.service.get_context(user_id).await;
            let messages = compose_messages(&context, line);
            let reply = match tokio::time::timeout(timeout, self.chat.complete(&messages)).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(e)) => return Err(e.to_string()),
                Err(_) => return Err(format!("no reply within {}s", timeout.as_secs())),
            };
            if let Err(failure) = self.service.capture(user_id, &reply, true).await {
                warn!(user_id, cause = %failure.cause, persisted = failure.turn_persisted, "assistant turn captured on degraded context");
            }
            Ok(reply)
        });

        match result {
            Ok(reply) => println!("\n{}\n", reply.trim()),
            Err(e) => println!("{}: {}", "Completion failed".red(), e),
        }
    }

    // ── context & continuity ─────────────────────────────────────────────────

    fn cmd_context(&self) {
        let context = self.rt.block_on(self.service.get_context(self.user()));
        println!("{}", "Assembled Context".bold().underline());
        println!("{}", context.context_string);
        println!(
            "  {} turn(s) of history · memory strength {}",
            context.turn_history.len(),
            context.strength.as_str().yellow()
        );
    }

    fn cmd_opening(&self) {
        let opening = self.rt.block_on(self.service.continuity().opening_context(self.user()));
        println!("{}", "Opening Context".bold().underline());
        if opening.context.is_empty() {
            println!("  {}", "No earlier sessions.".dimmed());
            return;
        }
        println!("{}", opening.context);
        if !opening.continuity_prompts.is_empty() {
            println!("  Prompts:");
            for prompt in &opening.continuity_prompts {
                println!("    • {}", prompt);
            }
        }
        if !opening.continuity_items.is_empty() {
            println!("  {} unaddressed continuity item(s)", opening.continuity_items.len());
        }
    }

    fn cmd_close(&self) {
        match self.rt.block_on(self.service.close_session(self.user())) {
            Ok(Some(digest)) => {
                println!("{} {}", "✓ Session closed:".green(), digest.title.bold());
                println!("  {}", digest.summary);
                if !digest.key_topics.is_empty() {
                    println!("  Topics : {}", digest.key_topics.join(", "));
                }
                println!("  Tone   : {}", digest.emotional_tone);
                for thread in &digest.threads {
                    println!("    → {}", thread.topic);
                }
            }
            Ok(None) => println!("  {}", "No active session.".dimmed()),
            Err(e) => println!("{}: {} – session left open", "Close failed".red(), e),
        }
    }

    fn cmd_thread(&self, topic: &str) {
        if topic.is_empty() {
            println!("Usage: {}", "/thread <topic>".bold());
            return;
        }
        let touched = self
            .rt
            .block_on(self.service.continuity().touch_thread(self.user(), topic, JsonMap::new()));
        match touched {
            Ok(thread) => println!(
                "{} {} ({}, {} priority)",
                "✓ Thread".green(),
                thread.topic.bold(),
                thread.status.as_str(),
                thread.priority.as_str()
            ),
            Err(e) => println!("{}: {}", "Thread update failed".red(), e),
        }
    }

    // ── retrieval ────────────────────────────────────────────────────────────

    fn cmd_search(&self, text: &str) {
        if text.is_empty() {
            println!("Usage: {}", "/search <text>".bold());
            return;
        }
        let units = self
            .rt
            .block_on(self.service.retrieval().relevant_to_text(self.user(), text, SEARCH_LIMIT));
        print_units("Search Results", &units);
    }

    fn cmd_feel(&self, emotion: &str) {
        if emotion.is_empty() {
            println!("Usage: {}", "/feel <emotion>".bold());
            return;
        }
        let units = self.rt.block_on(
            self.service
                .retrieval()
                .emotionally_relevant(self.user(), emotion, SEARCH_LIMIT),
        );
        print_units(&format!("Memories around \"{}\"", emotion), &units);
    }

    fn cmd_patterns(&self) {
        let patterns = self.rt.block_on(self.service.retrieval().recurring_patterns(self.user()));
        print_insights("Recurring Patterns", &patterns);
    }

    fn cmd_progress(&self) {
        let units = self
            .rt
            .block_on(self.service.retrieval().progress_markers(self.user(), PROGRESS_LIMIT));
        print_units("Progress Markers", &units);
    }

    fn cmd_insights(&self) {
        print!("  Asking {} for insights … ", self.config.model.yellow());
        io::stdout().flush().ok();
        match self.rt.block_on(self.service.distiller().generate_insights(self.user())) {
            Ok(insights) => {
                println!("{}", "done".green());
                print_insights("New Insights", &insights);
            }
            Err(e) => {
                println!("{}", "failed".red());
                println!("  {}", e.to_string().dimmed());
                match self.rt.block_on(self.semantic.insights(self.user(), SEARCH_LIMIT)) {
                    Ok(stored) => print_insights("Stored Insights", &stored),
                    Err(e) => println!("{}: {}", "Error reading insights".red(), e),
                }
            }
        }
    }

    fn cmd_stats(&self) {
        let user_id = self.user();
        let (stats, session) = self.rt.block_on(async {
            tokio::join!(self.semantic.stats(user_id), self.service.continuity().active(user_id))
        });

        println!("{}", "Memory Statistics".bold().underline());
        match stats {
            Ok(stats) => {
                println!("  Units          : {}", stats.total_units.to_string().yellow());
                for (kind, count) in &stats.by_type {
                    println!("    {:<12} {}", kind, count);
                }
                println!("  Links          : {}", stats.link_count);
                println!("  Insights       : {}", stats.insight_count);
                println!("  Avg confidence : {:.2}", stats.average_confidence);
                if !stats.top_tags.is_empty() {
                    let tags: Vec<String> =
                        stats.top_tags.iter().map(|(tag, n)| format!("{} ({})", tag, n)).collect();
                    println!("  Top tags       : {}", tags.join(", "));
                }
            }
            Err(e) => println!("  {}: {}", "Error reading statistics".red(), e),
        }
        match session {
            Ok(Some(session)) => println!(
                "  Session        : {} message(s), started {}",
                session.message_count,
                session.created_at.format("%Y-%m-%d %H:%M")
            ),
            Ok(None) => println!("  Session        : {}", "none active".dimmed()),
            Err(e) => println!("  {}: {}", "Error reading session".red(), e),
        }
        println!("  Cached users   : {}", self.service.cache_len());
        println!("  Background jobs: {}", self.service.pending_background());
    }

    // ── settings ─────────────────────────────────────────────────────────────

    fn cmd_user(&mut self, arg: &str) {
        if arg.is_empty() {
            println!("  Active user: {}", self.user().to_string().yellow());
            return;
        }
        match arg.parse::<UserId>() {
            Ok(id) => {
                self.config.user_id = id;
                println!("{} {}", "✓ Talking as user".green(), id.to_string().bold());
            }
            Err(_) => println!("{} '{}' is not a user id", "Warning:".yellow(), arg),
        }
    }

    fn cmd_settings(&mut self) {
        let mut cfg = match config::load() {
            Ok(Some(c)) => c,
            Ok(None) => Config::default(),
            Err(e) => {
                println!("{}: {}", "Error loading config".red(), e);
                return;
            }
        };

        println!("{}", "Settings Editor".bold().underline());
        println!("  (press Enter to keep the current value)");

        cfg.completion_url = prompt_str(
            &format!("  Completion URL [{}]: ", cfg.completion_url),
            &cfg.completion_url,
        );
        print!("  Probing {} … ", cfg.completion_url.dimmed());
        io::stdout().flush().ok();
        let key = Some(cfg.api_key.expose()).filter(|k| !k.is_empty());
        match ollama::fetch_models(&cfg.completion_url, key) {
            Ok(models) => {
                println!("{}", "online".green());
                for m in &models {
                    let marker = if m.name == cfg.model { "▶" } else { " " };
                    println!("    {} {}", marker.green(), m.name.bold());
                }
            }
            Err(_) => println!("{}", "offline".yellow()),
        }
        cfg.model = prompt_str(&format!("  Model [{}]: ", cfg.model), &cfg.model);

        let secs = prompt_str(
            &format!("  Completion timeout (s) [{}]: ", cfg.completion_timeout_secs),
            &cfg.completion_timeout_secs.to_string(),
        );
        cfg.completion_timeout_secs = parse_or_keep(&secs, cfg.completion_timeout_secs);

        let workers = prompt_str(&format!("  Background workers [{}]: ", cfg.workers), &cfg.workers.to_string());
        cfg.workers = parse_or_keep(&workers, cfg.workers).max(1);

        let user = prompt_str(&format!("  User id [{}]: ", cfg.user_id), &cfg.user_id.to_string());
        cfg.user_id = parse_or_keep(&user, cfg.user_id);

        match config::save(&cfg) {
            Ok(()) => {
                println!(
                    "{} {}",
                    "✓ Settings saved to".green(),
                    config::config_path().display().to_string().bold()
                );
                println!("  {}", "Endpoint, model and worker changes apply on next start.".dimmed());
                self.config.user_id = cfg.user_id;
                self.config.completion_timeout_secs = cfg.completion_timeout_secs;
            }
            Err(e) => println!("{}: {}", "Error saving config".red(), e),
        }
    }
}

fn cmd_help() {
    println!();
    println!("{}", "recall Commands".bold().underline());
    println!("  {}            – print the context block the model sees", "/context".bold().cyan());
    println!("  {}            – cross-session opening context", "/opening".bold().cyan());
    println!("  {}              – summarise and close the session", "/close".bold().cyan());
    println!("  {}      – search semantic memory", "/search <text>".bold().cyan());
    println!("  {}     – memories with a matching emotion", "/feel <emotion>".bold().cyan());
    println!("  {}           – recurring patterns", "/patterns".bold().cyan());
    println!("  {}           – progress markers", "/progress".bold().cyan());
    println!("  {}           – generate insights", "/insights".bold().cyan());
    println!("  {}     – start or bump a thread", "/thread <topic>".bold().cyan());
    println!("  {}              – memory statistics", "/stats".bold().cyan());
    println!("  {}          – show or switch the user", "/user [id]".bold().cyan());
    println!("  {}           – edit ~/.recall/config.toml", "/settings".bold().cyan());
    println!("  {}        – exit the CLI", "/quit  /exit".bold().cyan());
    println!("  Anything else is sent as a chat message.");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn print_units(title: &str, units: &[SemanticMemoryUnit]) {
    println!("{}", title.bold().underline());
    if units.is_empty() {
        println!("  {}", "Nothing found.".dimmed());
        return;
    }
    for unit in units {
        println!(
            "  • [{}] {}",
            unit.memory_type.as_str().yellow(),
            preview(&unit.content, PREVIEW_CHARS)
        );
        if !unit.tags.is_empty() {
            println!("      {}", unit.tags.join(", ").dimmed());
        }
    }
}

fn print_insights(title: &str, insights: &[MemoryInsight]) {
    println!("{}", title.bold().underline());
    if insights.is_empty() {
        println!("  {}", "Nothing yet.".dimmed());
        return;
    }
    for insight in insights {
        println!(
            "  • [{} · {} relevance · {:.0}%] {}",
            insight.insight_type.as_str().yellow(),
            insight.therapeutic_relevance.as_str(),
            insight.confidence * 100.0,
            insight.content
        );
        for suggestion in &insight.action_suggestions {
            println!("      → {}", suggestion.dimmed());
        }
    }
}

/// First `max` characters of `text`, with an ellipsis when cut.
pub fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

fn parse_or_keep<T: std::str::FromStr + std::fmt::Display + Copy>(raw: &str, current: T) -> T {
    match raw.trim().parse::<T>() {
        Ok(v) => v,
        Err(_) => {
            println!("  {} '{}' is not valid, keeping {}", "Warning:".yellow(), raw, current);
            current
        }
    }
}

/// Prompt for a string value.  Returns `default` when the user presses Enter.
pub fn prompt_str(msg: &str, default: &str) -> String {
    print!("{}", msg);
    io::stdout().flush().ok();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let trimmed = line.trim().to_string();
            if trimmed.is_empty() {
                default.to_string()
            } else {
                trimmed
            }
        }
        Err(_) => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_types::MemoryStrength;

    fn context(history: Vec<ChatMessage>) -> AssembledContext {
        AssembledContext {
            context_string: "CONVERSATION MEMORY CONTEXT:".into(),
            turn_history: history,
            strength: MemoryStrength::Weak,
        }
    }

    #[test]
    fn plain_lines_are_chat() {
        assert_eq!(Command::parse("  hello there "), Some(Command::Chat("hello there")));
        assert_eq!(Command::parse("   "), None);
    }

    #[test]
    fn slash_commands_take_arguments() {
        assert_eq!(Command::parse("/search  work stress "), Some(Command::Search("work stress")));
        assert_eq!(Command::parse("/feel anxious"), Some(Command::Feel("anxious")));
        assert_eq!(Command::parse("/thread sleep"), Some(Command::Thread("sleep")));
        assert_eq!(Command::parse("/user"), Some(Command::User("")));
        assert_eq!(Command::parse("/exit"), Some(Command::Quit));
        assert_eq!(Command::parse("/bogus x"), Some(Command::Unknown("/bogus")));
    }

    #[test]
    fn compose_puts_context_first_and_does_not_repeat_the_line() {
        let ctx = context(vec![ChatMessage::assistant("Hi"), ChatMessage::user("I slept badly")]);
        let messages = compose_messages(&ctx, "I slept badly");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "CONVERSATION MEMORY CONTEXT:");
        assert_eq!(messages[2], ChatMessage::user("I slept badly"));
    }

    #[test]
    fn compose_appends_line_missing_from_history() {
        let messages = compose_messages(&context(Vec::new()), "first words");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1], ChatMessage::user("first words"));
    }

    #[test]
    fn preview_cuts_on_char_boundaries() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("ééééé", 2), "éé…");
    }
}
