use std::io::{self, BufRead, Write};
use std::process;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;

use clipstack::clipboard::{ClipboardWriter, SystemClipboard};
use clipstack::config::AppPaths;
use clipstack::daemon;
use clipstack::engine::Engine;
use clipstack::errors::{ClipError, Result};
use clipstack::logging;
use clipstack::settings::DEFAULT_RETENTION_LIMIT;
use clipstack::storage::models::{HistoryStats, Item, ItemContent, ItemKind};
use clipstack::storage::schema::StoredItem;

/// Upper bound on a one-shot search; model inference can be slow on first use.
const SEARCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(
    name = "clipstack",
    version,
    about = "Clipboard history with pinning, retention and relevance search"
)]
struct Cli {
    /// Output results as JSON
    #[arg(short = 'j', long = "json", global = true)]
    json: bool,

    /// Log debug output (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List clipboard history, pinned items first
    List {
        /// Maximum number of entries to show
        #[arg(short, long, default_value_t = DEFAULT_RETENTION_LIMIT as usize)]
        limit: usize,

        /// Show only pinned entries
        #[arg(short, long)]
        pinned: bool,

        /// Filter by type: text, image
        #[arg(short = 't', long)]
        r#type: Option<String>,
    },

    /// Search history by relevance
    Search {
        /// Search query
        query: String,

        /// Maximum results
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show one item
    Get {
        /// Item id or unique prefix
        id: String,
    },

    /// Copy an item back to the clipboard
    Copy {
        /// Item id or unique prefix
        id: String,
    },

    /// Delete an item
    Delete {
        /// Item id or unique prefix
        id: String,
    },

    /// Pin or unpin an item
    Pin {
        /// Item id or unique prefix
        id: String,
    },

    /// Remove every item, pinned ones included
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Show or set how many unpinned items are kept
    Limit {
        /// New limit, clamped to 1..=500
        #[arg(allow_negative_numbers = true)]
        value: Option<i64>,
    },

    /// Show history statistics
    Stats,

    /// Interactive TUI
    Tui,

    /// Manage the clipboard watcher daemon
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Start the clipboard watcher
    Start,
    /// Stop the clipboard watcher
    Stop,
    /// Check daemon status
    Status,
    /// Run watcher in foreground (used internally)
    #[command(hide = true)]
    Run,
}

#[derive(Serialize)]
struct StatusResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    removed: Option<usize>,
}

/// Listing view of an item; image bytes are left out.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ItemSummary {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    preview: String,
    size_bytes: usize,
    timestamp: DateTime<Utc>,
    is_pinned: bool,
}

impl ItemSummary {
    fn new(item: &Item) -> Self {
        Self {
            id: item.id.to_string(),
            kind: item.kind().as_str(),
            preview: preview(item, 80),
            size_bytes: item.content.size_bytes(),
            timestamp: item.timestamp,
            is_pinned: item.is_pinned,
        }
    }
}

#[derive(Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    stats: HistoryStats,
    daemon_running: bool,
    daemon_pid: Option<u32>,
}

fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(e) = run(cli) {
        if json {
            eprintln!("{}", serde_json::json!({"error": e.to_string()}));
        } else {
            eprintln!("error: {}", e);
        }
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let paths = AppPaths::new()?;
    let json = cli.json;

    let log_file = match &cli.command {
        Some(Commands::Tui) => Some(paths.tui_log_file.as_path()),
        Some(Commands::Daemon {
            action: DaemonAction::Run,
        }) => Some(paths.log_file.as_path()),
        _ => None,
    };
    logging::init(cli.verbose, log_file)?;

    match cli.command {
        None => cmd_list(&paths, DEFAULT_RETENTION_LIMIT as usize, false, None, json),
        Some(Commands::List {
            limit,
            pinned,
            r#type,
        }) => {
            let kind = match r#type.as_deref() {
                Some(raw) => Some(ItemKind::parse(raw).ok_or_else(|| {
                    ClipError::InvalidInput(format!("unknown type `{raw}` (expected text or image)"))
                })?),
                None => None,
            };
            cmd_list(&paths, limit, pinned, kind, json)
        }
        Some(Commands::Search { query, limit }) => cmd_search(&paths, &query, limit, json),
        Some(Commands::Get { id }) => cmd_get(&paths, &id, json),
        Some(Commands::Copy { id }) => cmd_copy(&paths, &id, json),
        Some(Commands::Delete { id }) => cmd_delete(&paths, &id, json),
        Some(Commands::Pin { id }) => cmd_pin(&paths, &id, json),
        Some(Commands::Clear { yes }) => cmd_clear(&paths, yes, json),
        Some(Commands::Limit { value }) => cmd_limit(&paths, value, json),
        Some(Commands::Stats) => cmd_stats(&paths, json),
        Some(Commands::Tui) => clipstack::tui::run(&paths),
        Some(Commands::Daemon { action }) => cmd_daemon(&paths, action, json),
    }
}

/// Engine for commands that change the history. Refused while the watcher
/// or a TUI owns the document.
fn open_for_write(paths: &AppPaths) -> Result<Engine> {
    daemon::ensure_no_other_owner(paths)?;
    Engine::open(paths)
}

fn print_status(json: bool, success: bool, message: String, removed: Option<usize>) -> Result<()> {
    if json {
        let response = StatusResponse {
            success,
            message,
            removed,
        };
        println!("{}", serde_json::to_string(&response)?);
    } else {
        println!("{}", message);
    }
    Ok(())
}

fn print_items(items: &[&Item], json: bool, empty_message: &str) -> Result<()> {
    if json {
        let summaries: Vec<ItemSummary> = items.iter().map(|i| ItemSummary::new(i)).collect();
        println!("{}", serde_json::to_string(&summaries)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("{}", empty_message);
        return Ok(());
    }

    for item in items {
        print_item_row(item);
    }
    Ok(())
}

fn cmd_list(
    paths: &AppPaths,
    limit: usize,
    pinned_only: bool,
    kind: Option<ItemKind>,
    json: bool,
) -> Result<()> {
    let engine = Engine::open(paths)?;
    let items: Vec<&Item> = engine
        .items()
        .iter()
        .filter(|i| !pinned_only || i.is_pinned)
        .filter(|i| kind.is_none_or(|k| i.kind() == k))
        .take(limit)
        .collect();
    print_items(&items, json, "No items found.")
}

fn cmd_search(paths: &AppPaths, query: &str, limit: usize, json: bool) -> Result<()> {
    let mut engine = Engine::open(paths)?;
    engine.set_query(query);
    if !engine.wait_for_results(SEARCH_TIMEOUT) {
        return Err(ClipError::Worker("search did not finish in time".into()));
    }
    let items: Vec<&Item> = engine.displayed_items().iter().take(limit).collect();
    print_items(&items, json, &format!("No results for \"{}\".", query))
}

fn cmd_get(paths: &AppPaths, raw_id: &str, json: bool) -> Result<()> {
    let mut engine = Engine::open(paths)?;
    let id = engine.resolve(raw_id)?;
    let dimensions = engine.image_dimensions(id);
    let item = engine
        .get(id)
        .ok_or_else(|| ClipError::NotFound(raw_id.to_string()))?;

    if json {
        println!("{}", serde_json::to_string(&StoredItem::from(item))?);
        return Ok(());
    }

    print_item_detail(item, dimensions);
    Ok(())
}

fn cmd_copy(paths: &AppPaths, raw_id: &str, json: bool) -> Result<()> {
    if daemon::other_owner(paths)?.is_some() {
        // The running owner sees the clipboard change and refreshes the item.
        let engine = Engine::open(paths)?;
        let id = engine.resolve(raw_id)?;
        let item = engine
            .get(id)
            .ok_or_else(|| ClipError::NotFound(raw_id.to_string()))?;
        SystemClipboard.write(item)?;
        return print_status(json, true, format!("Copied {} to clipboard.", id.short()), None);
    }

    let mut engine = Engine::open(paths)?;
    let id = engine.resolve(raw_id)?;
    let copied = engine.copy_out(id)?.is_some();
    engine.flush();
    print_status(json, copied, format!("Copied {} to clipboard.", id.short()), None)
}

fn cmd_delete(paths: &AppPaths, raw_id: &str, json: bool) -> Result<()> {
    let mut engine = open_for_write(paths)?;
    let id = engine.resolve(raw_id)?;
    let removed = engine.remove(id);
    engine.flush();
    let message = if removed {
        format!("Deleted {}.", id.short())
    } else {
        format!("{} not found.", raw_id)
    };
    print_status(json, removed, message, None)
}

fn cmd_pin(paths: &AppPaths, raw_id: &str, json: bool) -> Result<()> {
    let mut engine = open_for_write(paths)?;
    let id = engine.resolve(raw_id)?;
    engine.toggle_pin(id);
    engine.flush();
    let pinned = engine.get(id).is_some_and(|i| i.is_pinned);
    let message = if pinned {
        format!("Pinned {}.", id.short())
    } else {
        format!("Unpinned {}.", id.short())
    };
    print_status(json, true, message, None)
}

fn cmd_clear(paths: &AppPaths, yes: bool, json: bool) -> Result<()> {
    let mut engine = open_for_write(paths)?;
    if !yes && !confirm(&format!("Remove all {} item(s)?", engine.items().len()))? {
        return print_status(json, false, "Cancelled.".into(), None);
    }
    let removed = engine.clear_all();
    engine.flush();
    print_status(json, true, format!("Removed {} item(s).", removed), Some(removed))
}

fn cmd_limit(paths: &AppPaths, value: Option<i64>, json: bool) -> Result<()> {
    let Some(requested) = value else {
        let engine = Engine::open(paths)?;
        let limit = engine.retention_limit();
        if json {
            println!("{}", serde_json::json!({ "retention_limit": limit }));
        } else {
            println!("Retention limit: {}", limit);
        }
        return Ok(());
    };

    let mut engine = open_for_write(paths)?;
    let before = engine.items().len();
    let applied = engine.set_retention_limit(requested);
    engine.flush();
    let evicted = before - engine.items().len();
    let message = if applied as i64 == requested {
        format!("Retention limit set to {}.", applied)
    } else {
        format!("Retention limit set to {} (clamped from {}).", applied, requested)
    };
    print_status(json, true, message, Some(evicted))
}

fn cmd_stats(paths: &AppPaths, json: bool) -> Result<()> {
    let engine = Engine::open(paths)?;
    let stats = engine.stats();
    let daemon_pid = daemon::daemon_status(paths).ok().flatten();

    if json {
        let response = StatsResponse {
            stats,
            daemon_running: daemon_pid.is_some(),
            daemon_pid,
        };
        println!("{}", serde_json::to_string(&response)?);
        return Ok(());
    }

    println!("Clipboard History");
    println!("─────────────────");
    println!("Total items:  {}", stats.total_items);
    println!("  Text:       {}", stats.text_items);
    println!("  Image:      {}", stats.image_items);
    println!("  Pinned:     {}", stats.pinned_items);
    println!("Total size:   {}", format_bytes(stats.total_size));
    println!("Keep last:    {} unpinned", stats.retention_limit);
    if let Some(oldest) = stats.oldest {
        println!("Oldest:       {}", oldest.format("%Y-%m-%d %H:%M"));
    }
    if let Some(newest) = stats.newest {
        println!("Newest:       {}", newest.format("%Y-%m-%d %H:%M"));
    }

    match daemon_pid {
        Some(pid) => println!("Daemon:       running (pid {})", pid),
        None => println!("Daemon:       not running"),
    }

    Ok(())
}

fn cmd_daemon(paths: &AppPaths, action: DaemonAction, json: bool) -> Result<()> {
    match action {
        DaemonAction::Start => {
            if let Some(pid) = daemon::other_owner(paths)? {
                return print_status(
                    json,
                    true,
                    format!("History already owned by pid {}.", pid),
                    None,
                );
            }
            let pid = daemon::start_daemon(paths)?;
            print_status(json, true, format!("Started clipboard watcher (pid {}).", pid), None)
        }
        DaemonAction::Stop => {
            let stopped = daemon::stop_daemon(paths)?;
            let message = if stopped {
                "Stopped clipboard watcher."
            } else {
                "Daemon is not running."
            };
            print_status(json, stopped, message.into(), None)
        }
        DaemonAction::Status => {
            let pid = daemon::daemon_status(paths)?;
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "running": pid.is_some(),
                        "pid": pid,
                    })
                );
            } else {
                match pid {
                    Some(pid) => println!("Daemon running (pid {}).", pid),
                    None => println!("Daemon is not running."),
                }
            }
            Ok(())
        }
        DaemonAction::Run => daemon::run_watcher(paths),
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn preview(item: &Item, max_chars: usize) -> String {
    match &item.content {
        ItemContent::Text(text) => {
            let oneline = text.replace('\n', "\\n");
            let mut chars = oneline.chars();
            let head: String = chars.by_ref().take(max_chars).collect();
            if chars.next().is_some() {
                format!("{}...", head)
            } else {
                head
            }
        }
        ItemContent::Image(bytes) => format!("image, {}", format_bytes(bytes.len())),
    }
}

fn print_item_row(item: &Item) {
    let type_icon = match item.kind() {
        ItemKind::Text => "T",
        ItemKind::Image => "I",
    };
    let pin = if item.is_pinned { "*" } else { " " };
    let age = format_age(item.timestamp);
    println!(
        "{} {}{} {:>4}  {}",
        item.id.short(),
        type_icon,
        pin,
        age,
        preview(item, 60)
    );
}

fn print_item_detail(item: &Item, dimensions: Option<(u32, u32)>) {
    println!("ID:      {}", item.id);
    println!("Type:    {}", item.kind().as_str());
    println!("Pinned:  {}", item.is_pinned);
    println!("Seen:    {}", item.timestamp.format("%Y-%m-%d %H:%M:%S"));
    println!("Size:    {}", format_bytes(item.content.size_bytes()));

    match &item.content {
        ItemContent::Text(text) => {
            println!("─────────────────────────");
            println!("{}", text);
        }
        ItemContent::Image(_) => match dimensions {
            Some((w, h)) => println!("Dims:    {}x{}", w, h),
            None => println!("Dims:    unknown"),
        },
    }
}

fn format_age(dt: DateTime<Utc>) -> String {
    let dur = Utc::now() - dt;
    if dur.num_seconds() < 60 {
        "now".to_string()
    } else if dur.num_minutes() < 60 {
        format!("{}m", dur.num_minutes())
    } else if dur.num_hours() < 24 {
        format!("{}h", dur.num_hours())
    } else {
        format!("{}d", dur.num_days())
    }
}

fn format_bytes(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
