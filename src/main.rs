//! CLI entry point for `uatshell`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use uatshell::config::{self, Config};
use uatshell::model::message::{timestamp, MessageIndex};
use uatshell::visited::{VisitedLog, VisitedStore};
use uatshell::Archive;

#[derive(Parser)]
#[command(name = "uat", version, about = "Read-only Usenet archive browser")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Show archive name, size and statistics
    Info {
        dir: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Print one message (by index or message-id) and mark it visited
    Show {
        dir: PathBuf,
        target: String,
        #[arg(long)]
        json: bool,
        /// Do not record the message as visited
        #[arg(long)]
        no_mark: bool,
    },
    /// Print the reply tree below a message
    Thread { dir: PathBuf, target: String },
    /// List thread roots with their reply counts
    Roots {
        dir: PathBuf,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Full-text search
    Search {
        dir: PathBuf,
        query: String,
        /// Order by hit weight instead of message order
        #[arg(long)]
        ranked: bool,
        #[arg(long)]
        json: bool,
        /// Maximum number of results (0 = all)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Resolve a message-id to its index
    Lookup { dir: PathBuf, message_id: String },
    /// Check every message, link and posting list
    Verify { dir: PathBuf },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = config::load_config();

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Info { dir, json } => cmd_info(&dir, json),
        Commands::Show {
            dir,
            target,
            json,
            no_mark,
        } => cmd_show(&dir, &target, json, !no_mark, &config),
        Commands::Thread { dir, target } => cmd_thread(&dir, &target, &config),
        Commands::Roots { dir, limit } => cmd_roots(&dir, limit, &config),
        Commands::Search {
            dir,
            query,
            ranked,
            json,
            limit,
        } => cmd_search(&dir, &query, ranked || config.search.ranked, json, limit, &config),
        Commands::Lookup { dir, message_id } => cmd_lookup(&dir, &message_id),
        Commands::Verify { dir } => cmd_verify(&dir),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "uatshell.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

fn open(dir: &Path) -> anyhow::Result<Archive> {
    Archive::open(dir).with_context(|| format!("Cannot open archive {}", dir.display()))
}

/// A message given as an index or a message-id (angle brackets optional).
fn resolve(archive: &Archive, target: &str) -> anyhow::Result<MessageIndex> {
    if let Ok(index) = target.parse::<MessageIndex>() {
        if (index as usize) < archive.len() {
            return Ok(index);
        }
        anyhow::bail!("Message {index} out of range (archive has {})", archive.len());
    }
    if let Some(index) = archive.lookup(target.as_bytes())? {
        return Ok(index);
    }
    if !target.starts_with('<') {
        if let Some(index) = archive.lookup(format!("<{target}>").as_bytes())? {
            return Ok(index);
        }
    }
    anyhow::bail!("No message with id {target}")
}

fn format_date(secs: u32, config: &Config) -> String {
    timestamp(secs).format(&config.display.date_format).to_string()
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "uat", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

fn cmd_info(dir: &Path, json: bool) -> anyhow::Result<()> {
    use humansize::{format_size, BINARY};

    let start = Instant::now();
    let archive = open(dir)?;
    let stats = uatshell::stats::collect(&archive, 10)?;
    let elapsed = start.elapsed();

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!();
    println!("  {:<20} {}", "Archive", dir.display());
    if let Some(name) = &stats.name {
        println!("  {:<20} {}", "Name", name);
    }
    if let Some(desc) = &stats.description {
        println!("  {:<20} {}", "Description", desc);
    }
    println!("  {:<20} {}", "Messages", stats.messages);
    println!("  {:<20} {}", "Threads", stats.threads);
    println!("  {:<20} {}", "Terms", stats.terms);
    println!(
        "  {:<20} {}",
        "Dictionary",
        if stats.dictionary { "yes" } else { "no" }
    );
    if let Some((min, max)) = stats.date_range {
        println!(
            "  {:<20} {} to {}",
            "Date range",
            min.format("%Y-%m-%d"),
            max.format("%Y-%m-%d")
        );
    }
    println!(
        "  {:<20} {}",
        "Total size",
        format_size(stats.total_size(), BINARY)
    );
    println!("  {:<20} {:.2?}", "Scan time", elapsed);

    println!();
    for (name, size) in &stats.files {
        println!("    {:<14} {:>12}", name, format_size(*size, BINARY));
    }

    if !stats.top_posters.is_empty() {
        println!();
        println!("  Top posters:");
        for (poster, count) in &stats.top_posters {
            println!("    {count:>6}  {poster}");
        }
    }
    println!();
    Ok(())
}

fn cmd_show(
    dir: &Path,
    target: &str,
    json: bool,
    mark: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let archive = open(dir)?;
    let index = resolve(&archive, target)?;
    let mut ctx = archive.decompressor(config.performance.lru_cache_size)?;
    let message = archive.load(index, &mut ctx)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&message)?);
    } else {
        println!("Index:      {}", message.index);
        println!("Message-ID: {}", message.message_id);
        println!("From:       {}", message.from);
        println!("Subject:    {}", message.subject);
        println!("Date:       {}", format_date(message.date, config));
        if let Some(parent) = message.parent {
            println!("Parent:     {parent}");
        }
        if !message.children.is_empty() {
            let list: Vec<String> = message.children.iter().map(u32::to_string).collect();
            println!("Replies:    {}", list.join(", "));
        }
        println!();
        println!("{}", message.body);
    }

    if mark {
        let mut visited = VisitedLog::open(&config::visited_path_for(config, dir))?;
        visited.mark_visited(message.message_id.as_bytes())?;
    }
    Ok(())
}

fn cmd_thread(dir: &Path, target: &str, config: &Config) -> anyhow::Result<()> {
    let archive = open(dir)?;
    let root = resolve(&archive, target)?;
    let visited = VisitedLog::open(&config::visited_path_for(config, dir))?;
    let width = config.display.subject_width;

    for node in archive.thread_with_root(root)? {
        let node = node?;
        let seen = visited.was_visited(archive.message_id_bytes(node.index)?);
        let indent = "  ".repeat(node.depth);
        let subject = truncate_str(&archive.subject(node.index)?, width);
        println!(
            "{} {:>8}  {}  {}{}  ({})",
            if seen { " " } else { "*" },
            node.index,
            format_date(archive.date(node.index)?, config),
            indent,
            subject,
            archive.real_name(node.index)?
        );
    }
    Ok(())
}

fn cmd_roots(dir: &Path, limit: Option<usize>, config: &Config) -> anyhow::Result<()> {
    let archive = open(dir)?;
    let visited = VisitedLog::open(&config::visited_path_for(config, dir))?;
    let width = config.display.subject_width;
    let limit = limit.unwrap_or(usize::MAX);

    println!(
        "  {:<1} {:>8} {:<17} {:<w$} {:>6}",
        "",
        "#",
        "Date",
        "Subject",
        "Posts",
        w = width
    );
    for root in archive.top_level().iter().take(limit) {
        let done = archive.is_thread_visited(root, &visited)?;
        println!(
            "  {:<1} {:>8} {:<17} {} {:>6}",
            if done { " " } else { "*" },
            root,
            format_date(archive.date(root)?, config),
            pad_str(&truncate_str(&archive.subject(root)?, width), width),
            archive.total_children_count(root)?
        );
    }
    Ok(())
}

fn cmd_search(
    dir: &Path,
    query: &str,
    ranked: bool,
    json: bool,
    limit: Option<usize>,
    config: &Config,
) -> anyhow::Result<()> {
    let archive = open(dir)?;
    let limit = match limit.unwrap_or(config.search.max_results) {
        0 => usize::MAX,
        n => n,
    };

    let start = Instant::now();
    let hits: Vec<(MessageIndex, Option<f32>)> = if ranked {
        archive
            .search_ranked(query)?
            .into_iter()
            .map(|h| (h.index, Some(h.score)))
            .collect()
    } else {
        archive.search(query)?.into_iter().map(|i| (i, None)).collect()
    };
    let elapsed = start.elapsed();
    let total = hits.len();
    let shown = &hits[..total.min(limit)];

    if json {
        let items: Vec<serde_json::Value> = shown
            .iter()
            .map(|&(index, score)| -> anyhow::Result<serde_json::Value> {
                Ok(serde_json::json!({
                    "index": index,
                    "score": score,
                    "message_id": archive.message_id(index)?,
                    "date": timestamp(archive.date(index)?).to_rfc3339(),
                    "from": archive.from(index)?,
                    "subject": archive.subject(index)?,
                }))
            })
            .collect::<anyhow::Result<_>>()?;
        let output = serde_json::json!({
            "query": query,
            "result_count": total,
            "results": items,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!();
    println!("  {} result(s) in {:.2?}", total, elapsed);
    println!();
    if shown.is_empty() {
        return Ok(());
    }

    let width = config.display.subject_width;
    println!(
        "  {:>8} {:<17} {:<25} {:<w$} {:>6}",
        "#",
        "Date",
        "From",
        "Subject",
        "Score",
        w = width
    );
    println!("  {}", "-".repeat(61 + width));
    for &(index, score) in shown {
        println!(
            "  {:>8} {:<17} {} {} {:>6}",
            index,
            format_date(archive.date(index)?, config),
            pad_str(&truncate_str(&archive.real_name(index)?, 25), 25),
            pad_str(&truncate_str(&archive.subject(index)?, width), width),
            score.map(|s| format!("{s:.2}")).unwrap_or_default()
        );
    }
    if shown.len() < total {
        println!("  ... {} more", total - shown.len());
    }
    println!();
    Ok(())
}

fn cmd_lookup(dir: &Path, message_id: &str) -> anyhow::Result<()> {
    let archive = open(dir)?;
    match archive.lookup(message_id.as_bytes())? {
        Some(index) => {
            println!("{index}");
            Ok(())
        }
        None => anyhow::bail!("No message with id {message_id}"),
    }
}

fn cmd_verify(dir: &Path) -> anyhow::Result<()> {
    let archive = open(dir)?;

    let pb = ProgressBar::new(archive.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Verifying [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .expect("valid template")
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    let report = archive.verify(&|done, total| {
        pb.set_length(total as u64);
        pb.set_position(done as u64);
    })?;
    pb.finish_and_clear();

    println!();
    println!("  {:<20} {}", "Messages", report.messages);
    println!("  {:<20} {}", "Terms", report.terms);
    println!("  {:<20} {:.2?}", "Time", start.elapsed());
    if report.is_ok() {
        println!("  {:<20} ok", "Result");
        println!();
        return Ok(());
    }

    println!("  {:<20} {} problem(s)", "Result", report.problems.len());
    for problem in report.problems.iter().take(50) {
        println!("    {problem}");
    }
    println!();
    anyhow::bail!("{} problem(s) found in {}", report.problems.len(), dir.display())
}

/// Truncate a string to fit within `max_width` columns, adding "..." if needed.
fn truncate_str(s: &str, max_width: usize) -> String {
    let width = UnicodeWidthStr::width(s);
    if width <= max_width {
        s.to_string()
    } else if max_width <= 3 {
        s.chars().take(max_width).collect()
    } else {
        let mut result = String::new();
        let mut current_width = 0;
        for ch in s.chars() {
            let ch_width = UnicodeWidthChar::width(ch).unwrap_or(0);
            if current_width + ch_width + 3 > max_width {
                break;
            }
            result.push(ch);
            current_width += ch_width;
        }
        result.push_str("...");
        result
    }
}

/// Pad with spaces to `width` display columns.
fn pad_str(s: &str, width: usize) -> String {
    let used = UnicodeWidthStr::width(s);
    format!("{s}{}", " ".repeat(width.saturating_sub(used)))
}
