use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use buildlog::classify::{ItemState, NodeVerdict};
use buildlog::projectors::dashboard_projector::{
    LogPanel, NodeCard, Panel, ProjectPanel, project_log, project_status,
};
use buildlog::storage::{DirSource, Resource};
use buildlog::{Dashboard, DashboardOptions, LogFilter, parse_log_from_str, parse_status_from_str};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Parser)]
#[command(
    name = "buildlog",
    about = "Build log and project status dashboard",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    /// Emit JSON instead of a human-readable view.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse a log file and print its annotated date groups.
    Logs(LogsArgs),

    /// Parse a status file and print its cards in display order.
    Status(StatusArgs),

    /// Find the status card a log context points at.
    Resolve(ResolveArgs),

    /// Load both panels from a directory.
    Dashboard(DashboardArgs),
}

#[derive(Debug, Clone, Args)]
struct FilterArgs {
    /// Inclusive start date filter (YYYY-MM-DD).
    #[arg(long)]
    since: Option<NaiveDate>,
    /// Inclusive end date filter (YYYY-MM-DD).
    #[arg(long)]
    until: Option<NaiveDate>,
    /// Keep at most this many date groups, newest first.
    #[arg(long)]
    limit: Option<usize>,
}

impl From<FilterArgs> for LogFilter {
    fn from(args: FilterArgs) -> Self {
        Self {
            since: args.since,
            until: args.until,
            limit: args.limit,
        }
    }
}

#[derive(Debug, Args)]
struct LogsArgs {
    /// Log file in the dated log notation.
    input: PathBuf,
    #[command(flatten)]
    filter: FilterArgs,
}

#[derive(Debug, Args)]
struct StatusArgs {
    /// Status file in the block notation.
    input: PathBuf,
}

#[derive(Debug, Args)]
struct ResolveArgs {
    /// Context text as written in the log, e.g. `项目:挑战杯.自动驾驶`.
    context: String,
    /// Status file to resolve against.
    #[arg(long)]
    work: PathBuf,
}

#[derive(Debug, Args)]
struct DashboardArgs {
    /// Directory holding the log and status files.
    #[arg(long, default_value = ".")]
    dir: PathBuf,
    /// Log file name inside the directory.
    #[arg(long, default_value = "log.md")]
    log_file: String,
    /// Status file name inside the directory.
    #[arg(long, default_value = "work.md")]
    work_file: String,
    #[command(flatten)]
    filter: FilterArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json = cli.json;
    match cli.command {
        Commands::Logs(args) => handle_logs(args, json),
        Commands::Status(args) => handle_status(args, json),
        Commands::Resolve(args) => handle_resolve(args, json),
        Commands::Dashboard(args) => handle_dashboard(args, json),
    }
}

/// Logging is off unless `RUST_LOG` is set or `--verbose` is passed.
fn init_tracing(verbose: bool) {
    let default = if verbose { "buildlog=debug" } else { "off" };
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|raw| {
            let raw = raw.trim();
            if raw.is_empty() {
                return None;
            }
            EnvFilter::try_new(raw).ok()
        })
        .unwrap_or_else(|| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {:?}", path))
}

fn handle_logs(args: LogsArgs, json: bool) -> Result<()> {
    let LogsArgs { input, filter } = args;
    let text = read_text(&input)?;
    let panel = project_log(&parse_log_from_str(&text), &filter.into());

    if json {
        println!("{}", serde_json::to_string_pretty(&panel)?);
    } else if panel.groups.is_empty() {
        eprintln!("No log entries found in {:?}.", input);
    } else {
        print!("{}", render_log_panel(&panel));
    }
    Ok(())
}

fn handle_status(args: StatusArgs, json: bool) -> Result<()> {
    let text = read_text(&args.input)?;
    let panel = project_status(parse_status_from_str(&text));

    if json {
        println!("{}", serde_json::to_string_pretty(&panel)?);
    } else if panel.cards.is_empty() {
        eprintln!("No status blocks found in {:?}.", args.input);
    } else {
        print!("{}", render_project_panel(&panel));
    }
    Ok(())
}

fn handle_resolve(args: ResolveArgs, json: bool) -> Result<()> {
    let ResolveArgs { context, work } = args;
    let text = read_text(&work)?;
    let panel = project_status(parse_status_from_str(&text));

    match panel.resolve(&context) {
        Some(card) if json => println!("{}", serde_json::to_string_pretty(card)?),
        Some(card) => print!("{}", render_card(card)),
        None => eprintln!("No match found for {:?}.", context),
    }
    Ok(())
}

fn handle_dashboard(args: DashboardArgs, json: bool) -> Result<()> {
    let DashboardArgs {
        dir,
        log_file,
        work_file,
        filter,
    } = args;

    let source = DirSource::new(dir)
        .with_file_name(Resource::Log, log_file)
        .with_file_name(Resource::Work, work_file);
    let opts = DashboardOptions {
        log_filter: filter.into(),
    };
    let dashboard = Dashboard::load(&source, &opts);

    if json {
        println!("{}", serde_json::to_string_pretty(&dashboard)?);
        return Ok(());
    }

    println!("== log ==");
    match &dashboard.log {
        Panel::Loaded(panel) => print!("{}", render_log_panel(panel)),
        Panel::Failed { reason } => println!("{reason}"),
    }
    println!();
    println!("== projects ==");
    match &dashboard.projects {
        Panel::Loaded(panel) => print!("{}", render_project_panel(panel)),
        Panel::Failed { reason } => println!("{reason}"),
    }
    Ok(())
}

/* ------------------------------ Text views ------------------------------ */

fn render_log_panel(panel: &LogPanel) -> String {
    let mut out = String::new();
    for (idx, group) in panel.groups.iter().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        let _ = writeln!(out, "{}", group.date);
        for entry in &group.entries {
            let marker = match entry.tone {
                Some(tone) => format!("  ↳ [{}] ", tone.label()),
                None => "  ".to_string(),
            };
            if entry.has_context {
                let _ = writeln!(out, "{marker}{} :: {}", entry.context, entry.message);
            } else {
                let _ = writeln!(out, "{marker}{}", entry.message);
            }
        }
    }
    out
}

fn render_project_panel(panel: &ProjectPanel) -> String {
    let mut out = String::new();
    for card in &panel.cards {
        out.push_str(&render_card(card));
    }
    if !panel.summary.is_empty() {
        out.push('\n');
        for (category, tally) in &panel.summary {
            let _ = writeln!(
                out,
                "{category}: {} total, {} completed, {} failed, {} open",
                tally.total, tally.completed, tally.failed, tally.open
            );
        }
    }
    out
}

fn render_card(card: &NodeCard) -> String {
    let verdict = match card.verdict {
        NodeVerdict::Completed => "completed",
        NodeVerdict::Failed => "failed",
        NodeVerdict::Open => "open",
    };
    let mut out = format!(
        "#{} [{}] {} ({verdict})\n",
        card.position + 1,
        card.kind.label(),
        card.name
    );
    for item in &card.items {
        let state = match item.state {
            ItemState::Completed => "done".to_string(),
            ItemState::Failed => "failed".to_string(),
            ItemState::InProgress => "in progress".to_string(),
            ItemState::Percent(n) => format!("{n}%"),
            ItemState::Pending => "pending".to_string(),
        };
        let _ = writeln!(out, "    - {}: {} [{state}]", item.display_name, item.status);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "2024.05.01\n项目:A.b:开始\n项目:A.b:已完成\n";
    const WORK: &str = "项目:A{\nb.已完成\n.40%\n}\n任务:B{\n}\n";

    #[test]
    fn log_view_marks_status_updates() {
        let panel = project_log(&parse_log_from_str(LOG), &LogFilter::default());
        let text = render_log_panel(&panel);
        assert_eq!(
            text,
            "2024.05.01\n  项目:A.b :: 开始\n  ↳ [success] 项目:A.b :: 已完成\n"
        );
    }

    #[test]
    fn log_view_prints_bare_message_without_context() {
        let log = "2024.05.02\n散步\n已完成\n";
        let panel = project_log(&parse_log_from_str(log), &LogFilter::default());
        let text = render_log_panel(&panel);
        assert_eq!(text, "2024.05.02\n  散步\n  ↳ [success] 已完成\n");
    }

    #[test]
    fn project_view_lists_cards_and_summary() {
        let panel = project_status(parse_status_from_str(WORK));
        let text = render_project_panel(&panel);
        assert!(text.starts_with("#1 [项目] A (open)\n    - b: 已完成 [done]\n    - 进度: 40% [40%]\n"));
        assert!(text.contains("#2 [任务] B (open)\n"));
        assert!(text.contains("项目: 1 total, 0 completed, 0 failed, 1 open"));
    }

    #[test]
    fn card_header_uses_category_label() {
        let panel = project_status(parse_status_from_str("组会:周一{\n汇报.已完成\n}\n"));
        let text = render_card(&panel.cards[0]);
        assert!(text.starts_with("#1 [组会] 周一 (completed)\n"));
    }

    #[test]
    fn read_text_reports_missing_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let missing = tmp.path().join("log.md");
        let err = read_text(&missing).expect_err("missing file");
        assert!(err.to_string().starts_with("reading"));
    }

    #[test]
    fn dashboard_loads_from_directory() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(tmp.path().join("journal.md"), LOG).expect("write log");

        let source = DirSource::new(tmp.path()).with_file_name(Resource::Log, "journal.md");
        let dashboard = Dashboard::load(&source, &DashboardOptions::default());
        assert!(dashboard.log.loaded().is_some());
        assert!(dashboard.projects.is_failed());
    }
}
