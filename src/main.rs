use clap::{Arg, Command};
use log::LevelFilter;
use recipe_engine::collaborators::{MemoryRecorder, Recorded};
use recipe_engine::engine::{ProcessReport, RuleEngine};
use recipe_engine::event::Event;
use recipe_engine::executor::{ActionExecutor, OutcomeStatus};
use recipe_engine::loader::{load_rules, load_rules_file};
use recipe_engine::pipeline::Pipeline;
use recipe_engine::recipes::{self, RECIPES};
use recipe_engine::statistics::StatisticsCollector;
use recipe_engine::Config;
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let matches = Command::new("recipe-engine")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Rule-matching automation engine for communication events")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/recipe-engine.yaml"),
        )
        .arg(
            Arg::new("rules")
                .short('r')
                .long("rules")
                .value_name("FILE")
                .help("Rules file to use instead of the configured rules_path")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("check")
                .long("check")
                .value_name("FILE")
                .help("Validate a recipe file and print errors by line")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("event")
                .long("event")
                .value_name("FILE")
                .help("Replay one event (YAML or JSON) against the rules")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("replay")
                .long("replay")
                .value_name("FILE")
                .help("Replay a list of events through the worker pool and print statistics")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("live")
                .long("live")
                .help("Send replayed actions to the configured Slack webhook and CRM endpoint")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("list-recipes")
                .long("list-recipes")
                .help("List the built-in recipe templates")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("export-recipe")
                .long("export-recipe")
                .value_name("NAME")
                .help("Print a built-in recipe as YAML ('all' for the whole library)")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging with per-condition evaluation")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    if matches.get_flag("list-recipes") {
        list_recipes();
        return;
    }

    if let Some(name) = matches.get_one::<String>("export-recipe") {
        export_recipe(name);
        return;
    }

    if let Some(path) = matches.get_one::<String>("check") {
        check_rules_file(path);
        return;
    }

    let event_file = matches.get_one::<String>("event");
    let replay_file = matches.get_one::<String>("replay");
    if event_file.is_none() && replay_file.is_none() {
        eprintln!("Nothing to do. Use --check, --event, --replay or --help.");
        process::exit(2);
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("/etc/recipe-engine.yaml");
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            process::exit(1);
        }
    };

    let rules_path = matches
        .get_one::<String>("rules")
        .cloned()
        .unwrap_or_else(|| config.rules_path.clone());

    let live = matches.get_flag("live");
    let (engine, recorder, statistics) = match build_engine(&config, &rules_path, live) {
        Ok(parts) => parts,
        Err(e) => {
            eprintln!("Error starting rule engine: {e:#}");
            process::exit(1);
        }
    };

    if let Some(path) = event_file {
        replay_event(&engine, &recorder, path).await;
    }

    if let Some(path) = replay_file {
        replay_events(engine, &config, statistics, path).await;
    }
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file(path)
    } else {
        log::info!("No configuration at {path}, using defaults");
        Ok(Config::default())
    }
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Use --export-recipe all to write a starter rules file.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e:#}");
            process::exit(1);
        }
    }
}

/// Replays record side effects in memory unless `live` is set, in which case
/// configured endpoints receive real calls.
fn build_engine(
    config: &Config,
    rules_path: &str,
    live: bool,
) -> anyhow::Result<(
    Arc<RuleEngine>,
    Arc<MemoryRecorder>,
    Option<Arc<StatisticsCollector>>,
)> {
    let rules = load_rules_file(rules_path)?;
    let (collaborators, recorder) = config.replay_collaborators(live)?;
    let mut engine = RuleEngine::new(
        rules,
        ActionExecutor::new(collaborators, config.retry.clone()),
    );
    let statistics = if config.statistics_enabled {
        let statistics = Arc::new(StatisticsCollector::new());
        engine = engine.with_statistics(statistics.clone());
        Some(statistics)
    } else {
        None
    };
    Ok((Arc::new(engine), recorder, statistics))
}

fn list_recipes() {
    println!("Built-in recipes:");
    println!();
    for recipe in RECIPES {
        println!(
            "  {:<28} {:<5} {}",
            recipe.id(),
            "★".repeat(recipe.stars as usize),
            recipe.description
        );
    }
}

fn export_recipe(name: &str) {
    if name.eq_ignore_ascii_case("all") {
        print!("{}", recipes::library_document());
        return;
    }
    match recipes::find(name) {
        Some(recipe) => print!("{}", recipe.source),
        None => {
            eprintln!("Unknown recipe '{name}'. Use --list-recipes to see what is available.");
            process::exit(1);
        }
    }
}

fn check_rules_file(path: &str) {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error reading {path}: {e}");
            process::exit(1);
        }
    };

    match load_rules(&content) {
        Ok(rules) => {
            println!("✅ {path}: {} rule(s) valid", rules.len());
            for (i, rule) in rules.rules().iter().enumerate() {
                println!(
                    "  Rule {}: {} ({} trigger(s), {} action(s){})",
                    i + 1,
                    rule.name,
                    rule.triggers.len(),
                    rule.actions.len(),
                    if rule.enabled { "" } else { ", disabled" }
                );
            }
        }
        Err(errors) => {
            println!("❌ {path}: {} error(s)", errors.len());
            for error in &errors {
                println!("  {error}");
            }
            process::exit(1);
        }
    }
}

fn load_event(path: &str) -> anyhow::Result<Event> {
    use anyhow::Context;

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read event file: {path}"))?;
    Event::from_yaml(&content).with_context(|| format!("Failed to parse event file: {path}"))
}

fn load_events(path: &str) -> anyhow::Result<Vec<Event>> {
    use anyhow::Context;

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read events file: {path}"))?;
    let events: Vec<Event> = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse events file: {path}"))?;
    Ok(events)
}

async fn replay_event(engine: &RuleEngine, recorder: &MemoryRecorder, path: &str) {
    let event = match load_event(path) {
        Ok(event) => event,
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    };

    println!("🧪 Replaying event {} ({}) from {}", event.id, event.channel, event.sender);
    match engine.process(&event).await {
        Ok(report) => {
            print_report(&report);
            print_side_effects(&recorder.records());
            if report.failures().count() > 0 {
                process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Engine error: {e}");
            process::exit(1);
        }
    }
}

async fn replay_events(
    engine: Arc<RuleEngine>,
    config: &Config,
    statistics: Option<Arc<StatisticsCollector>>,
    path: &str,
) {
    let events = match load_events(path) {
        Ok(events) => events,
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    };

    let rule_ids: Vec<String> = match engine.snapshot() {
        Ok(rules) => rules.rules().iter().map(|r| r.id.clone()).collect(),
        Err(e) => {
            eprintln!("Engine error: {e}");
            process::exit(1);
        }
    };

    let (pipeline, mut reports) = Pipeline::spawn(engine, config.workers, config.queue_capacity);
    let total = events.len();
    let collector = tokio::spawn(async move {
        let mut collected = Vec::with_capacity(total);
        while let Some(report) = reports.recv().await {
            collected.push(report);
        }
        collected
    });

    for event in events {
        if let Err(e) = pipeline.submit(event).await {
            log::error!("{e}");
        }
    }
    pipeline.shutdown().await;

    let reports = match collector.await {
        Ok(reports) => reports,
        Err(e) => {
            eprintln!("Report collection failed: {e}");
            process::exit(1);
        }
    };
    for report in &reports {
        print_report(report);
    }
    println!();
    println!("Processed {} of {total} event(s)", reports.len());

    if let Some(statistics) = statistics {
        statistics.flush().await;
        let (global, rules) = statistics.snapshot();
        println!("Skipped (no propagation): {}", global.skipped_events);
        println!("Matched no rule: {}", global.no_rule_matches);
        for stats in &rules {
            println!(
                "  {:<28} matches: {:<4} actions ok: {:<4} failed: {}",
                stats.rule_id, stats.matches, stats.actions_succeeded, stats.actions_failed
            );
        }
        let unmatched = statistics.unmatched_rules(&rule_ids);
        if !unmatched.is_empty() {
            println!("Rules that never matched: {}", unmatched.join(", "));
        }
    }
}

fn print_report(report: &ProcessReport) {
    println!();
    if report.matched_rules.is_empty() {
        println!("Event {}: no rules matched", report.event_id);
        return;
    }
    println!(
        "Event {}: matched {}{}",
        report.event_id,
        report.matched_rules.join(", "),
        if report.propagate { "" } else { " (processing skipped)" }
    );
    for outcome in &report.outcomes {
        let marker = match outcome.status {
            OutcomeStatus::Succeeded => "✅",
            OutcomeStatus::Failed => "❌",
            OutcomeStatus::Skipped => "⏭️",
        };
        println!(
            "  {marker} {}:{} after {} attempt(s): {}",
            outcome.rule_id,
            outcome.action,
            outcome.attempts,
            truncate_string(&outcome.detail, 100)
        );
        for warning in &outcome.warnings {
            println!("     ⚠️  {warning}");
        }
    }
}

fn print_side_effects(records: &[Recorded]) {
    if records.is_empty() {
        return;
    }
    println!();
    println!("Recorded side effects:");
    for record in records {
        match record {
            Recorded::Notified { channel, message } => println!("  notify {channel}: {message}"),
            Recorded::TaskCreated { id, task } => println!(
                "  task {id}: {} (priority {}, due {})",
                task.title,
                task.priority,
                task.due
                    .map(|d| d.to_rfc3339())
                    .unwrap_or_else(|| "none".to_string())
            ),
            Recorded::CrmPushed { fields, .. } => println!(
                "  crm: {}",
                serde_json::to_string(fields).unwrap_or_default()
            ),
            Recorded::Reminder { at, message } => {
                println!("  reminder at {}: {message}", at.to_rfc3339())
            }
            Recorded::Tagged { tag, .. } => println!("  tag: {tag}"),
            Recorded::Archived { .. } => println!("  archived"),
            Recorded::Logged(message) => println!("  log: {message}"),
        }
    }
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len).collect();
        format!("{truncated}...")
    }
}
