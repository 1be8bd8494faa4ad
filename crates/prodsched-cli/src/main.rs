//! prodsched CLI — Production Scheduling Engine
//!
//! Loads a JSON production bundle, runs the scheduler or one of the three
//! headcount-optimization scenarios, and renders the result as a text table
//! or JSON.

mod report;

use std::io::Read as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use prodsched_core::{Bundle, RunConfig};
use prodsched_solver::dag;
use prodsched_solver::scenario::{scenario1, scenario2_minimize_makespan, scenario3_per_team_optimization, ScenarioRun};
use serde::Deserialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::report::{product_metrics_report, scenario_summary, task_report};

#[derive(Parser)]
#[command(name = "prodsched")]
#[command(author, version, about = "Production scheduling engine", long_about = None)]
struct Cli {
    /// Verbose output; repeat for more (maps to tracing's debug/trace levels)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a bundle without scheduling it
    Check {
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
    /// Run the scheduler once, under the bundle's own or overridden capacities
    Schedule(ScheduleArgs),
    /// Binary-search uniform mechanic/quality headcount to minimize makespan
    Scenario2(RunArgs),
    /// Per-team headcount search for minimum lateness, then shrink the slack
    Scenario3(RunArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Bundle JSON file; reads stdin if omitted
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// TOML config file merged under any CLI flags below
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    min_mechanics: Option<u32>,
    #[arg(long)]
    max_mechanics: Option<u32>,
    #[arg(long)]
    min_quality: Option<u32>,
    #[arg(long)]
    max_quality: Option<u32>,
    #[arg(long)]
    max_iterations: Option<u32>,
    #[arg(long)]
    late_part_delay_days: Option<f64>,
    #[arg(long)]
    allow_late_delivery: Option<bool>,
}

#[derive(clap::Args)]
struct ScheduleArgs {
    #[command(flatten)]
    run: RunArgs,

    /// Uniform mechanic headcount across all mechanic teams (default: bundle's own)
    #[arg(long)]
    mechanics: Option<u32>,

    /// Uniform quality headcount across all quality teams (default: bundle's own)
    #[arg(long)]
    quality: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Mirrors `RunConfig`, but every field optional, for deserializing a
/// partial `--config` TOML file that is then merged under CLI flags.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
struct ConfigFile {
    late_part_delay_days: Option<f64>,
    debug: Option<bool>,
    min_mechanics: Option<u32>,
    max_mechanics: Option<u32>,
    min_quality: Option<u32>,
    max_quality: Option<u32>,
    max_iterations: Option<u32>,
    allow_late_delivery: Option<bool>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    match cli.command {
        Commands::Check { file } => cmd_check(file.as_ref()),
        Commands::Schedule(args) => cmd_schedule(args, cli.verbose),
        Commands::Scenario2(args) => cmd_scenario(args, cli.verbose, "scenario2_minimize_makespan", |bundle, config| {
            scenario2_minimize_makespan(bundle, config).map_err(anyhow::Error::from)
        }),
        Commands::Scenario3(args) => cmd_scenario(args, cli.verbose, "scenario3_per_team_optimization", |bundle, config| {
            scenario3_per_team_optimization(bundle, config).map_err(anyhow::Error::from)
        }),
    }
}

fn load_bundle(file: Option<&PathBuf>) -> Result<Bundle> {
    let raw = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading bundle file {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).context("reading bundle from stdin")?;
            buf
        }
    };
    let bundle: Bundle = serde_json::from_str(&raw).context("parsing bundle JSON")?;
    bundle.validate().map_err(|errors| anyhow::anyhow!("bundle failed validation: {errors:?}"))?;
    Ok(bundle)
}

fn load_config(config_path: Option<&PathBuf>, args: &RunArgs, debug: bool) -> Result<RunConfig> {
    let mut config = RunConfig::default();

    if let Some(path) = config_path {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let file: ConfigFile = toml::from_str(&raw).context("parsing config TOML")?;
        apply_config_file(&mut config, file);
    }

    if let Some(v) = args.min_mechanics {
        config.min_mechanics = v;
    }
    if let Some(v) = args.max_mechanics {
        config.max_mechanics = v;
    }
    if let Some(v) = args.min_quality {
        config.min_quality = v;
    }
    if let Some(v) = args.max_quality {
        config.max_quality = v;
    }
    if let Some(v) = args.max_iterations {
        config.max_iterations = v;
    }
    if let Some(v) = args.late_part_delay_days {
        config.late_part_delay_days = v;
    }
    if let Some(v) = args.allow_late_delivery {
        config.allow_late_delivery = v;
    }
    config.debug = config.debug || debug;

    Ok(config)
}

fn apply_config_file(config: &mut RunConfig, file: ConfigFile) {
    if let Some(v) = file.late_part_delay_days {
        config.late_part_delay_days = v;
    }
    if let Some(v) = file.debug {
        config.debug = v;
    }
    if let Some(v) = file.min_mechanics {
        config.min_mechanics = v;
    }
    if let Some(v) = file.max_mechanics {
        config.max_mechanics = v;
    }
    if let Some(v) = file.min_quality {
        config.min_quality = v;
    }
    if let Some(v) = file.max_quality {
        config.max_quality = v;
    }
    if let Some(v) = file.max_iterations {
        config.max_iterations = v;
    }
    if let Some(v) = file.allow_late_delivery {
        config.allow_late_delivery = v;
    }
}

fn cmd_check(file: Option<&PathBuf>) -> Result<()> {
    let bundle = load_bundle(file)?;
    let effective_dag = dag::build_effective_dag(&bundle).context("building dependency graph")?;
    let warnings = dag::validate_dag(&effective_dag, &bundle);
    if warnings.is_empty() {
        println!("bundle is valid: {} tasks, {} teams, {} products", bundle.tasks.len(), bundle.teams.len(), bundle.products.len());
    } else {
        println!("bundle is valid with {} warning(s):", warnings.len());
        for warning in &warnings {
            println!("  {warning:?}");
        }
    }
    Ok(())
}

fn cmd_schedule(args: ScheduleArgs, verbose: u8) -> Result<()> {
    let mut bundle = load_bundle(args.run.file.as_ref())?;
    let config = load_config(args.run.config.as_ref(), &args.run, verbose > 0)?;
    let run = scenario1(&mut bundle, args.mechanics, args.quality, &config).context("running scheduler")?;
    emit_run("schedule", &bundle, &run, &config, args.run.format)
}

fn cmd_scenario(
    args: RunArgs,
    verbose: u8,
    name: &'static str,
    run_fn: impl FnOnce(&mut Bundle, &RunConfig) -> Result<ScenarioRun>,
) -> Result<()> {
    let mut bundle = load_bundle(args.file.as_ref())?;
    let config = load_config(args.config.as_ref(), &args, verbose > 0)?;
    let run = run_fn(&mut bundle, &config).with_context(|| format!("running {name}"))?;
    emit_run(name, &bundle, &run, &config, args.format)
}

fn emit_run(name: &'static str, bundle: &Bundle, run: &ScenarioRun, config: &RunConfig, format: OutputFormat) -> Result<()> {
    let effective_dag = dag::build_effective_dag(bundle).context("building dependency graph")?;
    let tasks = task_report(bundle, &effective_dag, &run.schedule, config);
    let products = product_metrics_report(bundle, &effective_dag, &run.schedule);
    let summary = scenario_summary(name, bundle, run);

    match format {
        OutputFormat::Json => {
            let payload = serde_json::json!({
                "tasks": tasks,
                "products": products,
                "summary": summary,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        OutputFormat::Text => {
            print_summary_table(&summary);
            println!();
            print_product_table(&products);
            println!();
            print_task_table(&tasks);
        }
    }
    Ok(())
}

fn print_summary_table(summary: &report::ScenarioSummary) {
    println!("scenario: {}", summary.scenario);
    println!(
        "makespan: {} day(s)   mechanics: {}   quality: {}   iterations: {}",
        summary.makespan_days, summary.total_mechanics, summary.total_quality, summary.iterations_used
    );
    println!(
        "max lateness: {} day(s)   total lateness: {} day(s)   unscheduled: {}",
        summary.max_lateness_days, summary.total_lateness_days, summary.unscheduled_count
    );
    println!("utilization by team:");
    for (team, util) in &summary.utilization_by_team {
        println!("  {team:<20} {:.1}%", util * 100.0);
    }
}

fn print_product_table(products: &[report::ProductMetricsRow]) {
    println!(
        "{:<16} {:<20} {:<20} {:>8} {:>8} {:>6} {:>6} {:>6} {:>6}",
        "PRODUCT", "DELIVERY", "COMPLETION", "LATE(d)", "ON-TIME", "PROD", "QC", "RWK", "LP"
    );
    for p in products {
        println!(
            "{:<16} {:<20} {:<20} {:>8} {:>8} {:>6} {:>6} {:>6} {:>6}",
            p.product,
            p.delivery_date,
            p.projected_completion.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string()),
            p.lateness_days,
            p.on_time,
            p.production_tasks,
            p.quality_tasks,
            p.rework_tasks,
            p.late_part_tasks,
        );
    }
}

fn print_task_table(tasks: &[report::TaskReportRow]) {
    println!(
        "{:>5} {:>6} {:<18} {:<10} {:<10} {:<6} {:<20} {:<20} {:>6} {:>6} {:>8}",
        "RANK", "ID", "NAME", "KIND", "PRODUCT", "TEAM", "START", "END", "DUR", "WORK", "SLACK(h)"
    );
    for t in tasks {
        println!(
            "{:>5} {:>6} {:<18} {:<10} {:<10} {:<6} {:<20} {:<20} {:>6} {:>6} {:>8.1}",
            t.priority_rank,
            t.task_id,
            t.display_name,
            t.kind,
            t.product.as_deref().unwrap_or("-"),
            t.team,
            t.start,
            t.end,
            t.duration_minutes,
            t.workers_required,
            t.slack_hours,
        );
    }
}
