use chrono::{Local, NaiveDate};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use stockflow_batch::{
    BatchError, BatchRunner, BatchRunnerConfig, CheckpointStore, RetryPolicy, RunOptions,
    RunReport, RunStatus, TaskContext, nightly_registry,
};
use stockflow_engine::{
    ForecastProvider, StaticForecastProvider, StoredForecastProvider, classify_item,
    suggest_quantity,
};
use stockflow_store::{
    FreshnessCache, FsFreshnessCache, FsRecordStore, RecordStore, cache_keys,
};

#[derive(Parser, Debug)]
#[command(name = "stockflow-cli")]
#[command(about = "Batch and on-demand surface for the stockflow replenishment core")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute the nightly batch plan.
    Run(RunArgs),
    /// Continue the last unfinished run from its checkpoint.
    Resume(ResumeArgs),
    /// Re-run one named task out of band.
    RunTask(RunTaskArgs),
    /// On-demand order-quantity suggestion for one item.
    Suggest(SuggestArgs),
    /// On-demand classification for one item.
    Classify(ClassifyArgs),
    /// Print the current checkpoint.
    InspectCheckpoint(InspectCheckpointArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    #[arg(long, default_value = "data")]
    data_root: PathBuf,
    /// JSON document of per-item forecast series from the external model.
    #[arg(long)]
    forecasts: PathBuf,
    #[arg(long)]
    run_id: Option<String>,
    #[arg(long)]
    today: Option<NaiveDate>,
    #[arg(long, default_value_t = 30)]
    horizon_days: u32,
    #[arg(long, default_value_t = 4)]
    parallel_limit: usize,
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,
    #[arg(long)]
    deadline_minutes: Option<u64>,
}

#[derive(clap::Args, Debug)]
struct ResumeArgs {
    #[arg(long, default_value = "data")]
    data_root: PathBuf,
    #[arg(long)]
    forecasts: PathBuf,
    #[arg(long)]
    today: Option<NaiveDate>,
    #[arg(long, default_value_t = 30)]
    horizon_days: u32,
    #[arg(long, default_value_t = 4)]
    parallel_limit: usize,
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,
    #[arg(long)]
    deadline_minutes: Option<u64>,
}

#[derive(clap::Args, Debug)]
struct RunTaskArgs {
    #[arg(long)]
    name: String,
    #[arg(long, default_value = "data")]
    data_root: PathBuf,
    #[arg(long)]
    forecasts: Option<PathBuf>,
    #[arg(long)]
    today: Option<NaiveDate>,
    #[arg(long, default_value_t = 30)]
    horizon_days: u32,
}

#[derive(clap::Args, Debug)]
struct SuggestArgs {
    #[arg(long)]
    item: String,
    #[arg(long)]
    target_date: NaiveDate,
    #[arg(long, default_value_t = 15.0)]
    margin: f64,
    #[arg(long, default_value = "data")]
    data_root: PathBuf,
    #[arg(long)]
    today: Option<NaiveDate>,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(clap::Args, Debug)]
struct ClassifyArgs {
    #[arg(long)]
    item: String,
    #[arg(long, default_value = "data")]
    data_root: PathBuf,
    #[arg(long)]
    today: Option<NaiveDate>,
    #[arg(long, default_value_t = 30)]
    horizon_days: u32,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(clap::Args, Debug)]
struct InspectCheckpointArgs {
    #[arg(long, default_value = "data")]
    data_root: PathBuf,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

const DEFAULT_CACHE_TTL_SECONDS: u64 = 86_400;
const SUGGESTION_TTL_SECONDS: u64 = 3_600;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(args) => run_command(args).await,
        Commands::Resume(args) => resume_command(args).await,
        Commands::RunTask(args) => run_task_command(args).await,
        Commands::Suggest(args) => suggest_command(args).await,
        Commands::Classify(args) => classify_command(args).await,
        Commands::InspectCheckpoint(args) => inspect_checkpoint_command(args),
    };

    match result {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(2)
        }
    }
}

fn today_or_local(today: Option<NaiveDate>) -> NaiveDate {
    today.unwrap_or_else(|| Local::now().date_naive())
}

fn open_context(
    data_root: &PathBuf,
    provider: Arc<dyn ForecastProvider>,
    today: NaiveDate,
    horizon_days: u32,
) -> Result<TaskContext, String> {
    let store = FsRecordStore::new(data_root).map_err(|error| error.to_string())?;
    let cache = FsFreshnessCache::new(data_root).map_err(|error| error.to_string())?;
    Ok(TaskContext {
        store: Arc::new(store),
        cache: Arc::new(cache),
        provider,
        today,
        horizon_days,
        cache_ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
    })
}

fn runner_config(
    max_attempts: u32,
    parallel_limit: usize,
    deadline_minutes: Option<u64>,
) -> BatchRunnerConfig {
    BatchRunnerConfig {
        retry: RetryPolicy {
            max_attempts,
            ..RetryPolicy::default()
        },
        parallel_limit,
        run_deadline: deadline_minutes.map(|minutes| Duration::from_secs(minutes * 60)),
        ..BatchRunnerConfig::default()
    }
}

async fn run_command(args: RunArgs) -> Result<ExitCode, String> {
    let today = today_or_local(args.today);
    let provider =
        StaticForecastProvider::from_json_file(&args.forecasts).map_err(|e| e.to_string())?;
    let context = open_context(&args.data_root, Arc::new(provider), today, args.horizon_days)?;
    let registry = nightly_registry().map_err(|error| error.to_string())?;
    let runner = BatchRunner::new(
        registry,
        context,
        CheckpointStore::in_dir(&args.data_root),
        runner_config(args.max_attempts, args.parallel_limit, args.deadline_minutes),
    );

    let run_id = args
        .run_id
        .unwrap_or_else(|| format!("nightly-{today}"));
    let report = runner
        .run(RunOptions {
            run_id,
            force_resume: false,
        })
        .await
        .map_err(|error| error.to_string())?;

    print_run_report(&report);
    Ok(exit_code_for_status(report.status))
}

async fn resume_command(args: ResumeArgs) -> Result<ExitCode, String> {
    let today = today_or_local(args.today);
    let provider =
        StaticForecastProvider::from_json_file(&args.forecasts).map_err(|e| e.to_string())?;
    let context = open_context(&args.data_root, Arc::new(provider), today, args.horizon_days)?;
    let registry = nightly_registry().map_err(|error| error.to_string())?;
    let runner = BatchRunner::new(
        registry,
        context,
        CheckpointStore::in_dir(&args.data_root),
        runner_config(args.max_attempts, args.parallel_limit, args.deadline_minutes),
    );

    let report = match runner
        .run(RunOptions {
            // Resume adopts the checkpoint's run id.
            run_id: String::new(),
            force_resume: true,
        })
        .await
    {
        Ok(report) => report,
        Err(BatchError::NoUsableCheckpoint) => {
            eprintln!("error: {}", BatchError::NoUsableCheckpoint);
            return Ok(ExitCode::from(3));
        }
        Err(error) => return Err(error.to_string()),
    };

    print_run_report(&report);
    Ok(exit_code_for_status(report.status))
}

async fn run_task_command(args: RunTaskArgs) -> Result<ExitCode, String> {
    let today = today_or_local(args.today);
    let provider: Arc<dyn ForecastProvider> = match &args.forecasts {
        Some(path) => {
            Arc::new(StaticForecastProvider::from_json_file(path).map_err(|e| e.to_string())?)
        }
        None => {
            let store = FsRecordStore::new(&args.data_root).map_err(|e| e.to_string())?;
            Arc::new(StoredForecastProvider::new(Arc::new(store)))
        }
    };
    let context = open_context(&args.data_root, provider, today, args.horizon_days)?;
    let registry = nightly_registry().map_err(|error| error.to_string())?;
    let runner = BatchRunner::new(
        registry,
        context,
        CheckpointStore::in_dir(&args.data_root),
        BatchRunnerConfig::default(),
    );

    let run_id = format!("manual-{today}");
    let result = runner
        .run_single(&args.name, &run_id)
        .await
        .map_err(|error| error.to_string())?;

    println!("task: {}", result.task);
    println!("outcome: {}", result.outcome.as_str());
    println!("attempts: {}", result.attempts);
    if let Some(reason) = result.error.as_deref() {
        println!("error: {reason}");
    }
    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

async fn suggest_command(args: SuggestArgs) -> Result<ExitCode, String> {
    let today = today_or_local(args.today);
    let store: Arc<dyn RecordStore> =
        Arc::new(FsRecordStore::new(&args.data_root).map_err(|e| e.to_string())?);
    let cache = FsFreshnessCache::new(&args.data_root).map_err(|e| e.to_string())?;

    let item = store.get_item(&args.item).await.map_err(|e| e.to_string())?;
    let forecast = store
        .forecast_for(&args.item)
        .await
        .map_err(|e| e.to_string())?;
    let suggestion = suggest_quantity(&item, &forecast, today, args.target_date, args.margin)
        .map_err(|error| error.to_string())?;

    let value = serde_json::to_value(&suggestion).map_err(|e| e.to_string())?;
    cache
        .put(&cache_keys::quantity(&args.item), value.clone(), SUGGESTION_TTL_SECONDS)
        .await
        .map_err(|e| e.to_string())?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&value).map_err(|e| e.to_string())?
        );
    } else {
        println!("item: {}", args.item);
        println!("quantity: {}", suggestion.quantity);
        println!("predictions_total: {}", suggestion.predictions_total);
        println!("net_need: {}", suggestion.net_need);
        println!("margin_pct: {}", suggestion.margin_pct);
        println!(
            "coverage: {} days (until {})",
            suggestion.coverage_days, suggestion.coverage_until
        );
        println!("estimated_cost: {:.2}", suggestion.estimated_cost);
    }
    Ok(ExitCode::SUCCESS)
}

async fn classify_command(args: ClassifyArgs) -> Result<ExitCode, String> {
    let today = today_or_local(args.today);
    let store: Arc<dyn RecordStore> =
        Arc::new(FsRecordStore::new(&args.data_root).map_err(|e| e.to_string())?);
    let provider: Arc<dyn ForecastProvider> =
        Arc::new(StoredForecastProvider::new(store.clone()));

    let classification = classify_item(&store, &provider, &args.item, args.horizon_days, today)
        .await
        .map_err(|error| error.to_string())?;

    if args.json {
        let value = serde_json::json!({
            "item_id": args.item,
            "severity": classification.severity.as_str(),
            "financial_impact": classification.financial_impact,
            "insufficient_data": classification.insufficient_data,
            "remaining": classification.remaining,
            "stockout_date": classification.stockout_date,
            "order_deadline": classification.order_deadline,
            "order_window": classification.order_window,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&value).map_err(|e| e.to_string())?
        );
    } else {
        println!("item: {}", args.item);
        println!("severity: {}", classification.severity.as_str());
        println!("financial_impact: {:.2}", classification.financial_impact);
        println!("insufficient_data: {}", classification.insufficient_data);
        println!("remaining: {}", classification.remaining);
        if let Some(date) = classification.stockout_date {
            println!("stockout_date: {date}");
        }
        if let Some(date) = classification.order_deadline {
            println!("order_deadline: {date}");
        }
        if let Some((open, close)) = classification.order_window {
            println!("order_window: {open} .. {close}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn inspect_checkpoint_command(args: InspectCheckpointArgs) -> Result<ExitCode, String> {
    let store = CheckpointStore::in_dir(&args.data_root);
    let Some(checkpoint) = store.load() else {
        return Err(format!("no checkpoint at {}", store.path().display()));
    };

    if args.json {
        let json = serde_json::to_string_pretty(&checkpoint).map_err(|e| e.to_string())?;
        println!("{json}");
    } else {
        println!("checkpoint: {}", store.path().display());
        println!("run_id: {}", checkpoint.run_id);
        println!("step_index: {}", checkpoint.step_index);
        println!("updated_at: {}", checkpoint.updated_at);
        println!(
            "completed: {}",
            checkpoint
                .completed
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        );
        println!(
            "terminal_status: {}",
            checkpoint
                .terminal_status
                .as_deref()
                .unwrap_or("<in_progress>")
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn print_run_report(report: &RunReport) {
    println!("run_id: {}", report.run_id);
    println!("status: {}", report.status.as_str());
    println!("resumed: {}", report.resumed);
    for result in &report.task_results {
        match result.error.as_deref() {
            Some(reason) => println!(
                "  {}: {} after {} attempts ({reason})",
                result.task,
                result.outcome.as_str(),
                result.attempts
            ),
            None => println!(
                "  {}: {} ({} attempts, {} ms)",
                result.task,
                result.outcome.as_str(),
                result.attempts,
                result.duration.as_millis()
            ),
        }
    }
    if report.deadline_exceeded {
        println!("deadline_exceeded: true");
    }
    if let Some(reason) = report.failure_reason.as_deref() {
        println!("failure_reason: {reason}");
    }
}

fn exit_code_for_status(status: RunStatus) -> ExitCode {
    match status {
        RunStatus::Success => ExitCode::SUCCESS,
        RunStatus::Partial => ExitCode::from(1),
        RunStatus::Failed => ExitCode::from(2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_run_args_parse_with_defaults() {
        let cli = Cli::try_parse_from([
            "stockflow-cli",
            "run",
            "--forecasts",
            "forecasts.json",
        ])
        .expect("args should parse");
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.data_root, PathBuf::from("data"));
                assert_eq!(args.horizon_days, 30);
                assert_eq!(args.max_attempts, 3);
                assert!(args.run_id.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_suggest_args_require_item_and_target_date() {
        assert!(Cli::try_parse_from(["stockflow-cli", "suggest", "--item", "item-1"]).is_err());

        let cli = Cli::try_parse_from([
            "stockflow-cli",
            "suggest",
            "--item",
            "item-1",
            "--target-date",
            "2026-09-30",
        ])
        .expect("args should parse");
        match cli.command {
            Commands::Suggest(args) => {
                assert_eq!(args.margin, 15.0);
                assert_eq!(
                    args.target_date,
                    "2026-09-30".parse::<NaiveDate>().expect("date should parse")
                );
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
