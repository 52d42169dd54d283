//! Load test CLI for the books REST API.

use anyhow::{Context, Result};
use books_load_test::config::{parse_flag, DEFAULT_FIXTURE_PATH, DEFAULT_SCENARIO_DIR};
use books_load_test::{
    BookPayload, FixtureStore, Flow, HarnessError, LoadRunner, MetricsRegistry, ResultsReport,
    RunCompletion, RunConfig, RunDriver, ScenarioLibrary, ScenarioTable,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "books-load-test")]
#[command(about = "Load testing tool for the books REST API", long_about = None)]
struct Cli {
    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a load test against the books API
    Run(RunArgs),

    /// List available workload profiles
    Scenarios {
        /// Directory of custom scenario YAML files
        #[arg(short, long, default_value = DEFAULT_SCENARIO_DIR)]
        dir: PathBuf,
    },

    /// Validate a fixture file and print a summary
    Fixtures {
        /// Fixture JSON file
        #[arg(short, long, env = "FIXTURE_PATH", default_value = DEFAULT_FIXTURE_PATH)]
        path: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Base YAML configuration; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API base URL (the flows append /books)
    #[arg(long, env = "API_URL")]
    url: Option<String>,

    /// Workload index into the scenario table
    #[arg(short, long, env = "WORKLOAD")]
    workload: Option<String>,

    /// Flow: create, list, flow, create-get, create-delete (aliases accepted)
    #[arg(short, long, env = "BOOK_OP")]
    flow: Option<String>,

    /// Skip the pause after each flow ("true" to enable)
    #[arg(long, env = "NO_SLEEP")]
    no_sleep: Option<String>,

    /// Label for this run
    #[arg(long, env = "TEST_NAME")]
    test_name: Option<String>,

    /// Project identifier for labelling
    #[arg(long, env = "PROJECT_ID")]
    project_id: Option<u64>,

    /// Built-in scenario table: settings or general
    #[arg(long, env = "SCENARIO_TABLE")]
    scenario_table: Option<ScenarioTable>,

    /// Custom scenario table YAML file
    #[arg(long)]
    scenario_file: Option<PathBuf>,

    /// Fixture JSON file
    #[arg(long, env = "FIXTURE_PATH")]
    fixtures: Option<PathBuf>,

    /// HTML report path
    #[arg(long, env = "REPORT_PATH")]
    report: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Abandon the run after this many seconds
    #[arg(long)]
    max_duration: Option<u64>,

    /// Extra threshold as <metric>:<expression>, e.g. http_req_duration:p(95)<300
    #[arg(long = "threshold")]
    thresholds: Vec<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,

    /// Hide the progress bar
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs)?;

    let outcome = match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Scenarios { dir } => list_scenarios(&dir).map(|_| ExitCode::SUCCESS),
        Commands::Fixtures { path } => check_fixtures(&path).map(|_| ExitCode::SUCCESS),
    };

    match outcome {
        Err(e) => match e.downcast_ref::<HarnessError>() {
            Some(harness) if harness.is_configuration() => {
                error!(error = %e, "Configuration error; no iterations were run");
                Ok(ExitCode::from(2))
            }
            _ => Err(e),
        },
        ok => ok,
    }
}

fn init_tracing(log_level: &str, json: bool) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn build_config(args: &RunArgs) -> Result<RunConfig> {
    let mut config = match &args.config {
        Some(path) => RunConfig::from_file(path)?,
        None => RunConfig::default(),
    };

    // Apply overrides
    if let Some(url) = &args.url {
        config.base_url = url.clone();
    }
    if args.workload.is_some() {
        config.workload = ScenarioLibrary::parse_index(args.workload.as_deref());
    }
    if let Some(flow) = &args.flow {
        config.flow = Some(flow.clone());
    }
    if args.no_sleep.is_some() {
        config.no_pacing = parse_flag(args.no_sleep.as_deref());
    }
    if let Some(name) = &args.test_name {
        config.test_name = Some(name.clone());
    }
    if let Some(id) = args.project_id {
        config.project_id = id;
    }
    if let Some(table) = args.scenario_table {
        config.scenario_table = table;
    }
    if let Some(path) = &args.scenario_file {
        config.scenario_file = Some(path.clone());
    }
    if let Some(path) = &args.fixtures {
        config.fixture_path = path.clone();
    }
    if let Some(path) = &args.report {
        config.report_path = path.clone();
    }
    if let Some(secs) = args.timeout {
        config.request_timeout_secs = secs;
    }
    if let Some(secs) = args.max_duration {
        config.max_duration_secs = Some(secs);
    }
    config.thresholds.extend(args.thresholds.iter().cloned());

    config.validate()?;
    Ok(config)
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let config = build_config(&args)?;

    let library = config.scenario_library()?;
    let profile = library.resolve(config.workload).clone();
    let thresholds = config.thresholds_for(&profile)?;
    let labels = config.labels(&profile);

    if args.output == OutputFormat::Table {
        println!("✓ Configuration loaded successfully");
        println!("  Test: {}", labels.test_name);
        println!("  Target: {}/books", config.base_url());
        println!("  Scenario: {} [{}]", profile.name, library.name);
        println!("  Shape: {}", profile.shape);
        println!("  Flow: {}", labels.flow);
        println!("  Thresholds: {}", thresholds.len());
        println!();
    }
    info!(test = %labels.test_name, scenario = %profile.name, flow = %labels.flow, "Starting run");

    let fixtures = Arc::new(FixtureStore::new(&config.fixture_path));
    let metrics = Arc::new(MetricsRegistry::new());
    let driver = Arc::new(RunDriver::new(&config, &profile.shape, fixtures, metrics.clone())?);

    let runner = LoadRunner::new(driver, profile.shape.clone())
        .with_max_duration(config.max_duration())
        .with_progress(!args.quiet && args.output == OutputFormat::Table);

    let completion = runner
        .run_until(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await;

    let mut results = metrics.results(labels);
    results.thresholds = thresholds.evaluate(&metrics);

    // Output results
    match args.output {
        OutputFormat::Json => {
            println!("{}", ResultsReport::format_json(&results)?);
        }
        OutputFormat::Csv => {
            println!("{}", ResultsReport::csv_header());
            println!("{}", ResultsReport::format_csv(&results));
        }
        OutputFormat::Table => {
            println!("{}", ResultsReport::format_table(&results));
        }
    }

    ResultsReport::write_html(&results, &config.report_path)
        .with_context(|| format!("writing report to {}", config.report_path.display()))?;

    if completion != RunCompletion::Finished {
        warn!(?completion, "Run ended early; results cover recorded iterations only");
    }

    if results.passed() {
        info!("All thresholds passed");
        Ok(ExitCode::SUCCESS)
    } else {
        let failed = results.thresholds.iter().filter(|t| !t.passed).count();
        error!(failed, "Thresholds crossed");
        Ok(ExitCode::from(1))
    }
}

fn list_scenarios(dir: &Path) -> Result<()> {
    for table in [ScenarioTable::Settings, ScenarioTable::General] {
        print_library(&ScenarioLibrary::builtin(table));
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cannot read scenario directory");
            return Ok(());
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| matches!(p.extension().and_then(|s| s.to_str()), Some("yaml" | "yml")))
        .collect();
    paths.sort();

    for path in paths {
        match ScenarioLibrary::from_file(&path) {
            Ok(library) => {
                println!("File: {}", path.display());
                print_library(&library);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping invalid scenario file"),
        }
    }
    Ok(())
}

fn print_library(library: &ScenarioLibrary) {
    println!("{} - {}", library.name, library.description);
    for (index, profile) in library.profiles().iter().enumerate() {
        println!("  {}: {:<14} {}", index, profile.name, profile.shape);
    }
    println!();
}

fn check_fixtures(path: &Path) -> Result<()> {
    let store = FixtureStore::new(path);
    let books = store.load()?;
    if books.is_empty() {
        return Err(HarnessError::EmptyFixtureSet.into());
    }

    let mut total_pages = 0;
    for book in books {
        total_pages += BookPayload::build(book)?.pages;
    }

    println!("✓ {} fixtures in {}", books.len(), path.display());
    println!("  Average pages: {:.0}", total_pages as f64 / books.len() as f64);
    println!(
        "  Flows: {}",
        Flow::ALL.iter().map(|f| f.name()).collect::<Vec<_>>().join(", ")
    );
    Ok(())
}
