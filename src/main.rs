use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::{LevelFilter, info};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod cli;

use cli::Cli;
use cli::commands::{Commands, VolumeArg};
use revenant::clock::{Clock, SystemClock};
use revenant::config::{Config, normalize_volume_id};
use revenant::control::Control;
use revenant::daemon::{SchedulerLoop, TickEngine, retention};
use revenant::planner::JitterPlanner;
use revenant::policy::FixedProbe;
use revenant::retry::{RetryController, SimulatedExecutor};
use revenant::store::{StatusSnapshot, TimingStore};

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("revenant")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("revenant.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::new()
        .filter_level(LevelFilter::Trace)
        .parse_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Apply `log_level` from the config unless RUST_LOG is set
fn apply_log_level(config: &Config) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    let level = config
        .log_level
        .as_deref()
        .and_then(|l| l.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);
    log::set_max_level(level);
}

/// Write back a freshly generated install id so tie-breaks survive restarts
fn persist_install_id(cli: &Cli, config: &Config) -> Result<()> {
    let Some(path) = Config::resolve_path(cli.config.as_ref()) else {
        return Ok(());
    };
    let content = fs::read_to_string(&path).context("Failed to read config file")?;
    let raw: serde_yaml::Value = serde_yaml::from_str(&content).unwrap_or(serde_yaml::Value::Null);
    let stored = raw.get("install_id").and_then(|v| v.as_str());
    if stored != Some(config.install_id.as_str()) {
        config.save(&path)?;
        info!("Saved install id to {}", path.display());
    }
    Ok(())
}

fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        None => handle_preview_command(10, config),
        Some(Commands::Run { seconds, volumes }) => handle_run_command(*seconds, volumes, cli.is_verbose(), config),
        Some(Commands::Preview { count }) => handle_preview_command(*count, config),
        Some(Commands::Config { check }) => handle_config_command(*check, cli, config),
        Some(Commands::Ping { volume }) => handle_ping_command(volume, config),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("Failed to start tokio runtime")
}

/// Store seeded from the config plus any command-line volumes
fn build_store(clock: Arc<dyn Clock>, config: &Config, extra: &[VolumeArg]) -> Result<Arc<TimingStore>> {
    let store = Arc::new(TimingStore::from_config(clock.clone(), config));
    for v in extra {
        let interval = v.interval_secs.unwrap_or(config.scheduler.default_interval_secs);
        store.register(&v.id, v.kind, interval, clock.wall());
        store
            .set_config(&v.id, true, interval, v.kind, None)
            .context(format!("Failed to configure volume {}", v.id))?;
    }
    retention::register_forced(
        &store,
        &config.retention,
        &config.forced_volume_ids(),
        config.scheduler.default_interval_secs,
        clock.wall(),
    );
    Ok(store)
}

fn handle_run_command(seconds: Option<u64>, volumes: &[VolumeArg], verbose: bool, config: &Config) -> Result<()> {
    info!("Running scheduler for {:?}s with {} extra volumes", seconds, volumes.len());
    runtime()?.block_on(run_scheduler(seconds, volumes, verbose, config))
}

async fn run_scheduler(seconds: Option<u64>, volumes: &[VolumeArg], verbose: bool, config: &Config) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let store = build_store(clock.clone(), config, volumes)?;
    let enabled = store.get_all().iter().filter(|v| v.enabled).count();
    if enabled == 0 {
        println!("{}", "No enabled volumes; add some to the config or pass --volume E:=HDD".yellow());
        return Ok(());
    }

    let executor = Arc::new(SimulatedExecutor::default());
    let probe = Arc::new(FixedProbe::default());
    let (engine, mut rx) = TickEngine::new(config, store.clone(), clock.clone(), executor, probe);
    let mut scheduler = SchedulerLoop::new(
        Duration::from_millis(config.scheduler.tick_ms),
        Duration::from_millis(config.scheduler.join_timeout_ms),
    );
    scheduler.start(engine)?;
    println!("{} {} volume(s), Ctrl-C to stop", "Running:".green(), enabled);

    let deadline = async {
        match seconds {
            Some(s) => tokio::time::sleep(Duration::from_secs(s)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let mut last_hash = String::new();
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = rx.borrow_and_update().clone();
                let hash = snapshot.state_hash();
                if verbose || hash != last_hash {
                    print_snapshot(&snapshot);
                    last_hash = hash;
                }
            }
        }
    }

    match scheduler.stop().await {
        Some(engine) => {
            let totals = engine.state();
            println!(
                "{} {} ticks, {} operations, {} failed, {} quarantined",
                "Stopped:".green(),
                totals.tick_count,
                totals.total_executed,
                totals.total_failed,
                totals.total_quarantined
            );
        }
        None => println!("{}", "Scheduler did not stop cleanly".red()),
    }
    Ok(())
}

fn print_snapshot(snapshot: &StatusSnapshot) {
    println!("{} v{}", "Status".cyan(), snapshot.version);
    for (id, v) in &snapshot.volumes {
        let due = v
            .next_due_at
            .map(|at| format!("+{:.1}s", (at - snapshot.generated_at).max(0.0)))
            .unwrap_or_else(|| "-".to_string());
        let status = match v.status.label() {
            "Active" => v.status.label().green(),
            "Quarantine" | "Error" => v.status.label().red(),
            other => other.yellow(),
        };
        println!(
            "  {:<6} {:<12} next {:<10} ticks {:<5} failures {}",
            id, status, due, v.tick_counter, v.consecutive_tick_failures
        );
    }
}

fn handle_preview_command(count: usize, config: &Config) -> Result<()> {
    info!("Previewing {} operations", count);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let store = build_store(clock.clone(), config, &[])?;
    let planner = JitterPlanner::new(config.scheduler.clone(), &config.install_id, clock.local_date());
    let now = clock.monotonic();
    let entries = planner.preview(&store.get_all(), &[], now, count);
    if entries.is_empty() {
        println!("{}", "Nothing scheduled".yellow());
        return Ok(());
    }
    println!("{} (seed {})", "Upcoming operations".cyan(), planner.tie_breaker().seed().epoch());
    for e in entries {
        println!("  +{:>8.2}s  {:<6} {:?}", e.at - now, e.volume, e.kind);
    }
    Ok(())
}

fn handle_config_command(check: bool, cli: &Cli, config: &Config) -> Result<()> {
    if !check {
        let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
        print!("{}", yaml);
        return Ok(());
    }

    let Some(path) = Config::resolve_path(cli.config.as_ref()) else {
        println!("{}", "No config file found, defaults are in use".yellow());
        return Ok(());
    };
    let content = fs::read_to_string(&path).context("Failed to read config file")?;
    let (_, fixes) = Config::from_yaml_checked(&content)?;
    if fixes.is_empty() {
        println!("{} {}", "OK:".green(), path.display());
    } else {
        println!("{} {} correction(s) in {}", "Fixed:".yellow(), fixes.len(), path.display());
        for fix in fixes {
            println!("  - {}", fix);
        }
    }
    Ok(())
}

fn handle_ping_command(volume: &str, config: &Config) -> Result<()> {
    let id = normalize_volume_id(volume);
    info!("Pinging volume: {}", id);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let store = build_store(clock.clone(), config, &[])?;
    let control = Control::new(
        store,
        clock,
        Arc::new(SimulatedExecutor::default()),
        RetryController::new(config.retry.clone()),
    );
    let report = runtime()?
        .block_on(control.ping_now(&id))
        .context(format!("Failed to ping {}", id))?;
    for step in &report.steps {
        let mark = if step.succeeded { "ok".green() } else { "failed".red() };
        println!(
            "  {:?} {} after {} attempt(s) ({:.1}ms)",
            step.kind, mark, step.attempts, step.outcome.duration_ms
        );
    }
    if report.succeeded {
        println!("{} {}", "Pinged:".green(), id);
    } else {
        println!("{} {}", "Ping failed:".red(), id);
    }
    Ok(())
}

fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    apply_log_level(&config);

    info!("Starting with config from: {:?}", cli.config);
    if let Err(e) = persist_install_id(&cli, &config) {
        log::warn!("Could not persist install id: {}", e);
    }

    // Run the main application logic
    run_application(&cli, &config).context("Application failed")?;

    Ok(())
}
