use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, Subcommand};

use evergit::cli::{collect_status, print_status};
use evergit::config::{self, ConfigError, ConfigSource, Overrides, Settings};
use evergit::mirror::GitCli;
use evergit::sync::{Coordinator, LogReporter, RunError, write_json_report};

/// Set by the signal handler; polled by the coordinator.
static CANCEL: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(
    name = "evergit",
    version,
    about = "Keep non-destructive, full-history local mirrors of remote git repositories"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to config file (TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Also write log output to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Override seconds to wait between remote operations
    #[arg(long, global = true, value_name = "SECONDS")]
    sleep: Option<f64>,

    /// Disable randomization of the wait between remote operations
    #[arg(long, global = true)]
    non_random_sleep: bool,

    /// Kill git commands that run longer than this (0 disables)
    #[arg(long, global = true, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Number of repositories to process at once
    #[arg(long, global = true)]
    jobs: Option<usize>,

    /// Override the directory mirrors are kept in
    #[arg(long, global = true)]
    backup_root: Option<PathBuf>,

    /// Write a JSON summary of the run to this file
    #[arg(long, global = true)]
    report: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone or fast-forward every configured repository (default)
    Run,

    /// Show the local state of every configured repository
    Status,

    /// Check dependencies
    Doctor,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = evergit::logging::init(cli.verbose, cli.log_file.as_deref()) {
        eprintln!("Error: cannot set up logging: {}", e);
        return ExitCode::from(1);
    }

    let result = match cli.command.as_ref().unwrap_or(&Commands::Run) {
        Commands::Run => cmd_run(&cli),
        Commands::Status => cmd_status(&cli),
        Commands::Doctor => cmd_doctor(&cli),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::from(exit_code(e.as_ref()))
        }
    }
}

/// 2 for faults that stop a run before it starts, 1 for anything else.
fn exit_code(err: &(dyn Error + 'static)) -> u8 {
    if err.is::<ConfigError>() || err.is::<RunError>() {
        2
    } else {
        1
    }
}

fn load_settings(cli: &Cli) -> Result<Settings, ConfigError> {
    let mut settings = config::load(cli.config.as_deref())?;
    settings.apply(&Overrides {
        backup_root: cli.backup_root.clone(),
        sleep_seconds: cli.sleep,
        non_random_sleep: cli.non_random_sleep,
        timeout_secs: cli.timeout,
        jobs: cli.jobs,
    })?;
    Ok(settings)
}

fn install_signal_handler() {
    let result = ctrlc::set_handler(|| {
        if CANCEL.swap(true, Ordering::SeqCst) {
            eprintln!("Interrupted again; exiting immediately");
            std::process::exit(130);
        }
        log::warn!("Interrupt received; finishing in-flight repositories before stopping");
    });
    if let Err(e) = result {
        log::warn!("Could not install interrupt handler: {}", e);
    }
}

fn cmd_run(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let settings = load_settings(cli)?;
    install_signal_handler();

    let git = GitCli::new().with_timeout(settings.timeout);
    match git.version() {
        Ok(version) => log::debug!("Using {}", version),
        Err(e) => log::warn!("git does not appear to be usable: {}", e),
    }

    let paths = settings.backup_paths();
    let summary = Coordinator::new(&git, &CANCEL).run(
        &settings.repos,
        &paths,
        &settings.run_options(),
        &mut LogReporter,
    )?;

    if let Some(path) = &cli.report {
        write_json_report(path, &summary)
            .map_err(|e| format!("cannot write report {}: {}", path.display(), e))?;
        log::info!("Wrote run report to {}", path.display());
    }

    Ok(())
}

fn cmd_status(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let settings = load_settings(cli)?;
    let git = GitCli::new().with_timeout(settings.timeout);
    let paths = settings.backup_paths();

    let rows = collect_status(&git, &paths, &settings.repos);
    print_status(&paths, &rows);

    Ok(())
}

fn cmd_doctor(cli: &Cli) -> Result<(), Box<dyn Error>> {
    println!("evergit System Check\n");

    let settings = load_settings(cli)?;
    println!(
        "[OK] Config: {}",
        match &settings.source {
            ConfigSource::File(path) => path.display().to_string(),
            ConfigSource::Fallback => "built-in fallback".to_string(),
        }
    );

    let git = GitCli::new();
    let git_ok = match git.version() {
        Ok(version) => {
            println!("[OK] git: {}", version);
            true
        }
        Err(e) => {
            println!("[FAIL] git: {}", e);
            false
        }
    };

    let paths = settings.backup_paths();
    let root_ok = match paths.ensure_root() {
        Ok(()) => {
            println!("[OK] Backup root: {}", paths.root().display());
            true
        }
        Err(e) => {
            println!("[FAIL] Backup root: {}: {}", paths.root().display(), e);
            false
        }
    };

    println!(
        "[{}] Repositories: {} configured",
        if settings.repos.is_empty() { "INFO" } else { "OK" },
        settings.repos.len()
    );

    if !git_ok || !root_ok {
        return Err("system check failed".into());
    }

    Ok(())
}
