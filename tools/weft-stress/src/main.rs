///
/// weft-stress - Contention Checks for the weft Primitives
///
/// Runs the synchronization primitives and the task manager under load and
/// verifies their invariants. Every scenario prints one PASS or FAIL line;
/// the process exits non-zero if any scenario failed.
///
/// Usage:
///   weft-stress mutex --kind recursive --threads 8
///   weft-stress rwlock --backend portable
///   weft-stress periodic --interval-ms 20 --periods 10
///   weft-stress all --config weft.toml
///
/// Logging goes to stderr and is controlled by `RUST_LOG`.
///

mod scenarios;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use weft_core::{BackendChoice, Capabilities, ConfigError, PoolConfig};

use crate::scenarios::{LockFlavor, Settings, StressError};

#[derive(Parser)]
#[command(name = "weft-stress")]
#[command(author, version, about = "Stress checks for weft locks and the task manager", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Threads (or pool workers) per scenario
    #[arg(long, global = true, default_value_t = 8)]
    threads: usize,

    /// Operations per thread (tasks submitted, for `pool`)
    #[arg(long, global = true, default_value_t = 10_000)]
    iterations: usize,

    /// Lock backend; overrides the config file
    #[arg(long, global = true, value_enum)]
    backend: Option<BackendArg>,

    /// Pool configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Count under a mutual-exclusion lock
    Mutex {
        #[arg(long, value_enum, default_value = "default")]
        kind: KindArg,
    },
    /// Mixed readers and writers on a reader-writer lock
    Rwlock,
    /// Bounded concurrency through a counting semaphore
    Semaphore {
        #[arg(long, default_value_t = 3)]
        permits: usize,
    },
    /// Repeated rendezvous on a barrier
    Barrier {
        #[arg(long, default_value_t = 20)]
        rounds: usize,
    },
    /// Drain a burst of prioritized tasks through the task manager
    Pool,
    /// Check periodic cadence and cancellation
    Periodic {
        #[arg(long, default_value_t = 50)]
        interval_ms: u64,

        #[arg(long, default_value_t = 5)]
        periods: u32,
    },
    /// Run every scenario with its defaults
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    Auto,
    Portable,
    Parking,
}

impl From<BackendArg> for BackendChoice {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Auto => BackendChoice::Auto,
            BackendArg::Portable => BackendChoice::Portable,
            BackendArg::Parking => BackendChoice::Parking,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KindArg {
    Default,
    Adaptive,
    Recursive,
    Spin,
}

impl From<KindArg> for LockFlavor {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Default => LockFlavor::Default,
            KindArg::Adaptive => LockFlavor::Adaptive,
            KindArg::Recursive => LockFlavor::Recursive,
            KindArg::Spin => LockFlavor::Spin,
        }
    }
}

enum Scenario {
    Mutex(LockFlavor),
    RwLock,
    Semaphore(usize),
    Barrier(usize),
    Pool,
    Periodic { interval: Duration, periods: u32 },
}

impl Scenario {
    fn name(&self) -> &'static str {
        match self {
            Scenario::Mutex(flavor) => flavor.name(),
            Scenario::RwLock => "rwlock",
            Scenario::Semaphore(_) => "semaphore",
            Scenario::Barrier(_) => "barrier",
            Scenario::Pool => "pool",
            Scenario::Periodic { .. } => "periodic",
        }
    }

    fn run(&self, settings: &Settings) -> Result<String, StressError> {
        let _span = tracing::info_span!("scenario", name = self.name()).entered();
        match *self {
            Scenario::Mutex(flavor) => scenarios::mutex(settings, flavor),
            Scenario::RwLock => scenarios::rwlock(settings),
            Scenario::Semaphore(permits) => scenarios::semaphore(settings, permits),
            Scenario::Barrier(rounds) => scenarios::barrier(settings, rounds),
            Scenario::Pool => scenarios::pool(settings),
            Scenario::Periodic { interval, periods } => {
                scenarios::periodic(settings, interval, periods)
            }
        }
    }
}

fn plan(command: &Commands) -> Vec<Scenario> {
    match command {
        Commands::Mutex { kind } => vec![Scenario::Mutex((*kind).into())],
        Commands::Rwlock => vec![Scenario::RwLock],
        Commands::Semaphore { permits } => vec![Scenario::Semaphore(*permits)],
        Commands::Barrier { rounds } => vec![Scenario::Barrier(*rounds)],
        Commands::Pool => vec![Scenario::Pool],
        Commands::Periodic {
            interval_ms,
            periods,
        } => vec![Scenario::Periodic {
            interval: Duration::from_millis(*interval_ms),
            periods: *periods,
        }],
        Commands::All => vec![
            Scenario::Mutex(LockFlavor::Default),
            Scenario::Mutex(LockFlavor::Adaptive),
            Scenario::Mutex(LockFlavor::Recursive),
            Scenario::Mutex(LockFlavor::Spin),
            Scenario::RwLock,
            Scenario::Semaphore(3),
            Scenario::Barrier(20),
            Scenario::Pool,
            Scenario::Periodic {
                interval: Duration::from_millis(50),
                periods: 5,
            },
        ],
    }
}

fn load_settings(cli: &Cli) -> Result<Settings, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => PoolConfig::load(path)?,
        None => PoolConfig::default(),
    };
    if let Some(backend) = cli.backend {
        config.backend = backend.into();
    }
    config.validate()?;

    let threads = cli.threads.max(1);
    let backend = config.resolved_backend(&Capabilities::detect());
    Ok(Settings {
        threads,
        iterations: cli.iterations,
        backend,
        config,
    })
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        threads = settings.threads,
        iterations = settings.iterations,
        backend = settings.backend.name(),
        "starting stress run"
    );

    let mut failed = 0;
    for scenario in plan(&cli.command) {
        match scenario.run(&settings) {
            Ok(summary) => println!("PASS {summary}"),
            Err(err) => {
                failed += 1;
                println!("FAIL {}: {err}", scenario.name());
            }
        }
    }

    if failed == 0 {
        ExitCode::SUCCESS
    } else {
        eprintln!("{failed} scenario(s) failed");
        ExitCode::FAILURE
    }
}
