use std::io::{self, Stdout, Write};
use std::process::exit;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use log::{error, info};

use worker_pool::{PoolError, RayonThreadPool, Result, ThreadPool, WorkerPool};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    /// Fixed workers over a shared FIFO queue
    Shared,
    /// rayon's thread pool
    Rayon,
}

#[derive(Parser)]
#[command(name = "pool-demo", version, about = "Runs a batch of tasks on a worker pool")]
struct Cli {
    /// Number of worker threads
    #[arg(long, default_value_t = 8, allow_negative_numbers = true, value_name = "N")]
    workers: i64,

    /// Number of tasks to submit
    #[arg(long, default_value_t = 20, value_name = "N")]
    tasks: u32,

    /// How long odd-numbered tasks sleep before printing
    #[arg(long, default_value_t = 200, value_name = "MS")]
    sleep_ms: u64,

    /// Pool implementation to run the tasks on
    #[arg(long, value_enum, default_value_t = Backend::Shared)]
    backend: Backend,
}

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        error!("{}", e);
        exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let workers = u32::try_from(cli.workers).map_err(|_| {
        PoolError::InvalidConfiguration(format!(
            "worker count must be between 1 and {}, got {}",
            u32::MAX,
            cli.workers
        ))
    })?;
    let sleep = Duration::from_millis(cli.sleep_ms);

    info!("pool-demo {}", env!("CARGO_PKG_VERSION"));
    info!("Backend: {:?}, workers: {}", cli.backend, workers);

    match cli.backend {
        Backend::Shared => run_with_pool(WorkerPool::new(workers)?, cli.tasks, sleep),
        Backend::Rayon => run_with_pool(RayonThreadPool::new(workers)?, cli.tasks, sleep),
    }
}

fn run_with_pool<P: ThreadPool>(pool: P, tasks: u32, sleep: Duration) -> Result<()> {
    let console = Arc::new(Mutex::new(io::stdout()));

    for id in 1..=tasks {
        let console = Arc::clone(&console);
        pool.spawn(move || print_id(id, sleep, &console))?;
    }

    pool.shutdown();
    info!("All {} tasks finished", tasks);
    Ok(())
}

/// The task body: odd ids sleep first, then the id is printed while
/// holding the console lock.
fn print_id(id: u32, sleep: Duration, console: &Mutex<Stdout>) {
    if id % 2 == 1 {
        thread::sleep(sleep);
    }
    let mut out = console.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(e) = writeln!(out, "id : {id}") {
        error!("Failed to print task {}: {}", id, e);
    }
}
