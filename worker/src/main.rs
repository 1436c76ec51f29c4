use std::error::Error;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer};

use contract_relay::config::{load_config, load_config_from_env, LoggingConfig};
use contract_relay::queue::QueueSettings;
use contract_relay::{
    InboxScanner, JobOutcome, JobResult, LocalQueue, LogFormat, MessageConsumer, Pipeline,
    WorkerConfig, WorkerPool,
};

const ENV_CONFIG_PATH: &str = "RELAY_CONFIG";

fn main() -> ExitCode {
    let config = match load_worker_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("contract-relay-worker: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("contract-relay-worker: failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Worker stopped with error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Config path from the first argument or `RELAY_CONFIG`, else defaults plus
/// environment.
fn load_worker_config() -> Result<WorkerConfig, contract_relay::ConfigError> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(ENV_CONFIG_PATH).ok())
        .filter(|p| !p.trim().is_empty());

    match path {
        Some(path) => load_config(path),
        None => load_config_from_env(),
    }
}

fn init_logging(logging: &LoggingConfig) -> Result<(), Box<dyn Error>> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&logging.filter))?;

    let fmt_layer = match logging.format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(fmt_layer).with(filter);
    tracing::subscriber::set_global_default(subscriber)?;

    // Library plumbing logs through `log`
    tracing_log::LogTracer::init()?;
    Ok(())
}

fn run(config: WorkerConfig) -> Result<(), Box<dyn Error>> {
    info!(
        "Starting contract relay worker (bucket {}, {} worker(s))",
        config.bucket_name, config.worker_count
    );

    let queue = Arc::new(LocalQueue::new(QueueSettings::from_config(&config.queue)));
    let pipeline = Arc::new(Pipeline::from_config(&config)?);
    if !pipeline.router().has_channel() {
        warn!("No notification channel configured; payloads are persisted but not published");
    }

    let consumer = Arc::new(MessageConsumer::new(
        queue.clone(),
        pipeline,
        config.queue.invocation_timeout(),
    ));
    let pool = WorkerPool::new(consumer, config.worker_count, config.queue.poll_interval())?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_for_signal = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        shutdown_for_signal.store(true, Ordering::Relaxed);
    })?;

    let scanner = InboxScanner::new(&config.queue.inbox_directory, Arc::clone(&queue))
        .with_settle_time(config.queue.inbox_settle_time());
    let shutdown_for_scanner = Arc::clone(&shutdown);
    let poll_interval = config.queue.poll_interval();
    let scanner_handle = std::thread::Builder::new()
        .name("relay-inbox".to_string())
        .spawn(move || {
            if let Err(e) = scanner.watch(poll_interval, Arc::clone(&shutdown_for_scanner)) {
                error!("Inbox scanner stopped: {}", e);
                shutdown_for_scanner.store(true, Ordering::Relaxed);
            }
        })?;

    while !shutdown.load(Ordering::Relaxed) {
        if let Some(result) = pool.recv_result_timeout(Duration::from_millis(100)) {
            log_result(&result);
        }
    }

    info!("Shutdown requested");
    pool.shutdown();
    while let Some(result) = pool.try_recv_result() {
        log_result(&result);
    }
    pool.wait();

    if scanner_handle.join().is_err() {
        error!("Inbox scanner thread panicked");
    }

    let dead_letters = queue.dead_letters().len();
    if dead_letters > 0 {
        warn!("{} message(s) were dead-lettered during this run", dead_letters);
    }
    info!("{} message(s) left in the queue", queue.len());
    Ok(())
}

fn log_result(result: &JobResult) {
    let job = result.job_id.as_deref().unwrap_or("<invalid>");
    match &result.outcome {
        JobOutcome::Completed {
            payload_path,
            status,
            delivery,
            warnings,
        } => {
            info!(
                "Job {} finished: status {}, delivery {}, payload {}",
                job,
                status.as_str(),
                delivery,
                payload_path.display()
            );
            for warning in warnings {
                warn!("Job {}: {}", job, warning);
            }
        }
        JobOutcome::Rejected { reason } => {
            warn!("Message {} rejected: {}", result.message_id, reason)
        }
        JobOutcome::Failed { error } => warn!(
            "Job {} failed on receive #{}: {}",
            job, result.receive_count, error
        ),
        JobOutcome::TimedOut => warn!(
            "Job {} timed out on receive #{}",
            job, result.receive_count
        ),
    }
}
