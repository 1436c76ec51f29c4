use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info};

use crate::error::WorkerError;
use crate::notification::resume_pending_deliveries;
use crate::worker::consumer::MessageConsumer;
use crate::worker::job::JobResult;

pub struct WorkerPool {
    result_receiver: Receiver<JobResult>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Starts `worker_count` threads, each polling the consumer on its own
    /// single-threaded runtime. Worker 0 also resumes scheduled deliveries
    /// left over from a previous run.
    pub fn new(
        consumer: Arc<MessageConsumer>,
        worker_count: usize,
        poll_interval: Duration,
    ) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }

        let (result_sender, result_receiver) = bounded::<JobResult>(worker_count * 2);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_consumer = Arc::clone(&consumer);

            let handle = thread::Builder::new()
                .name(format!("relay-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(
                        worker_id,
                        worker_consumer,
                        result_tx,
                        shutdown_flag,
                        poll_interval,
                    );
                })
                .map_err(|e| {
                    shutdown.store(true, Ordering::Relaxed);
                    WorkerError::SpawnFailed(e.to_string())
                })?;

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            result_receiver,
            workers,
            shutdown,
        })
    }

    pub fn try_recv_result(&self) -> Option<JobResult> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result(&self) -> Option<JobResult> {
        self.result_receiver.recv().ok()
    }

    pub fn recv_result_timeout(&self, timeout: Duration) -> Option<JobResult> {
        self.result_receiver.recv_timeout(timeout).ok()
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        // Unblocks workers stuck on a full result channel
        drop(self.result_receiver);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    consumer: Arc<MessageConsumer>,
    result_sender: Sender<JobResult>,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    debug!("Worker {} started", worker_id);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Worker {} failed to build runtime: {}", worker_id, e);
            return;
        }
    };

    runtime.block_on(async {
        if worker_id == 0 {
            let pipeline = consumer.pipeline();
            match resume_pending_deliveries(
                Arc::clone(pipeline.router()),
                Arc::clone(pipeline.store()),
            )
            .await
            {
                Ok(0) => {}
                Ok(n) => info!("Resumed {} scheduled notification deliveries", n),
                Err(e) => error!("Failed to resume scheduled deliveries: {}", e),
            }
        }

        loop {
            if shutdown.load(Ordering::Relaxed) {
                debug!("Worker {} received shutdown signal", worker_id);
                break;
            }

            match consumer.poll_once().await {
                Some(result) => {
                    if let Err(e) = result_sender.send(result) {
                        error!("Worker {} failed to send result: {}", worker_id, e);
                        break;
                    }
                }
                None => tokio::time::sleep(poll_interval).await,
            }
        }
    });

    debug!("Worker {} stopped", worker_id);
}
