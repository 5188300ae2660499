/**
 * SYSTEM PERFORMANCE MANAGER - local telemetry sampler
 *
 * ROLE:
 * Samples the gateway's own CPU and memory utilization on a fixed period and
 * hands each snapshot to the router under `GdaSystemPerf`.
 *
 * LIFECYCLE:
 * - start: first sample immediately, then every `poll_secs`; a second start
 *   is a logged no-op
 * - stop: signals the loop and waits for it; an in-flight sample finishes
 *   before the task ends
 */

pub mod tasks;

pub use self::tasks::{CpuUtilTask, MemUtilTask, UtilizationTask};

use crate::models::SystemPerformanceData;
use crate::resource::ResourceName;
use crate::router::DataMessageListener;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Stop signal and handle of a running sample loop, installed together.
struct SamplerRun {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct SystemPerformanceManager {
    location_id: String,
    poll_secs: u64,
    cpu_task: Arc<dyn UtilizationTask>,
    mem_task: Arc<dyn UtilizationTask>,
    listener: Mutex<Option<Arc<dyn DataMessageListener>>>,
    run: Mutex<Option<SamplerRun>>,
}

impl SystemPerformanceManager {
    pub fn new(location_id: impl Into<String>, poll_secs: u64) -> Self {
        Self::with_tasks(
            location_id,
            poll_secs,
            Arc::new(CpuUtilTask::new()),
            Arc::new(MemUtilTask::new()),
        )
    }

    pub fn with_tasks(
        location_id: impl Into<String>,
        poll_secs: u64,
        cpu_task: Arc<dyn UtilizationTask>,
        mem_task: Arc<dyn UtilizationTask>,
    ) -> Self {
        Self {
            location_id: location_id.into(),
            poll_secs: poll_secs.max(1),
            cpu_task,
            mem_task,
            listener: Mutex::new(None),
            run: Mutex::new(None),
        }
    }

    pub fn set_data_message_listener(&self, listener: Arc<dyn DataMessageListener>) {
        *self.listener.lock() = Some(listener);
    }

    pub fn is_started(&self) -> bool {
        self.run.lock().is_some()
    }

    /// Take one sample and pass it on. Returns the listener's verdict.
    pub async fn handle_telemetry(&self) -> bool {
        let cpu = self.cpu_task.telemetry_value();
        let mem = self.mem_task.telemetry_value();
        tracing::info!("CPU utilization: {:.2}%, memory utilization: {:.2}%", cpu, mem);

        let data = SystemPerformanceData::new(self.location_id.as_str(), cpu, mem);
        let listener = self.listener.lock().clone();
        match listener {
            Some(listener) => {
                listener
                    .handle_system_performance_message(ResourceName::GdaSystemPerf, &data)
                    .await
            }
            None => {
                tracing::debug!("No listener for system performance data");
                false
            }
        }
    }

    /// Returns false when already running.
    pub fn start_manager(self: &Arc<Self>) -> bool {
        let mut run = self.run.lock();
        if run.is_some() {
            tracing::info!("System performance manager already running");
            return false;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let manager = self.clone();
        let period = Duration::from_secs(self.poll_secs);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    biased;
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        manager.handle_telemetry().await;
                    }
                }
            }
            tracing::debug!("System performance loop ended");
        });

        *run = Some(SamplerRun { stop_tx, task });
        tracing::info!("Started system performance manager, polling every {}s", self.poll_secs);
        true
    }

    /// Returns false when it was not running.
    pub async fn stop_manager(&self) -> bool {
        let run = self.run.lock().take();
        let Some(SamplerRun { stop_tx, task }) = run else {
            return false;
        };
        let _ = stop_tx.send(true);
        if let Err(e) = task.await {
            tracing::warn!("System performance task ended abnormally: {}", e);
        }
        tracing::info!("Stopped system performance manager");
        true
    }
}
