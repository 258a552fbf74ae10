// THEORY:
// The coordinator owns every submitted `MediaJob` and runs them on a small,
// fixed pool of async workers. Jobs wait in a bounded FIFO queue; once the
// queue is full, submission is refused instead of spawning more work. That
// refusal is the system's only backpressure signal, and it is the caller's
// job to retry or drop.
//
// Each worker pulls one job at a time and drives it frame by frame through an
// `AnalysisPipeline` it owns exclusively. Between frames the worker checks two
// things: the job's cancellation token and its wall-clock deadline. Neither
// can interrupt a frame halfway through extraction, but both interrupt a
// frame pull, which is the only stage that can stall.
//
// Results are published through a `watch` channel per job, so `result` is a
// cheap snapshot and `wait` resolves as soon as the job turns terminal. A job
// turns terminal exactly once, even if its analysis panics: each job runs in
// its own task and a crashed task settles as `Failed(Internal)` while the
// worker moves on. Finished jobs are kept until `forget`, or until
// `terminal_retention` newer jobs have finished after them.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

use crate::config::CoordinatorConfig;
use crate::error::{ConfigError, CoordinatorError, DecodeDefect, FailureReason, FrameError};
use crate::pipeline::{AnalysisPipeline, Completion, RiskAssessment};
use crate::source::{Frame, FrameSource, FrameSourceProvider, SourceHandle};

pub type JobId = Uuid;

/// Lifecycle of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One submitted media item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaJob {
    pub id: JobId,
    pub source: SourceHandle,
    /// Duration reported by the caller, if known. Informational only.
    pub declared_duration: Option<Duration>,
    /// Frame-count estimate reported by the caller, if known. Informational only.
    pub expected_frames: Option<u64>,
    pub state: JobState,
}

impl MediaJob {
    pub fn new(source: impl Into<SourceHandle>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            declared_duration: None,
            expected_frames: None,
            state: JobState::Queued,
        }
    }

    pub fn with_declared_duration(mut self, duration: Duration) -> Self {
        self.declared_duration = Some(duration);
        self
    }

    pub fn with_expected_frames(mut self, frames: u64) -> Self {
        self.expected_frames = Some(frames);
        self
    }
}

/// What `result` reports for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum JobResult {
    Pending,
    Completed(RiskAssessment),
    Failed(FailureReason),
}

struct JobEntry {
    job: MediaJob,
    cancel: CancellationToken,
    result: watch::Sender<JobResult>,
}

enum Pull {
    Frame(Frame),
    Defect(DecodeDefect),
    End,
    Expired,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<JobId, JobEntry>,
    /// Terminal jobs, oldest first.
    finished: VecDeque<JobId>,
}

impl Registry {
    fn retire(&mut self, id: JobId, retention: usize) {
        self.finished.push_back(id);
        while self.finished.len() > retention {
            let Some(oldest) = self.finished.pop_front() else { break };
            if self.entries.remove(&oldest).is_some() {
                tracing::debug!(job_id = %oldest, "Evicted finished job");
            }
        }
    }
}

struct Shared<P> {
    provider: P,
    config: CoordinatorConfig,
    jobs: RwLock<Registry>,
}

/// Runs analysis jobs on a bounded worker pool.
pub struct JobCoordinator<P: FrameSourceProvider> {
    shared: Arc<Shared<P>>,
    queue: mpsc::Sender<JobId>,
    workers: Vec<JoinHandle<()>>,
}

impl<P: FrameSourceProvider> JobCoordinator<P> {
    /// Validates `config` and spawns `config.pool_size` workers on the current runtime.
    pub fn new(config: CoordinatorConfig, provider: P) -> Result<Self, ConfigError> {
        config.validate()?;

        let (queue, receiver) = mpsc::channel::<JobId>(config.queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let pool_size = config.pool_size;
        let shared = Arc::new(Shared {
            provider,
            config,
            jobs: RwLock::new(Registry::default()),
        });

        let workers = (0..pool_size)
            .map(|worker| {
                let shared = Arc::clone(&shared);
                let receiver = Arc::clone(&receiver);
                tokio::spawn(async move {
                    loop {
                        // The lock is held only while waiting, so jobs leave the queue in order.
                        let next = receiver.lock().await.recv().await;
                        let Some(job_id) = next else { break };
                        let job = tokio::spawn({
                            let shared = Arc::clone(&shared);
                            async move { shared.run(worker, job_id).await }
                        });
                        if let Err(err) = job.await {
                            tracing::error!(worker, job_id = %job_id, error = %err, "Analysis task crashed");
                            let reason = FailureReason::Internal(err.to_string());
                            shared.settle(job_id, JobState::Failed, JobResult::Failed(reason)).await;
                        }
                    }
                    tracing::debug!(worker, "Analysis worker stopped");
                })
            })
            .collect();

        tracing::info!(pool_size, queue_capacity = shared.config.queue_capacity, "Job coordinator started");

        Ok(Self { shared, queue, workers })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.shared.config
    }

    /// Queues a job. Fails fast when the queue is full.
    pub async fn submit(&self, mut job: MediaJob) -> Result<JobId, CoordinatorError> {
        let id = job.id;
        let mut jobs = self.shared.jobs.write().await;
        if jobs.entries.contains_key(&id) {
            return Err(CoordinatorError::DuplicateJob(id));
        }

        let permit = self.queue.try_reserve().map_err(|err| match err {
            TrySendError::Full(()) => CoordinatorError::QueueFull {
                capacity: self.shared.config.queue_capacity,
            },
            TrySendError::Closed(()) => CoordinatorError::ShutDown,
        })?;

        job.state = JobState::Queued;
        tracing::info!(job_id = %id, source = %job.source, "Job queued");
        let (result, _) = watch::channel(JobResult::Pending);
        jobs.entries.insert(
            id,
            JobEntry {
                job,
                cancel: CancellationToken::new(),
                result,
            },
        );
        permit.send(id);

        Ok(id)
    }

    /// Cancels a queued or running job. Cancelling a finished job does nothing.
    pub async fn cancel(&self, id: JobId) -> Result<(), CoordinatorError> {
        let mut jobs = self.shared.jobs.write().await;
        let entry = jobs.entries.get_mut(&id).ok_or(CoordinatorError::UnknownJob(id))?;

        entry.cancel.cancel();
        if entry.job.state == JobState::Queued {
            // No worker has it yet; settle it now so callers are not left waiting.
            entry.job.state = JobState::Cancelled;
            entry.result.send_replace(JobResult::Failed(FailureReason::Cancelled));
            tracing::info!(job_id = %id, "Queued job cancelled");
            jobs.retire(id, self.shared.config.terminal_retention);
        }
        Ok(())
    }

    /// Current result of a job, `Pending` until it turns terminal.
    pub async fn result(&self, id: JobId) -> Result<JobResult, CoordinatorError> {
        let jobs = self.shared.jobs.read().await;
        let entry = jobs.entries.get(&id).ok_or(CoordinatorError::UnknownJob(id))?;
        Ok(entry.result.borrow().clone())
    }

    /// Snapshot of the job record, including its state.
    pub async fn job(&self, id: JobId) -> Result<MediaJob, CoordinatorError> {
        let jobs = self.shared.jobs.read().await;
        let entry = jobs.entries.get(&id).ok_or(CoordinatorError::UnknownJob(id))?;
        Ok(entry.job.clone())
    }

    /// Resolves once the job is terminal.
    pub async fn wait(&self, id: JobId) -> Result<JobResult, CoordinatorError> {
        let mut receiver = {
            let jobs = self.shared.jobs.read().await;
            jobs.entries.get(&id).ok_or(CoordinatorError::UnknownJob(id))?.result.subscribe()
        };

        let result = receiver
            .wait_for(|result| !matches!(result, JobResult::Pending))
            .await
            .map_err(|_| CoordinatorError::UnknownJob(id))?;
        Ok(result.clone())
    }

    /// Drops a terminal job and returns its final result.
    pub async fn forget(&self, id: JobId) -> Result<JobResult, CoordinatorError> {
        let mut jobs = self.shared.jobs.write().await;
        let entry = jobs.entries.get(&id).ok_or(CoordinatorError::UnknownJob(id))?;
        if !entry.job.state.is_terminal() {
            return Err(CoordinatorError::StillRunning(id));
        }
        let entry = jobs.entries.remove(&id).ok_or(CoordinatorError::UnknownJob(id))?;
        jobs.finished.retain(|finished| *finished != id);
        Ok(entry.result.borrow().clone())
    }

    /// Stops accepting jobs, lets the workers drain the queue, and waits for them.
    pub async fn shutdown(self) {
        drop(self.queue);
        for outcome in futures::future::join_all(self.workers).await {
            if let Err(err) = outcome {
                tracing::error!(error = %err, "Analysis worker panicked");
            }
        }
        tracing::info!("Job coordinator stopped");
    }
}

impl<P: FrameSourceProvider> Shared<P> {
    async fn run(&self, worker: usize, id: JobId) {
        let (source, cancel) = {
            let mut jobs = self.jobs.write().await;
            let Some(entry) = jobs.entries.get_mut(&id) else { return };
            if entry.job.state != JobState::Queued {
                return;
            }
            entry.job.state = JobState::Running;
            (entry.job.source.clone(), entry.cancel.clone())
        };

        let (state, result) = match self.execute(worker, id, &source, &cancel).await {
            Ok(assessment) => (JobState::Completed, JobResult::Completed(assessment)),
            Err(FailureReason::Cancelled) => (JobState::Cancelled, JobResult::Failed(FailureReason::Cancelled)),
            Err(reason) => (JobState::Failed, JobResult::Failed(reason)),
        };
        self.settle(id, state, result).await;
    }

    #[instrument(skip_all, fields(worker = worker, job_id = %id, source = %handle))]
    async fn execute(
        &self,
        worker: usize,
        id: JobId,
        handle: &SourceHandle,
        cancel: &CancellationToken,
    ) -> Result<RiskAssessment, FailureReason> {
        let started = Instant::now();
        let deadline = started + self.config.job_timeout;
        let analysis = &self.config.analysis;
        tracing::info!("Analysis started");

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FailureReason::Cancelled),
            opened = tokio::time::timeout_at(deadline, self.provider.open(handle)) => opened,
        };
        let mut source = match opened {
            Ok(Ok(source)) => source,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "Source could not be opened");
                return Err(err.into());
            }
            Err(_) => {
                tracing::warn!("Timed out opening source");
                return Ok(AnalysisPipeline::new(analysis).finish(Completion::TimedOut));
            }
        };

        let mut pipeline = AnalysisPipeline::new(analysis);
        let mut pulled = 0_u64;
        let completion = loop {
            // A source with frames always ready never trips `timeout_at`, so the budget is checked here too.
            if Instant::now() >= deadline {
                break Completion::TimedOut;
            }
            if pulled >= self.config.frame_cap {
                // One more pull tells a truncated stream from one that ended exactly at the cap.
                break match pull(&mut source, deadline, cancel).await? {
                    Pull::End => Completion::Finished,
                    Pull::Frame(_) | Pull::Defect(_) | Pull::Expired => Completion::Truncated,
                };
            }

            match pull(&mut source, deadline, cancel).await? {
                Pull::Frame(frame) => {
                    pulled += 1;
                    let _ = pipeline.process_frame(&frame);
                }
                Pull::Defect(defect) => {
                    pulled += 1;
                    pipeline.record_defect(&defect);
                }
                Pull::End => break Completion::Finished,
                Pull::Expired => break Completion::TimedOut,
            }
        };

        let assessment = pipeline.finish(completion);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match completion {
            Completion::TimedOut => tracing::warn!(elapsed_ms, frames = pulled, "Analysis timed out"),
            Completion::Truncated => tracing::info!(frame_cap = self.config.frame_cap, "Frame cap reached"),
            Completion::Finished => {}
        }
        tracing::info!(
            verdict = ?assessment.verdict,
            reason = %assessment.reason,
            frames = assessment.frames_analyzed,
            defects = assessment.frames_defective,
            elapsed_ms,
            "Analysis finished",
        );
        Ok(assessment)
    }

    /// Records the terminal outcome unless the job already has one.
    async fn settle(&self, id: JobId, state: JobState, result: JobResult) {
        let mut jobs = self.jobs.write().await;
        let Some(entry) = jobs.entries.get_mut(&id) else { return };
        if entry.job.state.is_terminal() {
            return;
        }
        entry.job.state = state;
        entry.result.send_replace(result);
        jobs.retire(id, self.config.terminal_retention);
    }
}

/// Pulls the next frame unless the job is cancelled or out of time first.
async fn pull<S: FrameSource>(
    source: &mut S,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<Pull, FailureReason> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FailureReason::Cancelled),
        pulled = tokio::time::timeout_at(deadline, source.next_frame()) => match pulled {
            Err(_) => Ok(Pull::Expired),
            Ok(Ok(Some(frame))) => Ok(Pull::Frame(frame)),
            Ok(Ok(None)) => Ok(Pull::End),
            Ok(Err(FrameError::Defect(defect))) => Ok(Pull::Defect(defect)),
            Ok(Err(FrameError::Source(err))) => Err(err.into()),
        },
    }
}
