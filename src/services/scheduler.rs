//! Outbound message scheduler.
//!
//! Every Telegram call of the relay goes through one [`Scheduler`] and runs
//! on a single timeline:
//!
//! - each submitted job gets a slot `max(now, last_slot) + base_delay + extra`,
//!   where `extra` grows with the attempt number on retries;
//! - slots are handed out under a lock and queued in the same order, so the
//!   queue is always sorted by slot;
//! - one worker task executes the jobs one at a time, never before their slot;
//! - timeouts and rate limiting are retried up to `max_attempts` total attempts,
//!   anything else is logged and the job dropped.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::config::SchedulerConfig;
use crate::db::MessageId;
use crate::error::DeliveryError;
use crate::services::telegram::ChatDelivery;

/// Retry pacing shared by all jobs of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl From<&SchedulerConfig> for RetryPolicy {
    fn from(config: &SchedulerConfig) -> Self {
        RetryPolicy {
            base_delay: config.base_delay(),
            max_attempts: config.max_attempts.max(1),
        }
    }
}

impl RetryPolicy {
    /// Extra delay added to the slot of a job on its `attempt`-th try.
    pub fn extra_delay(&self, attempt: u32) -> Duration {
        self.base_delay * attempt.saturating_sub(1)
    }
}

/// Continuation run with the new message id once a send succeeds.
///
/// It is consumed on success and simply dropped when the job is abandoned.
pub struct OnDelivered(Box<dyn FnOnce(MessageId) -> BoxFuture<'static, ()> + Send>);

impl OnDelivered {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(MessageId) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        OnDelivered(Box::new(move |message_id| Box::pin(f(message_id))))
    }

    async fn run(self, message_id: MessageId) {
        (self.0)(message_id).await
    }
}

impl fmt::Debug for OnDelivered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OnDelivered")
    }
}

#[derive(Debug)]
pub enum JobKind {
    Send {
        text: String,
        on_delivered: Option<OnDelivered>,
    },
    Edit {
        message_id: MessageId,
        text: String,
    },
    Delete {
        message_id: MessageId,
    },
}

/// One pending outbound chat operation.
#[derive(Debug)]
pub struct Job {
    pub chat_id: i64,
    pub kind: JobKind,
    /// 1 for the first try, incremented on every retry.
    pub attempt: u32,
}

impl Job {
    pub fn new(chat_id: i64, kind: JobKind) -> Self {
        Job {
            chat_id,
            kind,
            attempt: 1,
        }
    }
}

fn preview(text: &str) -> String {
    const PREVIEW_CHARS: usize = 20;
    let mut out: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        out.push_str("...");
    }
    out
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            JobKind::Send { text, .. } => write!(f, "send({:?})", preview(text)),
            JobKind::Edit { message_id, text } => {
                write!(f, "edit({}, {:?})", message_id, preview(text))
            }
            JobKind::Delete { message_id } => write!(f, "delete({})", message_id),
        }
    }
}

/// The "next free slot" of the outbound timeline.
#[derive(Debug)]
pub struct SlotClock {
    base_delay: Duration,
    last_slot: Option<Instant>,
}

impl SlotClock {
    pub fn new(base_delay: Duration) -> Self {
        SlotClock {
            base_delay,
            last_slot: None,
        }
    }

    /// Reserve the next slot. Slots never decrease and are at least
    /// `base_delay` apart.
    pub fn assign(&mut self, now: Instant, extra: Duration) -> Instant {
        let start = match self.last_slot {
            Some(last) if last > now => last,
            _ => now,
        };
        let slot = start + self.base_delay + extra;
        self.last_slot = Some(slot);
        slot
    }
}

#[derive(Debug)]
struct ScheduledJob {
    at: Instant,
    job: Job,
}

struct SchedulerInner {
    chat_id: i64,
    policy: RetryPolicy,
    clock: Mutex<SlotClock>,
    queue: mpsc::UnboundedSender<ScheduledJob>,
}

/// Handle for submitting outbound chat operations. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Create the scheduler and spawn its worker.
    ///
    /// The worker stops when `shutdown` fires; jobs still queued are abandoned.
    pub fn start(
        policy: RetryPolicy,
        chat_id: i64,
        delivery: Arc<dyn ChatDelivery>,
        shutdown: broadcast::Receiver<()>,
    ) -> (Scheduler, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler {
            inner: Arc::new(SchedulerInner {
                chat_id,
                policy,
                clock: Mutex::new(SlotClock::new(policy.base_delay)),
                queue: tx,
            }),
        };

        let worker = Worker {
            scheduler: scheduler.clone(),
            delivery,
        };
        let handle = tokio::spawn(worker.run(rx, shutdown));
        (scheduler, handle)
    }

    /// Queue a job on the timeline. Never blocks on the chat API.
    pub fn submit(&self, job: Job) {
        let extra = self.inner.policy.extra_delay(job.attempt);
        self.enqueue(job, extra);
    }

    pub fn send(&self, text: impl Into<String>, on_delivered: Option<OnDelivered>) {
        self.submit(Job::new(
            self.inner.chat_id,
            JobKind::Send {
                text: text.into(),
                on_delivered,
            },
        ));
    }

    pub fn edit(&self, message_id: MessageId, text: impl Into<String>) {
        self.submit(Job::new(
            self.inner.chat_id,
            JobKind::Edit {
                message_id,
                text: text.into(),
            },
        ));
    }

    pub fn delete(&self, message_id: MessageId) {
        self.submit(Job::new(
            self.inner.chat_id,
            JobKind::Delete { message_id },
        ));
    }

    fn enqueue(&self, job: Job, extra: Duration) {
        // The lock covers both slot assignment and the push so that queue
        // order matches slot order across concurrent submitters.
        let mut clock = self
            .inner
            .clock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        let at = clock.assign(now, extra);
        tracing::debug!(
            "Scheduling job {} (attempt {}) to execute in {:?}",
            job,
            job.attempt,
            at.saturating_duration_since(now)
        );

        if let Err(rejected) = self.inner.queue.send(ScheduledJob { at, job }) {
            tracing::warn!(
                "Scheduler worker stopped; dropping job {}",
                rejected.0.job
            );
        }
    }

    /// Put a failed job back on the timeline, or drop it when out of attempts.
    fn retry(&self, mut job: Job) {
        if job.attempt >= self.inner.policy.max_attempts {
            tracing::error!(
                "Job {} failed to execute after {} attempts; dropping it",
                job,
                job.attempt
            );
            return;
        }

        job.attempt += 1;
        tracing::debug!("Rescheduling job {}; attempt {}", job, job.attempt);
        self.submit(job);
    }
}

struct Worker {
    scheduler: Scheduler,
    delivery: Arc<dyn ChatDelivery>,
}

impl Worker {
    async fn run(
        self,
        mut queue: mpsc::UnboundedReceiver<ScheduledJob>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let base_delay = self.scheduler.inner.policy.base_delay;
        let mut last_call: Option<Instant> = None;

        loop {
            let next = tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Scheduler worker shutting down");
                    break;
                }
                next = queue.recv() => next,
            };
            let Some(scheduled) = next else {
                break;
            };

            // Never before the slot, and never closer than base_delay to the
            // previous call even if that one ran late.
            let due = match last_call {
                Some(last) => scheduled.at.max(last + base_delay),
                None => scheduled.at,
            };

            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Scheduler worker shutting down; abandoning pending jobs");
                    break;
                }
                _ = sleep_until(due) => {}
            }

            last_call = Some(Instant::now());
            self.execute(scheduled.job).await;
        }
    }

    async fn execute(&self, mut job: Job) {
        let chat_id = job.chat_id;
        let result = match &job.kind {
            JobKind::Send { text, .. } => self.delivery.send(chat_id, text).await.map(Some),
            JobKind::Edit { message_id, text } => self
                .delivery
                .edit(chat_id, *message_id, text)
                .await
                .map(|_| None),
            JobKind::Delete { message_id } => self
                .delivery
                .delete(chat_id, *message_id)
                .await
                .map(|_| None),
        };

        match result {
            Ok(sent) => {
                tracing::debug!("Job {} executed on attempt {}", job, job.attempt);
                if let (Some(message_id), JobKind::Send { on_delivered, .. }) = (sent, &mut job.kind)
                {
                    if let Some(on_delivered) = on_delivered.take() {
                        on_delivered.run(message_id).await;
                    }
                }
            }
            Err(DeliveryError::NotModified) if matches!(job.kind, JobKind::Edit { .. }) => {
                tracing::debug!("Ignoring edit error for unmodified message: {}", job);
            }
            Err(e) if e.is_transient() => {
                tracing::error!("Job {} failed on attempt {}: {}", job, job.attempt, e);
                self.scheduler.retry(job);
            }
            Err(e) => {
                tracing::error!("Job {} failed permanently: {}", job, e);
            }
        }
    }
}
