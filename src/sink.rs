//! Turns a noisy stream of position samples into a few deduplicated commits.
//!
//! Samples are floored to whole seconds and collapsed with their predecessor, then held in a
//! fixed window; when the window elapses only its latest value is committed. Significant events
//! bypass the window with [ThrottledSink::commit_now]. Every commit, windowed or immediate, goes
//! through an idempotency gate: a value equal to the last one sent is dropped.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::model::floor_second;

/// Where committed values go. Failures are logged by the sink and never retried.
#[async_trait]
pub trait Commit: Send + Sync + 'static {
    type Error: std::fmt::Display + Send + 'static;

    async fn commit(&self, value: u64) -> Result<(), Self::Error>;
}

/// The synchronous core of the sink, driven by the worker task.
#[derive(Debug, Clone)]
pub struct Throttle {
    window: Duration,
    last_accepted: Option<u64>,
    pending: Option<Pending>,
    last_sent: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    value: u64,
    deadline: Instant,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: None,
            pending: None,
            last_sent: None,
        }
    }

    /// Feed a raw sample. Opens a window if none is open.
    pub fn accept(&mut self, raw: f64, now: Instant) {
        let value = floor_second(raw);
        if self.last_accepted == Some(value) {
            return;
        }
        self.last_accepted = Some(value);

        match self.pending.as_mut() {
            Some(pending) => pending.value = value,
            None => {
                self.pending = Some(Pending {
                    value,
                    deadline: now + self.window,
                })
            }
        }
    }

    /// When the open window elapses, if one is open.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.map(|pending| pending.deadline)
    }

    /// Close the window if it has elapsed and return the value to send, if it passes the gate.
    pub fn expire(&mut self, now: Instant) -> Option<u64> {
        match self.pending {
            Some(pending) if pending.deadline <= now => {
                self.pending = None;
                self.gate(pending.value)
            }
            _ => None,
        }
    }

    /// Commit immediately. The open window is discarded since its value is older.
    pub fn immediate(&mut self, raw: f64) -> Option<u64> {
        self.pending = None;
        self.gate(floor_second(raw))
    }

    pub fn last_sent(&self) -> Option<u64> {
        self.last_sent
    }

    fn gate(&mut self, value: u64) -> Option<u64> {
        if self.last_sent == Some(value) {
            return None;
        }

        self.last_sent = Some(value);
        Some(value)
    }
}

#[derive(Debug, Clone, Copy)]
enum Message {
    Sample(f64),
    Now(f64),
}

/// Cloneable sender side of a sink, for event loops that feed it.
#[derive(Debug, Clone)]
pub struct SinkHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl SinkHandle {
    pub fn accept(&self, raw: f64) {
        self.send(Message::Sample(raw));
    }

    pub fn commit_now(&self, raw: f64) {
        self.send(Message::Now(raw));
    }

    fn send(&self, message: Message) {
        if self.tx.send(message).is_err() {
            tracing::warn!(?message, "throttled sink is no longer running");
        }
    }
}

/// A running sink. The worker exits once this and every [SinkHandle] are gone, after sending
/// the immediate commits still queued.
#[derive(Debug)]
pub struct ThrottledSink {
    handle: SinkHandle,
    worker: JoinHandle<()>,
}

impl ThrottledSink {
    pub fn spawn<C: Commit>(window: Duration, target: C) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run(Throttle::new(window), target, rx));

        Self {
            handle: SinkHandle { tx },
            worker,
        }
    }

    pub fn handle(&self) -> SinkHandle {
        self.handle.clone()
    }

    pub fn accept(&self, raw: f64) {
        self.handle.accept(raw);
    }

    pub fn commit_now(&self, raw: f64) {
        self.handle.commit_now(raw);
    }

    /// Stop accepting samples, send every immediate commit already queued, drop the open window
    /// and wait for the worker to finish. Outstanding [SinkHandle]s keep the worker alive.
    pub async fn close(self) {
        let Self { handle, worker } = self;
        drop(handle);

        if let Err(error) = worker.await {
            tracing::error!(%error, "throttled sink worker crashed");
        }
    }
}

async fn run<C: Commit>(
    mut throttle: Throttle,
    target: C,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(Message::Sample(raw)) => throttle.accept(raw, Instant::now()),
                Some(Message::Now(raw)) => {
                    if let Some(value) = throttle.immediate(raw) {
                        deliver(&target, value).await;
                    }
                }
                None => break,
            },

            _ = elapsed(throttle.deadline()) => {
                if let Some(value) = throttle.expire(Instant::now()) {
                    deliver(&target, value).await;
                }
            }
        }
    }

    tracing::debug!(last_sent = ?throttle.last_sent(), "throttled sink stopped");
}

async fn elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending().await,
    }
}

async fn deliver<C: Commit>(target: &C, value: u64) {
    tracing::debug!(value, "committing");

    if let Err(error) = target.commit(value).await {
        tracing::warn!(%error, value, "commit failed, waiting for the next sample");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    const WINDOW: Duration = Duration::from_millis(4000);

    #[derive(Debug, Clone, Default)]
    struct Recorder {
        sent: Arc<Mutex<Vec<u64>>>,
        failing: bool,
    }

    impl Recorder {
        fn sent(&self) -> Vec<u64> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Commit for Recorder {
        type Error = String;

        async fn commit(&self, value: u64) -> Result<(), String> {
            self.sent.lock().unwrap().push(value);
            if self.failing {
                Err("offline".to_string())
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn repeated_value_is_sent_once() {
        let mut throttle = Throttle::new(WINDOW);

        assert_eq!(throttle.immediate(12.3), Some(12));
        assert_eq!(throttle.immediate(12.9), None);
        assert_eq!(throttle.immediate(13.0), Some(13));
    }

    #[test]
    fn window_keeps_only_the_latest_value() {
        let start = Instant::now();
        let mut throttle = Throttle::new(WINDOW);

        throttle.accept(1.2, start);
        throttle.accept(2.7, start + Duration::from_secs(1));
        throttle.accept(3.1, start + Duration::from_secs(2));

        assert_eq!(throttle.deadline(), Some(start + WINDOW));
        assert_eq!(throttle.expire(start + Duration::from_secs(3)), None);
        assert_eq!(throttle.expire(start + WINDOW), Some(3));
        assert_eq!(throttle.deadline(), None);
    }

    #[test]
    fn immediate_commit_discards_the_open_window() {
        let start = Instant::now();
        let mut throttle = Throttle::new(WINDOW);

        throttle.accept(12.0, start);
        assert_eq!(throttle.immediate(40.0), Some(40));
        assert_eq!(throttle.expire(start + WINDOW), None);
    }

    #[test]
    fn windowed_value_equal_to_last_sent_is_gated() {
        let start = Instant::now();
        let mut throttle = Throttle::new(WINDOW);

        throttle.immediate(40.2);
        throttle.accept(40.8, start);

        assert_eq!(throttle.expire(start + WINDOW), None);
    }

    #[tokio::test(start_paused = true)]
    async fn ten_samples_in_one_window_commit_once() {
        let recorder = Recorder::default();
        let sink = ThrottledSink::spawn(WINDOW, recorder.clone());

        for i in 0..10 {
            sink.accept(10.0 + f64::from(i) * 0.35);
            tokio::time::sleep(Duration::from_millis(350)).await;
        }
        tokio::time::sleep(WINDOW).await;

        assert_eq!(recorder.sent(), vec![13]);
        sink.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_commit_does_not_wait_for_the_window() {
        let recorder = Recorder::default();
        let sink = ThrottledSink::spawn(WINDOW, recorder.clone());

        sink.accept(10.0);
        sink.commit_now(40.0);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(recorder.sent(), vec![40]);

        sink.accept(41.0);
        tokio::time::sleep(WINDOW + Duration::from_millis(100)).await;
        assert_eq!(recorder.sent(), vec![40, 41]);

        sink.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_swallowed_and_not_retried() {
        let recorder = Recorder {
            failing: true,
            ..Recorder::default()
        };
        let sink = ThrottledSink::spawn(WINDOW, recorder.clone());

        sink.commit_now(5.0);
        sink.commit_now(6.0);
        tokio::time::sleep(WINDOW * 2).await;

        assert_eq!(recorder.sent(), vec![5, 6]);
        sink.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn close_flushes_queued_commits_but_drops_the_window() {
        let recorder = Recorder::default();
        let sink = ThrottledSink::spawn(WINDOW, recorder.clone());

        sink.accept(3.0);
        sink.commit_now(2.0);
        sink.accept(4.0);
        sink.close().await;

        assert_eq!(recorder.sent(), vec![2]);
    }
}
