//! Control handle for a session's timer task.
//!
//! Stop and reset travel over capacity-one channels, so repeated requests
//! collapse into one. The owner confirms teardown by awaiting the task.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::Serialize;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSignal {
    Stop,
    Reset,
}

/// Started/exited bookkeeping for timer tasks.
#[derive(Debug, Default)]
pub struct TaskCounter {
    started: AtomicU64,
    exited: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub started: u64,
    pub exited: u64,
}

impl TaskCounts {
    pub fn running(&self) -> u64 {
        self.started - self.exited
    }
}

impl TaskCounter {
    pub fn snapshot(&self) -> TaskCounts {
        // exited first so a concurrent exit never makes exited > started
        let exited = self.exited.load(Ordering::Acquire);
        let started = self.started.load(Ordering::Acquire);
        TaskCounts { started, exited }
    }
}

/// Counts the task as exited however it ends, including abort.
struct ExitGuard(Arc<TaskCounter>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.exited.fetch_add(1, Ordering::AcqRel);
    }
}

/// Receiving half handed to the timer task.
pub struct TimerSignals {
    stop: flume::Receiver<()>,
    reset: flume::Receiver<()>,
}

impl TimerSignals {
    /// Resolves on the next request. A dropped handle reads as a stop.
    pub async fn recv(&self) -> TimerSignal {
        tokio::select! {
            biased;

            r = self.reset.recv_async() => match r {
                Ok(()) => TimerSignal::Reset,
                Err(_) => TimerSignal::Stop,
            },
            _ = self.stop.recv_async() => TimerSignal::Stop,
        }
    }
}

pub struct TimerHandle {
    stop: flume::Sender<()>,
    reset: flume::Sender<()>,
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn spawn<F, Fut>(counter: &Arc<TaskCounter>, body: F) -> Self
    where
        F: FnOnce(TimerSignals) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop, stop_rx) = flume::bounded(1);
        let (reset, reset_rx) = flume::bounded(1);
        let signals = TimerSignals {
            stop: stop_rx,
            reset: reset_rx,
        };

        counter.started.fetch_add(1, Ordering::AcqRel);
        let guard = ExitGuard(counter.clone());
        let fut = body(signals);
        let task = tokio::spawn(async move {
            let _guard = guard;
            fut.await;
        });

        Self { stop, reset, task }
    }

    pub fn request_stop(&self) {
        let _ = self.stop.try_send(());
    }

    pub fn request_reset(&self) {
        let _ = self.reset.try_send(());
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Returns once the task has fully exited.
    pub async fn await_stopped(self) {
        let _ = self.task.await;
    }
}
