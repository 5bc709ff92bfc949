//! Looping frame player.
//!
//! One tokio task per player sends a frame every 20 ms. Control requests
//! travel over a small bounded channel and are always polled ahead of the
//! next tick, so a pause or stop issued mid-wait never lets another frame out.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{sync::Mutex, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, warn};

use crate::{
    audio::{AudioFrameStream, PlaybackCursor, constants::FRAME_DURATION_MS},
    common::errors::PlayerError,
    playback::sink::{FrameSink, send_silence},
};

/// Pending control requests a player can hold before senders wait.
const COMMAND_CAPACITY: usize = 4;

/// How long `pause` waits for the loop to go quiet.
const PAUSE_ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound for loop teardown before the task is aborted.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

enum PlayerCommand {
    Pause(tokio::sync::oneshot::Sender<()>),
    Resume,
    Stop,
}

enum Parked {
    Resumed,
    Stopped,
}

struct PlayerTask {
    commands: flume::Sender<PlayerCommand>,
    handle: JoinHandle<()>,
}

pub struct FramePlayer {
    label: String,
    sink: Arc<dyn FrameSink>,
    task: Mutex<Option<PlayerTask>>,
    frames_sent: Arc<AtomicU64>,
}

impl FramePlayer {
    pub fn new(label: impl Into<String>, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            label: label.into(),
            sink,
            task: Mutex::new(None),
            frames_sent: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Starts looping `tracks`. Returns `Ok(false)` if the player is already
    /// running.
    pub async fn play(&self, tracks: Arc<[AudioFrameStream]>) -> Result<bool, PlayerError> {
        if tracks.is_empty() {
            return Err(PlayerError::NoTracks);
        }

        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return Ok(false);
        }

        let (tx, rx) = flume::bounded(COMMAND_CAPACITY);
        let handle = tokio::spawn(run(
            self.label.clone(),
            self.sink.clone(),
            tracks,
            rx,
            self.frames_sent.clone(),
        ));

        *task = Some(PlayerTask {
            commands: tx,
            handle,
        });
        Ok(true)
    }

    /// Returns once the loop has gone quiet (speaking off, silence sent), or
    /// immediately if nothing is playing.
    pub async fn pause(&self) {
        let task = self.task.lock().await;
        let Some(task) = task.as_ref() else {
            return;
        };

        let (ack_tx, ack_rx) = tokio::sync::oneshot::channel();
        if task.commands.try_send(PlayerCommand::Pause(ack_tx)).is_err() {
            return;
        }
        if tokio::time::timeout(PAUSE_ACK_TIMEOUT, ack_rx).await.is_err() {
            warn!("[{}] Player did not acknowledge pause in time", self.label);
        }
    }

    pub async fn resume(&self) {
        if let Some(task) = self.task.lock().await.as_ref() {
            let _ = task.commands.try_send(PlayerCommand::Resume);
        }
    }

    /// Stops the loop and waits for it to exit. After this returns no frame
    /// from this player is in flight.
    pub async fn stop(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };

        let PlayerTask {
            commands,
            mut handle,
        } = task;
        let _ = commands.send_async(PlayerCommand::Stop).await;

        if tokio::time::timeout(STOP_TIMEOUT, &mut handle).await.is_err() {
            warn!("[{}] Player loop did not stop in time; aborting", self.label);
            handle.abort();
            let _ = handle.await;
        }
        debug!("[{}] Player stopped", self.label);
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }
}

async fn run(
    label: String,
    sink: Arc<dyn FrameSink>,
    tracks: Arc<[AudioFrameStream]>,
    commands: flume::Receiver<PlayerCommand>,
    frames_sent: Arc<AtomicU64>,
) {
    let mut cursor = PlaybackCursor::default();
    let mut interval = tokio::time::interval(Duration::from_millis(FRAME_DURATION_MS));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut send_failures: u64 = 0;

    if let Err(e) = sink.set_speaking(true).await {
        warn!("[{}] Failed to set speaking: {}", label, e);
    }
    debug!("[{}] Player loop started with {} track(s)", label, tracks.len());

    loop {
        tokio::select! {
            biased;

            cmd = commands.recv_async() => match cmd {
                Ok(PlayerCommand::Pause(ack)) => {
                    go_quiet(&label, sink.as_ref()).await;
                    let _ = ack.send(());
                    match park(&commands).await {
                        Parked::Resumed => {
                            if let Err(e) = sink.set_speaking(true).await {
                                warn!("[{}] Failed to set speaking: {}", label, e);
                            }
                            interval.reset();
                        }
                        Parked::Stopped => return,
                    }
                }
                Ok(PlayerCommand::Resume) => {}
                Ok(PlayerCommand::Stop) | Err(_) => break,
            },

            _ = interval.tick() => {
                let Some(frame) = cursor.next_frame(&tracks) else {
                    warn!("[{}] Track list yielded no frames; stopping", label);
                    break;
                };

                match sink.send_frame(frame).await {
                    Ok(()) => {
                        frames_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        send_failures += 1;
                        if send_failures == 1 || send_failures % 250 == 0 {
                            warn!("[{}] Frame send failed ({} so far): {}", label, send_failures, e);
                        }
                    }
                }
            }
        }
    }

    go_quiet(&label, sink.as_ref()).await;
}

async fn go_quiet(label: &str, sink: &dyn FrameSink) {
    if let Err(e) = sink.set_speaking(false).await {
        debug!("[{}] Failed to clear speaking: {}", label, e);
    }
    send_silence(sink).await;
}

/// Blocks a paused loop until it is resumed or stopped.
async fn park(commands: &flume::Receiver<PlayerCommand>) -> Parked {
    loop {
        match commands.recv_async().await {
            Ok(PlayerCommand::Resume) => return Parked::Resumed,
            Ok(PlayerCommand::Pause(ack)) => {
                let _ = ack.send(());
            }
            Ok(PlayerCommand::Stop) | Err(_) => return Parked::Stopped,
        }
    }
}
