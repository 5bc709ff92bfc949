//! One focus session per voice channel.
//!
//! Start/stop/reset are serialized by an async transition lock; the timer task
//! and readers only touch the short-held state lock, which is never held
//! across an await.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    audio::AudioFrameStream,
    common::types::{ChannelId, GuildId},
    configs::SessionConfig,
    playback::FramePlayer,
    session::{
        chimes::{ChimeKind, Chimes},
        panel::{PanelRef, Phase, SessionSnapshot, StatusPanel},
        timer::{TaskCounter, TaskCounts, TimerHandle, TimerSignal, TimerSignals},
    },
    voice::VoiceControl,
};

/// Everything sessions share.
pub struct SessionContext {
    pub voice: Arc<dyn VoiceControl>,
    pub panel: Option<Arc<dyn StatusPanel>>,
    pub chimes: Arc<Chimes>,
    pub config: SessionConfig,
}

struct SessionState {
    phase: Phase,
    minutes_remaining: u32,
    current_cycle: u32,
    total_cycles: u32,
    music: Option<Arc<[AudioFrameStream]>>,
    player: Option<Arc<FramePlayer>>,
    timer: Option<TimerHandle>,
    panel: Option<PanelRef>,
    minutes_since_panel: u32,
    /// Chimes currently on the wire; music waits until this drops to zero.
    chimes_playing: u32,
}

impl SessionState {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            minutes_remaining: 0,
            current_cycle: 0,
            total_cycles: 0,
            music: None,
            player: None,
            timer: None,
            panel: None,
            minutes_since_panel: 0,
            chimes_playing: 0,
        }
    }

    fn clear_counters(&mut self) {
        self.minutes_remaining = 0;
        self.current_cycle = 0;
        self.total_cycles = 0;
        self.minutes_since_panel = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    BreakStarted,
    WorkResumed,
    Completed,
}

enum TickOutcome {
    Quiet,
    Refresh,
    Transition(Transition),
}

struct SessionCore {
    guild_id: GuildId,
    channel_id: ChannelId,
    ctx: Arc<SessionContext>,
    state: Mutex<SessionState>,
    counter: Arc<TaskCounter>,
}

pub struct Session {
    core: Arc<SessionCore>,
    transition: tokio::sync::Mutex<()>,
}

impl Session {
    pub fn new(guild_id: GuildId, channel_id: ChannelId, ctx: Arc<SessionContext>) -> Self {
        Self {
            core: Arc::new(SessionCore {
                guild_id,
                channel_id,
                ctx,
                state: Mutex::new(SessionState::new()),
                counter: Arc::new(TaskCounter::default()),
            }),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.core.guild_id
    }

    pub fn channel_id(&self) -> ChannelId {
        self.core.channel_id
    }

    pub fn state(&self) -> SessionSnapshot {
        self.core.snapshot(&self.core.state.lock())
    }

    pub fn has_music(&self) -> bool {
        self.core.state.lock().music.is_some()
    }

    pub fn task_counts(&self) -> TaskCounts {
        self.core.counter.snapshot()
    }

    pub fn set_panel(&self, panel: PanelRef) {
        self.core.state.lock().panel = Some(panel);
    }

    /// Enters Working. From Idle or Complete the counters start over; from
    /// Paused the remaining minutes carry on. A no-op while already running.
    pub async fn start(&self) -> SessionSnapshot {
        let _transition = self.transition.lock().await;
        let config = &self.core.ctx.config;

        let snapshot = {
            let mut state = self.core.state.lock();
            match state.phase {
                Phase::Working | Phase::Break => {
                    debug!("[{}] Start while {}; ignoring", self.core.channel_id, state.phase);
                    return self.core.snapshot(&state);
                }
                Phase::Idle | Phase::Complete => {
                    state.current_cycle = 1;
                    state.total_cycles = config.max_cycles.max(1);
                    state.minutes_remaining = config.work_minutes;
                }
                Phase::Paused => {}
            }
            state.phase = Phase::Working;
            state.minutes_since_panel = 0;

            let core = self.core.clone();
            state.timer = Some(TimerHandle::spawn(&self.core.counter, |signals| {
                run_timer(core, signals)
            }));
            self.core.snapshot(&state)
        };

        info!(
            "[{}] Session started: cycle {}/{}, {} min left",
            self.core.channel_id,
            snapshot.current_cycle,
            snapshot.total_cycles,
            snapshot.minutes_remaining
        );
        self.core.publish(&snapshot).await;
        snapshot
    }

    /// Pauses a running session. Returns after the timer has exited, music has
    /// stopped and voice has been left.
    pub async fn stop(&self) -> SessionSnapshot {
        let _transition = self.transition.lock().await;

        let timer = {
            let mut state = self.core.state.lock();
            if !state.phase.is_active() {
                debug!("[{}] Stop while {}; ignoring", self.core.channel_id, state.phase);
                return self.core.snapshot(&state);
            }
            state.timer.take()
        };
        if let Some(timer) = timer {
            timer.request_stop();
            timer.await_stopped().await;
        }

        let (player, snapshot) = {
            let mut state = self.core.state.lock();
            if state.phase.is_active() {
                state.phase = Phase::Paused;
            }
            (state.player.take(), self.core.snapshot(&state))
        };
        self.core.teardown_audio(player).await;

        info!(
            "[{}] Session paused with {} min left",
            self.core.channel_id, snapshot.minutes_remaining
        );
        self.core.publish(&snapshot).await;
        snapshot
    }

    /// Returns the session to Idle from any phase.
    pub async fn reset(&self) -> SessionSnapshot {
        let _transition = self.transition.lock().await;

        let timer = self.core.state.lock().timer.take();
        if let Some(timer) = timer {
            timer.request_reset();
            timer.await_stopped().await;
        }

        let (player, snapshot) = {
            let mut state = self.core.state.lock();
            state.phase = Phase::Idle;
            state.clear_counters();
            (state.player.take(), self.core.snapshot(&state))
        };
        self.core.teardown_audio(player).await;

        info!("[{}] Session reset", self.core.channel_id);
        self.core.publish(&snapshot).await;
        snapshot
    }

    /// Replaces the background music. An empty list clears it. Playback
    /// restarts from the top of the new list when the session is working.
    pub async fn set_music_track(&self, tracks: Vec<AudioFrameStream>) {
        let _transition = self.transition.lock().await;

        let (old_player, phase) = {
            let mut state = self.core.state.lock();
            state.music = if tracks.is_empty() {
                None
            } else {
                Some(tracks.into())
            };
            (state.player.take(), state.phase)
        };

        if let Some(player) = old_player {
            player.stop().await;
        }
        if phase == Phase::Working {
            self.core.start_music().await;
        }
        debug!(
            "[{}] Music track list replaced (has music: {})",
            self.core.channel_id,
            self.has_music()
        );
    }
}

impl SessionCore {
    fn snapshot(&self, state: &SessionState) -> SessionSnapshot {
        SessionSnapshot {
            guild_id: self.guild_id,
            channel_id: self.channel_id,
            phase: state.phase,
            minutes_remaining: state.minutes_remaining,
            current_cycle: state.current_cycle,
            total_cycles: state.total_cycles,
            has_music: state.music.is_some(),
        }
    }

    async fn publish(&self, snapshot: &SessionSnapshot) {
        let Some(panel) = &self.ctx.panel else {
            return;
        };
        let Some(panel_ref) = self.state.lock().panel else {
            return;
        };
        if let Err(e) = panel.update(panel_ref, snapshot).await {
            warn!("[{}] Failed to update status panel: {}", self.channel_id, e);
        }
    }

    /// Joins voice and starts music. Voice failures leave the timer running
    /// without sound.
    async fn connect_audio(&self) {
        if let Err(e) = self.ctx.voice.join(self.guild_id, self.channel_id).await {
            warn!(
                "[{}] Voice unavailable, continuing without sound: {}",
                self.channel_id, e
            );
            return;
        }
        self.start_music().await;
    }

    /// Starts (or keeps) the one music player. Deferred while a chime plays;
    /// the chime task picks it up afterwards.
    async fn start_music(&self) {
        let (tracks, player) = {
            let mut state = self.state.lock();
            if state.chimes_playing > 0 {
                debug!("[{}] Chime playing; music deferred", self.channel_id);
                return;
            }
            let Some(tracks) = state.music.clone() else {
                return;
            };
            let player = match &state.player {
                Some(player) => player.clone(),
                None => {
                    let Some(sink) = self.ctx.voice.sink(self.guild_id) else {
                        debug!("[{}] No voice sink; music skipped", self.channel_id);
                        return;
                    };
                    let player = Arc::new(FramePlayer::new(self.channel_id.to_string(), sink));
                    state.player = Some(player.clone());
                    player
                }
            };
            (tracks, player)
        };

        if let Err(e) = player.play(tracks).await {
            warn!("[{}] Failed to start music: {}", self.channel_id, e);
        }
    }

    async fn resume_music(&self) {
        let player = self.state.lock().player.clone();
        match player {
            Some(player) if player.is_running().await => player.resume().await,
            _ => self.start_music().await,
        }
    }

    async fn teardown_audio(&self, player: Option<Arc<FramePlayer>>) {
        if let Some(player) = player {
            player.stop().await;
        }
        self.ctx.voice.leave(self.guild_id).await;
    }

    /// Advances the clock by one minute.
    fn advance(&self) -> (TickOutcome, SessionSnapshot) {
        let config = &self.ctx.config;
        let mut state = self.state.lock();

        state.minutes_remaining = state.minutes_remaining.saturating_sub(1);
        state.minutes_since_panel += 1;

        if state.minutes_remaining > 0 {
            let outcome = if state.minutes_since_panel >= config.panel_update_minutes.max(1) {
                state.minutes_since_panel = 0;
                TickOutcome::Refresh
            } else {
                TickOutcome::Quiet
            };
            return (outcome, self.snapshot(&state));
        }

        let transition = match state.phase {
            Phase::Working => {
                state.phase = Phase::Break;
                state.minutes_remaining = config.break_minutes;
                Transition::BreakStarted
            }
            Phase::Break if state.current_cycle < state.total_cycles => {
                state.current_cycle += 1;
                state.phase = Phase::Working;
                state.minutes_remaining = config.work_minutes;
                Transition::WorkResumed
            }
            Phase::Break => {
                state.phase = Phase::Complete;
                state.minutes_remaining = 0;
                Transition::Completed
            }
            phase => {
                warn!("[{}] Timer ticked while {}", self.channel_id, phase);
                return (TickOutcome::Quiet, self.snapshot(&state));
            }
        };
        state.minutes_since_panel = 0;
        (TickOutcome::Transition(transition), self.snapshot(&state))
    }

    /// Returns `false` once the session has completed.
    async fn tick(self: &Arc<Self>) -> bool {
        let (outcome, snapshot) = self.advance();
        let transition = match outcome {
            TickOutcome::Quiet => return true,
            TickOutcome::Refresh => {
                self.publish(&snapshot).await;
                return true;
            }
            TickOutcome::Transition(t) => t,
        };

        info!(
            "[{}] {:?}: cycle {}/{}, {} min",
            self.channel_id,
            transition,
            snapshot.current_cycle,
            snapshot.total_cycles,
            snapshot.minutes_remaining
        );

        match transition {
            Transition::BreakStarted => {
                let player = self.state.lock().player.clone();
                if let Some(player) = player {
                    player.pause().await;
                }
                self.spawn_chime(ChimeKind::BreakStart);
            }
            Transition::WorkResumed => self.spawn_chime(ChimeKind::WorkResume),
            Transition::Completed => {
                let player = self.state.lock().player.take();
                if let Some(player) = player {
                    player.stop().await;
                }
                self.spawn_chime(ChimeKind::Complete);
            }
        }

        self.publish(&snapshot).await;
        transition != Transition::Completed
    }

    /// Plays a chime in the background, then hands the link back to music
    /// if the session is working, or leaves voice once complete.
    fn spawn_chime(self: &Arc<Self>, kind: ChimeKind) {
        self.state.lock().chimes_playing += 1;
        let core = self.clone();
        tokio::spawn(async move {
            core.play_chime(kind).await;
            let (phase, quiet) = {
                let mut state = core.state.lock();
                state.chimes_playing = state.chimes_playing.saturating_sub(1);
                (state.phase, state.chimes_playing == 0)
            };
            match phase {
                Phase::Working if quiet => core.resume_music().await,
                // a restart in the meantime owns the connection now
                Phase::Complete if kind == ChimeKind::Complete => {
                    core.ctx.voice.leave(core.guild_id).await
                }
                _ => {}
            }
        });
    }

    async fn play_chime(&self, kind: ChimeKind) {
        let Some(sound) = self.ctx.chimes.get(kind) else {
            return;
        };
        if let Err(e) = self.ctx.voice.play_sound(self.guild_id, sound).await {
            warn!("[{}] {:?} chime failed: {}", self.channel_id, kind, e);
        }
    }
}

async fn run_timer(core: Arc<SessionCore>, signals: TimerSignals) {
    let tick = core.ctx.config.tick();
    // scheduled from task start so a slow join does not stretch the session
    let mut interval = tokio::time::interval_at(Instant::now() + tick, tick);

    tokio::select! {
        biased;

        signal = signals.recv() => {
            debug!("[{}] {:?} while joining voice", core.channel_id, signal);
            return;
        }
        _ = core.connect_audio() => {}
    }

    loop {
        tokio::select! {
            biased;

            signal = signals.recv() => {
                match signal {
                    TimerSignal::Stop => debug!("[{}] Timer stopped", core.channel_id),
                    TimerSignal::Reset => debug!("[{}] Timer reset", core.channel_id),
                }
                return;
            }
            _ = interval.tick() => {
                if !core.tick().await {
                    debug!("[{}] Timer finished", core.channel_id);
                    return;
                }
            }
        }
    }
}
