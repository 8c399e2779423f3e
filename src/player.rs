//! `Player`: owns the current track session, drives the fetch-interval task and
//! exposes the per-render-frame tick.
//!
//! ```text
//!   load_track ─► manifest::load ─► TrackSession ─► first pass ─► clock.play
//!                                                       │
//!                          fetch task (every interval) ─┘   render loop ─► tick()
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    clock::TimeBase,
    codec::{GeometryDecoder, MediaElement, PresentationSink, TextureCapabilities, TextureDecoder},
    common::{
        errors::PlayerError,
        types::{SessionId, Shared},
    },
    compositor::{self, TickOutcome},
    configs::{AbrConfig, PlayerConfig},
    fetch::Fetcher,
    manifest::{self, Manifest, TemplateVars, resolve_url},
    scheduler::{LookaheadCallback, PassReport, Scheduler},
    session::{SessionStatus, TrackSession},
};

/// The closed set of notifications a player emits, called from the tick driver.
#[derive(Default)]
pub struct PlayerCallbacks {
    pub on_buffering: Option<Box<dyn Fn(f32) + Send + Sync>>,
    pub on_frame_shown: Option<Box<dyn Fn(u32) + Send + Sync>>,
    pub on_track_end: Option<Box<dyn Fn() + Send + Sync>>,
}

/// External collaborators a player is built with.
pub struct Collaborators {
    pub fetcher: Arc<dyn Fetcher>,
    pub geometry_decoder: Arc<dyn GeometryDecoder>,
    pub texture_decoder: Arc<dyn TextureDecoder>,
    pub capabilities: Arc<dyn TextureCapabilities>,
    pub sink: Arc<dyn PresentationSink>,
    /// Audio element; `None` plays every track on the wall clock.
    pub media: Option<Arc<dyn MediaElement>>,
}

struct FetchTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl FetchTask {
    fn stop(self) {
        self.token.cancel();
        self.handle.abort();
    }
}

pub struct Player {
    config: PlayerConfig,
    abr_config: AbrConfig,
    scheduler: Arc<Scheduler>,
    fetcher: Arc<dyn Fetcher>,
    capabilities: Arc<dyn TextureCapabilities>,
    sink: Arc<dyn PresentationSink>,
    media: Option<Arc<dyn MediaElement>>,
    callbacks: PlayerCallbacks,
    state: Shared<Option<TrackSession>>,
    fetch_task: Option<FetchTask>,
}

impl Player {
    pub fn new(
        config: PlayerConfig,
        abr_config: AbrConfig,
        collaborators: Collaborators,
        callbacks: PlayerCallbacks,
    ) -> Self {
        let scheduler = Arc::new(Scheduler::new(
            collaborators.fetcher.clone(),
            collaborators.geometry_decoder,
            collaborators.texture_decoder,
            config.clone(),
        ));

        Self {
            config,
            abr_config,
            scheduler,
            fetcher: collaborators.fetcher,
            capabilities: collaborators.capabilities,
            sink: collaborators.sink,
            media: collaborators.media,
            callbacks,
            state: Arc::new(Mutex::new(None)),
            fetch_task: None,
        }
    }

    /// Replace the current track with the one described at `manifest_url`.
    ///
    /// Returns once the first lookahead pass has completed and playback started.
    pub async fn load_track(&mut self, manifest_url: &str) -> Result<SessionId, PlayerError> {
        self.dispose();

        let manifest = Arc::new(manifest::load(self.fetcher.as_ref(), manifest_url).await?);
        let clock = self.select_time_base(&manifest, manifest_url);
        let session = TrackSession::new(
            manifest,
            manifest_url,
            clock,
            self.capabilities.as_ref(),
            self.abr_config.clone(),
        )?;
        let session_id = session.id;
        *self.state.lock() = Some(session);

        let state = self.state.clone();
        let start_playback: LookaheadCallback = Box::new(move |report: &PassReport| {
            let mut guard = state.lock();
            if let Some(session) = guard.as_mut().filter(|s| s.id == report.session) {
                info!(
                    "[{}] initial lookahead ready ({}/{} slots), starting playback",
                    session.id, report.completed, report.requested
                );
                session.clock.play(Instant::now());
            }
        });
        self.scheduler
            .run_pass(&self.state, Some(start_playback))
            .await;

        self.fetch_task = Some(self.spawn_fetch_task());
        Ok(session_id)
    }

    /// Audio-backed when the manifest has audio the element can play.
    fn select_time_base(&self, manifest: &Manifest, manifest_url: &str) -> TimeBase {
        let (Some(audio), Some(media)) = (manifest.audio.as_ref(), self.media.as_ref()) else {
            return TimeBase::wall(Instant::now());
        };
        if !manifest.has_audio() {
            return TimeBase::wall(Instant::now());
        }

        let Some(format) = audio.formats.iter().copied().find(|f| media.can_play(*f)) else {
            warn!(
                "None of the audio formats {:?} are playable; using the wall clock",
                audio.formats
            );
            return TimeBase::wall(Instant::now());
        };

        let vars = TemplateVars {
            ext: Some(format.as_ext()),
            ..Default::default()
        };
        let url = resolve_url(manifest_url, &audio.path.render(&vars, 0));
        debug!("Audio source {} ({})", url, format.mime());
        media.set_source(&url);
        TimeBase::media(media.clone())
    }

    fn spawn_fetch_task(&self) -> FetchTask {
        let token = CancellationToken::new();
        let scheduler = self.scheduler.clone();
        let state = self.state.clone();
        let period = self.config.interval();
        let child = token.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    _ = interval.tick() => {}
                }

                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    report = scheduler.run_pass(&state, None) => {
                        if report.is_none() && state.lock().is_none() {
                            break;
                        }
                    }
                }
            }
            debug!("Fetch task stopped");
        });

        FetchTask { token, handle }
    }

    /// Render-frame tick: present, report buffering, or finish the track.
    pub fn tick(&mut self) -> Option<TickOutcome> {
        let outcome = {
            let mut guard = self.state.lock();
            let session = guard.as_mut()?;
            compositor::tick(session, Instant::now(), &self.config)
        };

        match &outcome {
            TickOutcome::Buffering(progress) => {
                if let Some(cb) = &self.callbacks.on_buffering {
                    cb(*progress);
                }
            }
            TickOutcome::Shown(presentation) => {
                self.sink.present(presentation);
                if let Some(cb) = &self.callbacks.on_frame_shown {
                    cb(presentation.frame);
                }
            }
            TickOutcome::Ended => {
                info!("Track ended");
                self.dispose();
                if let Some(cb) = &self.callbacks.on_track_end {
                    cb();
                }
            }
            TickOutcome::Waiting { .. } => {}
        }

        Some(outcome)
    }

    pub fn play(&self) -> Result<(), PlayerError> {
        let mut guard = self.state.lock();
        let session = guard.as_mut().ok_or(PlayerError::NoTrack)?;
        session.clock.play(Instant::now());
        Ok(())
    }

    /// Freeze the clock. Prefetching continues so resuming is immediate.
    pub fn pause(&self) -> Result<(), PlayerError> {
        let mut guard = self.state.lock();
        let session = guard.as_mut().ok_or(PlayerError::NoTrack)?;
        session.clock.pause(Instant::now());
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        self.state
            .lock()
            .as_ref()
            .is_some_and(|s| !s.ended && !s.clock.is_paused())
    }

    pub fn status(&self) -> Option<SessionStatus> {
        self.state.lock().as_ref().map(|s| s.status(Instant::now()))
    }

    /// Stop fetching and release every buffered payload of the current track.
    /// In-flight requests are abandoned; their results are dropped on arrival.
    pub fn dispose(&mut self) {
        if let Some(task) = self.fetch_task.take() {
            task.stop();
        }

        let session = self.state.lock().take();
        if let Some(mut session) = session {
            if session.clock.is_audio_backed() {
                session.clock.pause(Instant::now());
            }
            session.buffers.clear();
            debug!("[{}] session disposed", session.id);
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        if let Some(task) = self.fetch_task.take() {
            task.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicU32, AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;
    use crate::{
        codec::{
            StaticCapabilities,
            testing::{FakeDecoder, FakeMedia, RecordingSink},
        },
        common::errors::ManifestError,
        fetch::mock::MemoryFetcher,
        manifest::{
            AudioFormat,
            tests::{MANIFEST_URL, sample_json},
        },
    };

    struct Harness {
        player: Player,
        fetcher: Arc<MemoryFetcher>,
        sink: Arc<RecordingSink>,
        shown: Arc<AtomicU32>,
        ended: Arc<AtomicUsize>,
    }

    fn harness(media: Option<Arc<FakeMedia>>) -> Harness {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert(MANIFEST_URL, sample_json());
        let decoder = Arc::new(FakeDecoder::default());
        let sink = Arc::new(RecordingSink::default());
        let shown = Arc::new(AtomicU32::new(u32::MAX));
        let ended = Arc::new(AtomicUsize::new(0));

        let callbacks = PlayerCallbacks {
            on_buffering: None,
            on_frame_shown: Some(Box::new({
                let shown = shown.clone();
                move |frame| shown.store(frame, Ordering::SeqCst)
            })),
            on_track_end: Some(Box::new({
                let ended = ended.clone();
                move || {
                    ended.fetch_add(1, Ordering::SeqCst);
                }
            })),
        };

        let player = Player::new(
            PlayerConfig::default(),
            AbrConfig::default(),
            Collaborators {
                fetcher: fetcher.clone(),
                geometry_decoder: decoder.clone(),
                texture_decoder: decoder,
                capabilities: Arc::new(StaticCapabilities::all()),
                sink: sink.clone(),
                media: media.map(|m| m as Arc<dyn MediaElement>),
            },
            callbacks,
        );

        Harness {
            player,
            fetcher,
            sink,
            shown,
            ended,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn loads_prefetches_and_shows_first_frame() {
        let mut h = harness(None);
        h.player.load_track(MANIFEST_URL).await.unwrap();
        assert!(h.player.is_playing());

        let status = h.player.status().unwrap();
        assert_eq!(status.geometry_target, "draco_low");
        assert_eq!(status.geometry_high_water, 119);
        assert_eq!(status.buffered_geometry, 120);

        let outcome = h.player.tick().unwrap();
        assert!(matches!(outcome, TickOutcome::Shown(_)));
        assert_eq!(h.shown.load(Ordering::SeqCst), 0);
        assert_eq!(h.sink.shown.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_task_tops_up_the_buffer() {
        let mut h = harness(None);
        h.player.load_track(MANIFEST_URL).await.unwrap();
        let before = h.fetcher.requests().len();

        tokio::time::sleep(Duration::from_millis(2_100)).await;
        h.player.tick();

        let status = h.player.status().unwrap();
        assert!(h.fetcher.requests().len() > before);
        assert!(status.geometry_high_water > 119);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_and_reports_buffering() {
        let mut h = harness(None);
        let progress = Arc::new(Mutex::new(None));
        h.player.callbacks.on_buffering = Some(Box::new({
            let progress = progress.clone();
            move |p: f32| *progress.lock() = Some(p)
        }));
        h.player.load_track(MANIFEST_URL).await.unwrap();

        h.player.pause().unwrap();
        let frozen = h.player.status().unwrap().current_time;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.player.status().unwrap().current_time, frozen);

        assert!(matches!(h.player.tick(), Some(TickOutcome::Buffering(_))));
        assert_eq!(*progress.lock(), Some(1.0));

        h.player.play().unwrap();
        assert!(h.player.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn track_end_fires_once_and_disposes() {
        let mut h = harness(None);
        h.player.load_track(MANIFEST_URL).await.unwrap();

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(matches!(h.player.tick(), Some(TickOutcome::Ended)));
        assert_eq!(h.ended.load(Ordering::SeqCst), 1);
        assert!(h.player.status().is_none());
        assert!(h.player.tick().is_none());
        assert!(matches!(h.player.play(), Err(PlayerError::NoTrack)));
    }

    #[tokio::test(start_paused = true)]
    async fn audio_track_uses_playable_format() {
        let media = Arc::new(FakeMedia::new(vec![AudioFormat::Ogg]));
        let mut h = harness(Some(media.clone()));
        h.player.load_track(MANIFEST_URL).await.unwrap();

        assert_eq!(
            media.state.lock().source.as_deref(),
            Some("https://cdn.example.com/tracks/dancer/audio.ogg")
        );
        assert!(!media.paused());

        media.set_time(1.0);
        assert_eq!(h.player.status().unwrap().current_time, 1.0);

        media.state.lock().ended = true;
        assert!(matches!(h.player.tick(), Some(TickOutcome::Ended)));
        assert!(media.paused());
    }

    #[tokio::test(start_paused = true)]
    async fn unplayable_audio_falls_back_to_wall_clock() {
        let media = Arc::new(FakeMedia::new(vec![AudioFormat::Wav]));
        let mut h = harness(Some(media.clone()));
        h.player.load_track(MANIFEST_URL).await.unwrap();
        assert!(media.state.lock().source.is_none());
        assert!(h.player.is_playing());
    }

    #[tokio::test]
    async fn malformed_manifest_is_fatal() {
        let mut h = harness(None);
        h.fetcher.insert(MANIFEST_URL, "{\"geometry\": 1}");
        let err = h.player.load_track(MANIFEST_URL).await.unwrap_err();
        assert!(matches!(err, PlayerError::Manifest(ManifestError::Malformed(_))));
        assert!(h.player.status().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn loading_a_new_track_replaces_the_session() {
        let mut h = harness(None);
        let first = h.player.load_track(MANIFEST_URL).await.unwrap();
        let second = h.player.load_track(MANIFEST_URL).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(h.player.status().unwrap().session, second);
    }
}
