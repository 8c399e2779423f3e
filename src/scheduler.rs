//! Prefetch Scheduler ("leaky bucket").
//!
//! A pass has three phases so the session lock is never held across I/O:
//!
//! 1. **plan** (locked): read the clock, walk each stream's lookahead window,
//!    raise high-water marks and build the request list.
//! 2. **execute** (unlocked): fetch + decode every request concurrently.
//! 3. **apply** (locked): if the session is still the current one, insert the
//!    payloads, record failures and feed the ABR controller.
//!
//! High-water marks are raised at plan time, so no index is ever requested
//! twice by the lookahead. Failed slots are only re-issued through the
//! [`RetryLedger`] when `max_retries` is non-zero.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use futures::{StreamExt, stream};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::{
    abr::AbrDecision,
    buffer::{Payload, Slot, StreamKey},
    clock::frame_at,
    codec::{GeometryDecoder, TextureDecoder},
    common::{
        errors::SlotError,
        types::{SessionId, Shared},
    },
    configs::PlayerConfig,
    fetch::Fetcher,
    manifest::{ByteRange, GeometryFormat, TemplateVars, TextureFormat, resolve_url},
    session::TrackSession,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeKind {
    Geometry(GeometryFormat),
    Texture(TextureFormat),
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub slot: Slot,
    pub url: String,
    pub range: Option<ByteRange>,
    pub kind: DecodeKind,
}

#[derive(Debug, Default)]
pub struct PassPlan {
    pub session: Option<SessionId>,
    pub requests: Vec<FetchRequest>,
    /// Geometry frames newly requested by this pass, and their rate.
    pub geometry_frames: u32,
    pub geometry_frame_rate: f64,
}

impl PassPlan {
    /// Playback time the new geometry frames cover.
    pub fn play_secs(&self) -> f64 {
        if self.geometry_frame_rate > 0.0 {
            self.geometry_frames as f64 / self.geometry_frame_rate
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone)]
pub struct PassReport {
    pub session: SessionId,
    pub requested: usize,
    pub completed: usize,
    pub failed: usize,
    pub fetch_time: Duration,
    pub abr: Option<AbrDecision>,
}

/// Callback run once a pass has been applied. Used to gate playback start.
pub type LookaheadCallback = Box<dyn FnOnce(&PassReport) + Send>;

/// Failed slots waiting to be re-issued, with their attempt counts.
#[derive(Debug, Default)]
pub struct RetryLedger {
    attempts: HashMap<Slot, u32>,
    queue: BTreeSet<Slot>,
}

impl RetryLedger {
    /// Queue `slot` unless it already failed `max_retries` times after its first attempt.
    pub fn record_failure(&mut self, slot: Slot, max_retries: u32) -> bool {
        let attempts = self.attempts.entry(slot.clone()).or_insert(0);
        if *attempts >= max_retries {
            self.attempts.remove(&slot);
            return false;
        }
        *attempts += 1;
        self.queue.insert(slot)
    }

    pub fn record_success(&mut self, slot: &Slot) {
        self.attempts.remove(slot);
        self.queue.remove(slot);
    }

    /// Drain the queue, keeping slots `keep` accepts. The rest are forgotten.
    pub fn take_due(&mut self, mut keep: impl FnMut(&Slot) -> bool) -> Vec<Slot> {
        let queued = std::mem::take(&mut self.queue);
        let (due, dropped): (Vec<_>, Vec<_>) = queued.into_iter().partition(|s| keep(s));
        for slot in dropped {
            self.attempts.remove(&slot);
        }
        due
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

/// Requests needed to keep `buffer_duration_secs` of material ahead of `time`.
pub fn plan_pass(session: &mut TrackSession, time: f64, config: &PlayerConfig) -> PassPlan {
    let mut plan = PassPlan {
        session: Some(session.id),
        ..PassPlan::default()
    };
    if session.ended {
        return plan;
    }

    if config.max_retries > 0 {
        let mut retry = std::mem::take(&mut session.retry);
        let due = retry.take_due(|slot| slot_is_ahead(session, slot, time));
        session.retry = retry;
        for slot in due {
            if let Some(request) = request_for(session, slot) {
                plan.requests.push(request);
            }
        }
    }

    plan_geometry(session, time, config.buffer_duration_secs, &mut plan);
    plan_textures(session, time, config.buffer_duration_secs, &mut plan);
    plan
}

fn plan_geometry(session: &mut TrackSession, time: f64, lookahead_secs: u32, plan: &mut PassPlan) {
    let manifest = session.manifest.clone();
    let Some(target) = manifest.geometry_target(&session.geometry_target) else {
        return;
    };
    let last = target.last_frame();
    let current = frame_at(time, target.frame_rate).min(last);
    plan.geometry_frame_rate = target.frame_rate;

    for i in 0..lookahead_secs {
        let high_water = session.geometry_high_water;
        if high_water >= last as i64 {
            break;
        }

        let span = (target.frame_rate * (i + 1) as f64).round() as u32;
        let end = (current + span).saturating_sub(1).min(last);
        if (end as i64) <= high_water {
            continue;
        }

        // Frames already behind the cursor are never worth fetching.
        let from = ((high_water + 1) as u32).max(current);
        for index in from..=end {
            let slot = Slot::geometry(&session.geometry_target, index);
            if let Some(request) = request_for(session, slot) {
                plan.requests.push(request);
                plan.geometry_frames += 1;
            }
        }
        session.geometry_high_water = end as i64;
    }
}

fn plan_textures(session: &mut TrackSession, time: f64, lookahead_secs: u32, plan: &mut PassPlan) {
    let manifest = session.manifest.clone();
    let channels: Vec<_> = session.channels.keys().copied().collect();

    for channel in channels {
        let Some(state) = session.channels.get(&channel) else {
            continue;
        };
        let Some(name) = state.active_target().map(str::to_string) else {
            continue;
        };
        let Some(target) = manifest.texture_target(channel, &name) else {
            continue;
        };

        let last = target.last_segment();
        let frame = frame_at(time, target.frame_rate);
        let current = target.segment_of(frame).min(last);

        for i in 0..lookahead_secs {
            let Some(state) = session.channels.get_mut(&channel) else {
                break;
            };
            let high_water = state.high_water(&name);
            if high_water >= last as i64 {
                break;
            }

            let span = (target.frame_rate * (i + 1) as f64).round() as u32;
            let end = target
                .segment_of((frame + span).saturating_sub(1))
                .min(last);
            if (end as i64) <= high_water {
                continue;
            }

            let from = ((high_water + 1) as u32).max(current);
            state.raise_high_water(&name, end);
            let tag = state.tag.clone();
            for index in from..=end {
                let slot = Slot::texture(channel, &tag, &name, index);
                if let Some(request) = request_for(session, slot) {
                    plan.requests.push(request);
                }
            }
        }
    }
}

/// Whether `slot` is at or ahead of its stream's playback cursor and still
/// belongs to a target the session plays.
fn slot_is_ahead(session: &TrackSession, slot: &Slot, time: f64) -> bool {
    match &slot.stream {
        StreamKey::Geometry(key) => {
            key.target == session.geometry_target
                && session
                    .geometry()
                    .is_some_and(|t| slot.index >= frame_at(time, t.frame_rate))
        }
        StreamKey::Texture(key) => {
            session.active_texture_target(key.channel) == Some(key.target.as_str())
                && session.texture_target(key).is_some_and(|t| {
                    slot.index >= t.segment_of(frame_at(time, t.frame_rate))
                })
        }
    }
}

/// URL, byte range and codec for one slot.
fn request_for(session: &TrackSession, slot: Slot) -> Option<FetchRequest> {
    let manifest = &session.manifest;
    let (path, range, kind) = match &slot.stream {
        StreamKey::Geometry(key) => {
            let target = manifest.geometry_target(&key.target)?;
            let vars = TemplateVars {
                target: Some(&key.target),
                ext: Some(target.format.as_ext()),
                ..Default::default()
            };
            (
                manifest.geometry_path.render(&vars, slot.index),
                byte_range(target.byte_ranges.as_deref(), slot.index),
                DecodeKind::Geometry(target.format),
            )
        }
        StreamKey::Texture(key) => {
            let target = manifest.texture_target(key.channel, &key.target)?;
            let vars = TemplateVars {
                target: Some(&key.target),
                texture_type: Some(key.channel.as_str()),
                tag: Some(&key.tag),
                ext: Some(target.format.as_ext()),
            };
            (
                manifest.texture_path.render(&vars, slot.index),
                byte_range(target.byte_ranges.as_deref(), slot.index),
                DecodeKind::Texture(target.format),
            )
        }
    };

    Some(FetchRequest {
        url: resolve_url(&session.manifest_url, &path),
        slot,
        range,
        kind,
    })
}

fn byte_range(ranges: Option<&[ByteRange]>, index: u32) -> Option<ByteRange> {
    ranges?.get(index as usize).copied()
}

pub struct Scheduler {
    fetcher: Arc<dyn Fetcher>,
    geometry_decoder: Arc<dyn GeometryDecoder>,
    texture_decoder: Arc<dyn TextureDecoder>,
    config: PlayerConfig,
}

impl Scheduler {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        geometry_decoder: Arc<dyn GeometryDecoder>,
        texture_decoder: Arc<dyn TextureDecoder>,
        config: PlayerConfig,
    ) -> Self {
        Self {
            fetcher,
            geometry_decoder,
            texture_decoder,
            config,
        }
    }

    /// Run one pass against the session in `state`.
    ///
    /// Returns `None` when there is no session, or when the session was
    /// replaced while the requests were in flight (their results are dropped).
    pub async fn run_pass(
        &self,
        state: &Shared<Option<TrackSession>>,
        lookahead: Option<LookaheadCallback>,
    ) -> Option<PassReport> {
        let plan = {
            let mut guard = state.lock();
            let session = guard.as_mut()?;
            let time = session.clock.current_time(Instant::now());
            plan_pass(session, time, &self.config)
        };
        let session_id = plan.session?;
        let play_secs = plan.play_secs();
        let geometry_frames = plan.geometry_frames;

        if !plan.requests.is_empty() {
            debug!(
                "[{}] pass: {} request(s), {} geometry frame(s)",
                session_id,
                plan.requests.len(),
                geometry_frames
            );
        }

        let requested = plan.requests.len();
        let started = Instant::now();
        let results: Vec<(Slot, Result<Payload, SlotError>)> = stream::iter(plan.requests)
            .map(|request| async move {
                let result = self.fetch_and_decode(&request).await;
                (request.slot, result)
            })
            .buffer_unordered(self.config.max_concurrent_requests.max(1))
            .collect()
            .await;
        let fetch_time = started.elapsed();

        let report = {
            let mut guard = state.lock();
            let session = match guard.as_mut() {
                Some(session) if session.id == session_id => session,
                _ => {
                    debug!(
                        "[{}] dropping {} late result(s) for a replaced session",
                        session_id,
                        results.len()
                    );
                    return None;
                }
            };

            let mut completed = 0;
            let mut failed = 0;
            for (slot, result) in results {
                match result {
                    Ok(payload) => {
                        session.retry.record_success(&slot);
                        session.buffers.insert(slot, payload);
                        completed += 1;
                    }
                    Err(e) => {
                        warn!("[{}] slot {:?} unavailable: {}", session_id, slot, e);
                        if self.config.max_retries > 0 {
                            session.retry.record_failure(slot, self.config.max_retries);
                        }
                        failed += 1;
                    }
                }
            }

            let abr = if geometry_frames > 0 {
                let decision = session.abr.record(fetch_time.as_secs_f64(), play_secs);
                if let Some(decision) = decision {
                    session.apply_abr(decision);
                }
                decision
            } else {
                None
            };

            PassReport {
                session: session_id,
                requested,
                completed,
                failed,
                fetch_time,
                abr,
            }
        };

        trace!("[{}] pass done: {:?}", session_id, report);
        if let Some(callback) = lookahead {
            callback(&report);
        }
        Some(report)
    }

    async fn fetch_and_decode(&self, request: &FetchRequest) -> Result<Payload, SlotError> {
        let bytes = self.fetcher.fetch(&request.url, request.range).await?;
        let payload = match request.kind {
            DecodeKind::Geometry(format) => Payload::Mesh(
                self.geometry_decoder
                    .decode_geometry(bytes, format, &request.url)
                    .await?,
            ),
            DecodeKind::Texture(format) => Payload::Texture(
                self.texture_decoder
                    .decode_texture(bytes, format, &request.url)
                    .await?,
            ),
        };
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::{
        buffer::GeometryStreamKey,
        codec::testing::FakeDecoder,
        fetch::mock::MemoryFetcher,
        manifest::{Manifest, TextureType, tests::MANIFEST_URL},
        session::{
            NO_HIGH_WATER,
            tests::{sample_session, session_for},
        },
    };

    /// 30 fps, 300 frames, no audio, one baseColor target with 10-frame segments.
    fn scenario_manifest() -> Manifest {
        let json = serde_json::json!({
            "geometry": {
                "path": "geo/[target]/geo_[#####].[ext]",
                "targets": {
                    "g30": { "format": "draco", "frameRate": 30, "frameCount": 300 }
                }
            },
            "texture": {
                "path": "tex/[target]/[type]/[tag]/seg_[###].[ext]",
                "baseColor": {
                    "targets": {
                        "t30": {
                            "format": "ktx2", "frameRate": 30, "sequenceSize": 10,
                            "frameCount": 300,
                            "settings": { "resolution": { "width": 256, "height": 256 } }
                        }
                    }
                }
            }
        });
        Manifest::from_json(MANIFEST_URL, &json.to_string()).unwrap()
    }

    fn geometry_indices(plan: &PassPlan) -> Vec<u32> {
        plan.requests
            .iter()
            .filter(|r| matches!(r.slot.stream, StreamKey::Geometry(_)))
            .map(|r| r.slot.index)
            .collect()
    }

    fn texture_indices(plan: &PassPlan) -> Vec<u32> {
        plan.requests
            .iter()
            .filter(|r| matches!(r.slot.stream, StreamKey::Texture(_)))
            .map(|r| r.slot.index)
            .collect()
    }

    fn scheduler(
        fetcher: Arc<MemoryFetcher>,
        decoder: Arc<FakeDecoder>,
        config: PlayerConfig,
    ) -> Scheduler {
        Scheduler::new(fetcher, decoder.clone(), decoder, config)
    }

    #[test]
    fn first_pass_requests_four_seconds_of_geometry() {
        let mut session = session_for(scenario_manifest());
        let plan = plan_pass(&mut session, 0.0, &PlayerConfig::default());

        assert_eq!(geometry_indices(&plan), (0..=119).collect::<Vec<_>>());
        assert_eq!(session.geometry_high_water, 119);
        assert_eq!(plan.geometry_frames, 120);
        assert!((plan.play_secs() - 4.0).abs() < 1e-9);

        // Segments cover frames 0..=119 → segments 0..=11.
        assert_eq!(texture_indices(&plan), (0..=11).collect::<Vec<_>>());
    }

    #[test]
    fn second_pass_at_same_time_requests_nothing() {
        let mut session = session_for(scenario_manifest());
        let config = PlayerConfig::default();
        plan_pass(&mut session, 0.0, &config);
        let again = plan_pass(&mut session, 0.0, &config);
        assert!(again.requests.is_empty());
        assert_eq!(session.geometry_high_water, 119);
    }

    #[test]
    fn later_pass_tops_up_only_new_frames() {
        let mut session = session_for(scenario_manifest());
        let config = PlayerConfig::default();
        plan_pass(&mut session, 0.0, &config);

        let plan = plan_pass(&mut session, 2.0, &config);
        assert_eq!(geometry_indices(&plan), (120..=179).collect::<Vec<_>>());
        assert_eq!(texture_indices(&plan), (12..=17).collect::<Vec<_>>());
    }

    #[test]
    fn high_water_is_monotonic_and_capped() {
        let mut session = session_for(scenario_manifest());
        let config = PlayerConfig::default();
        let mut seen = BTreeSet::new();
        let mut last_mark = NO_HIGH_WATER;

        for step in 0..25 {
            let plan = plan_pass(&mut session, step as f64 * 0.5, &config);
            for index in geometry_indices(&plan) {
                assert!(seen.insert(index), "frame {} requested twice", index);
            }
            assert!(session.geometry_high_water >= last_mark);
            last_mark = session.geometry_high_water;
        }
        assert_eq!(last_mark, 299);
        assert_eq!(seen.len(), 300);
    }

    #[test]
    fn ended_session_plans_nothing() {
        let mut session = session_for(scenario_manifest());
        session.ended = true;
        assert!(plan_pass(&mut session, 0.0, &PlayerConfig::default()).requests.is_empty());
    }

    #[test]
    fn requests_resolve_templates_against_manifest() {
        let mut session = sample_session();
        let plan = plan_pass(&mut session, 0.0, &PlayerConfig::default());
        let first_geo = plan
            .requests
            .iter()
            .find(|r| r.slot == Slot::geometry("draco_low", 7))
            .unwrap();
        assert_eq!(
            first_geo.url,
            "https://cdn.example.com/tracks/dancer/geometry/draco_low/frame_00007.drc"
        );
        assert_eq!(first_geo.range, None);

        let normal = plan
            .requests
            .iter()
            .find(|r| r.slot == Slot::texture(TextureType::Normal, "default", "ktx2_512", 2))
            .unwrap();
        assert_eq!(
            normal.url,
            "https://cdn.example.com/tracks/dancer/texture/ktx2_512/normal/default/seg_000002.ktx2"
        );
    }

    #[test]
    fn byte_ranged_targets_carry_ranges() {
        let json = serde_json::json!({
            "frameRate": 10,
            "frameData": (0..30).map(|i| serde_json::json!({
                "frameNumber": i, "keyframeNumber": i,
                "startBytePosition": i * 100, "meshLength": 100
            })).collect::<Vec<_>>()
        });
        let url = "https://cdn.example.com/v1/clip.manifest";
        let manifest = Manifest::from_json(url, &json.to_string()).unwrap();
        let mut session = session_for(manifest);
        session.manifest_url = url.into();

        let plan = plan_pass(&mut session, 0.0, &PlayerConfig::default());
        let frame_3 = plan
            .requests
            .iter()
            .find(|r| r.slot == Slot::geometry("legacy", 3))
            .unwrap();
        assert_eq!(frame_3.url, "https://cdn.example.com/v1/clip.drcs");
        assert_eq!(frame_3.range, Some(ByteRange { start: 300, length: 100 }));

        // The whole video is a single segment.
        assert_eq!(texture_indices(&plan), vec![0]);
    }

    #[test]
    fn retry_ledger_bounds_attempts() {
        let mut ledger = RetryLedger::default();
        let slot = Slot::geometry("g", 4);
        assert!(ledger.record_failure(slot.clone(), 2));
        assert_eq!(ledger.take_due(|_| true), vec![slot.clone()]);
        assert!(ledger.record_failure(slot.clone(), 2));
        assert_eq!(ledger.take_due(|_| true).len(), 1);
        assert!(!ledger.record_failure(slot.clone(), 2));
        assert_eq!(ledger.pending(), 0);
        assert!(ledger.attempts.is_empty());
    }

    #[tokio::test]
    async fn pass_fills_buffer_and_absorbs_failures() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let decoder = Arc::new(FakeDecoder::default());
        let bad_url = "https://cdn.example.com/tracks/dancer/geo/g30/geo_00005.drc";
        fetcher.fail(bad_url);

        let state: Shared<Option<TrackSession>> =
            Arc::new(Mutex::new(Some(session_for(scenario_manifest()))));
        let scheduler = scheduler(fetcher.clone(), decoder, PlayerConfig::default());

        let report = scheduler.run_pass(&state, None).await.unwrap();
        assert_eq!(report.requested, 132);
        assert_eq!(report.failed, 1);
        assert_eq!(report.completed, 131);

        let guard = state.lock();
        let session = guard.as_ref().unwrap();
        let key = GeometryStreamKey {
            target: "g30".into(),
        };
        assert!(session.buffers.geometry(&key, 4).is_some());
        assert!(session.buffers.geometry(&key, 5).is_none());
        // Passive policy: the failed slot is not queued again.
        assert_eq!(session.retry.pending(), 0);
    }

    #[tokio::test]
    async fn failed_slots_are_retried_when_enabled() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let decoder = Arc::new(FakeDecoder::default());
        let bad_url = "https://cdn.example.com/tracks/dancer/geo/g30/geo_00005.drc";
        fetcher.fail(bad_url);

        let state: Shared<Option<TrackSession>> =
            Arc::new(Mutex::new(Some(session_for(scenario_manifest()))));
        let config = PlayerConfig {
            max_retries: 1,
            ..PlayerConfig::default()
        };
        let scheduler = scheduler(fetcher.clone(), decoder, config);

        scheduler.run_pass(&state, None).await.unwrap();
        fetcher.heal(bad_url);
        let report = scheduler.run_pass(&state, None).await.unwrap();
        assert_eq!(report.requested, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(fetcher.request_count(bad_url), 2);
    }

    #[tokio::test]
    async fn decode_failure_is_absorbed() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let decoder = Arc::new(FakeDecoder::default());
        decoder
            .reject("https://cdn.example.com/tracks/dancer/tex/t30/baseColor/default/seg_003.ktx2");

        let state: Shared<Option<TrackSession>> =
            Arc::new(Mutex::new(Some(session_for(scenario_manifest()))));
        let report = scheduler(fetcher, decoder, PlayerConfig::default())
            .run_pass(&state, None)
            .await
            .unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(state.lock().as_ref().unwrap().buffers.texture_len(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn late_results_for_replaced_session_are_dropped() {
        let fetcher = Arc::new(MemoryFetcher::with_latency(Duration::from_millis(200)));
        let decoder = Arc::new(FakeDecoder::default());
        let state: Shared<Option<TrackSession>> =
            Arc::new(Mutex::new(Some(session_for(scenario_manifest()))));
        let scheduler = Arc::new(scheduler(fetcher, decoder, PlayerConfig::default()));

        let pass = {
            let scheduler = scheduler.clone();
            let state = state.clone();
            tokio::spawn(async move { scheduler.run_pass(&state, None).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        *state.lock() = Some(session_for(scenario_manifest()));

        assert!(pass.await.unwrap().is_none());
        let guard = state.lock();
        assert_eq!(guard.as_ref().unwrap().buffers.geometry_len(), 0);
    }

    fn base_color_requests(plan: &PassPlan) -> Vec<&FetchRequest> {
        plan.requests
            .iter()
            .filter(|r| match &r.slot.stream {
                StreamKey::Texture(key) => key.channel == TextureType::BaseColor,
                StreamKey::Geometry(_) => false,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn fast_passes_upgrade_base_color_one_step() {
        let fetcher = Arc::new(MemoryFetcher::with_latency(Duration::from_millis(10)));
        let decoder = Arc::new(FakeDecoder::default());
        let config = PlayerConfig {
            max_concurrent_requests: 1000,
            ..PlayerConfig::default()
        };
        let state: Shared<Option<TrackSession>> = Arc::new(Mutex::new(Some(sample_session())));
        state.lock().as_mut().unwrap().clock.play(Instant::now());
        let scheduler = scheduler(fetcher, decoder, config.clone());
        let sample_count = |state: &Shared<Option<TrackSession>>| {
            state.lock().as_ref().unwrap().abr.samples().count()
        };

        // 0.01s for 4s of geometry.
        let report = scheduler.run_pass(&state, None).await.unwrap();
        assert_eq!(report.abr, None);
        assert_eq!(sample_count(&state), 1);

        // Cursor has not moved a frame: nothing new, no sample.
        let report = scheduler.run_pass(&state, None).await.unwrap();
        assert_eq!(report.requested, 0);
        assert_eq!(report.abr, None);
        assert_eq!(sample_count(&state), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        let report = scheduler.run_pass(&state, None).await.unwrap();
        assert_eq!(report.abr, None);
        assert_eq!(sample_count(&state), 2);

        tokio::time::advance(Duration::from_secs(1)).await;
        let report = scheduler.run_pass(&state, None).await.unwrap();
        assert_eq!(report.abr, Some(AbrDecision::Upgrade));
        assert_eq!(sample_count(&state), 0);

        let mut guard = state.lock();
        let session = guard.as_mut().unwrap();
        assert_eq!(session.active_texture_target(TextureType::BaseColor), Some("ktx2_1k"));
        assert_eq!(session.active_texture_target(TextureType::Normal), Some("ktx2_512"));

        // 2.03s → frame 61 → segment 6; 4s ahead ends on frame 180 → segment 18.
        let time = session.clock.current_time(Instant::now());
        let plan = plan_pass(session, time, &config);
        let base = base_color_requests(&plan);
        let indices: Vec<u32> = base.iter().map(|r| r.slot.index).collect();
        assert_eq!(indices, (6..=18).collect::<Vec<_>>());
        assert!(base.iter().all(|r| r.url.contains("/ktx2_1k/baseColor/default/")));
        assert_eq!(
            base[0].url,
            "https://cdn.example.com/tracks/dancer/texture/ktx2_1k/baseColor/default/seg_000006.ktx2"
        );
    }

    #[tokio::test]
    async fn lookahead_callback_runs_after_first_pass() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let decoder = Arc::new(FakeDecoder::default());
        let state: Shared<Option<TrackSession>> =
            Arc::new(Mutex::new(Some(session_for(scenario_manifest()))));
        let called = Arc::new(AtomicBool::new(false));

        let flag = called.clone();
        scheduler(fetcher, decoder, PlayerConfig::default())
            .run_pass(
                &state,
                Some(Box::new(move |report: &PassReport| {
                    assert_eq!(report.failed, 0);
                    flag.store(true, Ordering::SeqCst);
                })),
            )
            .await
            .unwrap();
        assert!(called.load(Ordering::SeqCst));
    }
}
