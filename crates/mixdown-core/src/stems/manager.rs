//! Stem manager - stem lifecycle, mute/solo and per-chunk stem mixing
//!
//! # Lifecycle
//!
//! ```text
//!   update_stem_info ──► pending ──► fetching ──► decoding ──► ready ──► waveform
//!                                       │            │
//!                                       └── error ◄──┘    (silent until re-created)
//!
//!   absent from a later update ──► deleted (in-flight task discards its result)
//! ```
//!
//! Loading runs on a small named rayon pool. Each task owns an `Arc` of its
//! entry, so an entry removed from the map stays alive until the task
//! notices the `deleted` flag and returns. Tasks check that flag after every
//! blocking step and never hold a lock across fetch, decode or waveform
//! rendering.
//!
//! # Locking
//!
//! - `stems`: coarse map lock, held for insert/erase and for the duration of
//!   one render pass so a render never sees a half-applied update.
//! - `StemEntry::state`: per-entry lock for info, PCM and waveform. Held only
//!   to copy or swap fields.
//! - Readiness, deletion and error are atomics and need no lock.
//!
//! Decoded PCM is a `basedrop::Shared`, so when the mixer thread drops the
//! last reference of a removed stem the buffer is freed by the GC thread.

use super::error::StemError;
use super::mute_solo::MuteSolo;
use super::source::StemSource;
use super::waveform::{WaveformImage, WaveformRenderer};
use crate::engine::gc::gc_handle;
use crate::events::{EngineEvent, EventSender};
use crate::types::{db_to_gain, AudioChunk, StemId, StemInfo, CHUNK_SAMPLES};
use basedrop::Shared;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Scale from i16 PCM to [-1, 1)
const SHORT_TO_FLOAT: f32 = 1.0 / 32768.0;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ────────────────────────────────────────────────────────────────────────────
// StemEntry
// ────────────────────────────────────────────────────────────────────────────

struct StemState {
    info: StemInfo,
    /// Interleaved stereo, exactly `info.samples` frames once ready
    pcm: Option<Shared<Vec<i16>>>,
    waveform: Option<Arc<WaveformImage>>,
}

/// One stem, shared between the manager and its background task
struct StemEntry {
    state: Mutex<StemState>,
    ready: AtomicBool,
    deleted: AtomicBool,
    error: AtomicBool,
    /// Bumped every time a new waveform image is installed
    waveform_ordinal: AtomicU64,
    /// Most recent waveform request; older jobs drop their image
    waveform_ticket: AtomicU64,
}

impl StemEntry {
    fn new(info: StemInfo) -> Self {
        Self {
            state: Mutex::new(StemState {
                info,
                pcm: None,
                waveform: None,
            }),
            ready: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
            error: AtomicBool::new(false),
            waveform_ordinal: AtomicU64::new(0),
            waveform_ticket: AtomicU64::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, StemState> {
        lock(&self.state)
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    fn has_error(&self) -> bool {
        self.error.load(Ordering::Acquire)
    }

    /// Whether `info` refers to the same audio as this entry
    fn same_source(&self, info: &StemInfo) -> bool {
        let state = self.state();
        state.info.path == info.path && state.info.samples == info.samples
    }

    /// Apply gain/pan/offset changes. Returns true if the offset moved.
    fn update_mix_params(&self, info: &StemInfo) -> bool {
        let mut state = self.state();
        let current = &state.info;
        if current.gain_db == info.gain_db
            && current.pan == info.pan
            && current.offset == info.offset
        {
            return false;
        }

        let offset_changed = current.offset != info.offset;
        state.info.gain_db = info.gain_db;
        state.info.pan = info.pan;
        state.info.offset = info.offset;
        offset_changed
    }

    fn next_waveform_ticket(&self) -> u64 {
        self.waveform_ticket.fetch_add(1, Ordering::AcqRel) + 1
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Background work
// ────────────────────────────────────────────────────────────────────────────

/// Everything a background task needs besides its entry
struct LoaderContext {
    source: StemSource,
    renderer: Arc<dyn WaveformRenderer>,
    events: EventSender,
    track_length: AtomicU32,
}

impl LoaderContext {
    /// Fetch → decode → install → waveform
    fn load_stem(&self, entry: &StemEntry) {
        let (id, path, frames) = {
            let state = entry.state();
            (state.info.id, state.info.path.clone(), state.info.samples)
        };

        log::info!("Stem {}: downloading {:?}", id, path);
        let bytes = match self.source.fetch(&path) {
            Ok(bytes) => bytes,
            Err(e) => return self.fail(entry, id, e),
        };
        if entry.is_deleted() {
            log::debug!("Stem {}: deleted during download, discarding", id);
            return;
        }

        log::info!("Stem {}: got {} bytes, decoding", id, bytes.len());
        let pcm = match self.source.decode(&bytes, frames) {
            Ok(pcm) => pcm,
            Err(e) => return self.fail(entry, id, e),
        };
        drop(bytes);
        if entry.is_deleted() {
            log::debug!("Stem {}: deleted during decode, discarding", id);
            return;
        }

        let pcm = Shared::new(&gc_handle(), pcm);
        {
            let mut state = entry.state();
            if entry.is_deleted() {
                return;
            }
            state.pcm = Some(pcm);
        }
        entry.ready.store(true, Ordering::Release);

        log::info!("Stem {}: decoded {} frames", id, frames);
        self.events.send(EngineEvent::StemReady(id));

        let ticket = entry.next_waveform_ticket();
        self.render_waveform(entry, ticket);
    }

    fn fail(&self, entry: &StemEntry, id: StemId, error: StemError) {
        if entry.is_deleted() {
            log::debug!("Stem {}: failed after deletion ({})", id, error);
            return;
        }
        log::error!("Stem {}: {}", id, error);
        entry.error.store(true, Ordering::Release);
        self.events.send(EngineEvent::StemFailed {
            id,
            error: error.to_string(),
        });
    }

    fn render_waveform(&self, entry: &StemEntry, ticket: u64) {
        let (id, offset, pcm) = {
            let state = entry.state();
            (state.info.id, state.info.offset, state.pcm.clone())
        };
        let Some(pcm) = pcm else {
            return;
        };

        let image = self
            .renderer
            .render(offset, self.track_length.load(Ordering::Relaxed), &pcm);

        let ordinal = {
            let mut state = entry.state();
            if entry.is_deleted() || entry.waveform_ticket.load(Ordering::Acquire) != ticket {
                log::debug!("Stem {}: waveform {} superseded", id, ticket);
                return;
            }
            state.waveform = Some(Arc::new(image));
            entry.waveform_ordinal.fetch_add(1, Ordering::AcqRel) + 1
        };

        log::debug!("Stem {}: waveform #{} ready", id, ordinal);
        self.events.send(EngineEvent::WaveformUpdated { id, ordinal });
    }
}

// ────────────────────────────────────────────────────────────────────────────
// StemManager
// ────────────────────────────────────────────────────────────────────────────

/// Owns the stem set and mixes it into output chunks
pub struct StemManager {
    stems: Mutex<HashMap<StemId, Arc<StemEntry>>>,
    mute_solo: Mutex<MuteSolo>,
    ctx: Arc<LoaderContext>,
    /// Dedicated workers; `None` falls back to rayon's global pool
    pool: Option<rayon::ThreadPool>,
}

impl StemManager {
    pub fn new(
        source: StemSource,
        renderer: Arc<dyn WaveformRenderer>,
        worker_threads: usize,
        events: EventSender,
    ) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_threads.max(1))
            .thread_name(|i| format!("stem-worker-{}", i))
            .build()
            .map_err(|e| log::warn!("Stem worker pool unavailable ({}), using global pool", e))
            .ok();

        Self {
            stems: Mutex::new(HashMap::new()),
            mute_solo: Mutex::new(MuteSolo::new()),
            ctx: Arc::new(LoaderContext {
                source,
                renderer,
                events,
                track_length: AtomicU32::new(0),
            }),
            pool,
        }
    }

    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.pool {
            Some(pool) => pool.spawn(job),
            None => rayon::spawn(job),
        }
    }

    fn spawn_load(&self, entry: Arc<StemEntry>) {
        let ctx = Arc::clone(&self.ctx);
        self.spawn(move || ctx.load_stem(&entry));
    }

    /// Queue a waveform refresh for a loaded stem
    fn spawn_waveform(&self, entry: Arc<StemEntry>) {
        if !entry.is_ready() {
            // The load task renders one when it finishes
            return;
        }
        let ticket = entry.next_waveform_ticket();
        let ctx = Arc::clone(&self.ctx);
        self.spawn(move || ctx.render_waveform(&entry, ticket));
    }

    fn entry(&self, id: StemId) -> Option<Arc<StemEntry>> {
        lock(&self.stems).get(&id).cloned()
    }

    /// Replace the stem set with `infos`
    ///
    /// Stems missing from `infos` are deleted. New ids, and ids whose path or
    /// length changed (or whose previous load failed), start loading. For
    /// the rest gain, pan and offset are updated in place; an offset change
    /// also refreshes the waveform.
    pub fn update_stem_info(&self, infos: &[StemInfo]) {
        let wanted: HashSet<StemId> = infos.iter().map(|info| info.id).collect();
        let mut to_load = Vec::new();
        let mut to_redraw = Vec::new();

        {
            let mut stems = lock(&self.stems);
            stems.retain(|id, entry| {
                let keep = wanted.contains(id);
                if !keep {
                    log::debug!("Stem {}: removed", id);
                    entry.mark_deleted();
                }
                keep
            });

            for info in infos {
                match stems.get(&info.id) {
                    Some(entry) if entry.same_source(info) && !entry.has_error() => {
                        if entry.update_mix_params(info) {
                            to_redraw.push(Arc::clone(entry));
                        }
                    }
                    existing => {
                        if let Some(old) = existing {
                            old.mark_deleted();
                        }
                        let entry = Arc::new(StemEntry::new(info.clone()));
                        stems.insert(info.id, Arc::clone(&entry));
                        to_load.push(entry);
                    }
                }
            }
        }

        lock(&self.mute_solo).retain(|id| wanted.contains(&id));

        for entry in to_load {
            self.spawn_load(entry);
        }
        for entry in to_redraw {
            self.spawn_waveform(entry);
        }
    }

    /// Track length used for waveform layout; refreshes every waveform
    pub fn set_track_length(&self, samples: u32) {
        self.ctx.track_length.store(samples, Ordering::Relaxed);
        let entries: Vec<_> = lock(&self.stems).values().cloned().collect();
        for entry in entries {
            self.spawn_waveform(entry);
        }
    }

    pub fn track_length(&self) -> u32 {
        self.ctx.track_length.load(Ordering::Relaxed)
    }

    /// Mix every ready, audible stem into `chunk` (adds, never overwrites)
    pub fn render(&self, first_sample: u32, chunk: &mut AudioChunk) {
        // Lock order is stems, then mute/solo
        let stems = lock(&self.stems);
        let mute_solo = lock(&self.mute_solo);

        for (&id, entry) in stems.iter() {
            if !entry.is_ready() || entry.is_deleted() || !mute_solo.is_audible(id) {
                continue;
            }

            let (pcm, offset, gain, pan) = {
                let state = entry.state();
                let Some(pcm) = state.pcm.clone() else {
                    continue;
                };
                (
                    pcm,
                    state.info.offset,
                    db_to_gain(state.info.gain_db),
                    state.info.pan.clamp(-1.0, 1.0),
                )
            };

            let gain_l = gain * (1.0 - pan);
            let gain_r = gain * (1.0 + pan);
            let frames = (pcm.len() / 2) as i64;
            // Negative offsets start the stem later in the track
            let mut stem_sample = first_sample as i64 + offset as i64;

            for i in 0..CHUNK_SAMPLES {
                if (0..frames).contains(&stem_sample) {
                    let s = stem_sample as usize * 2;
                    chunk.left[i] += pcm[s] as f32 * SHORT_TO_FLOAT * gain_l;
                    chunk.right[i] += pcm[s + 1] as f32 * SHORT_TO_FLOAT * gain_r;
                }
                stem_sample += 1;
            }
        }
    }

    // ── Mute / solo ────────────────────────────────────────────────────────

    pub fn toggle_mute(&self, id: StemId) {
        let ids: Vec<StemId> = lock(&self.stems).keys().copied().collect();
        lock(&self.mute_solo).toggle_mute(id, ids);
    }

    pub fn toggle_solo(&self, id: StemId) {
        lock(&self.mute_solo).toggle_solo(id);
    }

    pub fn unmute_all(&self) {
        lock(&self.mute_solo).unmute_all();
    }

    pub fn stem_muted(&self, id: StemId) -> bool {
        lock(&self.mute_solo).is_muted(id)
    }

    pub fn stem_soloed(&self, id: StemId) -> bool {
        lock(&self.mute_solo).is_soloed(id)
    }

    /// Whether the stem is heard once ready, taking solo into account
    pub fn stem_audible(&self, id: StemId) -> bool {
        lock(&self.mute_solo).is_audible(id)
    }

    // ── Queries ────────────────────────────────────────────────────────────

    pub fn count_stems(&self) -> usize {
        lock(&self.stems).len()
    }

    /// Known stem ids in ascending order
    pub fn stem_ids(&self) -> Vec<StemId> {
        let mut ids: Vec<StemId> = lock(&self.stems).keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn stem_info(&self, id: StemId) -> Option<StemInfo> {
        self.entry(id).map(|entry| entry.state().info.clone())
    }

    pub fn stem_ready(&self, id: StemId) -> bool {
        self.entry(id).is_some_and(|entry| entry.is_ready())
    }

    pub fn stem_error(&self, id: StemId) -> bool {
        self.entry(id).is_some_and(|entry| entry.has_error())
    }

    /// Number of waveform images installed for the stem, 0 if unknown
    pub fn waveform_ordinal(&self, id: StemId) -> u64 {
        self.entry(id)
            .map_or(0, |entry| entry.waveform_ordinal.load(Ordering::Acquire))
    }

    /// Latest waveform image of the stem
    pub fn waveform(&self, id: StemId) -> Option<Arc<WaveformImage>> {
        self.entry(id).and_then(|entry| entry.state().waveform.clone())
    }
}

impl Drop for StemManager {
    fn drop(&mut self) {
        // In-flight tasks hold their own entry references and bail out early
        for entry in lock(&self.stems).values() {
            entry.mark_deleted();
        }
    }
}

impl std::fmt::Debug for StemEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("StemEntry")
            .field("info", &state.info)
            .field("frames", &state.pcm.as_ref().map(|pcm| pcm.len() / 2))
            .field("ready", &self.is_ready())
            .field("deleted", &self.is_deleted())
            .field("error", &self.has_error())
            .field("waveform_ordinal", &self.waveform_ordinal.load(Ordering::Relaxed))
            .finish()
    }
}

impl std::fmt::Debug for StemManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StemManager")
            .field("stems", &self.count_stems())
            .field("track_length", &self.track_length())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_channel;
    use crate::stems::error::StemResult;
    use crate::stems::source::{RawPcmDecoder, StemFetcher};
    use crate::stems::waveform::{PeakWaveformRenderer, WaveformSettings};
    use crossbeam::channel::Receiver;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    /// Serves constant-valued raw PCM; the path is "<left>,<right>"
    struct ConstFetcher {
        frames: usize,
        calls: AtomicUsize,
        gate: Option<crossbeam::channel::Receiver<()>>,
    }

    impl StemFetcher for ConstFetcher {
        fn fetch(&self, path: &str) -> StemResult<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let _ = gate.recv_timeout(Duration::from_secs(5));
            }
            let mut parts = path.split(',').map(|p| p.parse::<i16>());
            let (Some(Ok(left)), Some(Ok(right))) = (parts.next(), parts.next()) else {
                return Err(StemError::Fetch {
                    path: path.to_string(),
                    reason: "404".to_string(),
                });
            };
            Ok((0..self.frames)
                .flat_map(|_| [left.to_le_bytes(), right.to_le_bytes()])
                .flatten()
                .collect())
        }
    }

    fn manager_with(
        fetcher: ConstFetcher,
    ) -> (StemManager, Receiver<EngineEvent>) {
        let (tx, rx) = event_channel(256);
        let source = StemSource::new(Arc::new(fetcher), Arc::new(RawPcmDecoder));
        let renderer = Arc::new(PeakWaveformRenderer::new(WaveformSettings {
            width: 16,
            height: 8,
            ..WaveformSettings::default()
        }));
        (StemManager::new(source, renderer, 2, tx), rx)
    }

    fn manager(frames: usize) -> (StemManager, Receiver<EngineEvent>) {
        manager_with(ConstFetcher {
            frames,
            calls: AtomicUsize::new(0),
            gate: None,
        })
    }

    fn info(id: StemId, path: &str, samples: u32) -> StemInfo {
        StemInfo {
            id,
            path: path.to_string(),
            samples,
            offset: 0,
            gain_db: 0.0,
            pan: 0.0,
        }
    }

    fn wait_for(what: &str, condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn render(manager: &StemManager, first_sample: u32) -> AudioChunk {
        let mut chunk = AudioChunk::silence();
        manager.render(first_sample, &mut chunk);
        chunk
    }

    #[test]
    fn test_stem_loads_and_mixes() {
        let (manager, events) = manager(1000);
        manager.update_stem_info(&[info(1, "16384,-16384", 1000)]);
        wait_for("stem ready", || manager.stem_ready(1));

        let chunk = render(&manager, 0);
        assert!(chunk.left.iter().all(|&s| (s - 0.5).abs() < 1e-6));
        assert!(chunk.right.iter().all(|&s| (s + 0.5).abs() < 1e-6));

        wait_for("waveform", || manager.waveform_ordinal(1) == 1);
        assert!(manager.waveform(1).is_some());

        let received: Vec<_> = events.try_iter().collect();
        assert!(received.contains(&EngineEvent::StemReady(1)));
        assert!(received.contains(&EngineEvent::WaveformUpdated { id: 1, ordinal: 1 }));
    }

    #[test]
    fn test_debug_output_describes_entry_without_pcm() {
        let (manager, _events) = manager(256);
        manager.update_stem_info(&[info(5, "100,100", 256)]);
        wait_for("stem ready", || manager.stem_ready(5));

        let entry = lock(&manager.stems).get(&5).cloned().unwrap();
        let text = format!("{:?}", entry);
        assert!(text.contains("frames: Some(256)"), "{text}");
        assert!(text.contains("ready: true"), "{text}");
        assert_eq!(format!("{:?}", manager), "StemManager { stems: 1, track_length: 0, .. }");
    }

    #[test]
    fn test_render_accumulates() {
        let (manager, _events) = manager(500);
        manager.update_stem_info(&[info(1, "8192,8192", 500)]);
        wait_for("stem ready", || manager.stem_ready(1));

        let mut chunk = AudioChunk::silence();
        chunk.left = [0.25; CHUNK_SAMPLES];
        manager.render(0, &mut chunk);
        assert!((chunk.left[0] - 0.5).abs() < 1e-6);
        assert!((chunk.right[0] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_negative_offset_delays_stem() {
        let (manager, _events) = manager(2000);
        let mut stem = info(1, "16384,16384", 2000);
        stem.offset = -1000;
        manager.update_stem_info(&[stem]);
        wait_for("stem ready", || manager.stem_ready(1));

        // Chunk straddling sample 1000: silent before, stem after
        let chunk = render(&manager, 960);
        assert!(chunk.left[..40].iter().all(|&s| s == 0.0));
        assert!(chunk.left[40..].iter().all(|&s| (s - 0.5).abs() < 1e-6));

        // Past the end of the stem: silence again
        assert!(render(&manager, 3000).is_silent());
    }

    #[test]
    fn test_pan_extremes_silence_one_side() {
        let (manager, _events) = manager(256);
        let mut left = info(1, "10000,10000", 256);
        left.pan = -1.0;
        manager.update_stem_info(&[left.clone()]);
        wait_for("stem ready", || manager.stem_ready(1));

        let chunk = render(&manager, 0);
        assert!(chunk.right.iter().all(|&s| s == 0.0));
        assert!(chunk.left[0] > 0.0);

        left.pan = 5.0; // clamped to hard right
        manager.update_stem_info(&[left]);
        let chunk = render(&manager, 0);
        assert!(chunk.left.iter().all(|&s| s == 0.0));
        assert!(chunk.right[0] > 0.0);
    }

    #[test]
    fn test_gain_is_applied_in_place() {
        let (manager, _events) = manager(256);
        let mut stem = info(1, "16384,16384", 256);
        manager.update_stem_info(&[stem.clone()]);
        wait_for("stem ready", || manager.stem_ready(1));

        stem.gain_db = -20.0;
        manager.update_stem_info(&[stem]);
        assert!(manager.stem_ready(1), "gain change must not reload");
        let chunk = render(&manager, 0);
        assert!((chunk.left[0] - 0.05).abs() < 1e-4);
    }

    #[test]
    fn test_mute_and_solo_affect_render() {
        let (manager, _events) = manager(256);
        manager.update_stem_info(&[info(1, "8192,0", 256), info(2, "0,8192", 256)]);
        wait_for("stems ready", || manager.stem_ready(1) && manager.stem_ready(2));

        manager.toggle_mute(1);
        let chunk = render(&manager, 0);
        assert_eq!(chunk.left[0], 0.0);
        assert!(chunk.right[0] > 0.0);

        manager.toggle_solo(1);
        assert!(manager.stem_audible(1));
        assert!(!manager.stem_audible(2));
        let chunk = render(&manager, 0);
        assert!(chunk.left[0] > 0.0);
        assert_eq!(chunk.right[0], 0.0);

        manager.toggle_solo(1);
        assert!(manager.stem_muted(1), "mute restored after solo");
        manager.unmute_all();
        let chunk = render(&manager, 0);
        assert!(chunk.left[0] > 0.0 && chunk.right[0] > 0.0);
    }

    #[test]
    fn test_mute_solo_toggles_while_rendering() {
        let (manager, _events) = manager(256);
        manager.update_stem_info(&[info(1, "8192,0", 256), info(2, "0,8192", 256)]);
        wait_for("stems ready", || manager.stem_ready(1) && manager.stem_ready(2));

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..500 {
                    manager.toggle_solo(2);
                    manager.toggle_mute(1);
                }
            });
            for _ in 0..500 {
                let chunk = render(&manager, 0);
                // Each chunk sees one consistent mute/solo state
                assert!(chunk.left.iter().all(|&s| s == chunk.left[0]));
                assert!(chunk.right.iter().all(|&s| s == chunk.right[0]));
            }
        });

        // A mute toggle always leaves solo mode
        assert!(!manager.stem_soloed(2));
    }

    #[test]
    fn test_failed_stem_is_flagged_and_silent() {
        let (manager, events) = manager(256);
        manager.update_stem_info(&[info(7, "not-a-stem", 256)]);
        wait_for("stem error", || manager.stem_error(7));

        assert!(!manager.stem_ready(7));
        assert!(render(&manager, 0).is_silent());
        assert!(events
            .try_iter()
            .any(|e| matches!(e, EngineEvent::StemFailed { id: 7, .. })));
    }

    #[test]
    fn test_short_stem_is_error() {
        let (manager, _events) = manager(100);
        manager.update_stem_info(&[info(1, "1,1", 200)]);
        wait_for("stem error", || manager.stem_error(1));
    }

    #[test]
    fn test_removed_while_loading_discards_result() {
        let (release, gate) = crossbeam::channel::bounded(1);
        let (manager, events) = manager_with(ConstFetcher {
            frames: 256,
            calls: AtomicUsize::new(0),
            gate: Some(gate),
        });

        manager.update_stem_info(&[info(1, "1000,1000", 256)]);
        manager.update_stem_info(&[]);
        assert_eq!(manager.count_stems(), 0);

        release.send(()).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        assert!(render(&manager, 0).is_silent());
        assert!(!events.try_iter().any(|e| e == EngineEvent::StemReady(1)));
    }

    #[test]
    fn test_path_change_recreates_stem() {
        let (manager, _events) = manager(256);
        manager.update_stem_info(&[info(1, "1000,1000", 256)]);
        wait_for("first load", || manager.stem_ready(1));

        manager.update_stem_info(&[info(1, "2000,2000", 256)]);
        assert_eq!(manager.stem_info(1).unwrap().path, "2000,2000");
        wait_for("second load", || manager.stem_ready(1));
        let chunk = render(&manager, 0);
        assert!((chunk.left[0] - 2000.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn test_offset_and_track_length_refresh_waveform() {
        let (manager, events) = manager(256);
        let mut stem = info(1, "1000,1000", 256);
        manager.update_stem_info(&[stem.clone()]);
        wait_for("first waveform", || manager.waveform_ordinal(1) == 1);

        stem.offset = -64;
        manager.update_stem_info(&[stem]);
        wait_for("offset waveform", || manager.waveform_ordinal(1) == 2);

        manager.set_track_length(512);
        wait_for("length waveform", || manager.waveform_ordinal(1) == 3);

        let ordinals: Vec<u64> = events
            .try_iter()
            .filter_map(|e| match e {
                EngineEvent::WaveformUpdated { id: 1, ordinal } => Some(ordinal),
                _ => None,
            })
            .collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
    }

    #[test]
    fn test_absent_ids_are_removed_and_unmuted() {
        let (manager, _events) = manager(256);
        manager.update_stem_info(&[info(1, "1,1", 256), info(2, "1,1", 256)]);
        manager.toggle_mute(2);
        manager.update_stem_info(&[info(1, "1,1", 256)]);

        assert_eq!(manager.stem_ids(), vec![1]);
        assert!(!manager.stem_muted(2));
        assert_eq!(manager.waveform_ordinal(2), 0);
    }
}
