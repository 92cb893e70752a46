//! Mixer - transport, per-chunk mixdown pipeline and the mixer thread
//!
//! # Threads
//!
//! ```text
//!   control thread ──► Mixer setters ──┐            ┌──► events() (host polls)
//!                                      ▼            │
//!                          ┌───────────────────────────┐
//!                          │  mixer thread             │
//!                          │  loop { render_chunk      │──push──► AudioBuffer ──pop──► audio callback
//!                          │         push (may wait) } │
//!                          └───────────────────────────┘
//! ```
//!
//! # Per-chunk pipeline (under the pipeline lock)
//!
//! 1. Playing: mix stems at the current position, advance by one chunk, add
//!    metronome clicks.
//! 2. Paused → Playing: quadratic fade-in over the chunk.
//!    Playing → Paused: render the previous chunk's content again and fade
//!    it out, so pausing never truncates a waveform. The position stays put.
//! 3. Stopped: reset the peak meter.
//! 4. Peak meter, then limiter.
//! 5. Publish the advanced position with compare-and-swap. A seek that
//!    landed while the chunk was rendered wins and the advance is dropped.
//! 6. At or past the track length, stop (position 0). Chunks already queued
//!    still drain to the output.
//!
//! The pipeline lock is never held across `AudioBuffer::push`, so a control
//! call waits at most one chunk of processing.

use super::audio_buffer::{AudioBuffer, PushOutcome};
use super::limiter::{Limiter, LimiterParams};
use super::metronome::{Metronome, MetronomeParams};
use super::peak_meter::PeakMeter;
use super::tempo::{Tempo, TempoError};
use crate::config::EngineConfig;
use crate::events::{event_channel, EngineEvent, EventSender};
use crate::stems::{PeakWaveformRenderer, StemManager, StemSource, WaveformImage, WaveformRenderer};
use crate::types::{
    AtomicF64, AudioChunk, PlaybackState, SongPosition, StemId, StemInfo, TempoTag, CHUNK_SAMPLES,
    MIN_DB, SAMPLE_RATE,
};
use crossbeam::channel::Receiver;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// Chunks between two underflow checks on the mixer thread
const UNDERFLOW_CHECK_INTERVAL: u32 = 1000;

/// State owned by the pipeline, touched only under the pipeline lock
struct Pipeline {
    /// Transport state the previous chunk was rendered in
    last_state: PlaybackState,
    metronome: Metronome,
    peak_meter: PeakMeter,
    limiter: Limiter,
}

/// Everything shared between the control surface and the mixer thread
struct MixerCore {
    state: AtomicU8,
    position: AtomicU32,
    track_length: AtomicU32,
    running: AtomicBool,

    // Telemetry, written once per chunk
    left_db: AtomicF64,
    right_db: AtomicF64,
    reduction_db: AtomicF64,

    tempo: Tempo,
    stems: StemManager,
    metronome: MetronomeParams,
    limiter: LimiterParams,

    buffer: Arc<AudioBuffer>,
    pipeline: Mutex<Pipeline>,
    events: EventSender,
}

impl MixerCore {
    fn pipeline(&self) -> MutexGuard<'_, Pipeline> {
        self.pipeline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PlaybackState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Store `next` unless the position moved away from `read` meanwhile
    fn publish_position(&self, read: u32, next: u32) -> bool {
        if read == next {
            return true;
        }
        match self
            .position
            .compare_exchange(read, next, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(current) => {
                log::debug!("Seek to {} during mixdown, dropping advance to {}", current, next);
                false
            }
        }
    }

    /// Mix the stems and metronome for the chunk starting at `position`
    fn render_content(&self, pipeline: &mut Pipeline, position: u32, chunk: &mut AudioChunk) {
        self.stems.render(position, chunk);
        if self.metronome.enabled() {
            let gain_db = self.metronome.gain_db();
            self.tempo
                .with_map(|map| pipeline.metronome.process(map, position, gain_db, chunk));
        }
    }

    fn render_chunk(&self) -> AudioChunk {
        let mut chunk = AudioChunk::silence();
        let mut pipeline = self.pipeline();
        let state = self.state();
        let position = self.position.load(Ordering::Acquire);
        let mut next = position;

        match (pipeline.last_state, state) {
            (last, PlaybackState::Playing) => {
                self.render_content(&mut pipeline, position, &mut chunk);
                next = position.saturating_add(CHUNK_SAMPLES as u32);
                if last == PlaybackState::Paused {
                    chunk.apply_gain_with(|i| {
                        let t = i as f32 / CHUNK_SAMPLES as f32;
                        t * t
                    });
                }
            }
            (PlaybackState::Playing, PlaybackState::Paused) => {
                // Repeat the chunk that was playing when the pause landed
                let previous = position.saturating_sub(CHUNK_SAMPLES as u32);
                self.render_content(&mut pipeline, previous, &mut chunk);
                chunk.apply_gain_with(|i| {
                    let t = 1.0 - i as f32 / CHUNK_SAMPLES as f32;
                    t * t
                });
            }
            (_, PlaybackState::Stopped) => {
                pipeline.peak_meter.reset();
                pipeline.metronome.reset();
            }
            _ => {}
        }

        pipeline.peak_meter.process(&chunk);
        pipeline.limiter.apply(&self.limiter, &mut chunk);

        self.publish_position(position, next);

        self.left_db.store(pipeline.peak_meter.left_db());
        self.right_db.store(pipeline.peak_meter.right_db());
        self.reduction_db.store(pipeline.limiter.reduction_db());

        pipeline.last_state = state;

        if state == PlaybackState::Playing
            && self.position.load(Ordering::Acquire) >= self.track_length.load(Ordering::Relaxed)
        {
            log::info!("End of track reached, stopping");
            self.set_state(PlaybackState::Stopped);
            self.position.store(0, Ordering::Release);
            self.events.send(EngineEvent::PlaybackStopped);
            self.events.send(EngineEvent::StateChanged);
        }

        chunk
    }

    /// Mixer thread body
    fn run(&self) {
        log::info!("Mixer thread started");
        let mut last_underflows = self.buffer.underflow_count();
        let mut countdown = UNDERFLOW_CHECK_INTERVAL;

        while self.running.load(Ordering::Acquire) {
            let chunk = self.render_chunk();
            match self.buffer.push(&chunk) {
                PushOutcome::Written => {}
                PushOutcome::Discarded => log::debug!("Buffer cleared while waiting, chunk dropped"),
                PushOutcome::Closed => break,
            }

            countdown -= 1;
            if countdown == 0 {
                countdown = UNDERFLOW_CHECK_INTERVAL;
                let underflows = self.buffer.underflow_count();
                if underflows > last_underflows {
                    log::warn!(
                        "Can't keep up! Buffer underflowed {} time(s)",
                        underflows - last_underflows
                    );
                    last_underflows = underflows;
                }
            }
        }

        log::info!("Mixer thread stopped");
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Mixer
// ═══════════════════════════════════════════════════════════════════════════════

/// The engine's control surface
///
/// Owns the mixer thread. Every method is callable from any thread; setters
/// post [`EngineEvent::StateChanged`] after they take effect.
pub struct Mixer {
    core: Arc<MixerCore>,
    events: Receiver<EngineEvent>,
    worker: Option<JoinHandle<()>>,
}

impl Mixer {
    /// Engine reading stems from the filesystem, decoded with symphonia
    pub fn new(config: &EngineConfig) -> Self {
        let source = StemSource::files(config.stems.base_dir.clone());
        let renderer = Arc::new(PeakWaveformRenderer::new(config.waveform.clone()));
        Self::with_collaborators(config, source, renderer)
    }

    /// Engine with host-supplied fetch/decode and waveform collaborators
    pub fn with_collaborators(
        config: &EngineConfig,
        source: StemSource,
        renderer: Arc<dyn WaveformRenderer>,
    ) -> Self {
        let mut mixer = Self::manual(config, source, renderer);
        let core = Arc::clone(&mixer.core);
        let worker = thread::Builder::new()
            .name("mixer".to_string())
            .spawn(move || core.run())
            .expect("Failed to spawn mixer thread");
        mixer.worker = Some(worker);
        mixer
    }

    /// Engine without a mixer thread
    ///
    /// The caller produces audio by calling [`render_chunk`](Self::render_chunk)
    /// itself, e.g. for offline tests. The audio buffer is left unused.
    pub fn manual(
        config: &EngineConfig,
        source: StemSource,
        renderer: Arc<dyn WaveformRenderer>,
    ) -> Self {
        let (events_tx, events) = event_channel(config.event_capacity);
        let source = source.with_retries(config.stems.download_retries, config.stems.retry_delay());
        let stems = StemManager::new(
            source,
            renderer,
            config.stems.worker_threads,
            events_tx.clone(),
        );

        let core = MixerCore {
            state: AtomicU8::new(PlaybackState::Stopped as u8),
            position: AtomicU32::new(0),
            track_length: AtomicU32::new(0),
            running: AtomicBool::new(true),
            left_db: AtomicF64::new(MIN_DB),
            right_db: AtomicF64::new(MIN_DB),
            reduction_db: AtomicF64::new(0.0),
            tempo: Tempo::new(),
            stems,
            metronome: MetronomeParams::new(config.metronome.enabled, config.metronome.gain_db),
            limiter: LimiterParams::new(config.limiter),
            buffer: Arc::new(AudioBuffer::new(config.buffer_samples)),
            pipeline: Mutex::new(Pipeline {
                last_state: PlaybackState::Stopped,
                metronome: Metronome::new(),
                peak_meter: PeakMeter::new(),
                limiter: Limiter::new(),
            }),
            events: events_tx,
        };

        Self {
            core: Arc::new(core),
            events,
            worker: None,
        }
    }

    /// Run the pipeline once and return the chunk
    ///
    /// Only for engines built with [`manual`](Self::manual); with a mixer
    /// thread running this would make two producers.
    pub fn render_chunk(&self) -> AudioChunk {
        debug_assert!(self.worker.is_none(), "render_chunk with a running mixer thread");
        self.core.render_chunk()
    }

    fn notify(&self) {
        self.core.events.send(EngineEvent::StateChanged);
    }

    /// Output queue for the host audio callback
    pub fn buffer(&self) -> Arc<AudioBuffer> {
        Arc::clone(&self.core.buffer)
    }

    /// Engine notifications; drain at the host's own cadence
    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.events
    }

    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────────────────

    pub fn play(&self) {
        let pipeline = self.core.pipeline();
        self.core.set_state(PlaybackState::Playing);
        drop(pipeline);
        self.notify();
    }

    pub fn pause(&self) {
        let pipeline = self.core.pipeline();
        self.core.set_state(PlaybackState::Paused);
        drop(pipeline);
        self.notify();
    }

    /// Stop, rewind to 0 and drop everything queued for output
    pub fn stop(&self) {
        let pipeline = self.core.pipeline();
        self.core.set_state(PlaybackState::Stopped);
        self.core.position.store(0, Ordering::Release);
        self.core.buffer.clear();
        drop(pipeline);
        self.notify();
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.core.state()
    }

    pub fn reset_playback(&self) {
        self.core.position.store(0, Ordering::Release);
        self.notify();
    }

    /// Seek. Refused (returns false) while stopped.
    ///
    /// Does not wait for the pipeline, so a seek issued while a chunk is
    /// being rendered overrides that chunk's advance.
    pub fn set_playback_position(&self, position: u32) -> bool {
        if self.core.state() == PlaybackState::Stopped {
            return false;
        }
        self.core.position.swap(position, Ordering::AcqRel);

        // stop() stores its state before rewinding, so a stop that raced
        // past the check above is always visible here
        if self.core.state() == PlaybackState::Stopped {
            let _ = self.core.position.compare_exchange(
                position,
                0,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            return false;
        }

        self.notify();
        true
    }

    pub fn playback_position(&self) -> u32 {
        self.core.position.load(Ordering::Acquire)
    }

    /// Bar/step/tick of the current position
    pub fn playback_position_bst(&self) -> SongPosition {
        self.core.tempo.current_position(self.playback_position())
    }

    /// Playback stops once the position reaches this many samples
    pub fn set_track_length(&self, samples: u32) {
        self.core.track_length.store(samples, Ordering::Relaxed);
        self.core.stems.set_track_length(samples);
        self.notify();
    }

    pub fn track_length(&self) -> u32 {
        self.core.track_length.load(Ordering::Relaxed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tempo
    // ─────────────────────────────────────────────────────────────────────────

    pub fn set_stable_bpm(&self, bpm: f64, time_signature: u32) -> Result<(), TempoError> {
        self.core.tempo.set_stable_bpm(bpm, time_signature)?;
        self.notify();
        Ok(())
    }

    pub fn set_varying_bpm(&self, tags: Vec<TempoTag>) -> Result<(), TempoError> {
        self.core.tempo.set_varying_bpm(tags)?;
        self.notify();
        Ok(())
    }

    pub fn bpm_stable(&self) -> bool {
        self.core.tempo.bpm_stable()
    }

    pub fn bpm_varying(&self) -> bool {
        self.core.tempo.bpm_varying()
    }

    /// First sample of `bar`
    pub fn bar_sample(&self, bar: u32) -> u32 {
        self.core.tempo.bar_sample(bar)
    }

    /// BPM at the current position
    pub fn track_bpm(&self) -> f64 {
        self.core.tempo.current_bpm(self.playback_position())
    }

    /// Time signature numerator at the current position
    pub fn track_time_signature(&self) -> u32 {
        self.core
            .tempo
            .current_time_signature(self.playback_position())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stems
    // ─────────────────────────────────────────────────────────────────────────

    /// Replace the stem set; ids not in `infos` are removed
    pub fn update_stem_info(&self, infos: &[StemInfo]) {
        self.core.stems.update_stem_info(infos);
        self.notify();
    }

    pub fn toggle_mute(&self, id: StemId) {
        self.core.stems.toggle_mute(id);
        self.notify();
    }

    pub fn toggle_solo(&self, id: StemId) {
        self.core.stems.toggle_solo(id);
        self.notify();
    }

    pub fn unmute_all(&self) {
        self.core.stems.unmute_all();
        self.notify();
    }

    pub fn stem_muted(&self, id: StemId) -> bool {
        self.core.stems.stem_muted(id)
    }

    pub fn stem_soloed(&self, id: StemId) -> bool {
        self.core.stems.stem_soloed(id)
    }

    pub fn stem_audible(&self, id: StemId) -> bool {
        self.core.stems.stem_audible(id)
    }

    pub fn stem_ready(&self, id: StemId) -> bool {
        self.core.stems.stem_ready(id)
    }

    pub fn stem_error(&self, id: StemId) -> bool {
        self.core.stems.stem_error(id)
    }

    pub fn count_stems(&self) -> usize {
        self.core.stems.count_stems()
    }

    pub fn waveform_ordinal(&self, id: StemId) -> u64 {
        self.core.stems.waveform_ordinal(id)
    }

    pub fn waveform(&self, id: StemId) -> Option<Arc<WaveformImage>> {
        self.core.stems.waveform(id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metronome
    // ─────────────────────────────────────────────────────────────────────────

    pub fn set_metronome_enabled(&self, enabled: bool) {
        self.core.metronome.set_enabled(enabled);
        self.notify();
    }

    /// Returns the new enabled state
    pub fn toggle_metronome(&self) -> bool {
        let enabled = self.core.metronome.toggle();
        self.notify();
        enabled
    }

    pub fn metronome_enabled(&self) -> bool {
        self.core.metronome.enabled()
    }

    pub fn set_metronome_gain_db(&self, gain_db: f32) {
        self.core.metronome.set_gain_db(gain_db);
        self.notify();
    }

    pub fn metronome_gain_db(&self) -> f32 {
        self.core.metronome.gain_db()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Limiter and meters
    // ─────────────────────────────────────────────────────────────────────────

    pub fn set_limiter_attack_ms(&self, value: f64) {
        self.core.limiter.set_attack_ms(value);
        self.notify();
    }

    pub fn limiter_attack_ms(&self) -> f64 {
        self.core.limiter.attack_ms()
    }

    pub fn set_limiter_release_ms(&self, value: f64) {
        self.core.limiter.set_release_ms(value);
        self.notify();
    }

    pub fn limiter_release_ms(&self) -> f64 {
        self.core.limiter.release_ms()
    }

    pub fn set_limiter_knee_db(&self, value: f64) {
        self.core.limiter.set_knee_db(value);
        self.notify();
    }

    pub fn limiter_knee_db(&self) -> f64 {
        self.core.limiter.knee_db()
    }

    pub fn set_limiter_ratio(&self, value: f64) {
        self.core.limiter.set_ratio(value);
        self.notify();
    }

    pub fn limiter_ratio(&self) -> f64 {
        self.core.limiter.ratio()
    }

    pub fn set_limiter_threshold_db(&self, value: f64) {
        self.core.limiter.set_threshold_db(value);
        self.notify();
    }

    pub fn limiter_threshold_db(&self) -> f64 {
        self.core.limiter.threshold_db()
    }

    /// Current gain reduction, 0 or negative
    pub fn limiter_reduction_db(&self) -> f64 {
        self.core.reduction_db.load()
    }

    /// True-peak level of the left output channel
    pub fn left_channel_out_db(&self) -> f64 {
        self.core.left_db.load()
    }

    pub fn right_channel_out_db(&self) -> f64 {
        self.core.right_db.load()
    }
}

impl Drop for Mixer {
    fn drop(&mut self) {
        self.core.running.store(false, Ordering::Release);
        // Wakes the mixer thread if it is waiting for buffer space
        self.core.buffer.close();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Mixer thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for Mixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mixer")
            .field("state", &self.playback_state())
            .field("position", &self.playback_position())
            .field("track_length", &self.track_length())
            .field("threaded", &self.worker.is_some())
            .finish_non_exhaustive()
    }
}
