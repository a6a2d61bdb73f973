//! Codec (re)initialization
//!
//! `Idle → RebuildRequested` on [`CodecInitializer::request_rebuild`],
//! `RebuildRequested → RebuildInProgress` when a rebuild is picked up, and
//! back to `Idle` once the result is published or has failed. Every request
//! bumps a generation counter; a build finishing after a newer request was
//! made is dropped, so only the latest configuration is ever published.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;

use crate::binaural::{HrirLoader, HrirSource, JsonHrirLoader};
use crate::codec::{CodecConfig, CodecParameters};
use crate::error::{CropacError, CropacResult, ErrorKind};
use crate::store::CodecStore;

/// Rebuild state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecState {
    Idle,
    RebuildRequested,
    RebuildInProgress,
}

/// Snapshot for hosts and UIs
#[derive(Debug, Clone, PartialEq)]
pub struct CodecStatus {
    pub state: CodecState,
    /// Generation of the most recent request
    pub requested_generation: u64,
    /// Generation of the codec the audio path will use
    pub published_generation: u64,
    /// Message and class of the last failed rebuild
    pub last_error: Option<(ErrorKind, String)>,
    /// A codec has been published
    pub ready: bool,
}

struct Inner {
    state: CodecState,
    requested: u64,
    config: CodecConfig,
    last_error: Option<(ErrorKind, String)>,
}

/// Builds codec parameters and publishes them to a [`CodecStore`]
pub struct CodecInitializer {
    inner: Mutex<Inner>,
    store: Arc<CodecStore>,
    band_freqs: Vec<f32>,
    sample_rate: u32,
    loader: Box<dyn HrirLoader>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl CodecInitializer {
    pub fn new(
        store: Arc<CodecStore>,
        config: CodecConfig,
        band_freqs: Vec<f32>,
        sample_rate: u32,
    ) -> Self {
        Self::with_loader(store, config, band_freqs, sample_rate, Box::new(JsonHrirLoader))
    }

    pub fn with_loader(
        store: Arc<CodecStore>,
        config: CodecConfig,
        band_freqs: Vec<f32>,
        sample_rate: u32,
        loader: Box<dyn HrirLoader>,
    ) -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            inner: Mutex::new(Inner {
                state: CodecState::Idle,
                requested: 0,
                config,
                last_error: None,
            }),
            store,
            band_freqs,
            sample_rate,
            loader,
            wake_tx,
            wake_rx,
        }
    }

    /// Ask for a rebuild with `config`, returns the request's generation
    pub fn request_rebuild(&self, config: CodecConfig) -> u64 {
        let generation = {
            let mut inner = self.inner.lock();
            inner.requested += 1;
            inner.config = config;
            inner.state = CodecState::RebuildRequested;
            inner.requested
        };
        // a pending wake-up already covers this request
        let _ = self.wake_tx.try_send(());
        generation
    }

    /// Ask for a rebuild of the current configuration
    pub fn request_reinit(&self) -> u64 {
        let config = self.inner.lock().config.clone();
        self.request_rebuild(config)
    }

    /// Configuration of the latest request
    pub fn config(&self) -> CodecConfig {
        self.inner.lock().config.clone()
    }

    /// Run a requested rebuild on the calling thread
    ///
    /// Returns `Ok(true)` if a codec was published, `Ok(false)` if there was
    /// nothing to do or the result was superseded.
    pub fn run_pending(&self) -> CropacResult<bool> {
        let (generation, config) = {
            let mut inner = self.inner.lock();
            if inner.state != CodecState::RebuildRequested {
                return Ok(false);
            }
            inner.state = CodecState::RebuildInProgress;
            (inner.requested, inner.config.clone())
        };

        let span = tracing::debug_span!("codec_rebuild", generation);
        let _enter = span.enter();

        match self.build(&config, generation) {
            Ok(params) => Ok(self.finish(generation, params)),
            Err(err) => self.fail(generation, config, err),
        }
    }

    fn build(&self, config: &CodecConfig, generation: u64) -> CropacResult<CodecParameters> {
        CodecParameters::build(
            config,
            &self.band_freqs,
            self.sample_rate,
            Some(self.loader.as_ref()),
            generation,
        )
    }

    fn finish(&self, generation: u64, params: CodecParameters) -> bool {
        let mut inner = self.inner.lock();
        if generation != inner.requested || generation <= self.store.published_generation() {
            log::debug!(
                "discarding stale codec generation {generation} (latest request {})",
                inner.requested
            );
            return false;
        }
        self.store.publish(Arc::new(params));
        inner.state = CodecState::Idle;
        inner.last_error = None;
        log::info!("published codec generation {generation}");
        true
    }

    fn fail(&self, generation: u64, config: CodecConfig, err: CropacError) -> CropacResult<bool> {
        if generation != self.inner.lock().requested {
            log::debug!("ignoring failure of stale codec generation {generation}: {err}");
            return Ok(false);
        }
        log::warn!("codec rebuild {generation} failed: {err}");

        // nothing to fall back on: use the built-in HRIRs
        if err.is_recoverable() && !self.store.is_ready() && !config.hrir_source.is_default() {
            let fallback = CodecConfig {
                hrir_source: HrirSource::Default,
                ..config
            };
            if let Ok(params) = self.build(&fallback, generation) {
                log::info!("falling back to the built-in HRIR set");
                self.finish(generation, params);
            }
        }

        let mut inner = self.inner.lock();
        if generation == inner.requested {
            inner.state = CodecState::Idle;
            inner.last_error = Some((err.kind(), err.to_string()));
        }
        Err(err)
    }

    pub fn state(&self) -> CodecState {
        self.inner.lock().state
    }

    pub fn status(&self) -> CodecStatus {
        let inner = self.inner.lock();
        CodecStatus {
            state: inner.state,
            requested_generation: inner.requested,
            published_generation: self.store.published_generation(),
            last_error: inner.last_error.clone(),
            ready: self.store.is_ready(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.store.is_ready()
    }

    pub fn store(&self) -> &Arc<CodecStore> {
        &self.store
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Start a background thread that runs rebuilds as they are requested
    pub fn spawn_worker(self: &Arc<Self>) -> CropacResult<RebuildWorker> {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let initializer = Arc::clone(self);
        let wake = self.wake_rx.clone();

        let handle = thread::Builder::new()
            .name("rf-ambi-cropac-rebuild".into())
            .spawn(move || {
                while thread_running.load(Ordering::Relaxed) {
                    match wake.recv_timeout(Duration::from_millis(100)) {
                        Ok(()) => {
                            // failures are recorded in the status
                            let _ = initializer.run_pending();
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::info!("codec rebuild worker exiting");
            })
            .map_err(|e| CropacError::WorkerError(e.to_string()))?;

        log::info!("codec rebuild worker started");
        Ok(RebuildWorker {
            running,
            wake: self.wake_tx.clone(),
            handle: Some(handle),
        })
    }
}

/// Handle of the background rebuild thread; stops and joins on drop
pub struct RebuildWorker {
    running: Arc<AtomicBool>,
    wake: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl RebuildWorker {
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.wake.try_send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for RebuildWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
