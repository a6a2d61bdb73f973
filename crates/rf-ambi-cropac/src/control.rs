//! Control surface handed to the host alongside the processor
//!
//! Parameter changes that only affect the audio path go straight into
//! [`UserParameters`]. Changes to the HRIR source, the max-rE weighting or
//! the input format also request a codec rebuild.

use std::path::PathBuf;
use std::sync::Arc;

use crate::binaural::{HrirSet, HrirSource};
use crate::codec::CodecConfig;
use crate::error::CropacResult;
use crate::hoa::AmbisonicFormat;
use crate::initializer::{CodecInitializer, CodecState, CodecStatus, RebuildWorker};
use crate::params::UserParameters;

/// Host-side handle of an [`AmbiCropac`](crate::AmbiCropac)
pub struct CropacControl {
    params: Arc<UserParameters>,
    initializer: Arc<CodecInitializer>,
    worker: Option<RebuildWorker>,
    host_sample_rate: u32,
    delay_samples: usize,
}

impl CropacControl {
    pub(crate) fn new(
        params: Arc<UserParameters>,
        initializer: Arc<CodecInitializer>,
        host_sample_rate: u32,
        delay_samples: usize,
        background: bool,
    ) -> CropacResult<Self> {
        let worker = if background {
            Some(initializer.spawn_worker()?)
        } else {
            None
        };
        let control = Self {
            params,
            initializer,
            worker,
            host_sample_rate,
            delay_samples,
        };

        control.initializer.request_rebuild(control.params.codec_config());
        if control.worker.is_none() {
            match control.initializer.run_pending() {
                // the built-in set has been published instead
                Err(err) if err.is_recoverable() => {
                    log::warn!("initial HRIR load failed: {err}");
                }
                Err(err) => return Err(err),
                Ok(_) => {}
            }
        }
        Ok(control)
    }

    /// Shared parameters for per-band and rotation controls
    pub fn params(&self) -> &Arc<UserParameters> {
        &self.params
    }

    /// Request a rebuild unless the codec already matches the parameters
    fn sync_codec(&self) -> CropacResult<()> {
        let config = self.params.codec_config();
        if self.codec_matches(&config) {
            return Ok(());
        }
        self.rebuild(config)
    }

    /// A pending request or, failing that, the published codec is built
    /// from `config`
    fn codec_matches(&self, config: &CodecConfig) -> bool {
        if self.initializer.state() != CodecState::Idle {
            return self.initializer.config() == *config;
        }
        self.initializer
            .store()
            .current()
            .is_some_and(|codec| codec.config() == config)
    }

    fn rebuild(&self, config: CodecConfig) -> CropacResult<()> {
        self.initializer.request_rebuild(config);
        self.run_inline()
    }

    fn run_inline(&self) -> CropacResult<()> {
        if self.worker.is_none() {
            self.initializer.run_pending()?;
        }
        Ok(())
    }

    pub fn set_max_re(&self, enabled: bool) -> CropacResult<()> {
        self.params.set_max_re(enabled);
        self.sync_codec()
    }

    pub fn set_use_default_hrirs(&self, use_default: bool) -> CropacResult<()> {
        self.params.set_use_default_hrirs(use_default);
        self.sync_codec()
    }

    /// Load a personalized HRIR set from `path` and switch to it
    ///
    /// Always reloads, so calling it again after fixing a file that failed
    /// to load retries with the same path.
    pub fn set_hrir_path(&self, path: impl Into<PathBuf>) -> CropacResult<()> {
        self.params
            .set_personalized_source(HrirSource::File(path.into()));
        self.params.set_use_default_hrirs(false);
        self.rebuild(self.params.codec_config())
    }

    /// Switch to an in-memory personalized HRIR set
    pub fn set_hrir_set(&self, set: HrirSet) -> CropacResult<()> {
        set.validate()?;
        self.params
            .set_personalized_source(HrirSource::Custom(Arc::new(set)));
        self.params.set_use_default_hrirs(false);
        self.rebuild(self.params.codec_config())
    }

    /// Change the input format; anything but ACN with SN3D or N3D is rejected
    pub fn set_format(&self, format: AmbisonicFormat) -> CropacResult<()> {
        self.params.set_format(format)?;
        self.sync_codec()
    }

    /// Rebuild the codec with the current parameters
    pub fn reinitialize(&self) -> CropacResult<u64> {
        let generation = self.initializer.request_rebuild(self.params.codec_config());
        self.run_inline()?;
        Ok(generation)
    }

    /// Run a pending rebuild on the calling thread (no-op with a worker)
    pub fn run_pending(&self) -> CropacResult<bool> {
        if self.worker.is_some() {
            return Ok(false);
        }
        self.initializer.run_pending()
    }

    pub fn state(&self) -> CodecState {
        self.initializer.state()
    }

    pub fn status(&self) -> CodecStatus {
        self.initializer.status()
    }

    pub fn is_ready(&self) -> bool {
        self.initializer.is_ready()
    }

    /// Number of HRIR directions of the published codec
    pub fn hrir_num_directions(&self) -> Option<usize> {
        self.initializer
            .store()
            .current()
            .map(|c| c.hrir_info().num_directions)
    }

    /// HRIR length in samples of the published codec
    pub fn hrir_length(&self) -> Option<usize> {
        self.initializer.store().current().map(|c| c.hrir_info().length)
    }

    /// Sample rate of the HRIR set of the published codec
    pub fn hrir_sample_rate(&self) -> Option<u32> {
        self.initializer
            .store()
            .current()
            .map(|c| c.hrir_info().sample_rate)
    }

    pub fn host_sample_rate(&self) -> u32 {
        self.host_sample_rate
    }

    /// Processing delay in samples
    pub fn processing_delay(&self) -> usize {
        self.delay_samples
    }

    /// File of the personalized HRIR set, if one is selected
    pub fn hrir_path(&self) -> Option<PathBuf> {
        self.params.personalized_source().path().map(PathBuf::from)
    }

    pub fn has_worker(&self) -> bool {
        self.worker.as_ref().is_some_and(RebuildWorker::is_running)
    }

    /// Stop the background rebuild thread; later rebuilds run inline
    pub fn stop_worker(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
    }
}
