//! ReelForge Parametric Ambisonic Decoder
//!
//! Real-time first-order Ambisonics to binaural, using cross-pattern
//! coherence (CroPaC) analysis and covariance-domain mixing:
//!
//! ## Input
//! - Four-channel B-format, ACN ordering
//! - SN3D or N3D normalization (FuMa is rejected)
//! - Sound-field rotation (yaw/pitch/roll, either order, per-axis flips)
//!
//! ## Analysis
//! - STFT filterbank behind a swappable [`TimeFrequencyTransform`]
//! - Recursively averaged spherical-harmonic covariance per band
//! - Direction from active intensity, coherence from the cross-pattern
//!   product of the omni and directional beams
//!
//! ## Synthesis
//! - Linear HRTF decode with optional max-rE weighting
//! - Target binaural covariance from direct and diffuse parts
//! - Optimal mixing matrix per band (Vilkamo et al.)
//! - Per-band EQ, direct/diffuse balance and linear/parametric balance
//!
//! ## HRIRs
//! - Built-in spherical-head set
//! - Personalized sets from JSON or any [`HrirLoader`]
//! - Rebuilt off the audio thread and published without blocking it
//!
//! The audio thread owns an [`AmbiCropac`]; everything else goes through
//! the [`CropacControl`] returned with it.

pub mod binaural;
pub mod codec;
pub mod control;
pub mod cropac;
pub mod filterbank;
pub mod hoa;
pub mod initializer;
pub mod mixer;
pub mod params;
pub mod processor;
pub mod store;
pub mod subband;

mod error;
mod position;

pub use binaural::{HrirLoader, HrirPair, HrirSet, HrirSource, JsonHrirLoader};
pub use codec::{CodecConfig, CodecParameters, HrirInfo};
pub use control::CropacControl;
pub use cropac::{BandEstimate, CoherenceEstimator, CropacAnalyzer, CrossPatternCoherence};
pub use error::{CropacError, CropacResult, ErrorKind};
pub use filterbank::{FilterbankAdapter, StftConfig, StftTransform, TimeFrequencyTransform};
pub use hoa::{AmbisonicFormat, ChannelOrdering, Normalization, RotationOrder, RotationParams};
pub use initializer::{CodecState, CodecStatus};
pub use mixer::{CovarianceMixer, POST_GAIN_DB};
pub use params::UserParameters;
pub use position::{Position3D, SphericalCoord};
pub use processor::{AmbiCropac, EngineConfig};
pub use subband::SubbandFrame;

/// Binaural output channels
pub const NUM_EARS: usize = 2;
