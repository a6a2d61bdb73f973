//! Codec parameters - everything derived from the HRIR set
//!
//! Rebuilt off the audio thread whenever the HRIR source, the max-rE
//! weighting or the input normalization changes, then published as one
//! immutable handle.

use std::sync::Arc;

use nalgebra::Matrix2;
use num_complex::Complex32;
use serde::{Deserialize, Serialize};

use crate::binaural::{
    HrirLoader, HrirSet, HrirSource, HrtfFilterbank, JsonHrirLoader, NearestDirectionTable,
    default_hrir_set, diffuse_field_covariance,
};
use crate::error::CropacResult;
use crate::hoa::{AmbisonicFormat, DecodeMatrix, NUM_SH_SIGNALS};

/// Settings that require a codec rebuild when changed
///
/// A [`HrirSource::Custom`] set is not part of the serialized form; it is
/// saved as the built-in source and has to be handed over again after loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Where the HRIRs come from
    pub hrir_source: HrirSource,
    /// Apply max-rE order weighting to the decode matrix
    pub max_re: bool,
    /// Input channel ordering and normalization
    pub format: AmbisonicFormat,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            hrir_source: HrirSource::Default,
            max_re: true,
            format: AmbisonicFormat::default(),
        }
    }
}

/// Shape of the HRIR set in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HrirInfo {
    pub num_directions: usize,
    pub length: usize,
    pub sample_rate: u32,
}

/// Immutable codec state read by the audio path
#[derive(Debug)]
pub struct CodecParameters {
    generation: u64,
    config: CodecConfig,
    decode_matrix: DecodeMatrix,
    hrir_set: Option<Arc<HrirSet>>,
    hrir_info: HrirInfo,
    hrtf: HrtfFilterbank,
    direction_table: NearestDirectionTable,
    diffuse: Vec<Matrix2<Complex32>>,
    input_gains: [f32; NUM_SH_SIGNALS],
}

impl CodecParameters {
    /// Build every table for `band_freqs` at the host `sample_rate`
    ///
    /// Personalized files are read through `loader`, or the JSON loader when
    /// none is given.
    pub fn build(
        config: &CodecConfig,
        band_freqs: &[f32],
        sample_rate: u32,
        loader: Option<&dyn HrirLoader>,
        generation: u64,
    ) -> CropacResult<Self> {
        let input_gains = config.format.sn3d_gains()?;

        let (set, personalized) = match &config.hrir_source {
            HrirSource::Default => (Arc::new(default_hrir_set(sample_rate)), false),
            HrirSource::File(path) => {
                let set = match loader {
                    Some(loader) => loader.load(path)?,
                    None => JsonHrirLoader.load(path)?,
                };
                (Arc::new(set), true)
            }
            HrirSource::Custom(set) => {
                set.validate()?;
                (Arc::clone(set), true)
            }
        };

        let hrtf = HrtfFilterbank::from_hrirs(&set, band_freqs)?;
        let decode_matrix = DecodeMatrix::build(&hrtf, config.max_re)?;
        let direction_table = NearestDirectionTable::new(&hrtf);
        let diffuse = diffuse_field_covariance(&hrtf);

        let hrir_info = HrirInfo {
            num_directions: set.num_directions(),
            length: set.length(),
            sample_rate: set.sample_rate(),
        };

        log::debug!(
            "codec generation {generation}: {} HRIR directions, {} bands, max-rE {}",
            hrir_info.num_directions,
            band_freqs.len(),
            config.max_re
        );

        Ok(Self {
            generation,
            config: config.clone(),
            decode_matrix,
            hrir_set: personalized.then_some(set),
            hrir_info,
            hrtf,
            direction_table,
            diffuse,
            input_gains,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    pub fn decode_matrix(&self) -> &DecodeMatrix {
        &self.decode_matrix
    }

    /// Personalized HRIR set, `None` for the built-in one
    pub fn hrir_set(&self) -> Option<&HrirSet> {
        self.hrir_set.as_deref()
    }

    pub fn hrir_info(&self) -> HrirInfo {
        self.hrir_info
    }

    /// Per-direction interaural delays in seconds
    pub fn interaural_delays(&self) -> &[f32] {
        self.hrtf.itds()
    }

    pub fn hrtf(&self) -> &HrtfFilterbank {
        &self.hrtf
    }

    pub fn direction_table(&self) -> &NearestDirectionTable {
        &self.direction_table
    }

    /// Diffuse-field binaural covariance of one band
    pub fn diffuse_covariance(&self, band: usize) -> &Matrix2<Complex32> {
        &self.diffuse[band]
    }

    /// Per-channel gains converting the input format to SN3D
    pub fn input_gains(&self) -> &[f32; NUM_SH_SIGNALS] {
        &self.input_gains
    }

    pub fn num_bands(&self) -> usize {
        self.decode_matrix.num_bands()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binaural::HrirPair;
    use crate::error::CropacError;
    use crate::hoa::{ChannelOrdering, Normalization};
    use std::path::PathBuf;

    fn freqs() -> Vec<f32> {
        (0..17).map(|k| k as f32 * 1500.0).collect()
    }

    #[test]
    fn test_default_build() {
        let codec = CodecParameters::build(&CodecConfig::default(), &freqs(), 48000, None, 3).unwrap();
        assert_eq!(codec.generation(), 3);
        assert_eq!(codec.num_bands(), 17);
        assert!(codec.hrir_set().is_none());
        assert_eq!(codec.hrir_info().num_directions, 170);
        assert_eq!(codec.interaural_delays().len(), 170);
        assert_eq!(codec.input_gains(), &[1.0; 4]);
    }

    #[test]
    fn test_custom_set() {
        let set = HrirSet {
            sample_rate: 44100,
            directions: vec![[90.0, 0.0], [270.0, 0.0], [0.0, 0.0], [180.0, 0.0]],
            hrirs: vec![
                HrirPair::new(vec![1.0, 0.0, 0.0, 0.0], vec![0.0, 0.0, 0.5, 0.0]),
                HrirPair::new(vec![0.0, 0.0, 0.5, 0.0], vec![1.0, 0.0, 0.0, 0.0]),
                HrirPair::new(vec![1.0, 0.0, 0.0, 0.0], vec![1.0, 0.0, 0.0, 0.0]),
                HrirPair::new(vec![0.0, 0.7, 0.0, 0.0], vec![0.0, 0.7, 0.0, 0.0]),
            ],
        };
        let config = CodecConfig {
            hrir_source: HrirSource::Custom(Arc::new(set)),
            ..Default::default()
        };
        let codec = CodecParameters::build(&config, &freqs(), 48000, None, 1).unwrap();
        assert_eq!(codec.hrir_set().map(|s| s.num_directions()), Some(4));
        assert_eq!(codec.hrir_info().sample_rate, 44100);
        assert!(codec.interaural_delays()[0] < 0.0);
    }

    #[test]
    fn test_config_serialization() {
        let set = HrirSet {
            sample_rate: 48000,
            directions: vec![[0.0, 0.0]],
            hrirs: vec![HrirPair::new(vec![1.0], vec![1.0])],
        };
        let config = CodecConfig {
            hrir_source: HrirSource::Custom(Arc::new(set)),
            max_re: false,
            format: AmbisonicFormat::n3d_acn(),
        };
        let json = serde_json::to_string(&config).unwrap();
        let restored: CodecConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.hrir_source, HrirSource::Default);
        assert!(!restored.max_re);
        assert_eq!(restored.format, config.format);

        let file = CodecConfig {
            hrir_source: HrirSource::File(PathBuf::from("/data/subject.json")),
            ..Default::default()
        };
        let json = serde_json::to_string(&file).unwrap();
        assert_eq!(serde_json::from_str::<CodecConfig>(&json).unwrap(), file);
    }

    #[test]
    fn test_errors() {
        let missing = CodecConfig {
            hrir_source: HrirSource::File(PathBuf::from("/nonexistent/subject.json")),
            ..Default::default()
        };
        let err = CodecParameters::build(&missing, &freqs(), 48000, None, 1).unwrap_err();
        assert!(err.is_recoverable());

        let fuma = CodecConfig {
            format: AmbisonicFormat {
                normalization: Normalization::SN3D,
                ordering: ChannelOrdering::FuMa,
            },
            ..Default::default()
        };
        let err = CodecParameters::build(&fuma, &freqs(), 48000, None, 1).unwrap_err();
        assert!(matches!(err, CropacError::UnsupportedOrdering(_)));
    }
}
