//! HRIR data and its frequency-domain form
//!
//! - HRIR sets: built-in synthetic spherical head or personalized data
//! - Loading personalized sets through [`HrirLoader`]
//! - Per-band HRTF coefficients with ITD-based phase
//! - Direction lookup and diffuse-field covariance tables

mod hrtf;

pub use hrtf::{
    DEFAULT_HRIR_LENGTH, HrtfFilterbank, NearestDirectionTable, default_hrir_set,
    diffuse_field_covariance, estimate_itd,
};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CropacError, CropacResult};
use crate::position::Position3D;

/// HRIR (Head-Related Impulse Response) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HrirPair {
    /// Left ear impulse response
    pub left: Vec<f32>,
    /// Right ear impulse response
    pub right: Vec<f32>,
}

impl HrirPair {
    /// Create new HRIR pair
    pub fn new(left: Vec<f32>, right: Vec<f32>) -> Self {
        Self { left, right }
    }

    /// Get filter length
    pub fn length(&self) -> usize {
        self.left.len().max(self.right.len())
    }

    /// Impulse response of one ear (0 = left, 1 = right)
    pub fn ear(&self, ear: usize) -> &[f32] {
        if ear == 0 { &self.left } else { &self.right }
    }
}

/// A complete set of measured (or synthesized) HRIRs
///
/// Directions are `[azimuth, elevation]` in degrees, ambisonic convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HrirSet {
    /// Sample rate of the impulse responses
    pub sample_rate: u32,
    /// Measurement directions, 1:1 with `hrirs`
    pub directions: Vec<[f32; 2]>,
    /// Impulse response pairs
    pub hrirs: Vec<HrirPair>,
}

impl HrirSet {
    /// Reject empty, ragged or non-finite data
    pub fn validate(&self) -> CropacResult<()> {
        if self.sample_rate == 0 {
            return Err(CropacError::InvalidHrirData("sample rate is zero".into()));
        }
        if self.hrirs.is_empty() {
            return Err(CropacError::InvalidHrirData("no HRIR directions".into()));
        }
        if self.directions.len() != self.hrirs.len() {
            return Err(CropacError::InvalidHrirData(format!(
                "{} directions for {} HRIRs",
                self.directions.len(),
                self.hrirs.len()
            )));
        }

        let length = self.hrirs[0].left.len();
        if length == 0 {
            return Err(CropacError::InvalidHrirData("empty impulse response".into()));
        }

        for (i, pair) in self.hrirs.iter().enumerate() {
            if pair.left.len() != length || pair.right.len() != length {
                return Err(CropacError::InvalidHrirData(format!(
                    "direction {i} has length {}/{}, expected {length}",
                    pair.left.len(),
                    pair.right.len()
                )));
            }
            if !pair.left.iter().chain(&pair.right).all(|s| s.is_finite()) {
                return Err(CropacError::InvalidHrirData(format!(
                    "direction {i} contains non-finite samples"
                )));
            }
        }

        if !self.directions.iter().flatten().all(|a| a.is_finite()) {
            return Err(CropacError::InvalidHrirData("non-finite direction".into()));
        }

        Ok(())
    }

    pub fn num_directions(&self) -> usize {
        self.hrirs.len()
    }

    /// Impulse response length in samples
    pub fn length(&self) -> usize {
        self.hrirs.first().map(|p| p.length()).unwrap_or(0)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Unit vector of a measurement direction
    pub fn direction(&self, index: usize) -> Position3D {
        let [az, el] = self.directions[index];
        Position3D::from_spherical(az, el, 1.0)
    }

    pub fn hrir(&self, index: usize) -> &HrirPair {
        &self.hrirs[index]
    }
}

/// Loads a personalized HRIR set from storage
pub trait HrirLoader: Send + Sync {
    fn load(&self, path: &Path) -> CropacResult<HrirSet>;
}

/// Reads the JSON interchange form of [`HrirSet`]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonHrirLoader;

impl HrirLoader for JsonHrirLoader {
    fn load(&self, path: &Path) -> CropacResult<HrirSet> {
        if !path.exists() {
            return Err(CropacError::HrirFileNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let set: HrirSet = serde_json::from_str(&text)?;
        set.validate()?;
        Ok(set)
    }
}

/// Where the codec takes its HRIRs from
///
/// In-memory sets are not persisted: `Custom` serializes as `Default`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "SavedHrirSource", into = "SavedHrirSource")]
pub enum HrirSource {
    /// Built-in synthetic set
    #[default]
    Default,
    /// Personalized set read through the configured loader
    File(PathBuf),
    /// Personalized set supplied in memory
    Custom(Arc<HrirSet>),
}

/// Serialized form of [`HrirSource`]
#[derive(Serialize, Deserialize)]
#[serde(rename = "HrirSource")]
enum SavedHrirSource {
    Default,
    File(PathBuf),
}

impl From<HrirSource> for SavedHrirSource {
    fn from(source: HrirSource) -> Self {
        match source {
            HrirSource::File(path) => SavedHrirSource::File(path),
            HrirSource::Default | HrirSource::Custom(_) => SavedHrirSource::Default,
        }
    }
}

impl From<SavedHrirSource> for HrirSource {
    fn from(source: SavedHrirSource) -> Self {
        match source {
            SavedHrirSource::Default => HrirSource::Default,
            SavedHrirSource::File(path) => HrirSource::File(path),
        }
    }
}

impl HrirSource {
    pub fn is_default(&self) -> bool {
        matches!(self, HrirSource::Default)
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            HrirSource::File(path) => Some(path),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_set() -> HrirSet {
        HrirSet {
            sample_rate: 48000,
            directions: vec![[0.0, 0.0], [90.0, 0.0]],
            hrirs: vec![
                HrirPair::new(vec![1.0, 0.0, 0.0], vec![1.0, 0.0, 0.0]),
                HrirPair::new(vec![1.0, 0.5, 0.0], vec![0.0, 0.2, 0.1]),
            ],
        }
    }

    #[test]
    fn test_validate() {
        assert!(tiny_set().validate().is_ok());

        let mut ragged = tiny_set();
        ragged.hrirs[1].right.pop();
        assert!(matches!(ragged.validate(), Err(CropacError::InvalidHrirData(_))));

        let mut nan = tiny_set();
        nan.hrirs[0].left[1] = f32::NAN;
        assert!(nan.validate().is_err());

        let mut empty = tiny_set();
        empty.hrirs.clear();
        empty.directions.clear();
        assert!(empty.validate().is_err());

        let mut mismatched = tiny_set();
        mismatched.directions.pop();
        assert!(mismatched.validate().is_err());
    }

    #[test]
    fn test_accessors() {
        let set = tiny_set();
        assert_eq!(set.num_directions(), 2);
        assert_eq!(set.length(), 3);
        assert_eq!(set.sample_rate(), 48000);
        assert!((set.direction(1).y - 1.0).abs() < 1e-6);
        assert_eq!(set.hrir(1).ear(1), &[0.0, 0.2, 0.1]);
    }

    #[test]
    fn test_json_loader() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("rf_ambi_cropac_hrir_{}.json", std::process::id()));
        std::fs::write(&path, serde_json::to_string(&tiny_set()).unwrap()).unwrap();

        let loaded = JsonHrirLoader.load(&path).unwrap();
        assert_eq!(loaded, tiny_set());

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            JsonHrirLoader.load(&path),
            Err(CropacError::ParseError(_))
        ));
        std::fs::remove_file(&path).unwrap();

        let missing = dir.join("rf_ambi_cropac_missing_hrir.json");
        assert!(matches!(
            JsonHrirLoader.load(&missing),
            Err(CropacError::HrirFileNotFound(_))
        ));
    }

    #[test]
    fn test_source() {
        assert!(HrirSource::default().is_default());
        let source = HrirSource::File(PathBuf::from("/tmp/subject.json"));
        assert_eq!(source.path(), Some(Path::new("/tmp/subject.json")));
    }

    #[test]
    fn test_source_serialization() {
        let file = HrirSource::File(PathBuf::from("/tmp/subject.json"));
        let json = serde_json::to_string(&file).unwrap();
        assert_eq!(serde_json::from_str::<HrirSource>(&json).unwrap(), file);

        let custom = HrirSource::Custom(Arc::new(tiny_set()));
        let json = serde_json::to_string(&custom).unwrap();
        assert_eq!(json, serde_json::to_string(&HrirSource::Default).unwrap());
        assert!(serde_json::from_str::<HrirSource>(&json).unwrap().is_default());
    }
}
