//! Ambisonic input format - normalization and channel ordering

use serde::{Deserialize, Serialize};

use super::{NUM_SH_SIGNALS, acn_order};
use crate::error::{CropacError, CropacResult};

/// Normalization scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Normalization {
    /// SN3D (Schmidt semi-normalized) - AmbiX standard
    SN3D,
    /// N3D (fully normalized)
    N3D,
    /// FuMa (Furse-Malham) - legacy
    FuMa,
}

impl Normalization {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Normalization::SN3D => 0,
            Normalization::N3D => 1,
            Normalization::FuMa => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Normalization::N3D,
            2 => Normalization::FuMa,
            _ => Normalization::SN3D,
        }
    }
}

/// Channel ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelOrdering {
    /// ACN (Ambisonic Channel Number) - AmbiX standard
    ACN,
    /// FuMa ordering (W, X, Y, Z) - legacy
    FuMa,
}

impl ChannelOrdering {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            ChannelOrdering::ACN => 0,
            ChannelOrdering::FuMa => 1,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => ChannelOrdering::FuMa,
            _ => ChannelOrdering::ACN,
        }
    }
}

/// Input format of the first-order signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AmbisonicFormat {
    /// Normalization scheme
    pub normalization: Normalization,
    /// Channel ordering
    pub ordering: ChannelOrdering,
}

impl AmbisonicFormat {
    /// AmbiX format (ACN + SN3D)
    pub fn ambix() -> Self {
        Self {
            normalization: Normalization::SN3D,
            ordering: ChannelOrdering::ACN,
        }
    }

    /// N3D + ACN (common in research)
    pub fn n3d_acn() -> Self {
        Self {
            normalization: Normalization::N3D,
            ordering: ChannelOrdering::ACN,
        }
    }

    /// Only ACN ordering with N3D or SN3D normalization is decodable
    pub fn validate(&self) -> CropacResult<()> {
        if self.ordering != ChannelOrdering::ACN {
            return Err(CropacError::UnsupportedOrdering(self.ordering));
        }
        match self.normalization {
            Normalization::SN3D | Normalization::N3D => Ok(()),
            other => Err(CropacError::UnsupportedNormalization(other)),
        }
    }

    /// Per-channel gains that bring this format to ACN/SN3D
    ///
    /// N3D carries an extra `sqrt(2n + 1)` per order, so first-order channels
    /// are scaled by `1/sqrt(3)`.
    pub fn sn3d_gains(&self) -> CropacResult<[f32; NUM_SH_SIGNALS]> {
        self.validate()?;
        let mut gains = [1.0; NUM_SH_SIGNALS];
        if self.normalization == Normalization::N3D {
            for (acn, gain) in gains.iter_mut().enumerate() {
                let n = acn_order(acn) as f32;
                *gain = 1.0 / (2.0 * n + 1.0).sqrt();
            }
        }
        Ok(gains)
    }
}

impl Default for AmbisonicFormat {
    fn default() -> Self {
        Self::ambix()
    }
}
