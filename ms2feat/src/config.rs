//! Pipeline configuration.
//!
//! Every knob the numeric core reads lives here as a named, defaulted field. A JSON file
//! may set any subset of them; missing fields keep their defaults.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::algorithm::extraction::MassWindows;
use crate::algorithm::featurization::FeaturizationConfig;
use crate::algorithm::preprocessing::SpectrumProcessingConfig;
use crate::data::spectrum::SpectrumQualityFilter;
use crate::error::{Ms2FeatError, Result};

/// Decimal places used when counting masses across a corpus.
pub const STATISTICS_DECIMALS: u32 = 2;
/// Decimal places used when projecting a spectrum onto a vocabulary.
pub const FEATURIZATION_DECIMALS: u32 = 1;
/// Decimals beyond this no longer fit comfortably into an `i64` bucket key.
const MAX_DECIMALS: u32 = 6;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub preprocessing: SpectrumProcessingConfig,
    pub windows: MassWindows,
    /// Rounding precision of the corpus statistics pass
    pub statistics_decimals: u32,
    /// Rounding precision of the featurization pass, coarser to raise vocabulary hit rate
    pub featurization_decimals: u32,
    /// Vocabulary entries need a corpus count strictly greater than this
    pub count_cutoff: i64,
    pub featurization: FeaturizationConfig,
    pub quality: SpectrumQualityFilter,
    /// Worker threads for batch jobs, 0 lets rayon decide
    pub num_threads: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        FeatureConfig {
            preprocessing: SpectrumProcessingConfig::default(),
            windows: MassWindows::default(),
            statistics_decimals: STATISTICS_DECIMALS,
            featurization_decimals: FEATURIZATION_DECIMALS,
            count_cutoff: 10,
            featurization: FeaturizationConfig::default(),
            quality: SpectrumQualityFilter::default(),
            num_threads: 0,
        }
    }
}

impl FeatureConfig {
    /// Reads a configuration from a JSON file and validates it.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: FeatureConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.preprocessing.validate()?;
        self.windows.validate()?;
        self.featurization.validate()?;

        for (name, decimals) in [
            ("statistics_decimals", self.statistics_decimals),
            ("featurization_decimals", self.featurization_decimals),
        ] {
            if decimals > MAX_DECIMALS {
                return Err(Ms2FeatError::Config(format!("{name} must be at most {MAX_DECIMALS}, got {decimals}")));
            }
        }

        if self.quality.mz_low > self.quality.mz_high {
            return Err(Ms2FeatError::Config(format!(
                "quality range is empty: {} > {}", self.quality.mz_low, self.quality.mz_high
            )));
        }
        Ok(())
    }
}
