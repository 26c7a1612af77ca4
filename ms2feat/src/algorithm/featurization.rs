use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::algorithm::extraction::{extract_features, SpectrumMasses};
use crate::algorithm::preprocessing::{preprocess_spectrum, SpectrumProcessingConfig};
use crate::algorithm::utility::thread_pool;
use crate::algorithm::vocabulary::{FeatureLayout, FeatureVocabulary};
use crate::config::FeatureConfig;
use crate::data::mass::requantize;
use crate::data::spectrum::{MsMsSpectrum, SpectrumRecord};
use crate::error::{Ms2FeatError, Result, SpectrumError};

/// Ratio reported when the denominator fragment is missing, and the clip for all ratios
pub const MAX_INTENSITY_RATIO: f64 = 20.0;

/// A fixed-length vector laid out as `[fragments | neutral losses | hidden neutral losses | fragment pairs]`.
pub type FeatureVector = Vec<f64>;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturizationConfig {
    /// Factor applied to base-peak-relative intensities (default: 100, percent of base peak)
    pub intensity_scale: f64,
    /// Upper clip of fragment intensity ratios, also the value for a missing denominator (default: 20)
    pub max_ratio: f64,
    /// Run the full preprocessor before extraction; when false, peaks are only normalized
    pub clean: bool,
}

impl Default for FeaturizationConfig {
    fn default() -> Self {
        FeaturizationConfig {
            intensity_scale: 100.0,
            max_ratio: MAX_INTENSITY_RATIO,
            clean: true,
        }
    }
}

impl FeaturizationConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.intensity_scale > 0.0) {
            return Err(Ms2FeatError::Config(format!("intensity_scale must be positive, got {}", self.intensity_scale)));
        }
        if !(self.max_ratio > 0.0) {
            return Err(Ms2FeatError::Config(format!("max_ratio must be positive, got {}", self.max_ratio)));
        }
        Ok(())
    }
}

/// One featurized input record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub id: String,
    /// Percentage of intensity inside the quality m/z range
    pub quality: f64,
    pub features: FeatureVector,
}

/// Projects spectra onto a fixed vocabulary.
///
/// Holds the vocabulary by reference; vocabulary masses are converted once into bucket
/// keys at the vocabulary's featurization precision so that every lookup is an exact key
/// comparison. Vocabulary entries that were distinct when counted but share a bucket at
/// this precision keep their own columns; those columns always carry equal values and
/// equal names.
#[derive(Clone, Debug)]
pub struct Featurizer<'a> {
    vocabulary: &'a FeatureVocabulary,
    config: &'a FeatureConfig,
    preprocessing: SpectrumProcessingConfig,
    decimals: u32,
    fragment_keys: Vec<i64>,
    neutral_loss_keys: Vec<i64>,
    hidden_neutral_loss_keys: Vec<i64>,
    fragment_pair_keys: Vec<(i64, i64)>,
}

impl<'a> Featurizer<'a> {
    pub fn new(vocabulary: &'a FeatureVocabulary, config: &'a FeatureConfig) -> Self {
        let decimals = vocabulary.featurization_decimals;
        if decimals != config.featurization_decimals {
            warn!(
                vocabulary = decimals,
                config = config.featurization_decimals,
                "featurizing at the vocabulary's precision"
            );
        }
        let key = |mass: f64| vocabulary.feature_key(mass);

        let preprocessing = if config.featurization.clean {
            config.preprocessing.clone()
        } else {
            SpectrumProcessingConfig {
                take_top_n: usize::MAX,
                deisotope: false,
                relative_intensity_cutoff: 0.0,
                ..config.preprocessing.clone()
            }
        };

        Featurizer {
            vocabulary,
            config,
            preprocessing,
            decimals,
            fragment_keys: vocabulary.fragments.iter().map(|&m| key(m)).collect(),
            neutral_loss_keys: vocabulary.neutral_losses.iter().map(|&m| key(m)).collect(),
            hidden_neutral_loss_keys: vocabulary.hidden_neutral_losses.iter().map(|&m| key(m)).collect(),
            fragment_pair_keys: vocabulary.fragment_pairs.iter().map(|&(a, b)| (key(a), key(b))).collect(),
        }
    }

    pub fn vocabulary(&self) -> &FeatureVocabulary {
        self.vocabulary
    }

    pub fn layout(&self) -> FeatureLayout {
        self.vocabulary.layout()
    }

    /// Preprocess and extract one spectrum at the featurization precision.
    pub fn spectrum_masses(&self, spectrum: &MsMsSpectrum) -> SpectrumMasses {
        let cleaned = preprocess_spectrum(spectrum, &self.preprocessing);
        extract_features(&cleaned, &self.config.windows, self.decimals, self.config.featurization.intensity_scale)
    }

    /// Projects extracted masses onto the vocabulary.
    ///
    /// Fragment and neutral loss features carry the matched intensity (0 when absent),
    /// hidden neutral losses are 0/1 presence bits and fragment pairs are the clipped
    /// ratio of the two fragment intensities.
    pub fn project(&self, masses: &SpectrumMasses) -> FeatureVector {
        let lookup = |peaks: &[(i64, f64)]| {
            let mut map: HashMap<i64, f64> = HashMap::with_capacity(peaks.len());
            for &(key, intensity) in peaks {
                // first match wins
                map.entry(requantize(key, masses.decimals, self.decimals)).or_insert(intensity);
            }
            map
        };
        let fragments = lookup(&masses.fragments);
        let neutral_losses = lookup(&masses.neutral_losses);
        let hidden_neutral_losses: HashSet<i64> = masses.hidden_neutral_losses.iter()
            .map(|&key| requantize(key, masses.decimals, self.decimals))
            .collect();

        let max_ratio = self.config.featurization.max_ratio;
        let fragment_intensity = |key: &i64| fragments.get(key).copied().unwrap_or(0.0);

        let mut features = Vec::with_capacity(self.vocabulary.len());
        features.extend(self.fragment_keys.iter().map(fragment_intensity));
        features.extend(self.neutral_loss_keys.iter().map(|key| neutral_losses.get(key).copied().unwrap_or(0.0)));
        features.extend(self.hidden_neutral_loss_keys.iter().map(|key| {
            if hidden_neutral_losses.contains(key) { 1.0 } else { 0.0 }
        }));
        features.extend(self.fragment_pair_keys.iter().map(|(a, b)| {
            intensity_ratio(fragment_intensity(a), fragment_intensity(b), max_ratio)
        }));
        features
    }

    /// Feature vector of one validated spectrum.
    pub fn featurize(&self, spectrum: &MsMsSpectrum) -> FeatureVector {
        self.project(&self.spectrum_masses(spectrum))
    }

    fn featurize_record(&self, record: &SpectrumRecord) -> std::result::Result<FeatureRow, SpectrumError> {
        let spectrum = record.to_spectrum()?;
        Ok(FeatureRow {
            id: record.id.clone(),
            quality: self.config.quality.quality(&spectrum),
            features: self.featurize(&spectrum),
        })
    }

    /// Featurize a batch of records in parallel.
    ///
    /// # Returns
    /// One entry per input record, in input order. Records that fail validation yield
    /// their error and are logged; they do not abort the batch.
    pub fn featurize_records(&self, records: &[SpectrumRecord]) -> Result<Vec<std::result::Result<FeatureRow, SpectrumError>>> {
        let pool = thread_pool(self.config.num_threads)?;

        let rows: Vec<_> = pool.install(|| {
            records
                .par_iter()
                .map(|record| {
                    let row = self.featurize_record(record);
                    if let Err(e) = &row {
                        warn!(id = %record.id, "skipping spectrum: {}", e);
                    }
                    row
                })
                .collect()
        });

        let failed = rows.iter().filter(|row| row.is_err()).count();
        info!(records = records.len(), failed, features = self.vocabulary.len(), "featurization finished");
        Ok(rows)
    }
}

/// `first / second` clipped to `max_ratio`; a zero denominator yields `max_ratio`.
///
/// # Example
///
/// ```rust
/// # use ms2feat::algorithm::featurization::intensity_ratio;
/// assert_eq!(intensity_ratio(10.0, 0.0, 20.0), 20.0);
/// assert_eq!(intensity_ratio(10.0, 4.0, 20.0), 2.5);
/// assert_eq!(intensity_ratio(100.0, 1.0, 20.0), 20.0);
/// ```
pub fn intensity_ratio(first: f64, second: f64, max_ratio: f64) -> f64 {
    if second == 0.0 {
        max_ratio
    } else {
        (first / second).min(max_ratio)
    }
}

fn round_to_step(value: f64, step: f64) -> f64 {
    (value / step).round_ties_even() * step
}

/// Rounds the intensity blocks (fragments, neutral losses) to multiples of `intensity_step`
/// and the fragment pair block to multiples of `ratio_step`. Presence bits are left alone;
/// a step that is not positive leaves its blocks untouched.
pub fn quantize_features(features: &mut [f64], layout: &FeatureLayout, intensity_step: f64, ratio_step: f64) {
    if intensity_step > 0.0 {
        for i in layout.fragment_range().chain(layout.neutral_loss_range()) {
            features[i] = round_to_step(features[i], intensity_step);
        }
    }
    if ratio_step > 0.0 {
        for i in layout.fragment_pair_range() {
            features[i] = round_to_step(features[i], ratio_step);
        }
    }
}
