//! Fragment, neutral loss and hidden neutral loss extraction.
//!
//! Works on a [`CleanedSpectrum`] and produces rounded, deduplicated mass collections in
//! one of two modes:
//!
//! * statistics mode ([`extract_statistics`]): masses only, plus every pair of distinct
//!   fragments, used to count occurrences over a corpus.
//! * featurization mode ([`extract_features`]): fragment and neutral loss masses carry the
//!   highest intensity that fell into their bucket, hidden neutral losses are presence only.
//!
//! All windows are open intervals.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::algorithm::preprocessing::CleanedSpectrum;
use crate::data::mass::{dequantize, quantize};
use crate::error::{Ms2FeatError, Result};

/// Mass windows for fragments, neutral losses and hidden neutral losses.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MassWindows {
    pub frag_low: f64,
    pub frag_high: f64,
    pub nl_low: f64,
    pub nl_high: f64,
    pub hnl_low: f64,
    pub hnl_high: f64,
}

impl Default for MassWindows {
    fn default() -> Self {
        MassWindows {
            frag_low: 50.0,
            frag_high: 350.0,
            nl_low: 30.0,
            nl_high: 350.0,
            hnl_low: 30.0,
            hnl_high: 350.0,
        }
    }
}

impl MassWindows {
    pub fn validate(&self) -> Result<()> {
        for (name, low, high) in [
            ("fragment", self.frag_low, self.frag_high),
            ("neutral loss", self.nl_low, self.nl_high),
            ("hidden neutral loss", self.hnl_low, self.hnl_high),
        ] {
            if !(low < high) {
                return Err(Ms2FeatError::Config(format!("{name} window is empty: ({low}, {high})")));
            }
        }
        Ok(())
    }

    /// Upper fragment bound for one spectrum, clamped below the precursor.
    pub fn fragment_high(&self, cleaned: &CleanedSpectrum) -> f64 {
        self.frag_high.min(cleaned.fragment_mz_limit)
    }
}

/// Statistics-mode output of one spectrum. Every collection is sorted and unique;
/// masses are bucket keys at `decimals` decimal places.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MassStatistics {
    pub decimals: u32,
    pub fragments: Vec<i64>,
    pub neutral_losses: Vec<i64>,
    pub hidden_neutral_losses: Vec<i64>,
    pub fragment_pairs: Vec<(i64, i64)>,
}

impl MassStatistics {
    pub fn fragment_masses(&self) -> Vec<f64> {
        self.fragments.iter().map(|&k| dequantize(k, self.decimals)).collect()
    }

    pub fn neutral_loss_masses(&self) -> Vec<f64> {
        self.neutral_losses.iter().map(|&k| dequantize(k, self.decimals)).collect()
    }

    pub fn hidden_neutral_loss_masses(&self) -> Vec<f64> {
        self.hidden_neutral_losses.iter().map(|&k| dequantize(k, self.decimals)).collect()
    }
}

/// Featurization-mode output of one spectrum, sorted by mass bucket.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpectrumMasses {
    pub decimals: u32,
    /// (bucket, highest intensity in the bucket)
    pub fragments: Vec<(i64, f64)>,
    /// (bucket, highest intensity of the peaks producing the loss)
    pub neutral_losses: Vec<(i64, f64)>,
    pub hidden_neutral_losses: Vec<i64>,
}

/// Peaks inside the fragment window, as (m/z, intensity).
pub fn fragment_candidates<'a>(
    cleaned: &'a CleanedSpectrum,
    windows: &MassWindows,
) -> impl Iterator<Item = (f64, f64)> + 'a {
    let low = windows.frag_low;
    let high = windows.fragment_high(cleaned);

    cleaned.mz.iter()
        .zip(cleaned.intensity.iter())
        .filter(move |(&mz, _)| low < mz && mz < high)
        .map(|(&mz, &intensity)| (mz, intensity))
}

/// Precursor minus peak mass for every peak whose loss lies in the neutral loss window,
/// paired with the intensity of that peak.
pub fn neutral_loss_candidates<'a>(
    cleaned: &'a CleanedSpectrum,
    windows: &MassWindows,
) -> impl Iterator<Item = (f64, f64)> + 'a {
    let (low, high) = (windows.nl_low, windows.nl_high);
    let precursor_mz = cleaned.precursor_mz;

    cleaned.mz.iter()
        .zip(cleaned.intensity.iter())
        .map(move |(&mz, &intensity)| (precursor_mz - mz, intensity))
        .filter(move |&(loss, _)| low < loss && loss < high)
}

/// Mass differences `mz[j] - mz[i]` for all `i < j` that fall inside `(low, high)`.
///
/// `mz` must be sorted ascending. Quadratic in the number of peaks, which the top-N
/// selection keeps small.
///
/// # Example
///
/// ```rust
/// # use ms2feat::algorithm::extraction::pairwise_differences;
/// let diffs = pairwise_differences(&[100.0, 150.0, 250.0], 30.0, 300.0);
/// assert_eq!(diffs, vec![50.0, 150.0, 100.0]);
/// ```
pub fn pairwise_differences(mz: &[f64], low: f64, high: f64) -> Vec<f64> {
    let n = mz.len();
    let mut differences = Vec::with_capacity(n * n.saturating_sub(1) / 2);

    for i in 0..n {
        for j in (i + 1)..n {
            let difference = mz[j] - mz[i];
            if difference >= high {
                break;
            }
            if low < difference {
                differences.push(difference);
            }
        }
    }
    differences
}

fn unique_buckets(values: impl Iterator<Item = f64>, decimals: u32) -> Vec<i64> {
    values
        .map(|value| quantize(value, decimals))
        .collect::<BTreeSet<i64>>()
        .into_iter()
        .collect()
}

fn max_intensity_buckets(peaks: impl Iterator<Item = (f64, f64)>, decimals: u32) -> Vec<(i64, f64)> {
    let mut buckets: BTreeMap<i64, f64> = BTreeMap::new();
    for (mass, intensity) in peaks {
        let entry = buckets.entry(quantize(mass, decimals)).or_insert(intensity);
        *entry = entry.max(intensity);
    }
    buckets.into_iter().collect()
}

/// Statistics-mode extraction of one cleaned spectrum.
///
/// # Arguments
/// * `cleaned` - output of the preprocessor
/// * `windows` - fragment, neutral loss and hidden neutral loss windows
/// * `decimals` - rounding precision of the mass buckets
pub fn extract_statistics(cleaned: &CleanedSpectrum, windows: &MassWindows, decimals: u32) -> MassStatistics {
    let fragments = unique_buckets(fragment_candidates(cleaned, windows).map(|(mz, _)| mz), decimals);
    let neutral_losses = unique_buckets(neutral_loss_candidates(cleaned, windows).map(|(loss, _)| loss), decimals);
    let hidden_neutral_losses = unique_buckets(
        pairwise_differences(&cleaned.mz, windows.hnl_low, windows.hnl_high).into_iter(),
        decimals,
    );

    // pairs over the deduplicated fragments, never over raw peaks
    let fragment_pairs: Vec<(i64, i64)> = fragments.iter().copied().tuple_combinations().collect();

    MassStatistics { decimals, fragments, neutral_losses, hidden_neutral_losses, fragment_pairs }
}

/// Featurization-mode extraction of one cleaned spectrum.
///
/// Intensities are multiplied by `intensity_scale`, the base peak of the cleaned spectrum
/// therefore reports `intensity_scale`.
pub fn extract_features(
    cleaned: &CleanedSpectrum,
    windows: &MassWindows,
    decimals: u32,
    intensity_scale: f64,
) -> SpectrumMasses {
    let scaled = |(mass, intensity): (f64, f64)| (mass, intensity * intensity_scale);

    let fragments = max_intensity_buckets(fragment_candidates(cleaned, windows).map(scaled), decimals);
    let neutral_losses = max_intensity_buckets(neutral_loss_candidates(cleaned, windows).map(scaled), decimals);
    let hidden_neutral_losses = unique_buckets(
        pairwise_differences(&cleaned.mz, windows.hnl_low, windows.hnl_high).into_iter(),
        decimals,
    );

    SpectrumMasses { decimals, fragments, neutral_losses, hidden_neutral_losses }
}
