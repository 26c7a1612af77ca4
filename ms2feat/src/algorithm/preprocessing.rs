use std::cmp::Reverse;

use ordered_float::OrderedFloat;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::algorithm::utility::thread_pool;
use crate::data::spectrum::MsMsSpectrum;
use crate::error::{Ms2FeatError, Result};

/// Mass spacing of the 13C isotope peak for singly charged ions
pub const ISOTOPE_MASS_DIFF: f64 = 1.00335;

/// Configuration for spectrum preprocessing
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumProcessingConfig {
    /// Maximum number of peaks to keep after filtering (default: 50)
    pub take_top_n: usize,
    /// Whether to perform deisotoping (default: true)
    pub deisotope: bool,
    /// Expected isotope spacing in m/z (default: 1.00335)
    pub isotope_mass_diff: f64,
    /// Absolute m/z tolerance for matching an isotope peak (default: 0.01)
    pub deisotope_tolerance: f64,
    /// Peaks at or below this fraction of the base peak are dropped (default: 0.05)
    pub relative_intensity_cutoff: f64,
    /// Fragments must sit at least this far below the precursor m/z (default: 1.5)
    pub precursor_exclusion: f64,
}

impl Default for SpectrumProcessingConfig {
    fn default() -> Self {
        SpectrumProcessingConfig {
            take_top_n: 50,
            deisotope: true,
            isotope_mass_diff: ISOTOPE_MASS_DIFF,
            deisotope_tolerance: 0.01,
            relative_intensity_cutoff: 0.05,
            precursor_exclusion: 1.5,
        }
    }
}

impl SpectrumProcessingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.take_top_n == 0 {
            return Err(Ms2FeatError::Config("take_top_n must be at least 1".to_string()));
        }
        if !(0.0..1.0).contains(&self.relative_intensity_cutoff) {
            return Err(Ms2FeatError::Config(format!(
                "relative_intensity_cutoff must be in [0, 1), got {}", self.relative_intensity_cutoff
            )));
        }
        if self.deisotope_tolerance < 0.0 {
            return Err(Ms2FeatError::Config(format!(
                "deisotope_tolerance must not be negative, got {}", self.deisotope_tolerance
            )));
        }
        Ok(())
    }
}

/// Peaks that survived deisotoping, intensity cutoff and top-N selection.
///
/// Intensities are relative to the base peak (the base peak is 1.0) and peaks are sorted
/// by ascending m/z. May be empty.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CleanedSpectrum {
    pub mz: Vec<f64>,
    pub intensity: Vec<f64>,
    pub precursor_mz: f64,
    /// Fragments must lie below this m/z, keeps precursor-adjacent peaks out of the fragment window
    pub fragment_mz_limit: f64,
}

impl CleanedSpectrum {
    pub fn len(&self) -> usize {
        self.mz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mz.is_empty()
    }
}

/// Remove isotope satellites from a spectrum.
///
/// A peak is dropped when some earlier peak lies `isotope_mass_diff` below it within
/// `tolerance`. Only earlier peaks are looked at, and they are looked at whether or not
/// they were kept themselves, so a whole isotope ladder collapses onto its first peak.
///
/// # Arguments
/// * `mz` - m/z values (must be sorted in ascending order)
/// * `intensity` - intensity values corresponding to m/z
/// * `isotope_mass_diff` - expected spacing between isotope peaks
/// * `tolerance` - absolute m/z tolerance
///
/// # Returns
/// Tuple of (filtered_mz, filtered_intensity) with isotope peaks removed
pub fn deisotope_spectrum(
    mz: &[f64],
    intensity: &[f64],
    isotope_mass_diff: f64,
    tolerance: f64,
) -> (Vec<f64>, Vec<f64>) {
    let n = mz.len();
    let mut filtered_mz = Vec::with_capacity(n);
    let mut filtered_intensity = Vec::with_capacity(n);

    for i in 0..n {
        let mut is_isotope = false;

        // walk backwards; the gap only grows, so stop once it is past the window
        for j in (0..i).rev() {
            let offset = mz[i] - mz[j] - isotope_mass_diff;
            if offset.abs() < tolerance {
                is_isotope = true;
                break;
            }
            if offset >= tolerance {
                break;
            }
        }

        if !is_isotope {
            filtered_mz.push(mz[i]);
            filtered_intensity.push(intensity[i]);
        }
    }

    (filtered_mz, filtered_intensity)
}

/// Keep peaks whose intensity relative to the base peak is above `cutoff`.
///
/// # Returns
/// Tuple of (filtered_mz, relative_intensity). Both are empty when the base peak is zero.
pub fn filter_relative_intensity(
    mz: &[f64],
    intensity: &[f64],
    cutoff: f64,
) -> (Vec<f64>, Vec<f64>) {
    let base_peak = intensity.iter().cloned().fold(0.0, f64::max);
    if base_peak <= 0.0 {
        return (Vec::new(), Vec::new());
    }

    mz.iter()
        .zip(intensity.iter())
        .map(|(&mz, &intensity)| (mz, intensity / base_peak))
        .filter(|&(_, relative)| relative > cutoff)
        .unzip()
}

/// Filter spectrum to keep only the top N most intense peaks.
///
/// Equal intensities are ranked by ascending m/z so the selection is deterministic.
///
/// # Arguments
/// * `mz` - m/z values
/// * `intensity` - intensity values
/// * `top_n` - maximum number of peaks to keep
///
/// # Returns
/// Tuple of (filtered_mz, filtered_intensity) sorted by m/z
pub fn filter_top_n(
    mz: &[f64],
    intensity: &[f64],
    top_n: usize,
) -> (Vec<f64>, Vec<f64>) {
    if mz.len() <= top_n {
        return (mz.to_vec(), intensity.to_vec());
    }

    let mut indices: Vec<usize> = (0..mz.len()).collect();
    indices.sort_by_key(|&i| (Reverse(OrderedFloat(intensity[i])), OrderedFloat(mz[i])));
    indices.truncate(top_n);

    // Sort by m/z for the final result
    indices.sort_by_key(|&i| OrderedFloat(mz[i]));

    let filtered_mz: Vec<f64> = indices.iter().map(|&i| mz[i]).collect();
    let filtered_intensity: Vec<f64> = indices.iter().map(|&i| intensity[i]).collect();

    (filtered_mz, filtered_intensity)
}

/// Process a single spectrum: optionally deisotope, apply the relative intensity cutoff,
/// keep the top N peaks and derive the precursor exclusion limit for fragments.
///
/// # Example
///
/// ```rust
/// # use ms2feat::data::spectrum::MsMsSpectrum;
/// # use ms2feat::algorithm::preprocessing::{preprocess_spectrum, SpectrumProcessingConfig};
/// let spectrum = MsMsSpectrum::new(vec![100.0, 101.00335, 150.0], vec![100.0, 40.0, 2.0], 300.0).unwrap();
/// let cleaned = preprocess_spectrum(&spectrum, &SpectrumProcessingConfig::default());
/// assert_eq!(cleaned.mz, vec![100.0]);
/// assert_eq!(cleaned.intensity, vec![1.0]);
/// ```
pub fn preprocess_spectrum(spectrum: &MsMsSpectrum, config: &SpectrumProcessingConfig) -> CleanedSpectrum {
    // Step 1: Optionally deisotope
    let (deiso_mz, deiso_intensity) = if config.deisotope {
        deisotope_spectrum(spectrum.mz(), spectrum.intensity(), config.isotope_mass_diff, config.deisotope_tolerance)
    } else {
        (spectrum.mz().to_vec(), spectrum.intensity().to_vec())
    };

    // Step 2: Relative intensity cutoff
    let (cut_mz, cut_intensity) = filter_relative_intensity(&deiso_mz, &deiso_intensity, config.relative_intensity_cutoff);
    if cut_mz.is_empty() {
        debug!("no peaks left after intensity cutoff for {}", spectrum);
    }

    // Step 3: Filter to top N peaks
    let (mz, intensity) = filter_top_n(&cut_mz, &cut_intensity, config.take_top_n);

    CleanedSpectrum {
        mz,
        intensity,
        precursor_mz: spectrum.precursor_mz(),
        fragment_mz_limit: spectrum.precursor_mz() - config.precursor_exclusion,
    }
}

/// Preprocess a batch of spectra in parallel, preserving input order.
pub fn preprocess_batch(
    spectra: &[MsMsSpectrum],
    config: &SpectrumProcessingConfig,
    num_threads: usize,
) -> Result<Vec<CleanedSpectrum>> {
    let pool = thread_pool(num_threads)?;

    Ok(pool.install(|| {
        spectra
            .par_iter()
            .map(|spectrum| preprocess_spectrum(spectrum, config))
            .collect()
    }))
}
