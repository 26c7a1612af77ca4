use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SpectrumError;

/// A validated MS2 spectrum: peaks sorted by ascending m/z plus the precursor m/z.
///
/// Uses Arc<Vec<T>> for efficient cloning - clone is O(1) instead of O(n).
#[derive(Clone, Debug)]
pub struct MsMsSpectrum {
    mz: Arc<Vec<f64>>,
    intensity: Arc<Vec<f64>>,
    precursor_mz: f64,
}

impl MsMsSpectrum {
    /// Constructs a new `MsMsSpectrum`, sorting the peaks by m/z.
    ///
    /// # Arguments
    ///
    /// * `mz` - A vector of m/z values.
    /// * `intensity` - A vector of intensity values corresponding to the m/z values.
    /// * `precursor_mz` - The precursor m/z of the spectrum.
    ///
    /// # Errors
    ///
    /// Rejects peak lists of unequal length, empty peak lists, non-finite values,
    /// negative intensities, spectra whose intensities are all zero and
    /// non-positive precursors.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use ms2feat::data::spectrum::MsMsSpectrum;
    /// let spectrum = MsMsSpectrum::new(vec![200.0, 100.0], vec![20.0, 10.0], 350.0).unwrap();
    /// assert_eq!(spectrum.mz(), &[100.0, 200.0]);
    /// assert_eq!(spectrum.intensity(), &[10.0, 20.0]);
    /// ```
    pub fn new(mz: Vec<f64>, intensity: Vec<f64>, precursor_mz: f64) -> Result<Self, SpectrumError> {
        if mz.len() != intensity.len() {
            return Err(SpectrumError::LengthMismatch { mz: mz.len(), intensity: intensity.len() });
        }
        if mz.is_empty() {
            return Err(SpectrumError::Empty);
        }
        if let Some(index) = mz.iter().zip(intensity.iter()).position(|(m, i)| !m.is_finite() || !i.is_finite()) {
            return Err(SpectrumError::NonFinite { index });
        }
        if let Some((&m, &i)) = mz.iter().zip(intensity.iter()).find(|(_, &i)| i < 0.0) {
            return Err(SpectrumError::NegativeIntensity { mz: m, intensity: i });
        }
        if intensity.iter().all(|&i| i == 0.0) {
            return Err(SpectrumError::AllZeroIntensity);
        }
        if !precursor_mz.is_finite() || precursor_mz <= 0.0 {
            return Err(SpectrumError::InvalidPrecursor(precursor_mz));
        }

        let mut peaks: Vec<(f64, f64)> = mz.into_iter().zip(intensity).collect();
        peaks.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (mz, intensity): (Vec<f64>, Vec<f64>) = peaks.into_iter().unzip();

        Ok(MsMsSpectrum { mz: Arc::new(mz), intensity: Arc::new(intensity), precursor_mz })
    }

    pub fn mz(&self) -> &[f64] {
        &self.mz
    }

    pub fn intensity(&self) -> &[f64] {
        &self.intensity
    }

    pub fn precursor_mz(&self) -> f64 {
        self.precursor_mz
    }

    pub fn len(&self) -> usize {
        self.mz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mz.is_empty()
    }

    pub fn total_intensity(&self) -> f64 {
        self.intensity.iter().sum()
    }

    /// Percentage of the total ion intensity carried by peaks with `mz_low <= mz <= mz_high`.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use ms2feat::data::spectrum::MsMsSpectrum;
    /// let spectrum = MsMsSpectrum::new(vec![40.0, 100.0, 250.0, 320.0], vec![10.0, 30.0, 50.0, 10.0], 400.0).unwrap();
    /// assert!((spectrum.intensity_percentage_in_range(50.0, 300.0) - 80.0).abs() < 1e-9);
    /// ```
    pub fn intensity_percentage_in_range(&self, mz_low: f64, mz_high: f64) -> f64 {
        let in_range: f64 = self.mz.iter()
            .zip(self.intensity.iter())
            .filter(|(&mz, _)| mz_low <= mz && mz <= mz_high)
            .map(|(_, &intensity)| intensity)
            .sum();
        in_range / self.total_intensity() * 100.0
    }
}

impl Display for MsMsSpectrum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let base_peak = self.mz.iter()
            .zip(self.intensity.iter())
            .max_by(|a, b| a.1.total_cmp(b.1));

        match base_peak {
            Some((mz, i)) => write!(f, "MsMsSpectrum(precursor: {:.4}, data points: {}, base peak: ({:.3}, {}))",
                                    self.precursor_mz, self.mz.len(), mz, i),
            None => write!(f, "MsMsSpectrum(precursor: {:.4}, data points: 0)", self.precursor_mz),
        }
    }
}

/// One input row as supplied by a library or label loader.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpectrumRecord {
    pub id: String,
    pub mz: Vec<f64>,
    pub intensity: Vec<f64>,
    pub precursor_mz: f64,
}

impl SpectrumRecord {
    pub fn new(id: impl Into<String>, mz: Vec<f64>, intensity: Vec<f64>, precursor_mz: f64) -> Self {
        SpectrumRecord { id: id.into(), mz, intensity, precursor_mz }
    }

    /// Validates the record and turns it into an `MsMsSpectrum`.
    pub fn to_spectrum(&self) -> Result<MsMsSpectrum, SpectrumError> {
        MsMsSpectrum::new(self.mz.clone(), self.intensity.clone(), self.precursor_mz)
    }
}

/// Spectral quality gate: share of intensity inside an m/z range.
///
/// Both bounds are inclusive. A `min_percentage` of 0 lets every spectrum pass.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumQualityFilter {
    pub mz_low: f64,
    pub mz_high: f64,
    pub min_percentage: f64,
}

impl Default for SpectrumQualityFilter {
    fn default() -> Self {
        SpectrumQualityFilter {
            mz_low: 50.0,
            mz_high: 300.0,
            min_percentage: 0.0,
        }
    }
}

impl SpectrumQualityFilter {
    pub fn quality(&self, spectrum: &MsMsSpectrum) -> f64 {
        spectrum.intensity_percentage_in_range(self.mz_low, self.mz_high)
    }

    /// Gate on an already computed quality value, e.g. the one stored on a feature row.
    #[inline]
    pub fn accepts(&self, quality: f64) -> bool {
        quality >= self.min_percentage
    }

    #[inline]
    pub fn passes(&self, spectrum: &MsMsSpectrum) -> bool {
        self.accepts(self.quality(spectrum))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_sorts_by_mz() {
        let spectrum = MsMsSpectrum::new(vec![300.0, 100.0, 200.0], vec![3.0, 1.0, 2.0], 400.0).unwrap();
        assert_eq!(spectrum.mz(), &[100.0, 200.0, 300.0]);
        assert_eq!(spectrum.intensity(), &[1.0, 2.0, 3.0]);
        assert_eq!(spectrum.len(), 3);
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert_eq!(
            MsMsSpectrum::new(vec![100.0], vec![], 400.0).unwrap_err(),
            SpectrumError::LengthMismatch { mz: 1, intensity: 0 }
        );
        assert_eq!(MsMsSpectrum::new(vec![], vec![], 400.0).unwrap_err(), SpectrumError::Empty);
        assert_eq!(
            MsMsSpectrum::new(vec![100.0, f64::NAN], vec![1.0, 1.0], 400.0).unwrap_err(),
            SpectrumError::NonFinite { index: 1 }
        );
        assert_eq!(
            MsMsSpectrum::new(vec![100.0], vec![-1.0], 400.0).unwrap_err(),
            SpectrumError::NegativeIntensity { mz: 100.0, intensity: -1.0 }
        );
        assert_eq!(MsMsSpectrum::new(vec![100.0], vec![1.0], 0.0).unwrap_err(), SpectrumError::InvalidPrecursor(0.0));
    }

    #[test]
    fn test_rejects_all_zero_intensity() {
        let result = MsMsSpectrum::new(vec![100.0, 200.0], vec![0.0, 0.0], 400.0);
        assert_eq!(result.unwrap_err(), SpectrumError::AllZeroIntensity);
    }

    #[test]
    fn test_quality_filter() {
        let spectrum = MsMsSpectrum::new(vec![30.0, 50.0, 300.0, 350.0], vec![25.0, 25.0, 25.0, 25.0], 400.0).unwrap();
        let filter = SpectrumQualityFilter { min_percentage: 50.0, ..Default::default() };
        assert!((filter.quality(&spectrum) - 50.0).abs() < 1e-9);
        assert!(filter.passes(&spectrum));

        let strict = SpectrumQualityFilter { min_percentage: 60.0, ..Default::default() };
        assert!(!strict.passes(&spectrum));
        assert!(strict.accepts(60.0));
        assert!(!strict.accepts(59.9));
    }

    #[test]
    fn test_record_to_spectrum() {
        let record = SpectrumRecord::new("scan=1", vec![150.0, 120.0], vec![1.0, 2.0], 300.0);
        let spectrum = record.to_spectrum().unwrap();
        assert_eq!(spectrum.mz(), &[120.0, 150.0]);
        assert_eq!(spectrum.precursor_mz(), 300.0);
    }
}
