//! Corpus-wide occurrence statistics.
//!
//! Every spectrum of a corpus is preprocessed and run through statistics-mode extraction.
//! Since extraction already deduplicates per spectrum, the count of a mass is the number of
//! spectra it occurs in. Counting is a commutative merge of per-thread tables, so the
//! result does not depend on thread count or scheduling.

use std::collections::HashMap;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::hash::Hash;

use bincode::{Decode, Encode};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::algorithm::extraction::{extract_statistics, MassStatistics};
use crate::algorithm::preprocessing::preprocess_spectrum;
use crate::algorithm::utility::thread_pool;
use crate::config::FeatureConfig;
use crate::data::mass::dequantize;
use crate::data::spectrum::{MsMsSpectrum, SpectrumRecord};
use crate::error::Result;

/// Values with their occurrence counts, sorted by descending count, ties by ascending value.
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct RankedTable<K> {
    pub values: Vec<K>,
    pub counts: Vec<u64>,
}

impl<K: Copy + Ord> RankedTable<K> {
    /// Ranks a count map.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use std::collections::HashMap;
    /// # use ms2feat::algorithm::statistics::RankedTable;
    /// let counts = HashMap::from([(300, 2), (100, 5), (200, 2)]);
    /// let table = RankedTable::from_counts(counts);
    /// assert_eq!(table.values, vec![100, 200, 300]);
    /// assert_eq!(table.counts, vec![5, 2, 2]);
    /// ```
    pub fn from_counts(counts: HashMap<K, u64>) -> Self {
        let mut entries: Vec<(K, u64)> = counts.into_iter().collect();
        entries.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        let (values, counts) = entries.into_iter().unzip();
        RankedTable { values, counts }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, u64)> + '_ {
        self.values.iter().copied().zip(self.counts.iter().copied())
    }

    /// Values whose count is strictly greater than `cutoff`, in rank order.
    ///
    /// A negative cutoff returns the whole table.
    pub fn values_above(&self, cutoff: i64) -> Vec<K> {
        self.iter()
            .filter(|&(_, count)| count as i128 > cutoff as i128)
            .map(|(value, _)| value)
            .collect()
    }

    pub fn count_above(&self, cutoff: i64) -> usize {
        self.counts.iter().filter(|&&count| count as i128 > cutoff as i128).count()
    }

    pub fn count_of(&self, value: K) -> Option<u64> {
        self.values.iter().position(|&v| v == value).map(|i| self.counts[i])
    }
}

/// The four ranked pools of a corpus analysis run.
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct OccurrenceTables {
    /// Decimal precision of every mass key in the tables
    pub decimals: u32,
    pub spectra_analyzed: u64,
    pub spectra_skipped: u64,
    pub fragments: RankedTable<i64>,
    pub neutral_losses: RankedTable<i64>,
    pub hidden_neutral_losses: RankedTable<i64>,
    pub fragment_pairs: RankedTable<(i64, i64)>,
}

impl OccurrenceTables {
    /// Per-pool unique and above-threshold counts, plus the most frequent fragment pairs.
    pub fn summary(&self, threshold: i64, top_k: usize) -> OccurrenceSummary {
        let pool = |unique: usize, above: usize| PoolSummary { unique, above_threshold: above };

        OccurrenceSummary {
            threshold,
            spectra_analyzed: self.spectra_analyzed,
            spectra_skipped: self.spectra_skipped,
            fragments: pool(self.fragments.len(), self.fragments.count_above(threshold)),
            neutral_losses: pool(self.neutral_losses.len(), self.neutral_losses.count_above(threshold)),
            hidden_neutral_losses: pool(
                self.hidden_neutral_losses.len(),
                self.hidden_neutral_losses.count_above(threshold),
            ),
            fragment_pairs: pool(self.fragment_pairs.len(), self.fragment_pairs.count_above(threshold)),
            top_fragment_pairs: self.fragment_pairs.iter()
                .take(top_k)
                .map(|((a, b), count)| (dequantize(a, self.decimals), dequantize(b, self.decimals), count))
                .collect(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PoolSummary {
    pub unique: usize,
    pub above_threshold: usize,
}

#[derive(Clone, Debug, Default)]
pub struct OccurrenceSummary {
    pub threshold: i64,
    pub spectra_analyzed: u64,
    pub spectra_skipped: u64,
    pub fragments: PoolSummary,
    pub neutral_losses: PoolSummary,
    pub hidden_neutral_losses: PoolSummary,
    pub fragment_pairs: PoolSummary,
    pub top_fragment_pairs: Vec<(f64, f64, u64)>,
}

impl Display for OccurrenceSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Spectra analyzed: {} (skipped: {})", self.spectra_analyzed, self.spectra_skipped)?;
        for (name, pool) in [
            ("frags", &self.fragments),
            ("NLs", &self.neutral_losses),
            ("HNLs", &self.hidden_neutral_losses),
            ("frag pairs", &self.fragment_pairs),
        ] {
            writeln!(f, "Number of unique {}: {} ({} with counts > {})", name, pool.unique, pool.above_threshold, self.threshold)?;
        }
        for (a, b, count) in &self.top_fragment_pairs {
            writeln!(f, "{:.2}-{:.2}: {}", a, b, count)?;
        }
        Ok(())
    }
}

/// Mutable per-thread accumulator; merged pairwise and finally ranked.
#[derive(Clone, Debug, Default)]
pub struct OccurrenceCounter {
    spectra_analyzed: u64,
    spectra_skipped: u64,
    fragments: HashMap<i64, u64>,
    neutral_losses: HashMap<i64, u64>,
    hidden_neutral_losses: HashMap<i64, u64>,
    fragment_pairs: HashMap<(i64, i64), u64>,
}

fn count_into<K: Copy + Eq + Hash>(target: &mut HashMap<K, u64>, values: &[K]) {
    for &value in values {
        *target.entry(value).or_insert(0) += 1;
    }
}

fn merge_into<K: Eq + Hash>(mut a: HashMap<K, u64>, mut b: HashMap<K, u64>) -> HashMap<K, u64> {
    if a.len() < b.len() {
        std::mem::swap(&mut a, &mut b);
    }
    for (key, count) in b {
        *a.entry(key).or_insert(0) += count;
    }
    a
}

impl OccurrenceCounter {
    pub fn add(&mut self, stats: &MassStatistics) {
        self.spectra_analyzed += 1;
        count_into(&mut self.fragments, &stats.fragments);
        count_into(&mut self.neutral_losses, &stats.neutral_losses);
        count_into(&mut self.hidden_neutral_losses, &stats.hidden_neutral_losses);
        count_into(&mut self.fragment_pairs, &stats.fragment_pairs);
    }

    pub fn skip(&mut self) {
        self.spectra_skipped += 1;
    }

    pub fn merge(self, other: Self) -> Self {
        OccurrenceCounter {
            spectra_analyzed: self.spectra_analyzed + other.spectra_analyzed,
            spectra_skipped: self.spectra_skipped + other.spectra_skipped,
            fragments: merge_into(self.fragments, other.fragments),
            neutral_losses: merge_into(self.neutral_losses, other.neutral_losses),
            hidden_neutral_losses: merge_into(self.hidden_neutral_losses, other.hidden_neutral_losses),
            fragment_pairs: merge_into(self.fragment_pairs, other.fragment_pairs),
        }
    }

    pub fn into_tables(self, decimals: u32) -> OccurrenceTables {
        OccurrenceTables {
            decimals,
            spectra_analyzed: self.spectra_analyzed,
            spectra_skipped: self.spectra_skipped,
            fragments: RankedTable::from_counts(self.fragments),
            neutral_losses: RankedTable::from_counts(self.neutral_losses),
            hidden_neutral_losses: RankedTable::from_counts(self.hidden_neutral_losses),
            fragment_pairs: RankedTable::from_counts(self.fragment_pairs),
        }
    }
}

/// Preprocess and extract one spectrum in statistics mode.
pub fn spectrum_statistics(spectrum: &MsMsSpectrum, config: &FeatureConfig) -> MassStatistics {
    let cleaned = preprocess_spectrum(spectrum, &config.preprocessing);
    extract_statistics(&cleaned, &config.windows, config.statistics_decimals)
}

fn log_tables(tables: &OccurrenceTables) {
    info!(
        analyzed = tables.spectra_analyzed,
        skipped = tables.spectra_skipped,
        fragments = tables.fragments.len(),
        neutral_losses = tables.neutral_losses.len(),
        hidden_neutral_losses = tables.hidden_neutral_losses.len(),
        fragment_pairs = tables.fragment_pairs.len(),
        "corpus analysis finished"
    );
}

/// Count fragment, neutral loss, hidden neutral loss and fragment pair occurrences over
/// already validated spectra.
pub fn analyze_spectra(spectra: &[MsMsSpectrum], config: &FeatureConfig) -> Result<OccurrenceTables> {
    let pool = thread_pool(config.num_threads)?;

    let counter = pool.install(|| {
        spectra
            .par_iter()
            .fold(OccurrenceCounter::default, |mut counter, spectrum| {
                counter.add(&spectrum_statistics(spectrum, config));
                counter
            })
            .reduce(OccurrenceCounter::default, OccurrenceCounter::merge)
    });

    let tables = counter.into_tables(config.statistics_decimals);
    log_tables(&tables);
    Ok(tables)
}

/// Like [`analyze_spectra`] but starting from raw records. Records that fail validation
/// are logged, counted as skipped and left out; they never abort the run.
pub fn analyze_records(records: &[SpectrumRecord], config: &FeatureConfig) -> Result<OccurrenceTables> {
    let pool = thread_pool(config.num_threads)?;

    let counter = pool.install(|| {
        records
            .par_iter()
            .fold(OccurrenceCounter::default, |mut counter, record| {
                match record.to_spectrum() {
                    Ok(spectrum) => counter.add(&spectrum_statistics(&spectrum, config)),
                    Err(e) => {
                        warn!(id = %record.id, "skipping spectrum: {}", e);
                        counter.skip();
                    }
                }
                counter
            })
            .reduce(OccurrenceCounter::default, OccurrenceCounter::merge)
    });

    let tables = counter.into_tables(config.statistics_decimals);
    debug!(decimals = tables.decimals, "ranked occurrence tables built");
    log_tables(&tables);
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrum(mz: Vec<f64>, precursor_mz: f64) -> MsMsSpectrum {
        let intensity = vec![100.0; mz.len()];
        MsMsSpectrum::new(mz, intensity, precursor_mz).unwrap()
    }

    fn corpus() -> Vec<MsMsSpectrum> {
        vec![
            spectrum(vec![100.0, 150.0, 200.0], 400.0),
            spectrum(vec![100.0, 150.0, 250.0], 400.0),
            spectrum(vec![100.0, 175.0], 400.0),
        ]
    }

    #[test]
    fn test_ranked_table_tie_break() {
        let counts = HashMap::from([(5, 1), (3, 1), (4, 7)]);
        let table = RankedTable::from_counts(counts);
        assert_eq!(table.values, vec![4, 3, 5]);
        assert_eq!(table.counts, vec![7, 1, 1]);
    }

    #[test]
    fn test_values_above_is_strict() {
        let table = RankedTable { values: vec![1, 2, 3], counts: vec![10, 5, 4] };
        assert_eq!(table.values_above(4), vec![1, 2]);
        assert_eq!(table.values_above(-1), vec![1, 2, 3]);
        assert!(table.values_above(10).is_empty());
        assert_eq!(table.count_above(4), 2);
    }

    #[test]
    fn test_counts_spectra_not_peaks() {
        let config = FeatureConfig::default();
        // 100.001 and 100.004 fall into the same bucket within one spectrum
        let spectra = vec![spectrum(vec![100.001, 100.004, 200.0], 400.0), spectrum(vec![100.0, 200.0], 400.0)];

        let tables = analyze_spectra(&spectra, &config).unwrap();

        assert_eq!(tables.fragments.count_of(10000), Some(2));
        assert_eq!(tables.fragments.count_of(20000), Some(2));
    }

    #[test]
    fn test_analyze_spectra() {
        let config = FeatureConfig::default();
        let tables = analyze_spectra(&corpus(), &config).unwrap();

        assert_eq!(tables.spectra_analyzed, 3);
        assert_eq!(tables.decimals, 2);
        assert_eq!(tables.fragments.values[0], 10000);
        assert_eq!(tables.fragments.counts[0], 3);
        // 150.0 is in two spectra, 175, 200 and 250 in one each
        assert_eq!(tables.fragments.values, vec![10000, 15000, 17500, 20000, 25000]);
        assert_eq!(tables.fragments.counts, vec![3, 2, 1, 1, 1]);
        // loss of 300 from the 100.0 fragment in all spectra
        assert_eq!(tables.neutral_losses.count_of(30000), Some(3));
        assert_eq!(tables.fragment_pairs.count_of((10000, 15000)), Some(2));
        assert_eq!(tables.hidden_neutral_losses.count_of(5000), Some(2));
    }

    #[test]
    fn test_thread_count_does_not_change_result() {
        let spectra: Vec<MsMsSpectrum> = (0..40)
            .map(|i| spectrum(vec![60.0 + i as f64, 120.0, 180.5 + (i % 3) as f64], 400.0))
            .collect();

        let single = analyze_spectra(&spectra, &FeatureConfig { num_threads: 1, ..Default::default() }).unwrap();
        let multi = analyze_spectra(&spectra, &FeatureConfig { num_threads: 4, ..Default::default() }).unwrap();

        assert_eq!(single, multi);
    }

    #[test]
    fn test_analyze_records_skips_invalid() {
        let records = vec![
            SpectrumRecord::new("ok", vec![100.0, 150.0], vec![10.0, 5.0], 400.0),
            SpectrumRecord::new("zero", vec![100.0, 150.0], vec![0.0, 0.0], 400.0),
            SpectrumRecord::new("short", vec![100.0, 150.0], vec![10.0], 400.0),
        ];

        let tables = analyze_records(&records, &FeatureConfig::default()).unwrap();

        assert_eq!(tables.spectra_analyzed, 1);
        assert_eq!(tables.spectra_skipped, 2);
        assert_eq!(tables.fragments.values, vec![10000, 15000]);
    }

    #[test]
    fn test_summary() {
        let tables = analyze_spectra(&corpus(), &FeatureConfig::default()).unwrap();
        let summary = tables.summary(1, 2);

        assert_eq!(summary.fragments, PoolSummary { unique: 5, above_threshold: 2 });
        assert_eq!(summary.top_fragment_pairs.len(), 2);
        assert_eq!(summary.top_fragment_pairs[0], (100.0, 150.0, 2));
        assert!(summary.to_string().contains("Number of unique frags: 5"));
    }
}
