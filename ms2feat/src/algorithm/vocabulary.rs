use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::algorithm::statistics::OccurrenceTables;
use crate::config::FEATURIZATION_DECIMALS;
use crate::data::mass::{dequantize, quantize, requantize};

pub const FRAGMENT_PREFIX: &str = "frag_";
pub const NEUTRAL_LOSS_PREFIX: &str = "nl_";
pub const HIDDEN_NEUTRAL_LOSS_PREFIX: &str = "hnl_";
pub const FRAGMENT_PAIR_PREFIX: &str = "fragIntRatio_";

/// The fixed, ordered set of masses that defines the feature vector schema.
///
/// Built once from a corpus analysis run and then only read. Any rebuild invalidates
/// feature vectors computed against an earlier vocabulary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureVocabulary {
    /// Precision of the masses below, as counted by the statistics pass
    pub decimals: u32,
    /// Precision at which spectra are matched against this vocabulary; names print at it too
    #[serde(default = "default_featurization_decimals")]
    pub featurization_decimals: u32,
    pub count_cutoff: i64,
    pub fragments: Vec<f64>,
    pub neutral_losses: Vec<f64>,
    pub hidden_neutral_losses: Vec<f64>,
    pub fragment_pairs: Vec<(f64, f64)>,
    /// One name per feature, in vector order
    pub names: Vec<String>,
}

impl FeatureVocabulary {
    /// Select every pool entry whose corpus count is strictly greater than `count_cutoff`,
    /// keeping the ranked order, and name the resulting features by the bucket they match
    /// at `featurization_decimals`.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use ms2feat::algorithm::statistics::{OccurrenceTables, RankedTable};
    /// # use ms2feat::algorithm::vocabulary::FeatureVocabulary;
    /// let tables = OccurrenceTables {
    ///     decimals: 2,
    ///     fragments: RankedTable { values: vec![10507, 9107], counts: vec![12, 3] },
    ///     ..Default::default()
    /// };
    /// let vocabulary = FeatureVocabulary::build(&tables, 10, 1);
    /// assert_eq!(vocabulary.fragments, vec![105.07]);
    /// assert_eq!(vocabulary.names, vec!["frag_105.1"]);
    /// ```
    pub fn build(tables: &OccurrenceTables, count_cutoff: i64, featurization_decimals: u32) -> Self {
        let decimals = tables.decimals;
        let to_mass = |key: i64| dequantize(key, decimals);

        let fragments: Vec<f64> = tables.fragments.values_above(count_cutoff).into_iter().map(to_mass).collect();
        let neutral_losses: Vec<f64> = tables.neutral_losses.values_above(count_cutoff).into_iter().map(to_mass).collect();
        let hidden_neutral_losses: Vec<f64> = tables.hidden_neutral_losses.values_above(count_cutoff).into_iter().map(to_mass).collect();
        let fragment_pairs: Vec<(f64, f64)> = tables.fragment_pairs.values_above(count_cutoff)
            .into_iter()
            .map(|(a, b)| (to_mass(a), to_mass(b)))
            .collect();

        let names = feature_names(
            &fragments,
            &neutral_losses,
            &hidden_neutral_losses,
            &fragment_pairs,
            decimals,
            featurization_decimals,
        );

        let vocabulary = FeatureVocabulary {
            decimals,
            featurization_decimals,
            count_cutoff,
            fragments,
            neutral_losses,
            hidden_neutral_losses,
            fragment_pairs,
            names,
        };

        let layout = vocabulary.layout();
        info!(
            count_cutoff,
            fragments = layout.fragments,
            neutral_losses = layout.neutral_losses,
            hidden_neutral_losses = layout.hidden_neutral_losses,
            fragment_pairs = layout.fragment_pairs,
            features = layout.len(),
            "feature vocabulary built"
        );
        vocabulary
    }

    /// Bucket key of a vocabulary mass at the featurization precision.
    pub fn feature_key(&self, mass: f64) -> i64 {
        feature_key(mass, self.decimals, self.featurization_decimals)
    }

    pub fn layout(&self) -> FeatureLayout {
        FeatureLayout {
            fragments: self.fragments.len(),
            neutral_losses: self.neutral_losses.len(),
            hidden_neutral_losses: self.hidden_neutral_losses.len(),
            fragment_pairs: self.fragment_pairs.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.layout().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn default_featurization_decimals() -> u32 {
    FEATURIZATION_DECIMALS
}

/// Moves a mass counted at `decimals` onto the featurization grid.
///
/// # Example
///
/// ```rust
/// # use ms2feat::algorithm::vocabulary::feature_key;
/// assert_eq!(feature_key(105.35, 2, 1), 1054);
/// assert_eq!(feature_key(105.45, 2, 1), 1054);
/// ```
pub fn feature_key(mass: f64, decimals: u32, featurization_decimals: u32) -> i64 {
    requantize(quantize(mass, decimals), decimals, featurization_decimals)
}

/// Names in vector order: `frag_<m>`, `nl_<m>`, `hnl_<m>`, `fragIntRatio_<m1>_<m2>`.
///
/// Each mass is printed as the bucket its column matches, so the name and the
/// featurized value always agree. Distinct masses sharing a bucket share a name.
pub fn feature_names(
    fragments: &[f64],
    neutral_losses: &[f64],
    hidden_neutral_losses: &[f64],
    fragment_pairs: &[(f64, f64)],
    decimals: u32,
    featurization_decimals: u32,
) -> Vec<String> {
    let precision = featurization_decimals as usize;
    let label = |mass: f64| {
        let bucket = dequantize(feature_key(mass, decimals, featurization_decimals), featurization_decimals);
        format!("{:.*}", precision, bucket)
    };

    fragments.iter().map(|&m| format!("{FRAGMENT_PREFIX}{}", label(m)))
        .chain(neutral_losses.iter().map(|&m| format!("{NEUTRAL_LOSS_PREFIX}{}", label(m))))
        .chain(hidden_neutral_losses.iter().map(|&m| format!("{HIDDEN_NEUTRAL_LOSS_PREFIX}{}", label(m))))
        .chain(fragment_pairs.iter().map(|&(a, b)| format!("{FRAGMENT_PAIR_PREFIX}{}_{}", label(a), label(b))))
        .collect()
}

/// Block sizes of a feature vector: `[fragments | neutral losses | hidden neutral losses | fragment pairs]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureLayout {
    pub fragments: usize,
    pub neutral_losses: usize,
    pub hidden_neutral_losses: usize,
    pub fragment_pairs: usize,
}

impl FeatureLayout {
    /// Recovers the layout from a name list by counting name prefixes.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let mut layout = FeatureLayout::default();
        for name in names {
            let name = name.as_ref();
            if name.starts_with(FRAGMENT_PREFIX) {
                layout.fragments += 1;
            } else if name.starts_with(NEUTRAL_LOSS_PREFIX) {
                layout.neutral_losses += 1;
            } else if name.starts_with(HIDDEN_NEUTRAL_LOSS_PREFIX) {
                layout.hidden_neutral_losses += 1;
            } else {
                layout.fragment_pairs += 1;
            }
        }
        layout
    }

    pub fn len(&self) -> usize {
        self.fragments + self.neutral_losses + self.hidden_neutral_losses + self.fragment_pairs
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fragment_range(&self) -> Range<usize> {
        0..self.fragments
    }

    pub fn neutral_loss_range(&self) -> Range<usize> {
        let start = self.fragments;
        start..start + self.neutral_losses
    }

    pub fn hidden_neutral_loss_range(&self) -> Range<usize> {
        let start = self.fragments + self.neutral_losses;
        start..start + self.hidden_neutral_losses
    }

    pub fn fragment_pair_range(&self) -> Range<usize> {
        let start = self.fragments + self.neutral_losses + self.hidden_neutral_losses;
        start..start + self.fragment_pairs
    }
}

/// Which feature blocks a downstream model should see.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSelection {
    pub fragments: bool,
    pub neutral_losses: bool,
    pub hidden_neutral_losses: bool,
    pub fragment_pairs: bool,
}

impl Default for BlockSelection {
    fn default() -> Self {
        BlockSelection {
            fragments: true,
            neutral_losses: true,
            hidden_neutral_losses: true,
            fragment_pairs: true,
        }
    }
}

impl BlockSelection {
    /// Column indices of the selected blocks, in vector order.
    pub fn columns(&self, layout: &FeatureLayout) -> Vec<usize> {
        [
            (self.fragments, layout.fragment_range()),
            (self.neutral_losses, layout.neutral_loss_range()),
            (self.hidden_neutral_losses, layout.hidden_neutral_loss_range()),
            (self.fragment_pairs, layout.fragment_pair_range()),
        ]
        .into_iter()
        .filter(|(selected, _)| *selected)
        .flat_map(|(_, range)| range)
        .collect()
    }

    pub fn select_names(&self, vocabulary: &FeatureVocabulary) -> Vec<String> {
        self.columns(&vocabulary.layout())
            .into_iter()
            .map(|i| vocabulary.names[i].clone())
            .collect()
    }

    /// Projects a full feature vector onto the selected blocks.
    pub fn select(&self, layout: &FeatureLayout, features: &[f64]) -> Vec<f64> {
        self.columns(layout).into_iter().map(|i| features[i]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::statistics::RankedTable;

    fn tables() -> OccurrenceTables {
        OccurrenceTables {
            decimals: 2,
            spectra_analyzed: 20,
            spectra_skipped: 0,
            fragments: RankedTable { values: vec![10507, 9107, 5502], counts: vec![15, 11, 10] },
            neutral_losses: RankedTable { values: vec![1802], counts: vec![18] },
            hidden_neutral_losses: RankedTable { values: vec![1401, 2802], counts: vec![20, 2] },
            fragment_pairs: RankedTable { values: vec![(9107, 10507)], counts: vec![11] },
        }
    }

    #[test]
    fn test_build_filters_strictly() {
        let vocabulary = FeatureVocabulary::build(&tables(), 10, 1);

        assert_eq!(vocabulary.fragments, vec![105.07, 91.07]);
        assert_eq!(vocabulary.neutral_losses, vec![18.02]);
        assert_eq!(vocabulary.hidden_neutral_losses, vec![14.01]);
        assert_eq!(vocabulary.fragment_pairs, vec![(91.07, 105.07)]);
        assert_eq!(
            vocabulary.names,
            vec!["frag_105.1", "frag_91.1", "nl_18.0", "hnl_14.0", "fragIntRatio_91.1_105.1"]
        );
        assert_eq!(vocabulary.len(), 5);
    }

    #[test]
    fn test_names_follow_featurization_buckets() {
        let tables = OccurrenceTables {
            decimals: 2,
            fragments: RankedTable { values: vec![10535, 10545, 14495], counts: vec![12, 12, 12] },
            ..Default::default()
        };
        let vocabulary = FeatureVocabulary::build(&tables, 10, 1);

        // half-to-even on the integer key, not on the printed float
        assert_eq!(vocabulary.names, vec!["frag_105.4", "frag_105.4", "frag_145.0"]);
        assert_eq!(vocabulary.feature_key(105.35), 1054);

        let fine = FeatureVocabulary::build(&tables, 10, 2);
        assert_eq!(fine.names, vec!["frag_105.35", "frag_105.45", "frag_144.95"]);
    }

    #[test]
    fn test_cutoff_monotonicity() {
        let tables = tables();
        let sizes: Vec<usize> = (-1..25).map(|cutoff| FeatureVocabulary::build(&tables, cutoff, 1).len()).collect();

        assert!(sizes.windows(2).all(|w| w[1] <= w[0]));
        assert_eq!(sizes[0], 7);
        assert_eq!(*sizes.last().unwrap(), 0);
    }

    #[test]
    fn test_layout_ranges() {
        let layout = FeatureLayout { fragments: 2, neutral_losses: 1, hidden_neutral_losses: 3, fragment_pairs: 2 };

        assert_eq!(layout.len(), 8);
        assert_eq!(layout.fragment_range(), 0..2);
        assert_eq!(layout.neutral_loss_range(), 2..3);
        assert_eq!(layout.hidden_neutral_loss_range(), 3..6);
        assert_eq!(layout.fragment_pair_range(), 6..8);
    }

    #[test]
    fn test_layout_from_names() {
        let vocabulary = FeatureVocabulary::build(&tables(), 10, 1);
        assert_eq!(FeatureLayout::from_names(&vocabulary.names), vocabulary.layout());
    }

    #[test]
    fn test_block_selection() {
        let vocabulary = FeatureVocabulary::build(&tables(), 10, 1);
        let layout = vocabulary.layout();
        let selection = BlockSelection { neutral_losses: false, hidden_neutral_losses: false, ..Default::default() };

        assert_eq!(selection.columns(&layout), vec![0, 1, 4]);
        assert_eq!(selection.select_names(&vocabulary), vec!["frag_105.1", "frag_91.1", "fragIntRatio_91.1_105.1"]);
        assert_eq!(selection.select(&layout, &[1.0, 2.0, 3.0, 4.0, 5.0]), vec![1.0, 2.0, 5.0]);
    }
}
