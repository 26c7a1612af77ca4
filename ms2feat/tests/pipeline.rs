use std::path::PathBuf;

use ms2feat::algorithm::extraction::{extract_statistics, MassWindows};
use ms2feat::algorithm::featurization::Featurizer;
use ms2feat::algorithm::preprocessing::{preprocess_spectrum, CleanedSpectrum, SpectrumProcessingConfig};
use ms2feat::algorithm::statistics::{analyze_records, analyze_spectra};
use ms2feat::algorithm::vocabulary::{FeatureLayout, FeatureVocabulary};
use ms2feat::data::spectrum::{MsMsSpectrum, SpectrumRecord};
use ms2feat::{io, FeatureConfig};

fn scratch(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("ms2feat-pipeline-{}-{}", std::process::id(), name))
}

/// Twelve spectra sharing fragments 91.05, 105.07 and 200.0 plus one spectrum-specific peak.
fn corpus() -> Vec<SpectrumRecord> {
    (0..12)
        .map(|i| {
            SpectrumRecord::new(
                format!("spectrum-{}", i),
                vec![91.05, 105.07, 200.0, 120.0 + i as f64 * 3.0],
                vec![100.0, 80.0, 60.0, 50.0],
                250.0,
            )
        })
        .collect()
}

fn assert_close(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-9, "{:?} != {:?}", actual, expected);
    }
}

#[test]
fn analyze_design_featurize() {
    let config = FeatureConfig::default();
    let records = corpus();

    let tables = analyze_records(&records, &config).unwrap();
    assert_eq!(tables.spectra_analyzed, 12);
    assert_eq!(tables.fragments.count_of(9105), Some(12));

    let vocabulary = FeatureVocabulary::build(&tables, config.count_cutoff, config.featurization_decimals);
    assert_eq!(vocabulary.fragments, vec![91.05, 105.07, 200.0]);
    assert_eq!(vocabulary.neutral_losses, vec![50.0, 144.93, 158.95]);
    assert_eq!(vocabulary.hidden_neutral_losses, vec![94.93, 108.95]);
    assert_eq!(vocabulary.fragment_pairs.len(), 3);

    let layout = vocabulary.layout();
    assert_eq!(layout, FeatureLayout { fragments: 3, neutral_losses: 3, hidden_neutral_losses: 2, fragment_pairs: 3 });
    assert_eq!(FeatureLayout::from_names(&vocabulary.names), layout);

    let featurizer = Featurizer::new(&vocabulary, &config);
    let rows = featurizer.featurize_records(&records).unwrap();
    assert_eq!(rows.len(), 12);

    let first = rows[0].as_ref().unwrap();
    assert_eq!(first.id, "spectrum-0");
    assert_close(&first.features[layout.fragment_range()], &[100.0, 80.0, 60.0]);
    assert_close(&first.features[layout.neutral_loss_range()], &[60.0, 80.0, 100.0]);
    assert_close(&first.features[layout.hidden_neutral_loss_range()], &[1.0, 1.0]);
    assert_close(&first.features[layout.fragment_pair_range()], &[100.0 / 80.0, 100.0 / 60.0, 80.0 / 60.0]);
}

#[test]
fn invalid_records_are_skipped() {
    let config = FeatureConfig::default();
    let mut records = corpus();
    records.push(SpectrumRecord::new("broken", vec![100.0, 200.0], vec![1.0], 300.0));
    records.push(SpectrumRecord::new("silent", vec![100.0], vec![0.0], 300.0));

    let tables = analyze_records(&records, &config).unwrap();
    assert_eq!(tables.spectra_analyzed, 12);
    assert_eq!(tables.spectra_skipped, 2);

    let vocabulary = FeatureVocabulary::build(&tables, config.count_cutoff, config.featurization_decimals);
    let rows = Featurizer::new(&vocabulary, &config).featurize_records(&records).unwrap();
    assert_eq!(rows.len(), 14);
    assert!(rows[..12].iter().all(|row| row.is_ok()));
    assert!(rows[12].is_err() && rows[13].is_err());
}

#[test]
fn persisted_artifacts_reload() {
    let config = FeatureConfig::default();
    let records = corpus();

    let records_path = scratch("records.jsonl");
    io::write_spectrum_records(&records_path, &records).unwrap();
    let (reloaded, malformed) = io::read_spectrum_records(&records_path).unwrap();
    assert_eq!(malformed, 0);
    assert_eq!(reloaded.len(), records.len());

    let tables = analyze_records(&reloaded, &config).unwrap();
    let tables_path = scratch("tables.bin");
    io::write_occurrence_tables(&tables_path, &tables, true).unwrap();
    assert_eq!(io::read_occurrence_tables(&tables_path).unwrap(), tables);

    let vocabulary = FeatureVocabulary::build(&tables, config.count_cutoff, config.featurization_decimals);
    let vocabulary_path = scratch("vocabulary.json");
    io::write_vocabulary(&vocabulary_path, &vocabulary).unwrap();
    assert_eq!(io::read_vocabulary(&vocabulary_path).unwrap(), vocabulary);

    let rows: Vec<_> = Featurizer::new(&vocabulary, &config)
        .featurize_records(&reloaded)
        .unwrap()
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();
    let rows_path = scratch("features.jsonl");
    io::save_feature_rows(&rows_path, &rows).unwrap();
    let loaded = io::load_feature_rows(&rows_path).unwrap();
    assert_eq!(loaded.len(), rows.len());
    for (loaded, row) in loaded.iter().zip(&rows) {
        assert_eq!(loaded.id, row.id);
        assert_close(&loaded.features, &row.features);
    }

    for path in [records_path, tables_path, vocabulary_path, rows_path] {
        std::fs::remove_file(path).unwrap();
    }
}

#[test]
fn feature_vectors_respect_block_ranges() {
    let config = FeatureConfig::default();
    let tables = analyze_records(&corpus(), &config).unwrap();
    let vocabulary = FeatureVocabulary::build(&tables, -1, config.featurization_decimals);
    let featurizer = Featurizer::new(&vocabulary, &config);
    let layout = featurizer.layout();

    let spectra = vec![
        MsMsSpectrum::new(vec![91.05, 200.0], vec![5.0, 100.0], 250.0).unwrap(),
        MsMsSpectrum::new(vec![105.07], vec![1.0], 250.0).unwrap(),
        MsMsSpectrum::new(vec![60.0, 91.05, 105.07, 200.0, 240.0], vec![1.0, 90.0, 3.0, 100.0, 7.0], 250.0).unwrap(),
    ];

    for spectrum in &spectra {
        let features = featurizer.featurize(spectrum);
        assert_eq!(features.len(), layout.len());
        assert!(features[layout.fragment_pair_range()].iter().all(|&r| (0.0..=20.0).contains(&r)));
        assert!(features[layout.hidden_neutral_loss_range()].iter().all(|&b| b == 0.0 || b == 1.0));
    }
}

#[test]
fn vocabulary_shrinks_with_cutoff() {
    let config = FeatureConfig::default();
    let tables = analyze_records(&corpus(), &config).unwrap();

    let full = FeatureVocabulary::build(&tables, -1, config.featurization_decimals);
    assert_eq!(
        full.len(),
        tables.fragments.len() + tables.neutral_losses.len() + tables.hidden_neutral_losses.len() + tables.fragment_pairs.len()
    );

    let sizes: Vec<usize> = (-1..=13).map(|cutoff| FeatureVocabulary::build(&tables, cutoff, config.featurization_decimals).len()).collect();
    assert!(sizes.windows(2).all(|w| w[1] <= w[0]));
    assert_eq!(sizes.last(), Some(&0));
}

#[test]
fn rounded_duplicates_are_counted_once() {
    let config = FeatureConfig {
        preprocessing: SpectrumProcessingConfig { deisotope: false, ..Default::default() },
        ..Default::default()
    };
    let spectrum = MsMsSpectrum::new(vec![100.001, 100.004, 150.0], vec![10.0, 10.0, 10.0], 300.0).unwrap();

    let tables = analyze_spectra(&[spectrum], &config).unwrap();
    assert_eq!(tables.fragments.count_of(10000), Some(1));
    assert_eq!(tables.fragments.len(), 2);
}

#[test]
fn isotope_chain_keeps_monoisotopic_peak() {
    let spectrum = MsMsSpectrum::new(vec![100.0, 101.00335, 102.0067], vec![100.0, 60.0, 30.0], 300.0).unwrap();
    let cleaned = preprocess_spectrum(&spectrum, &SpectrumProcessingConfig::default());
    assert_eq!(cleaned.mz, vec![100.0]);
}

#[test]
fn loss_and_difference_windows_are_open() {
    let windows = MassWindows { hnl_high: 300.0, ..Default::default() };

    let losses = CleanedSpectrum { mz: vec![50.0, 120.0], intensity: vec![1.0, 1.0], precursor_mz: 400.0, fragment_mz_limit: 398.5 };
    assert_eq!(extract_statistics(&losses, &windows, 2).neutral_loss_masses(), vec![280.0]);

    let ladder = CleanedSpectrum { mz: vec![100.0, 150.0, 250.0], intensity: vec![1.0, 1.0, 1.0], precursor_mz: 400.0, fragment_mz_limit: 398.5 };
    assert_eq!(extract_statistics(&ladder, &windows, 2).hidden_neutral_loss_masses(), vec![50.0, 100.0, 150.0]);
}
