use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use bincode::{Decode, Encode};
use tracing::{debug, warn};

use crate::algorithm::featurization::FeatureRow;
use crate::algorithm::statistics::OccurrenceTables;
use crate::algorithm::vocabulary::FeatureVocabulary;
use crate::data::spectrum::SpectrumRecord;
use crate::error::{Ms2FeatError, Result};

pub const OCCURRENCE_FILE_VERSION: u32 = 1;

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

#[derive(Debug, Clone, Encode, Decode)]
pub struct OccurrenceFile {
    pub version: u32,
    pub tables: OccurrenceTables,
}

impl OccurrenceFile {
    pub fn new(tables: OccurrenceTables) -> Self {
        Self { version: OCCURRENCE_FILE_VERSION, tables }
    }
}

// --- Bincode + optional zstd compression ---
pub fn write_occurrence_tables<P: AsRef<Path>>(path: P, tables: &OccurrenceTables, compress: bool) -> Result<()> {
    let f = File::create(path)?;
    let file = OccurrenceFile::new(tables.clone());
    let config = bincode::config::standard();

    if compress {
        let mut zw = zstd::Encoder::new(f, 3)?;
        bincode::encode_into_std_write(&file, &mut zw, config)?;
        zw.finish()?;
    } else {
        let mut bw = BufWriter::new(f);
        bincode::encode_into_std_write(&file, &mut bw, config)?;
        bw.flush()?;
    }
    Ok(())
}

/// Reads tables written by [`write_occurrence_tables`], compressed or not.
pub fn read_occurrence_tables<P: AsRef<Path>>(path: P) -> Result<OccurrenceTables> {
    let mut reader = BufReader::new(File::open(path)?);
    let config = bincode::config::standard();

    let compressed = reader.fill_buf()?.starts_with(&ZSTD_MAGIC);
    let file: OccurrenceFile = if compressed {
        let mut zr = zstd::Decoder::with_buffer(reader)?;
        bincode::decode_from_std_read(&mut zr, config)?
    } else {
        bincode::decode_from_std_read(&mut reader, config)?
    };

    if file.version != OCCURRENCE_FILE_VERSION {
        return Err(Ms2FeatError::Config(format!(
            "unsupported occurrence file version {}, expected {}",
            file.version, OCCURRENCE_FILE_VERSION
        )));
    }
    Ok(file.tables)
}

// --- JSON (human-readable) ---
pub fn write_vocabulary<P: AsRef<Path>>(path: P, vocabulary: &FeatureVocabulary) -> Result<()> {
    let mut f = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut f, vocabulary)?;
    f.flush()?;
    Ok(())
}

pub fn read_vocabulary<P: AsRef<Path>>(path: P) -> Result<FeatureVocabulary> {
    let f = BufReader::new(File::open(path)?);
    let vocabulary: FeatureVocabulary = serde_json::from_reader(f)?;
    if vocabulary.names.len() != vocabulary.len() {
        return Err(Ms2FeatError::Config(format!(
            "vocabulary has {} names for {} features",
            vocabulary.names.len(),
            vocabulary.len()
        )));
    }
    Ok(vocabulary)
}

/// Parses one spectrum record per non-empty line.
///
/// # Arguments
///
/// * `reader` - any buffered source of JSON lines
///
/// # Returns
///
/// * The parsed records and the number of malformed lines that were skipped
pub fn parse_spectrum_records<R: BufRead>(reader: R) -> Result<(Vec<SpectrumRecord>, usize)> {
    let mut records = Vec::new();
    let mut skipped = 0;

    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SpectrumRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(line = line_number + 1, "skipping malformed record: {}", e);
                skipped += 1;
            }
        }
    }

    debug!(records = records.len(), skipped, "parsed spectrum records");
    Ok((records, skipped))
}

pub fn read_spectrum_records<P: AsRef<Path>>(path: P) -> Result<(Vec<SpectrumRecord>, usize)> {
    parse_spectrum_records(BufReader::new(File::open(path)?))
}

pub fn write_spectrum_records<P: AsRef<Path>>(path: P, records: &[SpectrumRecord]) -> Result<()> {
    let mut f = BufWriter::new(File::create(path)?);
    for record in records {
        serde_json::to_writer(&mut f, record)?;
        f.write_all(b"\n")?;
    }
    f.flush()?;
    Ok(())
}

/// Writes one JSON object per row, in the given order.
pub fn write_feature_rows<W: Write>(mut writer: W, rows: &[FeatureRow]) -> Result<()> {
    for row in rows {
        serde_json::to_writer(&mut writer, row)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn save_feature_rows<P: AsRef<Path>>(path: P, rows: &[FeatureRow]) -> Result<()> {
    write_feature_rows(BufWriter::new(File::create(path)?), rows)
}

pub fn load_feature_rows<P: AsRef<Path>>(path: P) -> Result<Vec<FeatureRow>> {
    let mut text = String::new();
    File::open(path)?.read_to_string(&mut text)?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(Ms2FeatError::from))
        .collect()
}

/// The column header of a feature file, one name per line.
pub fn write_feature_names<P: AsRef<Path>>(path: P, names: &[String]) -> Result<()> {
    let mut f = BufWriter::new(File::create(path)?);
    for name in names {
        writeln!(f, "{}", name)?;
    }
    f.flush()?;
    Ok(())
}

pub fn read_feature_names<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let f = BufReader::new(File::open(path)?);
    let mut names = Vec::new();
    for line in f.lines() {
        let line = line?;
        if !line.is_empty() {
            names.push(line);
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use crate::algorithm::statistics::RankedTable;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("ms2feat-io-{}-{}", std::process::id(), name))
    }

    fn tables() -> OccurrenceTables {
        OccurrenceTables {
            decimals: 2,
            spectra_analyzed: 3,
            spectra_skipped: 1,
            fragments: RankedTable { values: vec![10507, 9107], counts: vec![12, 3] },
            neutral_losses: RankedTable { values: vec![1802], counts: vec![4] },
            hidden_neutral_losses: RankedTable::default(),
            fragment_pairs: RankedTable { values: vec![(9107, 10507)], counts: vec![3] },
        }
    }

    #[test]
    fn test_occurrence_tables_plain_and_compressed() {
        for compress in [false, true] {
            let path = scratch(&format!("tables-{}.bin", compress));
            write_occurrence_tables(&path, &tables(), compress).unwrap();
            assert_eq!(read_occurrence_tables(&path).unwrap(), tables());
            std::fs::remove_file(&path).unwrap();
        }
    }

    #[test]
    fn test_parse_skips_malformed_lines() {
        let input = concat!(
            "{\"id\":\"a\",\"mz\":[105.07],\"intensity\":[10.0],\"precursor_mz\":300.0}\n",
            "\n",
            "not json\n",
            "{\"id\":\"b\",\"mz\":[],\"intensity\":[],\"precursor_mz\":200.0}\n",
        );

        let (records, skipped) = parse_spectrum_records(input.as_bytes()).unwrap();

        assert_eq!(skipped, 1);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "a");
        assert_eq!(records[1].precursor_mz, 200.0);
    }

    #[test]
    fn test_feature_rows_keep_order() {
        let rows = vec![
            FeatureRow { id: "x".to_string(), quality: 50.0, features: vec![1.0, 0.0] },
            FeatureRow { id: "y".to_string(), quality: 0.0, features: vec![0.0, 20.0] },
        ];
        let mut buffer = Vec::new();
        write_feature_rows(&mut buffer, &rows).unwrap();

        let text = String::from_utf8(buffer).unwrap();
        let ids: Vec<String> = text.lines()
            .map(|line| serde_json::from_str::<FeatureRow>(line).unwrap().id)
            .collect();
        assert_eq!(ids, vec!["x", "y"]);
    }

    #[test]
    fn test_feature_names_file() {
        let path = scratch("names.txt");
        let names = vec!["frag_105.1".to_string(), "nl_18.0".to_string()];
        write_feature_names(&path, &names).unwrap();
        assert_eq!(read_feature_names(&path).unwrap(), names);
        std::fs::remove_file(&path).unwrap();
    }
}
