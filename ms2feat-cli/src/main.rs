use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ms2feat::algorithm::featurization::{quantize_features, FeatureRow, Featurizer};
use ms2feat::algorithm::statistics::analyze_records;
use ms2feat::algorithm::vocabulary::{BlockSelection, FeatureVocabulary};
use ms2feat::io;
use ms2feat::FeatureConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "MS2 fragment and neutral loss feature extraction", long_about = None)]
struct Cli {
    /// Pipeline configuration as JSON; missing fields keep their defaults.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Worker threads, 0 lets rayon decide.
    #[arg(long, global = true)]
    threads: Option<usize>,
    /// Log debug output (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Count fragments, neutral losses, hidden neutral losses and fragment pairs over a corpus.
    Analyze {
        /// Spectra as JSON lines: {"id", "mz", "intensity", "precursor_mz"}
        #[arg(long)]
        input: PathBuf,
        /// Occurrence tables (bincode)
        #[arg(long)]
        output: PathBuf,
        /// Compress the occurrence tables with zstd.
        #[arg(long)]
        compress: bool,
        /// Fragment pairs listed in the summary.
        #[arg(long, default_value_t = 10)]
        top_pairs: usize,
    },
    /// Select the feature vocabulary from occurrence tables.
    Design {
        #[arg(long)]
        tables: PathBuf,
        /// Vocabulary (JSON)
        #[arg(long)]
        output: PathBuf,
        /// Keep entries counted strictly more often than this; defaults to the configured cutoff.
        #[arg(long)]
        count_cutoff: Option<i64>,
    },
    /// Turn spectra into feature vectors over a vocabulary.
    Featurize(FeaturizeArgs),
}

#[derive(Args, Debug)]
struct FeaturizeArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    vocabulary: PathBuf,
    /// Feature rows as JSON lines; names go to `<output>.names`.
    #[arg(long)]
    output: PathBuf,
    /// Drop spectra with less intensity than this percentage inside the quality range.
    #[arg(long)]
    min_quality: Option<f64>,
    /// Round fragment and neutral loss intensities to multiples of this step.
    #[arg(long, default_value_t = 0.0)]
    intensity_step: f64,
    /// Round fragment intensity ratios to multiples of this step.
    #[arg(long, default_value_t = 0.0)]
    ratio_step: f64,
    /// Skip the full preprocessor and only normalize peaks.
    #[arg(long)]
    no_clean: bool,
    #[arg(long)]
    no_fragments: bool,
    #[arg(long)]
    no_neutral_losses: bool,
    #[arg(long)]
    no_hidden_neutral_losses: bool,
    #[arg(long)]
    no_fragment_pairs: bool,
}

impl FeaturizeArgs {
    fn blocks(&self) -> BlockSelection {
        BlockSelection {
            fragments: !self.no_fragments,
            neutral_losses: !self.no_neutral_losses,
            hidden_neutral_losses: !self.no_hidden_neutral_losses,
            fragment_pairs: !self.no_fragment_pairs,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let mut config = match &cli.config {
        Some(path) => FeatureConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => FeatureConfig::default(),
    };
    if let Some(threads) = cli.threads {
        config.num_threads = threads;
    }

    match cli.command {
        Command::Analyze { input, output, compress, top_pairs } => analyze(&config, &input, &output, compress, top_pairs),
        Command::Design { tables, output, count_cutoff } => {
            design(&tables, &output, count_cutoff.unwrap_or(config.count_cutoff), config.featurization_decimals)
        }
        Command::Featurize(args) => featurize(config, &args),
    }
}

fn analyze(config: &FeatureConfig, input: &Path, output: &Path, compress: bool, top_pairs: usize) -> Result<()> {
    let (records, malformed) = io::read_spectrum_records(input)
        .with_context(|| format!("failed to read spectra from {}", input.display()))?;
    info!(records = records.len(), malformed, "loaded spectra");

    let tables = analyze_records(&records, config)?;
    eprint!("{}", tables.summary(config.count_cutoff, top_pairs));

    io::write_occurrence_tables(output, &tables, compress)
        .with_context(|| format!("failed to write occurrence tables to {}", output.display()))?;
    info!(path = %output.display(), "occurrence tables written");
    Ok(())
}

fn design(tables: &Path, output: &Path, count_cutoff: i64, featurization_decimals: u32) -> Result<()> {
    let tables = io::read_occurrence_tables(tables)
        .with_context(|| format!("failed to read occurrence tables from {}", tables.display()))?;

    let vocabulary = FeatureVocabulary::build(&tables, count_cutoff, featurization_decimals);
    if vocabulary.is_empty() {
        bail!("no vocabulary entry is counted more than {} times", count_cutoff);
    }

    io::write_vocabulary(output, &vocabulary)
        .with_context(|| format!("failed to write vocabulary to {}", output.display()))?;
    info!(path = %output.display(), features = vocabulary.len(), "vocabulary written");
    Ok(())
}

fn featurize(mut config: FeatureConfig, args: &FeaturizeArgs) -> Result<()> {
    if let Some(min_quality) = args.min_quality {
        config.quality.min_percentage = min_quality;
    }
    if args.no_clean {
        config.featurization.clean = false;
    }
    config.validate()?;

    let vocabulary = io::read_vocabulary(&args.vocabulary)
        .with_context(|| format!("failed to read vocabulary from {}", args.vocabulary.display()))?;
    let (records, malformed) = io::read_spectrum_records(&args.input)
        .with_context(|| format!("failed to read spectra from {}", args.input.display()))?;

    let featurizer = Featurizer::new(&vocabulary, &config);
    let layout = featurizer.layout();
    let blocks = args.blocks();

    let featurized = featurizer.featurize_records(&records)?;
    let total = featurized.len();
    let rows: Vec<FeatureRow> = featurized
        .into_iter()
        .filter_map(|row| row.ok())
        .filter(|row| config.quality.accepts(row.quality))
        .map(|mut row| {
            quantize_features(&mut row.features, &layout, args.intensity_step, args.ratio_step);
            row.features = blocks.select(&layout, &row.features);
            row
        })
        .collect();

    io::save_feature_rows(&args.output, &rows)
        .with_context(|| format!("failed to write features to {}", args.output.display()))?;

    let mut names_path = args.output.clone().into_os_string();
    names_path.push(".names");
    io::write_feature_names(&names_path, &blocks.select_names(&vocabulary))?;

    info!(
        records = total,
        malformed,
        written = rows.len(),
        features = blocks.columns(&layout).len(),
        "featurization done"
    );
    Ok(())
}
