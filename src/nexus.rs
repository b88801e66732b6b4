use log::{info, warn};

use collation_matrix::*;
use snafu::{prelude::*, Snafu};

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use text_diff::print_diff;

use crate::nexus::config_reader::*;

pub mod io_json;

#[derive(Debug, Snafu)]
pub enum NexusError {
    #[snafu(display("Error opening {path}"))]
    OpeningJson {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing {path}"))]
    ParsingJson {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Error listing transcription directory {path}"))]
    ReadingDir {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Transcription file name is not in <DIV>_<canto>_<verse>.json form: {path}"))]
    BadFileName { path: String },
    #[snafu(display("Unknown division code {code} in {path}"))]
    UnknownDivision { code: String, path: String },
    #[snafu(display("Error writing {path}"))]
    WritingOutput {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Collation error: {source}"))]
    Collation { source: CollationErrors },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type NexusResult<T> = Result<T, NexusError>;

pub mod config_reader {
    use crate::nexus::*;

    /// The run configuration, read once from a JSON file.
    #[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
    pub struct MatrixConfig {
        #[serde(rename = "transcriptionDir")]
        pub transcription_dir: String,
        #[serde(rename = "outputDir")]
        pub output_dir: String,
        /// Base file name of the outputs; variants add `_red` and the
        /// division letter.
        #[serde(rename = "baseName")]
        pub base_name: String,
        /// Cap on the number of transcription files, for partial runs.
        #[serde(rename = "maxFiles")]
        pub max_files: Option<usize>,
        #[serde(rename = "baseWitness")]
        pub base_witness: String,
        #[serde(rename = "compositeWitness")]
        pub composite_witness: Option<String>,
        /// Static exception table: character label -> reading of the
        /// editorial composite witness where it diverges from the base
        /// text.
        #[serde(rename = "editorialOverrides", default)]
        pub editorial_overrides: BTreeMap<String, String>,
        #[serde(default)]
        pub descripti: Vec<String>,
        #[serde(rename = "dropInvariant")]
        pub drop_invariant: Option<bool>,
        /// Also emit the matrix with the descripti excluded.
        #[serde(rename = "reducedVariant")]
        pub reduced_variant: Option<bool>,
        /// Also partition the reduced matrix by major division.
        #[serde(rename = "partitionByDivision")]
        pub partition_by_division: Option<bool>,
        /// A file whose contents are appended verbatim to the reduced
        /// variants (e.g. a precomputed trees block).
        #[serde(rename = "treesFile")]
        pub trees_file: Option<String>,
    }

    impl MatrixConfig {
        pub fn to_options(&self) -> CollationOptions {
            CollationOptions {
                base_witness: self.base_witness.clone(),
                composite_witness: self.composite_witness.clone(),
                overrides: self.editorial_overrides.clone(),
                descripti: self.descripti.clone(),
                drop_invariant: self.drop_invariant.unwrap_or(false),
            }
        }
    }

    pub fn read_config(path: &str) -> NexusResult<MatrixConfig> {
        let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
        let config: MatrixConfig =
            serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu { path })?;
        validate_config(&config)?;
        Ok(config)
    }

    /// The override table is loaded once at startup; a key that is not a
    /// character label in its canonical (zero-padded) spelling would
    /// otherwise silently never match.
    pub fn validate_config(config: &MatrixConfig) -> NexusResult<()> {
        for key in config.editorial_overrides.keys() {
            let canonical = CharId::parse(key).map(|c| c.to_string());
            if canonical.as_deref() != Some(key.as_str()) {
                whatever!(
                    "editorial override key {:?} is not a canonical character label",
                    key
                );
            }
        }
        Ok(())
    }
}

fn out_path(config: &MatrixConfig, suffix: &str, division: Option<Division>) -> PathBuf {
    let division_part = match division {
        Some(d) => format!(".{}", d.letter()),
        None => String::new(),
    };
    let file_name = format!("{}{}{}.nex", config.base_name, suffix, division_part);
    [config.output_dir.as_str(), file_name.as_str()]
        .iter()
        .collect()
}

// Partial output files are not valid: write to a temporary location in the
// destination directory and rename atomically.
fn write_atomically(path: &Path, contents: &str) -> NexusResult<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);
    let p = path.display().to_string();
    if let Err(e) = fs::write(&tmp, contents) {
        let _ = fs::remove_file(&tmp);
        return Err(e).context(WritingOutputSnafu { path: p.clone() });
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e).context(WritingOutputSnafu { path: p });
    }
    Ok(())
}

fn log_matrix(path: &Path, matrix: &NexusMatrix) {
    info!(
        "{}: {} taxa, {} characters, {} symbols ({} invariant, {} dropped empty)",
        path.display(),
        matrix.taxa.len(),
        matrix.columns.len(),
        matrix.n_symbols,
        matrix.stats.invariant,
        matrix.stats.dropped_empty
    );
}

// All warnings are reported once, at the end of the run, so the operator
// can audit how many imputations and conflicts occurred and where.
fn report_diagnostics(diags: &Diagnostics) {
    if diags.is_empty() {
        info!("No warnings collected");
        return;
    }
    let (ambiguous, missing, empty) = diags.counts();
    warn!(
        "{} warnings collected: {} ambiguous readings, {} missing data, {} empty characters",
        diags.len(),
        ambiguous,
        missing,
        empty
    );
    for d in diags.entries() {
        warn!("{}", d);
    }
}

pub fn run_conversion(
    config_path: String,
    out_override: Option<String>,
    reference_path: Option<String>,
) -> NexusResult<()> {
    let config = read_config(&config_path)?;
    info!("config: {:?}", config);

    let records = io_json::read_transcriptions(&config.transcription_dir, config.max_files)?;
    info!(
        "Read {} verse records from {}",
        records.len(),
        config.transcription_dir
    );

    let catalogue = EscapeCatalogue::validated().context(CollationSnafu {})?;
    let options = config.to_options();
    let mut diags = Diagnostics::new();

    // Load and resolve once; the variants only differ in the exclusion
    // applied at assembly time.
    let (mut table, witnesses) =
        load_records(&records, &catalogue, &options, &mut diags).context(CollationSnafu {})?;
    resolve_missing(&mut table, &witnesses, &mut diags);

    let trees = match &config.trees_file {
        Some(p) if config.reduced_variant.unwrap_or(false) => {
            Some(fs::read_to_string(p).context(OpeningJsonSnafu { path: p.clone() })?)
        }
        _ => None,
    };

    let outputs = build_outputs(
        &config,
        &table,
        &witnesses,
        &options,
        trees.as_deref(),
        out_override,
        &mut diags,
    )?;
    for (path, text) in outputs.iter() {
        write_atomically(path, text)?;
    }

    // The reference matrix, if provided for comparison with the full one.
    if let Some(reference_p) = reference_path {
        let reference =
            fs::read_to_string(reference_p.as_str()).context(OpeningJsonSnafu {
                path: reference_p.clone(),
            })?;
        let full_text = outputs[0].1.as_str();
        if reference != full_text {
            warn!("Found differences with the reference matrix");
            print_diff(reference.as_str(), full_text, "\n");
            whatever!("Difference detected between emitted matrix and reference {}", reference_p)
        }
    }

    report_diagnostics(&diags);
    Ok(())
}

/// Renders every configured output variant: the full matrix first, then the
/// reduced one, then its per-division partitions. A per-division assembly
/// only re-derives a division-filtered subset of the reduced assembly's
/// warnings, so it collects into a scratch set that is discarded; each
/// warning reaches the end-of-run report once.
fn build_outputs(
    config: &MatrixConfig,
    table: &ReadingTable,
    witnesses: &BTreeSet<Witness>,
    options: &CollationOptions,
    trees: Option<&str>,
    out_override: Option<String>,
    diags: &mut Diagnostics,
) -> NexusResult<Vec<(PathBuf, String)>> {
    let mut outputs: Vec<(PathBuf, String)> = Vec::new();

    // Full matrix, nothing excluded.
    let full_options = CollationOptions {
        descripti: Vec::new(),
        ..options.clone()
    };
    let full = assemble(table, witnesses, &full_options, None, diags).context(CollationSnafu {})?;
    let full_path = match out_override {
        Some(p) => PathBuf::from(p),
        None => out_path(config, "", None),
    };
    log_matrix(&full_path, &full);
    outputs.push((full_path, render_nexus(&full, None)));

    if config.reduced_variant.unwrap_or(false) {
        let reduced =
            assemble(table, witnesses, options, None, diags).context(CollationSnafu {})?;
        let reduced_path = out_path(config, "_red", None);
        log_matrix(&reduced_path, &reduced);
        outputs.push((reduced_path, render_nexus(&reduced, trees)));

        if config.partition_by_division.unwrap_or(false) {
            for division in Division::ALL {
                let mut partition_diags = Diagnostics::new();
                let partial =
                    assemble(table, witnesses, options, Some(division), &mut partition_diags)
                        .context(CollationSnafu {})?;
                if partial.columns.is_empty() {
                    warn!("No characters in division {}, skipping output", division);
                    continue;
                }
                let partial_path = out_path(config, "_red", Some(division));
                log_matrix(&partial_path, &partial);
                outputs.push((partial_path, render_nexus(&partial, trees)));
            }
        }
    }
    Ok(outputs)
}
