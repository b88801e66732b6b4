use clap::Parser;

/// Converts per-verse JSON transcriptions into NEXUS character matrices.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path) The JSON run configuration: transcription directory,
    /// output directory, base-text witness, editorial overrides, descripti
    /// and output variants.
    #[clap(short, long, value_parser)]
    pub config: String,

    /// (file path) A reference NEXUS file. If provided, stemmat checks that
    /// the full emitted matrix matches the reference byte for byte.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    /// (file path or empty) If specified, overrides the location of the
    /// full matrix configured with --config. The reduced and per-division
    /// variants keep their configured locations.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
