use clap::{Parser, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use mdao::{DenseBackend, SegmentedBackend, VectorBackend};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Plain local arrays
    #[default]
    Dense,
    /// Distributed segments, replicated variables are owned by their lowest rank
    Segmented,
}

impl Backend {
    pub fn vector_backend(&self) -> &'static dyn VectorBackend {
        match self {
            Backend::Dense => &DenseBackend,
            Backend::Segmented => &SegmentedBackend,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human readable tables
    #[default]
    Table,
    /// One JSON document with the report of every rank
    Json,
}

/// Set up a model and print its distributed schema
#[derive(Debug, Parser)]
#[command(name = "mdao-check", version, about)]
pub struct CheckOptions {
    /// The JSON model description to read
    #[arg(value_name = "MODEL")]
    pub model: std::path::PathBuf,

    /// Number of ranks to run the setup on
    #[arg(short = 'n', long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    pub procs: u16,

    /// Vector backend of every vector set
    #[arg(long, value_enum, default_value_t = Backend::Dense)]
    pub backend: Backend,

    /// Additional named vector set to build, can be given multiple times
    #[arg(long = "vector", value_name = "NAME")]
    pub vectors: Vec<String>,

    /// Only print the layouts of this rank
    #[arg(long)]
    pub rank: Option<usize>,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Table)]
    pub format: Format,

    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

impl CheckOptions {
    /// Options for checking `model` with every other setting at its default.
    pub fn new(model: impl Into<std::path::PathBuf>) -> Self {
        Self {
            model: model.into(),
            procs: 1,
            backend: Backend::default(),
            vectors: Vec::new(),
            rank: None,
            format: Format::default(),
            verbose: Verbosity::new(0, 0),
        }
    }
}
