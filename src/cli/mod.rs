//! Command-line arguments and their resolution into extractor settings

pub mod progress;

use std::path::{Path, PathBuf};

use clap::Parser;

use crate::config::ExtractorConfig;
use crate::extractor::ExtractorSettings;

pub use progress::create_progress_bar;

#[derive(Debug, Parser)]
#[command(name = "butterfly-extract")]
#[command(about = "Turn OpenStreetMap PBF/XML into a routable graph and turn restriction file")]
#[command(long_about = "Classifies every way, node and turn restriction of an OSM extract with a
YAML routing profile and writes two artifacts next to the input:

  butterfly-extract belgium.osm.pbf              # belgium.graph + belgium.graph.restrictions
  butterfly-extract monaco.osm -p bicycle.yaml   # XML input, bicycle profile
  butterfly-extract map.pbf -t 4 --memory-mb 512

Settings may also come from extractor.yaml (threads, memory_mb);
command-line values take precedence.

Exit status is 2 for a bad configuration, profile or input format and 1
when the extraction itself fails.")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Input map file (.osm.pbf, .pbf, .osm, .osm.bz2 or .xml)
    pub input: PathBuf,

    /// Routing profile
    #[arg(short, long, default_value = "profile.yaml")]
    pub profile: PathBuf,

    /// Decode threads (0 = all cores)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Memory budget in MiB; exceeding it only logs a warning
    #[arg(long = "memory-mb")]
    pub memory_mb: Option<usize>,

    /// Config file (defaults to ./extractor.yaml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Hide the progress bar
    #[arg(short, long)]
    pub quiet: bool,
}

impl Cli {
    /// Merge command-line values over the config file
    pub fn settings(&self, config: &ExtractorConfig) -> ExtractorSettings {
        let mut settings = ExtractorSettings::new(&self.input, &self.profile);
        settings.threads = config.threads(self.threads);
        settings.memory_budget = config.memory_mb(self.memory_mb) << 20;
        settings
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}
