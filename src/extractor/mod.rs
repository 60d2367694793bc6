//! Extraction driver
//!
//! `run_extraction` wires the pipeline: detect the input format, load the
//! profile, fingerprint the inputs, parse into the containers through the
//! callback bridge, then let the containers write both artifacts.

pub mod callbacks;
pub mod containers;

use std::path::{Path, PathBuf};
use std::time::Instant;

use butterfly_common::Result;
use indicatif::ProgressBar;
use tracing::info;

use crate::config::DEFAULT_MEMORY_MB;
use crate::formats::{self, fingerprint, Fingerprint};
use crate::parser::{InputFormat, MapParser, Parse, ParseSummary};
use crate::profile::{ProfileEvaluator, RuleProfile};

pub use callbacks::ExtractorCallbacks;
pub use containers::{ExtractionContainers, ExtractionStats, PrepareSummary};

/// Everything a run needs, resolved before any file is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorSettings {
    pub input_path: PathBuf,
    pub profile_path: PathBuf,
    pub graph_path: PathBuf,
    pub restrictions_path: PathBuf,
    /// 0 for all cores
    pub threads: usize,
    pub memory_budget: usize,
}

impl ExtractorSettings {
    pub fn new(input_path: &Path, profile_path: &Path) -> Self {
        let graph_path = graph_path_for(input_path);
        Self {
            input_path: input_path.to_path_buf(),
            profile_path: profile_path.to_path_buf(),
            restrictions_path: formats::restrictions_path(&graph_path),
            graph_path,
            threads: 0,
            memory_budget: DEFAULT_MEMORY_MB << 20,
        }
    }
}

/// Immutable per-run state handed down the pipeline
pub struct ExtractionContext {
    pub settings: ExtractorSettings,
    pub format: InputFormat,
    pub profile: RuleProfile,
    pub fingerprint: Fingerprint,
    pub threads: usize,
}

impl ExtractionContext {
    /// Startup checks: format, profile and fingerprint
    pub fn new(settings: ExtractorSettings) -> Result<Self> {
        let format = InputFormat::detect(&settings.input_path)?;
        let profile = RuleProfile::load(&settings.profile_path)?;
        let fingerprint = fingerprint::compute(&settings.input_path, &settings.profile_path)?;
        let threads = resolve_threads(settings.threads);

        info!(
            input = %settings.input_path.display(),
            format = ?format,
            profile = profile.name(),
            threads,
            fingerprint = %fingerprint::short(&fingerprint),
            "Starting extraction"
        );

        Ok(Self {
            settings,
            format,
            profile,
            fingerprint,
            threads,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionReport {
    pub parse: ParseSummary,
    pub prepare: PrepareSummary,
}

/// Worker count: 0 means every core, anything larger is clamped to the core count
pub fn resolve_threads(requested: usize) -> usize {
    let cores = num_cpus::get().max(1);
    if requested == 0 {
        cores
    } else {
        requested.min(cores)
    }
}

/// `<stem>.graph` next to the input: the first of `.osm.pbf`, `.osm.bz2`,
/// `.pbf` or `.osm` in the file name becomes `.graph`, otherwise `.graph`
/// is appended
pub fn graph_path_for(input: &Path) -> PathBuf {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let renamed = [".osm.pbf", ".osm.bz2", ".pbf", ".osm"]
        .iter()
        .find_map(|suffix| {
            name.find(suffix).map(|pos| {
                format!("{}.graph{}", &name[..pos], &name[pos + suffix.len()..])
            })
        })
        .unwrap_or_else(|| format!("{name}.graph"));

    input.with_file_name(renamed)
}

pub fn run_extraction(settings: ExtractorSettings, progress: Option<ProgressBar>) -> Result<ExtractionReport> {
    let started = Instant::now();
    let context = ExtractionContext::new(settings)?;
    let settings = &context.settings;

    let mut parser = MapParser::new(&settings.input_path, context.format, context.threads);
    if let Some(pb) = progress.clone() {
        parser = parser.with_progress(pb);
    }
    parser.read_header()?;

    let mut containers = ExtractionContainers::new(context.fingerprint);
    let parse = {
        let mut callbacks = ExtractorCallbacks::new(&mut containers, &context.profile);
        parser.parse(&mut callbacks)?
    };
    if let Some(pb) = &progress {
        pb.finish_and_clear();
    }

    let stats = containers.stats();
    info!(
        nodes = parse.nodes,
        ways = parse.ways,
        relations = parse.relations,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Parsing complete"
    );
    info!(
        accepted = stats.ways_accepted,
        rejected = stats.ways_rejected,
        invalid = stats.ways_invalid,
        evaluation_errors = stats.evaluation_errors,
        restrictions = stats.restrictions_candidates,
        "Way and relation classification"
    );

    let prepare = containers.prepare_data(
        &settings.graph_path,
        &settings.restrictions_path,
        settings.memory_budget,
    )?;

    info!(
        nodes = prepare.nodes,
        edges = prepare.edges,
        names = prepare.strings,
        restrictions = prepare.restrictions,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Extraction complete"
    );

    Ok(ExtractionReport { parse, prepare })
}
