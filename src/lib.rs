//! # butterfly-extract
//!
//! OpenStreetMap extraction pipeline: parse PBF or XML input, classify every
//! primitive with a routing profile, and write a fingerprinted graph file
//! plus a matching turn restriction file.
//!
//! ```no_run
//! use std::path::Path;
//! use butterfly_extract::extractor::{run_extraction, ExtractorSettings};
//!
//! let settings = ExtractorSettings::new(Path::new("monaco.osm.pbf"), Path::new("car.yaml"));
//! let report = run_extraction(settings, None)?;
//! println!("{} edges", report.prepare.edges);
//! # Ok::<(), butterfly_common::Error>(())
//! ```

pub mod cli;
pub mod config;
pub mod elements;
pub mod extractor;
pub mod formats;
pub mod geo;
pub mod interner;
pub mod parser;
pub mod profile;

pub use butterfly_common::{Error, Result};
