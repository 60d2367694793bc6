//! Map file parsers
//!
//! Both input variants decode into the same stream of [`RawNode`],
//! [`RawWay`] and [`RawRelation`] events, delivered to an [`ElementSink`] in
//! strict order: every node, then every way, then every relation.

pub mod pbf;
pub mod proto;
pub mod xml;

use std::path::Path;

use butterfly_common::{Error, Result};
use indicatif::ProgressBar;

use crate::elements::{RawNode, RawRelation, RawWay};

pub use pbf::PbfParser;
pub use xml::XmlParser;

/// Consumer of parsed primitives
pub trait ElementSink {
    fn node(&mut self, node: RawNode);
    fn way(&mut self, way: RawWay);
    fn relation(&mut self, relation: RawRelation);
}

/// Input variant, chosen once from the file name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Pbf,
    Xml,
    /// bzip2-compressed XML (`.osm.bz2`)
    XmlBz2,
}

impl InputFormat {
    /// Detect the variant from the file suffix (no content sniffing)
    pub fn detect(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| Error::UnsupportedFormat(path.display().to_string()))?;

        if name.ends_with(".pbf") {
            Ok(InputFormat::Pbf)
        } else if name.ends_with(".osm") || name.ends_with(".xml") {
            Ok(InputFormat::Xml)
        } else if name.ends_with(".osm.bz2") || name.ends_with(".xml.bz2") {
            Ok(InputFormat::XmlBz2)
        } else if name.ends_with(".gz") || name.ends_with(".xz") {
            Err(Error::UnsupportedFormat(format!(
                "{name}: only bzip2 compressed XML is supported"
            )))
        } else {
            Err(Error::UnsupportedFormat(format!(
                "{name}: expected .osm.pbf, .pbf, .osm, .osm.bz2 or .xml"
            )))
        }
    }
}

/// Counts of primitives delivered by one parse
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseSummary {
    pub nodes: u64,
    pub ways: u64,
    pub relations: u64,
    /// PBF data blocks decoded (0 for XML)
    pub blocks: u64,
}

/// Parser interface shared by both variants
pub trait Parse {
    /// Validate the format signature; fails fast on mismatch
    fn read_header(&mut self) -> Result<()>;

    /// Decode the whole file into `sink`. Requires a successful `read_header`.
    fn parse<S: ElementSink>(&mut self, sink: &mut S) -> Result<ParseSummary>;
}

/// Parser selected at construction from the detected [`InputFormat`]
pub enum MapParser {
    Pbf(PbfParser),
    Xml(XmlParser),
}

impl MapParser {
    pub fn new(path: &Path, format: InputFormat, threads: usize) -> Self {
        match format {
            InputFormat::Pbf => MapParser::Pbf(PbfParser::new(path, threads)),
            InputFormat::Xml => MapParser::Xml(XmlParser::new(path)),
            InputFormat::XmlBz2 => MapParser::Xml(XmlParser::bzip2(path)),
        }
    }

    pub fn with_progress(self, progress: ProgressBar) -> Self {
        match self {
            MapParser::Pbf(p) => MapParser::Pbf(p.with_progress(progress)),
            MapParser::Xml(p) => MapParser::Xml(p.with_progress(progress)),
        }
    }
}

impl Parse for MapParser {
    fn read_header(&mut self) -> Result<()> {
        match self {
            MapParser::Pbf(p) => p.read_header(),
            MapParser::Xml(p) => p.read_header(),
        }
    }

    fn parse<S: ElementSink>(&mut self, sink: &mut S) -> Result<ParseSummary> {
        match self {
            MapParser::Pbf(p) => p.parse(sink),
            MapParser::Xml(p) => p.parse(sink),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Nodes,
    Ways,
    Relations,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Phase::Nodes => "node",
            Phase::Ways => "way",
            Phase::Relations => "relation",
        }
    }
}

/// Forwards elements to a sink, rejecting input that is not sorted by kind
pub(crate) struct OrderedSink<'s, S: ElementSink> {
    sink: &'s mut S,
    phase: Phase,
    summary: ParseSummary,
}

impl<'s, S: ElementSink> OrderedSink<'s, S> {
    pub(crate) fn new(sink: &'s mut S) -> Self {
        Self {
            sink,
            phase: Phase::Nodes,
            summary: ParseSummary::default(),
        }
    }

    fn advance(&mut self, phase: Phase, id: i64) -> Result<()> {
        if phase < self.phase {
            return Err(Error::malformed(format!(
                "input is not sorted: {} {id} after {} elements",
                phase.name(),
                self.phase.name()
            )));
        }
        self.phase = phase;
        Ok(())
    }

    pub(crate) fn node(&mut self, node: RawNode) -> Result<()> {
        self.advance(Phase::Nodes, node.id)?;
        self.summary.nodes += 1;
        self.sink.node(node);
        Ok(())
    }

    pub(crate) fn way(&mut self, way: RawWay) -> Result<()> {
        self.advance(Phase::Ways, way.id)?;
        self.summary.ways += 1;
        self.sink.way(way);
        Ok(())
    }

    pub(crate) fn relation(&mut self, relation: RawRelation) -> Result<()> {
        self.advance(Phase::Relations, relation.id)?;
        self.summary.relations += 1;
        self.sink.relation(relation);
        Ok(())
    }

    pub(crate) fn block_done(&mut self) {
        self.summary.blocks += 1;
    }

    pub(crate) fn finish(self) -> ParseSummary {
        self.summary
    }
}

/// Sink that keeps every element, for tests and tooling
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CollectingSink {
    pub nodes: Vec<RawNode>,
    pub ways: Vec<RawWay>,
    pub relations: Vec<RawRelation>,
}

impl ElementSink for CollectingSink {
    fn node(&mut self, node: RawNode) {
        self.nodes.push(node);
    }

    fn way(&mut self, way: RawWay) {
        self.ways.push(way);
    }

    fn relation(&mut self, relation: RawRelation) {
        self.relations.push(relation);
    }
}
