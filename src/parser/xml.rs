//! Streaming OSM XML (`.osm`, `.osm.bz2`) parser built on quick-xml
//!
//! Elements are delivered as soon as their closing tag is seen. Unknown
//! elements (`bounds`, `changeset`, ...) are skipped; structural errors
//! and bad attribute values fail the whole parse.

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use butterfly_common::{Error, Result};
use bzip2::read::MultiBzDecoder;
use indicatif::ProgressBar;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;

use super::{ElementSink, OrderedSink, Parse, ParseSummary};
use crate::elements::{parse_fixed_coordinate, Member, MemberKind, RawNode, RawRelation, RawWay};

/// How often (in bytes) the progress bar is refreshed
const PROGRESS_STEP: u64 = 1 << 20;

pub struct XmlParser {
    path: PathBuf,
    compressed: bool,
    reader: Option<Reader<Box<dyn BufRead>>>,
    progress: Option<ProgressBar>,
}

/// Element currently being assembled
enum Pending {
    None,
    Node(RawNode),
    Way(RawWay),
    Relation(RawRelation),
}

impl XmlParser {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            compressed: false,
            reader: None,
            progress: None,
        }
    }

    /// Parser for a bzip2-compressed document (multi-stream files included)
    pub fn bzip2(path: &Path) -> Self {
        Self {
            compressed: true,
            ..Self::new(path)
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }
}

impl Parse for XmlParser {
    fn read_header(&mut self) -> Result<()> {
        let file = File::open(&self.path)?;
        let input: Box<dyn BufRead> = if self.compressed {
            Box::new(BufReader::new(MultiBzDecoder::new(BufReader::new(file))))
        } else {
            Box::new(BufReader::new(file))
        };
        let mut reader = Reader::from_reader(input);
        reader.trim_text(true);

        let mut buf = Vec::new();
        loop {
            match reader
                .read_event_into(&mut buf)
                .map_err(|e| xml_error(&reader, e))?
            {
                Event::Start(e) if e.name().as_ref() == b"osm" => break,
                Event::Start(e) | Event::Empty(e) => {
                    return Err(Error::malformed(format!(
                        "expected <osm> root element, found <{}>",
                        String::from_utf8_lossy(e.name().as_ref())
                    )))
                }
                Event::Eof => return Err(Error::malformed("no <osm> root element")),
                Event::Text(_) | Event::CData(_) => {
                    return Err(Error::malformed("text before <osm> root element"))
                }
                _ => {}
            }
            buf.clear();
        }

        self.reader = Some(reader);
        Ok(())
    }

    fn parse<S: ElementSink>(&mut self, sink: &mut S) -> Result<ParseSummary> {
        let mut reader = self
            .reader
            .take()
            .ok_or_else(|| Error::InvalidInput("parse called before read_header".to_string()))?;

        let mut ordered = OrderedSink::new(sink);
        let mut pending = Pending::None;
        // <osm> is already open
        let mut depth = 1usize;
        let mut buf = Vec::new();
        let mut reported = 0u64;

        loop {
            match reader
                .read_event_into(&mut buf)
                .map_err(|e| xml_error(&reader, e))?
            {
                Event::Start(e) => {
                    depth += 1;
                    pending = open_element(&e, pending, &mut ordered)?;
                }
                Event::Empty(e) => {
                    pending = open_element(&e, pending, &mut ordered)?;
                    pending = close_element(e.name().as_ref(), pending, &mut ordered)?;
                }
                Event::End(e) => {
                    depth -= 1;
                    pending = close_element(e.name().as_ref(), pending, &mut ordered)?;
                    if depth == 0 {
                        break;
                    }
                }
                Event::Eof => {
                    return Err(Error::malformed(format!(
                        "unexpected end of document with {depth} element(s) still open"
                    )))
                }
                _ => {}
            }
            buf.clear();

            // decompressed offsets do not map onto the file size
            if let Some(pb) = self.progress.as_ref().filter(|_| !self.compressed) {
                let pos = reader.buffer_position() as u64;
                if pos - reported >= PROGRESS_STEP {
                    pb.set_position(pos);
                    reported = pos;
                }
            }
        }

        if let Some(pb) = &self.progress {
            match pb.length() {
                Some(total) if self.compressed => pb.set_position(total),
                _ => pb.set_position(reader.buffer_position() as u64),
            }
        }
        Ok(ordered.finish())
    }
}

fn xml_error<R>(reader: &Reader<R>, e: quick_xml::Error) -> Error {
    Error::malformed(format!("XML error at byte {}: {e}", reader.buffer_position()))
}

fn open_element<S: ElementSink>(
    e: &BytesStart,
    pending: Pending,
    ordered: &mut OrderedSink<'_, S>,
) -> Result<Pending> {
    match e.name().as_ref() {
        b"node" => {
            flush(pending, ordered)?;
            let attrs = Attributes::read(e)?;
            let id = attrs.id("node")?;
            let lat = attrs.coordinate("node", id, "lat")?;
            let lon = attrs.coordinate("node", id, "lon")?;
            Ok(Pending::Node(RawNode {
                id,
                lat,
                lon,
                tags: Default::default(),
            }))
        }
        b"way" => {
            flush(pending, ordered)?;
            let id = Attributes::read(e)?.id("way")?;
            Ok(Pending::Way(RawWay {
                id,
                nodes: Vec::new(),
                tags: Default::default(),
            }))
        }
        b"relation" => {
            flush(pending, ordered)?;
            let id = Attributes::read(e)?.id("relation")?;
            Ok(Pending::Relation(RawRelation {
                id,
                members: Vec::new(),
                tags: Default::default(),
            }))
        }
        b"tag" => {
            if matches!(pending, Pending::None) {
                return Ok(pending);
            }
            let attrs = Attributes::read(e)?;
            let key = attrs.required("tag", "k")?;
            let value = attrs.required("tag", "v")?;
            let mut pending = pending;
            match &mut pending {
                Pending::Node(n) => n.tags.insert(key, value),
                Pending::Way(w) => w.tags.insert(key, value),
                Pending::Relation(r) => r.tags.insert(key, value),
                Pending::None => {}
            }
            Ok(pending)
        }
        b"nd" => {
            let mut pending = pending;
            if let Pending::Way(way) = &mut pending {
                let attrs = Attributes::read(e)?;
                let node_ref = attrs.integer("nd", "ref")?;
                way.nodes.push(node_ref);
            }
            Ok(pending)
        }
        b"member" => {
            let mut pending = pending;
            if let Pending::Relation(relation) = &mut pending {
                let attrs = Attributes::read(e)?;
                let kind_name = attrs.required("member", "type")?;
                let kind = MemberKind::from_xml(&kind_name).ok_or_else(|| {
                    Error::malformed(format!(
                        "relation {}: unknown member type '{kind_name}'",
                        relation.id
                    ))
                })?;
                relation.members.push(Member {
                    role: attrs.get("role").unwrap_or_default(),
                    kind,
                    ref_id: attrs.integer("member", "ref")?,
                });
            }
            Ok(pending)
        }
        other => {
            debug!("Ignoring <{}>", String::from_utf8_lossy(other));
            Ok(pending)
        }
    }
}

fn close_element<S: ElementSink>(
    name: &[u8],
    pending: Pending,
    ordered: &mut OrderedSink<'_, S>,
) -> Result<Pending> {
    match name {
        b"node" | b"way" | b"relation" => {
            flush(pending, ordered)?;
            Ok(Pending::None)
        }
        _ => Ok(pending),
    }
}

fn flush<S: ElementSink>(pending: Pending, ordered: &mut OrderedSink<'_, S>) -> Result<()> {
    match pending {
        Pending::None => Ok(()),
        Pending::Node(node) => ordered.node(node),
        Pending::Way(way) => ordered.way(way),
        Pending::Relation(relation) => ordered.relation(relation),
    }
}

/// Unescaped attributes of one start tag
struct Attributes(Vec<(Vec<u8>, String)>);

impl Attributes {
    fn read(e: &BytesStart) -> Result<Self> {
        let mut out = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| {
                Error::malformed(format!(
                    "bad attribute on <{}>: {err}",
                    String::from_utf8_lossy(e.name().as_ref())
                ))
            })?;
            let value: Cow<str> = attr
                .unescape_value()
                .map_err(|err| Error::malformed(format!("bad attribute value: {err}")))?;
            out.push((attr.key.as_ref().to_vec(), value.into_owned()));
        }
        Ok(Self(out))
    }

    fn get(&self, name: &str) -> Option<String> {
        self.0
            .iter()
            .find(|(k, _)| k.as_slice() == name.as_bytes())
            .map(|(_, v)| v.clone())
    }

    fn required(&self, element: &str, name: &str) -> Result<String> {
        self.get(name)
            .ok_or_else(|| Error::malformed(format!("<{element}> without '{name}' attribute")))
    }

    fn integer(&self, element: &str, name: &str) -> Result<i64> {
        let raw = self.required(element, name)?;
        raw.trim().parse().map_err(|_| {
            Error::malformed(format!("<{element}> has non-numeric {name}=\"{raw}\""))
        })
    }

    fn id(&self, element: &str) -> Result<i64> {
        self.integer(element, "id")
    }

    fn coordinate(&self, element: &str, id: i64, name: &str) -> Result<i32> {
        let raw = self.required(element, name)?;
        parse_fixed_coordinate(&raw).ok_or_else(|| {
            Error::malformed(format!("{element} {id}: invalid {name}=\"{raw}\""))
        })
    }
}
