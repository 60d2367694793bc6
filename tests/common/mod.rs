//! Fixture builders shared by the integration tests
//!
//! The same [`MapData`] can be written as OSM XML or as PBF so both parsers
//! are fed identical content.

#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use butterfly_extract::elements::{Member, MemberKind, RawNode, RawRelation, RawWay, Tags};
use butterfly_extract::parser::proto::fileformat::{Blob, BlobHeader};
use butterfly_extract::parser::proto::osmformat::{
    relation::MemberType, DenseNodes, HeaderBlock, PrimitiveBlock, PrimitiveGroup, Relation,
    StringTable, Way,
};
use bzip2::write::BzEncoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use protobuf::{EnumOrUnknown, Message, MessageField};

pub fn car_profile() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("profiles/car.yaml")
}

fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs.iter().copied().collect()
}

#[derive(Debug, Clone, Default)]
pub struct MapData {
    pub nodes: Vec<RawNode>,
    pub ways: Vec<RawWay>,
    pub relations: Vec<RawRelation>,
}

impl MapData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Node at (lat, lon) degrees
    pub fn node(mut self, id: i64, lat: f64, lon: f64, pairs: &[(&str, &str)]) -> Self {
        self.nodes.push(RawNode {
            id,
            lat: (lat * 1e7).round() as i32,
            lon: (lon * 1e7).round() as i32,
            tags: tags(pairs),
        });
        self
    }

    pub fn way(mut self, id: i64, nodes: &[i64], pairs: &[(&str, &str)]) -> Self {
        self.ways.push(RawWay {
            id,
            nodes: nodes.to_vec(),
            tags: tags(pairs),
        });
        self
    }

    /// `type=restriction` relation with one from way, via node and to way
    pub fn restriction(mut self, id: i64, from: i64, via: i64, to: i64, value: &str) -> Self {
        let member = |role: &str, kind, ref_id| Member {
            role: role.to_string(),
            kind,
            ref_id,
        };
        self.relations.push(RawRelation {
            id,
            members: vec![
                member("from", MemberKind::Way, from),
                member("via", MemberKind::Node, via),
                member("to", MemberKind::Way, to),
            ],
            tags: tags(&[("type", "restriction"), ("restriction", value)]),
        });
        self
    }

    pub fn write_xml(&self, path: &Path) {
        std::fs::write(path, self.to_xml()).unwrap();
    }

    pub fn write_xml_bz2(&self, path: &Path) {
        let mut encoder = BzEncoder::new(File::create(path).unwrap(), bzip2::Compression::best());
        encoder.write_all(self.to_xml().as_bytes()).unwrap();
        encoder.finish().unwrap();
    }

    fn to_xml(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str("<osm version=\"0.6\" generator=\"butterfly-test\">\n");
        out.push_str("  <bounds minlat=\"-1\" minlon=\"-1\" maxlat=\"1\" maxlon=\"1\"/>\n");

        for node in &self.nodes {
            out.push_str(&format!(
                "  <node id=\"{}\" lat=\"{}\" lon=\"{}\"",
                node.id,
                decimal(node.lat),
                decimal(node.lon)
            ));
            if node.tags.is_empty() {
                out.push_str("/>\n");
            } else {
                out.push_str(">\n");
                push_xml_tags(&mut out, &node.tags);
                out.push_str("  </node>\n");
            }
        }
        for way in &self.ways {
            out.push_str(&format!("  <way id=\"{}\">\n", way.id));
            for node_ref in &way.nodes {
                out.push_str(&format!("    <nd ref=\"{node_ref}\"/>\n"));
            }
            push_xml_tags(&mut out, &way.tags);
            out.push_str("  </way>\n");
        }
        for relation in &self.relations {
            out.push_str(&format!("  <relation id=\"{}\">\n", relation.id));
            for m in &relation.members {
                let kind = match m.kind {
                    MemberKind::Node => "node",
                    MemberKind::Way => "way",
                    MemberKind::Relation => "relation",
                };
                out.push_str(&format!(
                    "    <member type=\"{kind}\" ref=\"{}\" role=\"{}\"/>\n",
                    m.ref_id,
                    escape(&m.role)
                ));
            }
            push_xml_tags(&mut out, &relation.tags);
            out.push_str("  </relation>\n");
        }
        out.push_str("</osm>\n");
        out
    }

    /// One block per primitive kind: dense nodes, ways, relations
    pub fn write_pbf(&self, path: &Path) {
        self.write_pbf_chunked(path, usize::MAX);
    }

    /// At most `per_block` primitives per data block. Blocks alternate
    /// between zlib and raw blobs, starting with zlib.
    pub fn write_pbf_chunked(&self, path: &Path, per_block: usize) {
        let mut file = File::create(path).unwrap();
        let mut blocks = 0usize;
        let mut emit = |file: &mut File, strings: Strings, group: PrimitiveGroup| {
            write_block(file, strings, group, blocks % 2 == 0);
            blocks += 1;
        };

        let mut header = HeaderBlock::new();
        header.required_features = vec!["OsmSchema-V0.6".to_string(), "DenseNodes".to_string()];
        header.writingprogram = Some("butterfly-test".to_string());
        write_frame(&mut file, "OSMHeader", &header.write_to_bytes().unwrap(), true);

        for chunk in self.nodes.chunks(per_block) {
            let mut strings = Strings::default();
            let mut dense = DenseNodes::new();
            let (mut id, mut lat, mut lon) = (0i64, 0i64, 0i64);
            for node in chunk {
                dense.id.push(node.id - id);
                dense.lat.push(node.lat as i64 - lat);
                dense.lon.push(node.lon as i64 - lon);
                id = node.id;
                lat = node.lat as i64;
                lon = node.lon as i64;
                for (k, v) in node.tags.iter() {
                    dense.keys_vals.push(strings.index(k) as i32);
                    dense.keys_vals.push(strings.index(v) as i32);
                }
                dense.keys_vals.push(0);
            }
            let mut group = PrimitiveGroup::new();
            group.dense = MessageField::some(dense);
            emit(&mut file, strings, group);
        }

        for chunk in self.ways.chunks(per_block) {
            let mut strings = Strings::default();
            let mut group = PrimitiveGroup::new();
            for raw in chunk {
                let mut way = Way::new();
                way.id = Some(raw.id);
                for (k, v) in raw.tags.iter() {
                    way.keys.push(strings.index(k));
                    way.vals.push(strings.index(v));
                }
                let mut prev = 0i64;
                for node_ref in &raw.nodes {
                    way.refs.push(node_ref - prev);
                    prev = *node_ref;
                }
                group.ways.push(way);
            }
            emit(&mut file, strings, group);
        }

        for chunk in self.relations.chunks(per_block) {
            let mut strings = Strings::default();
            let mut group = PrimitiveGroup::new();
            for raw in chunk {
                let mut relation = Relation::new();
                relation.id = Some(raw.id);
                for (k, v) in raw.tags.iter() {
                    relation.keys.push(strings.index(k));
                    relation.vals.push(strings.index(v));
                }
                let mut prev = 0i64;
                for m in &raw.members {
                    relation.roles_sid.push(strings.index(&m.role) as i32);
                    relation.memids.push(m.ref_id - prev);
                    prev = m.ref_id;
                    let kind = match m.kind {
                        MemberKind::Node => MemberType::NODE,
                        MemberKind::Way => MemberType::WAY,
                        MemberKind::Relation => MemberType::RELATION,
                    };
                    relation.types.push(EnumOrUnknown::new(kind));
                }
                group.relations.push(relation);
            }
            emit(&mut file, strings, group);
        }
    }
}

/// Fixed point to an exact decimal string
fn decimal(fixed: i32) -> String {
    let sign = if fixed < 0 { "-" } else { "" };
    let abs = (fixed as i64).abs();
    format!("{sign}{}.{:07}", abs / 10_000_000, abs % 10_000_000)
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('"', "&quot;")
}

fn push_xml_tags(out: &mut String, tags: &Tags) {
    for (k, v) in tags.iter() {
        out.push_str(&format!(
            "    <tag k=\"{}\" v=\"{}\"/>\n",
            escape(k),
            escape(v)
        ));
    }
}

/// Per-block string table; index 0 is the reserved empty string
#[derive(Default)]
struct Strings(Vec<String>);

impl Strings {
    fn index(&mut self, s: &str) -> u32 {
        if self.0.is_empty() {
            self.0.push(String::new());
        }
        if let Some(pos) = self.0.iter().skip(1).position(|x| x == s) {
            return pos as u32 + 1;
        }
        self.0.push(s.to_string());
        (self.0.len() - 1) as u32
    }

    fn into_table(mut self) -> StringTable {
        if self.0.is_empty() {
            self.0.push(String::new());
        }
        let mut table = StringTable::new();
        table.s = self.0.into_iter().map(String::into_bytes).collect();
        table
    }
}

fn write_block(file: &mut File, strings: Strings, group: PrimitiveGroup, compress: bool) {
    let mut block = PrimitiveBlock::new();
    block.stringtable = MessageField::some(strings.into_table());
    block.primitivegroup.push(group);
    write_frame(file, "OSMData", &block.write_to_bytes().unwrap(), compress);
}

/// Write one `[len][BlobHeader][Blob]` frame
pub fn write_frame(file: &mut File, kind: &str, payload: &[u8], compress: bool) {
    let mut blob = Blob::new();
    blob.raw_size = Some(payload.len() as i32);
    if compress {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload).unwrap();
        blob.zlib_data = Some(encoder.finish().unwrap());
    } else {
        blob.raw = Some(payload.to_vec());
    }
    let blob_bytes = blob.write_to_bytes().unwrap();

    let mut header = BlobHeader::new();
    header.type_ = Some(kind.to_string());
    header.datasize = Some(blob_bytes.len() as i32);
    let header_bytes = header.write_to_bytes().unwrap();

    file.write_all(&(header_bytes.len() as u32).to_be_bytes()).unwrap();
    file.write_all(&header_bytes).unwrap();
    file.write_all(&blob_bytes).unwrap();
}

/// Long chain of residential ways, 1-2-3-...-`len`, with a `no_u_turn`
/// restriction at each of the first `restrictions` joints
pub fn chain_network(len: i64, restrictions: i64) -> MapData {
    let mut data = MapData::new();
    for id in 1..=len {
        let tags: &[(&str, &str)] = if id % 7 == 0 {
            &[("highway", "traffic_signals")]
        } else {
            &[]
        };
        data = data.node(id, 50.0, 4.0 + id as f64 * 0.0001, tags);
    }
    for id in 1..len {
        data = data.way(1000 + id, &[id, id + 1], &[("highway", "residential")]);
    }
    for id in 1..=restrictions {
        data = data.restriction(5000 + id, 1000 + id, id + 1, 1000 + id + 1, "no_u_turn");
    }
    data
}

/// Small network used by several tests
///
/// ```text
///   1 ---- 2 ---- 3        way 10: 1-2 (primary)
///          |               way 11: 2-3 (primary, oneway)
///          4 ---- 5        way 12: 2-4 (residential)
///                          way 13: 4-5 (footway, rejected by car)
/// ```
pub fn sample_network() -> MapData {
    MapData::new()
        .node(1, 50.0, 4.0, &[])
        .node(2, 50.0, 4.001, &[("highway", "traffic_signals")])
        .node(3, 50.0, 4.002, &[])
        .node(4, 49.999, 4.001, &[])
        .node(5, 49.999, 4.002, &[("barrier", "bollard")])
        .way(10, &[1, 2], &[("highway", "primary"), ("name", "Chaussée de Wavre")])
        .way(11, &[2, 3], &[("highway", "primary"), ("oneway", "yes")])
        .way(12, &[2, 4], &[("highway", "residential"), ("name", "Rue & Co")])
        .way(13, &[4, 5], &[("highway", "footway")])
        .restriction(100, 10, 2, 12, "no_right_turn")
        .restriction(101, 13, 4, 12, "no_u_turn")
}
