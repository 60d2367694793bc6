//! `.graph` artifact: routable nodes, directed edges and the name table
//!
//! Layout (little-endian):
//!
//! ```text
//! header  magic "BGRF" u32, version u16, reserved u16, fingerprint [32],
//!         node_count u64, edge_count u64, string_count u64
//! nodes   id i64, lat i32, lon i32, flags u8          (sorted by id)
//! edges   source i64, target i64, distance f64, cost u32,
//!         name_id u32, flags u16                      (sorted by source, target)
//! strings len u32, utf-8 bytes                        (index = name id)
//! footer  body_crc u64, file_crc u64
//! ```

use std::fs::File;
use std::io::{self, BufWriter, Read};
use std::path::Path;

use butterfly_common::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};

use super::crc::{verify_footer, ChecksumWriter};
use super::fingerprint::Fingerprint;

pub const MAGIC: u32 = 0x4247_5246; // "BGRF"
pub const VERSION: u16 = 1;
pub const HEADER_SIZE: usize = 4 + 2 + 2 + 32 + 8 * 3;

pub mod node_flags {
    pub const BARRIER: u8 = 1 << 0;
    pub const TRAFFIC_SIGNAL: u8 = 1 << 1;
}

pub mod edge_flags {
    /// Low two bits: direction of the originating way (0 both, 1 forward, 2 reverse)
    pub const DIRECTION_MASK: u16 = 0b11;
    pub const ROUNDABOUT: u16 = 1 << 2;
    pub const ACCESS_RESTRICTED: u16 = 1 << 3;
    pub const IGNORE_IN_GRID: u16 = 1 << 4;
    pub const DURATION: u16 = 1 << 5;
    pub const CONTRA_FLOW: u16 = 1 << 6;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphNode {
    pub id: i64,
    pub lat: i32,
    pub lon: i32,
    pub flags: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphEdge {
    pub source: i64,
    pub target: i64,
    /// Metres
    pub distance: f64,
    /// Deciseconds, always > 0
    pub cost: u32,
    pub name_id: u32,
    pub flags: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphFile {
    pub fingerprint: Fingerprint,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub strings: Vec<String>,
}

impl GraphFile {
    pub fn write(&self, path: &Path) -> io::Result<()> {
        let mut w = ChecksumWriter::new(BufWriter::new(File::create(path)?));

        w.put(&MAGIC.to_le_bytes())?;
        w.put(&VERSION.to_le_bytes())?;
        w.put(&0u16.to_le_bytes())?;
        w.put(&self.fingerprint)?;
        w.put(&(self.nodes.len() as u64).to_le_bytes())?;
        w.put(&(self.edges.len() as u64).to_le_bytes())?;
        w.put(&(self.strings.len() as u64).to_le_bytes())?;

        w.begin_body();
        for node in &self.nodes {
            w.put(&node.id.to_le_bytes())?;
            w.put(&node.lat.to_le_bytes())?;
            w.put(&node.lon.to_le_bytes())?;
            w.put(&[node.flags])?;
        }
        for edge in &self.edges {
            w.put(&edge.source.to_le_bytes())?;
            w.put(&edge.target.to_le_bytes())?;
            w.put(&edge.distance.to_le_bytes())?;
            w.put(&edge.cost.to_le_bytes())?;
            w.put(&edge.name_id.to_le_bytes())?;
            w.put(&edge.flags.to_le_bytes())?;
        }
        for s in &self.strings {
            w.put(&(s.len() as u32).to_le_bytes())?;
            w.put(s.as_bytes())?;
        }

        let mut inner = w.finish()?;
        inner.get_mut().sync_all()
    }

    /// Load and fully verify a graph artifact
    pub fn read(path: &Path) -> Result<Self> {
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;
        let corrupt = |msg: String| Error::malformed(format!("{}: {msg}", path.display()));

        let contents = verify_footer(&data, HEADER_SIZE).map_err(corrupt)?;
        let mut cur = contents;
        let eof = |_: io::Error| Error::malformed(format!("{}: truncated graph", path.display()));

        let magic = cur.read_u32::<LittleEndian>().map_err(eof)?;
        if magic != MAGIC {
            return Err(corrupt(format!("invalid magic 0x{magic:08x}")));
        }
        let version = cur.read_u16::<LittleEndian>().map_err(eof)?;
        if version != VERSION {
            return Err(corrupt(format!("unsupported version {version}")));
        }
        cur.read_u16::<LittleEndian>().map_err(eof)?;
        let mut fingerprint = [0u8; 32];
        cur.read_exact(&mut fingerprint).map_err(eof)?;
        let node_count = cur.read_u64::<LittleEndian>().map_err(eof)?;
        let edge_count = cur.read_u64::<LittleEndian>().map_err(eof)?;
        let string_count = cur.read_u64::<LittleEndian>().map_err(eof)?;

        let mut nodes = Vec::new();
        for _ in 0..node_count {
            nodes.push(GraphNode {
                id: cur.read_i64::<LittleEndian>().map_err(eof)?,
                lat: cur.read_i32::<LittleEndian>().map_err(eof)?,
                lon: cur.read_i32::<LittleEndian>().map_err(eof)?,
                flags: cur.read_u8().map_err(eof)?,
            });
        }

        let mut edges = Vec::new();
        for _ in 0..edge_count {
            edges.push(GraphEdge {
                source: cur.read_i64::<LittleEndian>().map_err(eof)?,
                target: cur.read_i64::<LittleEndian>().map_err(eof)?,
                distance: cur.read_f64::<LittleEndian>().map_err(eof)?,
                cost: cur.read_u32::<LittleEndian>().map_err(eof)?,
                name_id: cur.read_u32::<LittleEndian>().map_err(eof)?,
                flags: cur.read_u16::<LittleEndian>().map_err(eof)?,
            });
        }

        let mut strings = Vec::new();
        for _ in 0..string_count {
            let len = cur.read_u32::<LittleEndian>().map_err(eof)? as usize;
            if len > cur.len() {
                return Err(corrupt("string runs past end of table".to_string()));
            }
            let (bytes, rest) = cur.split_at(len);
            let s = std::str::from_utf8(bytes)
                .map_err(|_| corrupt("string table entry is not UTF-8".to_string()))?;
            strings.push(s.to_string());
            cur = rest;
        }

        if !cur.is_empty() {
            return Err(corrupt(format!("{} trailing bytes", cur.len())));
        }

        Ok(Self {
            fingerprint,
            nodes,
            edges,
            strings,
        })
    }

    /// Name of an edge, resolved through the string table
    pub fn name(&self, edge: &GraphEdge) -> Option<&str> {
        self.strings.get(edge.name_id as usize).map(String::as_str)
    }

    /// Binary search of the id-sorted node table
    pub fn node(&self, id: i64) -> Option<&GraphNode> {
        self.nodes
            .binary_search_by_key(&id, |n| n.id)
            .ok()
            .map(|i| &self.nodes[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> GraphFile {
        GraphFile {
            fingerprint: [7u8; 32],
            nodes: vec![
                GraphNode { id: 1, lat: 0, lon: 0, flags: 0 },
                GraphNode { id: 2, lat: 0, lon: 10_000_000, flags: node_flags::TRAFFIC_SIGNAL },
            ],
            edges: vec![GraphEdge {
                source: 1,
                target: 2,
                distance: 111_195.08,
                cost: 160_121,
                name_id: 1,
                flags: edge_flags::ROUNDABOUT | 1,
            }],
            strings: vec![String::new(), "Ringweg".to_string()],
        }
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.graph");
        let graph = sample();
        graph.write(&path).unwrap();

        let loaded = GraphFile::read(&path).unwrap();
        assert_eq!(loaded, graph);
        assert_eq!(loaded.name(&loaded.edges[0]), Some("Ringweg"));
        assert_eq!(loaded.node(2).map(|n| n.flags), Some(node_flags::TRAFFIC_SIGNAL));
        assert!(loaded.node(3).is_none());
    }

    #[test]
    fn test_corruption_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.graph");
        sample().write(&path).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[HEADER_SIZE + 3] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();

        let err = GraphFile::read(&path).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_wrong_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.graph");
        let mut w = ChecksumWriter::new(Vec::new());
        w.put(&[0u8; HEADER_SIZE]).unwrap();
        w.begin_body();
        std::fs::write(&path, w.finish().unwrap()).unwrap();

        let err = GraphFile::read(&path).unwrap_err();
        assert!(err.to_string().contains("invalid magic"));
    }
}
