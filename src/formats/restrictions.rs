//! `.graph.restrictions` artifact: resolved turn restrictions
//!
//! Layout (little-endian):
//!
//! ```text
//! header  magic "BRST" u32, version u16, reserved u16, fingerprint [32], count u64
//! records from_way i64, via_node i64, to_way i64,
//!         from_node i64, to_node i64, kind u8
//! footer  body_crc u64, file_crc u64
//! ```

use std::fs::File;
use std::io::{self, BufWriter, Read};
use std::path::Path;

use butterfly_common::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};

use super::crc::{verify_footer, ChecksumWriter};
use super::fingerprint::Fingerprint;

pub const MAGIC: u32 = 0x4252_5354; // "BRST"
pub const VERSION: u16 = 1;
pub const HEADER_SIZE: usize = 4 + 2 + 2 + 32 + 8;

/// `no_*` restrictions forbid the turn, `only_*` ones make it the sole option
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RestrictionKind {
    Prohibitive = 0,
    Mandatory = 1,
}

impl RestrictionKind {
    /// Kind of a `restriction=*` value, `None` when it is neither `no_*` nor `only_*`
    pub fn from_tag(value: &str) -> Option<Self> {
        if value.starts_with("no_") {
            Some(RestrictionKind::Prohibitive)
        } else if value.starts_with("only_") {
            Some(RestrictionKind::Mandatory)
        } else {
            None
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RestrictionKind::Prohibitive),
            1 => Some(RestrictionKind::Mandatory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TurnRestriction {
    pub from_way: i64,
    pub via_node: i64,
    pub to_way: i64,
    pub kind: RestrictionKind,
    /// Neighbour of the via node on the from way
    pub from_node: i64,
    /// Neighbour of the via node on the to way
    pub to_node: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestrictionFile {
    pub fingerprint: Fingerprint,
    pub restrictions: Vec<TurnRestriction>,
}

impl RestrictionFile {
    pub fn write(&self, path: &Path) -> io::Result<()> {
        let mut w = ChecksumWriter::new(BufWriter::new(File::create(path)?));

        w.put(&MAGIC.to_le_bytes())?;
        w.put(&VERSION.to_le_bytes())?;
        w.put(&0u16.to_le_bytes())?;
        w.put(&self.fingerprint)?;
        w.put(&(self.restrictions.len() as u64).to_le_bytes())?;

        w.begin_body();
        for r in &self.restrictions {
            w.put(&r.from_way.to_le_bytes())?;
            w.put(&r.via_node.to_le_bytes())?;
            w.put(&r.to_way.to_le_bytes())?;
            w.put(&r.from_node.to_le_bytes())?;
            w.put(&r.to_node.to_le_bytes())?;
            w.put(&[r.kind as u8])?;
        }

        let mut inner = w.finish()?;
        inner.get_mut().sync_all()
    }

    pub fn read(path: &Path) -> Result<Self> {
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;
        let corrupt = |msg: String| Error::malformed(format!("{}: {msg}", path.display()));
        let eof =
            |_: io::Error| Error::malformed(format!("{}: truncated restrictions", path.display()));

        let mut cur = verify_footer(&data, HEADER_SIZE).map_err(corrupt)?;

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
        let count = cur.read_u64::<LittleEndian>().map_err(eof)?;

        let mut restrictions = Vec::new();
        for _ in 0..count {
            let from_way = cur.read_i64::<LittleEndian>().map_err(eof)?;
            let via_node = cur.read_i64::<LittleEndian>().map_err(eof)?;
            let to_way = cur.read_i64::<LittleEndian>().map_err(eof)?;
            let from_node = cur.read_i64::<LittleEndian>().map_err(eof)?;
            let to_node = cur.read_i64::<LittleEndian>().map_err(eof)?;
            let raw_kind = cur.read_u8().map_err(eof)?;
            let kind = RestrictionKind::from_u8(raw_kind)
                .ok_or_else(|| corrupt(format!("unknown restriction kind {raw_kind}")))?;
            restrictions.push(TurnRestriction {
                from_way,
                via_node,
                to_way,
                kind,
                from_node,
                to_node,
            });
        }

        if !cur.is_empty() {
            return Err(corrupt(format!("{} trailing bytes", cur.len())));
        }

        Ok(Self {
            fingerprint,
            restrictions,
        })
    }
}
