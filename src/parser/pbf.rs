//! Protocol-buffer binary (`.osm.pbf`) parser
//!
//! The file is a sequence of `[u32 BE length][BlobHeader][Blob]` frames. The
//! first frame must be an `OSMHeader`; every following `OSMData` frame holds
//! one primitive block. `read_header` validates the header frame and indexes
//! all data frames; `parse` then decodes them in fixed-size batches on a
//! rayon pool and delivers the results in file order.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use butterfly_common::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;
use indicatif::ProgressBar;
use protobuf::Message;
use rayon::prelude::*;
use tracing::{debug, info};

use super::proto::fileformat::{Blob, BlobHeader};
use super::proto::osmformat::{relation::MemberType, HeaderBlock, PrimitiveBlock, PrimitiveGroup};
use super::{ElementSink, OrderedSink, Parse, ParseSummary};
use crate::elements::{Member, MemberKind, RawNode, RawRelation, RawWay, Tags};

pub(crate) const MAX_BLOB_HEADER_SIZE: u32 = 64 * 1024;
pub(crate) const MAX_BLOB_SIZE: usize = 32 * 1024 * 1024;

const SUPPORTED_FEATURES: &[&str] = &["OsmSchema-V0.6", "DenseNodes"];

/// Blocks handed to the pool per round; bounds memory held in flight
const BLOCKS_PER_BATCH: usize = 64;

/// Location of one `OSMData` blob inside the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockEntry {
    offset: u64,
    size: usize,
}

struct FrameHeader {
    kind: String,
    data_offset: u64,
    data_size: usize,
}

/// Primitives of one decoded block, in block order
#[derive(Debug, Default)]
struct DecodedBlock {
    nodes: Vec<RawNode>,
    ways: Vec<RawWay>,
    relations: Vec<RawRelation>,
}

pub struct PbfParser {
    path: PathBuf,
    threads: usize,
    reader: Option<BufReader<File>>,
    blocks: Vec<BlockEntry>,
    progress: Option<ProgressBar>,
}

impl PbfParser {
    pub fn new(path: &Path, threads: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            threads: threads.max(1),
            reader: None,
            blocks: Vec::new(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    fn index_blocks(&mut self, reader: &mut BufReader<File>, mut pos: u64, file_len: u64) -> Result<()> {
        self.blocks.clear();
        while pos < file_len {
            let frame = read_frame_header(reader, pos, file_len)?;
            if frame.kind == "OSMData" {
                self.blocks.push(BlockEntry {
                    offset: frame.data_offset,
                    size: frame.data_size,
                });
            } else {
                debug!("Skipping unknown blob type '{}' at offset {}", frame.kind, pos);
            }
            pos = frame.data_offset + frame.data_size as u64;
        }
        Ok(())
    }
}

impl Parse for PbfParser {
    fn read_header(&mut self) -> Result<()> {
        let file = File::open(&self.path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        if file_len == 0 {
            return Err(Error::malformed("empty PBF file"));
        }

        let frame = read_frame_header(&mut reader, 0, file_len)?;
        if frame.kind != "OSMHeader" {
            return Err(Error::malformed(format!(
                "first blob is '{}', expected 'OSMHeader'",
                frame.kind
            )));
        }

        let blob = read_blob(&mut reader, frame.data_offset, frame.data_size)?;
        let data = decompress_blob(&blob)?;
        let header = HeaderBlock::parse_from_bytes(&data)
            .map_err(|e| Error::malformed(format!("invalid OSMHeader block: {e}")))?;

        for feature in &header.required_features {
            if !SUPPORTED_FEATURES.contains(&feature.as_str()) {
                return Err(Error::malformed(format!(
                    "unsupported required feature '{feature}'"
                )));
            }
        }
        if let Some(program) = header.writingprogram.as_deref() {
            debug!("PBF written by {}", program);
        }

        self.index_blocks(&mut reader, frame.data_offset + frame.data_size as u64, file_len)?;
        info!(
            "Indexed {} data blocks in {}",
            self.blocks.len(),
            self.path.display()
        );

        self.reader = Some(reader);
        Ok(())
    }

    fn parse<S: ElementSink>(&mut self, sink: &mut S) -> Result<ParseSummary> {
        let mut reader = self
            .reader
            .take()
            .ok_or_else(|| Error::InvalidInput("parse called before read_header".to_string()))?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .map_err(|e| Error::InvalidInput(format!("failed to build decode pool: {e}")))?;

        let mut ordered = OrderedSink::new(sink);
        for batch in self.blocks.chunks(BLOCKS_PER_BATCH) {
            let mut raw = Vec::with_capacity(batch.len());
            for entry in batch {
                raw.push(read_blob(&mut reader, entry.offset, entry.size)?);
            }

            let decoded: Vec<Result<DecodedBlock>> =
                pool.install(|| raw.par_iter().map(|bytes| decode_block(bytes)).collect());

            for (entry, block) in batch.iter().zip(decoded) {
                let block = block?;
                for node in block.nodes {
                    ordered.node(node)?;
                }
                for way in block.ways {
                    ordered.way(way)?;
                }
                for relation in block.relations {
                    ordered.relation(relation)?;
                }
                ordered.block_done();
                if let Some(pb) = &self.progress {
                    pb.inc(entry.size as u64);
                }
            }
        }

        Ok(ordered.finish())
    }
}

fn truncated(what: &str) -> impl Fn(std::io::Error) -> Error + '_ {
    move |e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            Error::malformed(format!("truncated {what}"))
        } else {
            Error::IoError(e)
        }
    }
}

fn read_frame_header(reader: &mut BufReader<File>, pos: u64, file_len: u64) -> Result<FrameHeader> {
    if file_len - pos < 4 {
        return Err(Error::malformed(format!(
            "truncated blob header length at offset {pos}"
        )));
    }
    reader.seek(SeekFrom::Start(pos))?;
    let header_len = reader
        .read_u32::<BigEndian>()
        .map_err(truncated("blob header length"))?;
    if header_len > MAX_BLOB_HEADER_SIZE {
        return Err(Error::malformed(format!(
            "blob header of {header_len} bytes at offset {pos} exceeds {MAX_BLOB_HEADER_SIZE}"
        )));
    }
    if pos + 4 + header_len as u64 > file_len {
        return Err(Error::malformed(format!(
            "blob header at offset {pos} runs past end of file"
        )));
    }

    let mut buf = vec![0u8; header_len as usize];
    reader.read_exact(&mut buf).map_err(truncated("blob header"))?;
    let header = BlobHeader::parse_from_bytes(&buf)
        .map_err(|e| Error::malformed(format!("invalid blob header at offset {pos}: {e}")))?;

    let datasize = header.datasize.unwrap_or(-1);
    let data_size = usize::try_from(datasize)
        .map_err(|_| Error::malformed(format!("negative blob size at offset {pos}")))?;
    if data_size > MAX_BLOB_SIZE {
        return Err(Error::malformed(format!(
            "blob of {data_size} bytes at offset {pos} exceeds {MAX_BLOB_SIZE}"
        )));
    }

    let data_offset = pos + 4 + header_len as u64;
    if data_offset + data_size as u64 > file_len {
        return Err(Error::malformed(format!(
            "blob at offset {pos} declares {data_size} bytes past end of file"
        )));
    }

    Ok(FrameHeader {
        kind: header.type_.unwrap_or_default(),
        data_offset,
        data_size,
    })
}

fn read_blob(reader: &mut BufReader<File>, offset: u64, size: usize) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; size];
    reader.read_exact(&mut buf).map_err(truncated("blob"))?;
    Ok(buf)
}

/// Unwrap a `Blob` message into the raw block bytes
pub(crate) fn decompress_blob(bytes: &[u8]) -> Result<Vec<u8>> {
    let blob = Blob::parse_from_bytes(bytes)
        .map_err(|e| Error::malformed(format!("invalid blob: {e}")))?;

    let expected = match blob.raw_size {
        Some(size) => Some(
            usize::try_from(size)
                .ok()
                .filter(|s| *s <= MAX_BLOB_SIZE)
                .ok_or_else(|| Error::malformed(format!("invalid blob raw_size {size}")))?,
        ),
        None => None,
    };

    let data = if let Some(raw) = blob.raw {
        raw
    } else if let Some(compressed) = blob.zlib_data {
        let capacity = expected.ok_or_else(|| Error::malformed("zlib blob without raw_size"))?;
        let mut out = Vec::with_capacity(capacity);
        ZlibDecoder::new(compressed.as_slice())
            .take(MAX_BLOB_SIZE as u64 + 1)
            .read_to_end(&mut out)
            .map_err(|e| Error::malformed(format!("zlib decode failed: {e}")))?;
        out
    } else if blob.lzma_data.is_some() {
        return Err(Error::malformed("lzma blob compression is not supported"));
    } else if blob.lz4_data.is_some() {
        return Err(Error::malformed("lz4 blob compression is not supported"));
    } else if blob.zstd_data.is_some() {
        return Err(Error::malformed("zstd blob compression is not supported"));
    } else {
        return Err(Error::malformed("blob carries no data"));
    };

    if let Some(expected) = expected {
        if data.len() != expected {
            return Err(Error::malformed(format!(
                "blob decoded to {} bytes, header declares {expected}",
                data.len()
            )));
        }
    }
    Ok(data)
}

fn decode_block(bytes: &[u8]) -> Result<DecodedBlock> {
    let data = decompress_blob(bytes)?;
    let block = PrimitiveBlock::parse_from_bytes(&data)
        .map_err(|e| Error::malformed(format!("invalid primitive block: {e}")))?;
    BlockDecoder::new(&block)?.decode()
}

/// Per-block decoding context: string table and coordinate transform
struct BlockDecoder<'b> {
    block: &'b PrimitiveBlock,
    strings: Vec<&'b str>,
    granularity: i64,
    lat_offset: i64,
    lon_offset: i64,
}

impl<'b> BlockDecoder<'b> {
    fn new(block: &'b PrimitiveBlock) -> Result<Self> {
        let strings = match block.stringtable.as_ref() {
            Some(table) => table
                .s
                .iter()
                .map(|s| {
                    std::str::from_utf8(s)
                        .map_err(|_| Error::malformed("string table entry is not valid UTF-8"))
                })
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let granularity = block.granularity.unwrap_or(100) as i64;
        if granularity <= 0 {
            return Err(Error::malformed(format!("invalid granularity {granularity}")));
        }

        Ok(Self {
            block,
            strings,
            granularity,
            lat_offset: block.lat_offset.unwrap_or(0),
            lon_offset: block.lon_offset.unwrap_or(0),
        })
    }

    fn decode(&self) -> Result<DecodedBlock> {
        let mut out = DecodedBlock::default();
        for group in &self.block.primitivegroup {
            self.decode_group(group, &mut out)?;
        }
        Ok(out)
    }

    fn decode_group(&self, group: &PrimitiveGroup, out: &mut DecodedBlock) -> Result<()> {
        for node in &group.nodes {
            let id = node.id.unwrap_or_default();
            out.nodes.push(RawNode {
                id,
                lat: self.coordinate(self.lat_offset, node.lat.unwrap_or_default())?,
                lon: self.coordinate(self.lon_offset, node.lon.unwrap_or_default())?,
                tags: self.tags(&node.keys, &node.vals)?,
            });
        }

        if let Some(dense) = group.dense.as_ref() {
            if dense.id.len() != dense.lat.len() || dense.id.len() != dense.lon.len() {
                return Err(Error::malformed("dense node arrays differ in length"));
            }

            let mut kv = dense.keys_vals.iter();
            let (mut id, mut lat, mut lon) = (0i64, 0i64, 0i64);
            for i in 0..dense.id.len() {
                id = accumulate(id, dense.id[i], "dense node id")?;
                lat = accumulate(lat, dense.lat[i], "dense node lat")?;
                lon = accumulate(lon, dense.lon[i], "dense node lon")?;

                let mut tags = Tags::new();
                if !dense.keys_vals.is_empty() {
                    loop {
                        let key = *kv
                            .next()
                            .ok_or_else(|| Error::malformed("dense keys_vals ended early"))?;
                        if key == 0 {
                            break;
                        }
                        let value = *kv
                            .next()
                            .ok_or_else(|| Error::malformed("dense keys_vals ended early"))?;
                        tags.insert(self.string(key as i64)?, self.string(value as i64)?);
                    }
                }

                out.nodes.push(RawNode {
                    id,
                    lat: self.coordinate(self.lat_offset, lat)?,
                    lon: self.coordinate(self.lon_offset, lon)?,
                    tags,
                });
            }
        }

        for way in &group.ways {
            let mut node_id = 0i64;
            let nodes = way
                .refs
                .iter()
                .map(|delta| -> Result<i64> {
                    node_id = accumulate(node_id, *delta, "way node ref")?;
                    Ok(node_id)
                })
                .collect::<Result<Vec<_>>>()?;
            out.ways.push(RawWay {
                id: way.id.unwrap_or_default(),
                nodes,
                tags: self.tags(&way.keys, &way.vals)?,
            });
        }

        for relation in &group.relations {
            if relation.roles_sid.len() != relation.memids.len()
                || relation.memids.len() != relation.types.len()
            {
                return Err(Error::malformed("relation member arrays differ in length"));
            }

            let mut members = Vec::with_capacity(relation.memids.len());
            let mut ref_id = 0i64;
            for i in 0..relation.memids.len() {
                ref_id = accumulate(ref_id, relation.memids[i], "relation member id")?;
                let kind = match relation.types[i].enum_value() {
                    Ok(MemberType::NODE) => MemberKind::Node,
                    Ok(MemberType::WAY) => MemberKind::Way,
                    Ok(MemberType::RELATION) => MemberKind::Relation,
                    Err(v) => {
                        return Err(Error::malformed(format!("unknown member type {v}")))
                    }
                };
                members.push(Member {
                    role: self.string(relation.roles_sid[i] as i64)?.to_string(),
                    kind,
                    ref_id,
                });
            }

            out.relations.push(RawRelation {
                id: relation.id.unwrap_or_default(),
                members,
                tags: self.tags(&relation.keys, &relation.vals)?,
            });
        }

        Ok(())
    }

    fn string(&self, index: i64) -> Result<&'b str> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.strings.get(i).copied())
            .ok_or_else(|| Error::malformed(format!("string index {index} out of range")))
    }

    fn tags(&self, keys: &[u32], vals: &[u32]) -> Result<Tags> {
        if keys.len() != vals.len() {
            return Err(Error::malformed("tag key and value counts differ"));
        }
        let mut tags = Tags::new();
        for (k, v) in keys.iter().zip(vals) {
            tags.insert(self.string(*k as i64)?, self.string(*v as i64)?);
        }
        Ok(tags)
    }

    /// Raw block coordinate to 1e-7 fixed point
    fn coordinate(&self, offset: i64, raw: i64) -> Result<i32> {
        let nanodegrees = raw
            .checked_mul(self.granularity)
            .and_then(|v| v.checked_add(offset))
            .ok_or_else(|| Error::malformed("coordinate overflow"))?;
        let half = if nanodegrees < 0 { -50 } else { 50 };
        nanodegrees
            .checked_add(half)
            .and_then(|v| i32::try_from(v / 100).ok())
            .ok_or_else(|| Error::malformed(format!("coordinate {nanodegrees} out of range")))
    }
}

/// Apply one delta-coded step
fn accumulate(previous: i64, delta: i64, what: &str) -> Result<i64> {
    previous
        .checked_add(delta)
        .ok_or_else(|| Error::malformed(format!("{what} delta overflow")))
}
