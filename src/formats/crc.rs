//! CRC-64 checksums for the output artifacts

use std::io::{self, Write};

use crc::{Crc, CRC_64_GO_ISO};

pub const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_GO_ISO);

pub fn checksum(data: &[u8]) -> u64 {
    CRC64.checksum(data)
}

/// Writer that tracks two running checksums: one over everything written
/// (the file CRC) and one over the body only, started by [`begin_body`].
///
/// [`begin_body`]: ChecksumWriter::begin_body
pub struct ChecksumWriter<W: Write> {
    inner: W,
    file: crc::Digest<'static, u64>,
    body: Option<crc::Digest<'static, u64>>,
}

impl<W: Write> ChecksumWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            file: CRC64.digest(),
            body: None,
        }
    }

    pub fn begin_body(&mut self) {
        self.body = Some(CRC64.digest());
    }

    pub fn put(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes)?;
        self.file.update(bytes);
        if let Some(body) = &mut self.body {
            body.update(bytes);
        }
        Ok(())
    }

    /// Write the `[body crc][file crc]` footer and flush
    pub fn finish(self) -> io::Result<W> {
        let body_crc = self.body.map_or_else(|| CRC64.digest().finalize(), |d| d.finalize());
        let file_crc = self.file.finalize();
        let mut inner = self.inner;
        inner.write_all(&body_crc.to_le_bytes())?;
        inner.write_all(&file_crc.to_le_bytes())?;
        inner.flush()?;
        Ok(inner)
    }
}

/// Split a whole artifact into `(contents, body_crc, file_crc)` and verify
/// both checksums. `header_len` marks where the body starts.
pub fn verify_footer(data: &[u8], header_len: usize) -> Result<&[u8], String> {
    if data.len() < header_len + 16 {
        return Err(format!("file too short ({} bytes)", data.len()));
    }
    let split = data.len() - 16;
    let (contents, footer) = data.split_at(split);
    let mut word = [0u8; 8];
    word.copy_from_slice(&footer[0..8]);
    let body_crc = u64::from_le_bytes(word);
    word.copy_from_slice(&footer[8..16]);
    let file_crc = u64::from_le_bytes(word);

    if checksum(&contents[header_len..]) != body_crc {
        return Err("body checksum mismatch".to_string());
    }
    if checksum(contents) != file_crc {
        return Err("file checksum mismatch".to_string());
    }
    Ok(contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_footer_verifies() {
        let mut writer = ChecksumWriter::new(Vec::new());
        writer.put(b"HEAD").unwrap();
        writer.begin_body();
        writer.put(b"hello ").unwrap();
        writer.put(b"world").unwrap();
        let bytes = writer.finish().unwrap();

        assert_eq!(bytes.len(), 4 + 11 + 16);
        let contents = verify_footer(&bytes, 4).unwrap();
        assert_eq!(&contents[4..], b"hello world");
        assert_eq!(
            u64::from_le_bytes(bytes[15..23].try_into().unwrap()),
            checksum(b"hello world")
        );
    }

    #[test]
    fn test_flipped_byte_is_detected() {
        let mut writer = ChecksumWriter::new(Vec::new());
        writer.put(b"HEAD").unwrap();
        writer.begin_body();
        writer.put(b"payload").unwrap();
        let mut bytes = writer.finish().unwrap();
        bytes[6] ^= 0xff;
        assert_eq!(verify_footer(&bytes, 4), Err("body checksum mismatch".to_string()));
    }
}
