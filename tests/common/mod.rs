//! Minimal ZIP reader used to verify archives written by the tests
//!
//! Parses the end-of-central-directory record and central directory, then
//! inflates each entry and checks its CRC-32. Classic (non-ZIP64) archives only.

#![allow(dead_code)]

use flate2::read::DeflateDecoder;
use std::io::Read;
use std::path::Path;

const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;
const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x02014b50;
const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06054b50;

/// One entry as recorded in the central directory, plus its inflated content
#[derive(Debug, Clone)]
pub struct ReadEntry {
    /// Lossy view of `raw_name`
    pub name: String,
    pub raw_name: Vec<u8>,
    pub version_made_by: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub external_attributes: u32,
    pub offset: u64,
    /// Central directory extra field
    pub extra: Vec<u8>,
    /// Local header extra field
    pub local_extra: Vec<u8>,
    pub data: Vec<u8>,
}

fn u16_at(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Read and verify every entry of the archive at `path`
pub fn read_archive(path: &Path) -> Vec<ReadEntry> {
    let bytes = std::fs::read(path).expect("archive should be readable");
    read_archive_bytes(&bytes)
}

/// Read and verify every entry of an in-memory archive
pub fn read_archive_bytes(bytes: &[u8]) -> Vec<ReadEntry> {
    let eocd = (0..=bytes.len().saturating_sub(22))
        .rev()
        .find(|&i| u32_at(bytes, i) == END_OF_CENTRAL_DIRECTORY_SIGNATURE)
        .expect("end of central directory not found");

    let total_entries = u16_at(bytes, eocd + 10) as usize;
    let cd_size = u32_at(bytes, eocd + 12) as usize;
    let cd_offset = u32_at(bytes, eocd + 16) as usize;
    assert_eq!(cd_offset + cd_size, eocd, "central directory must end at EOCD");

    let mut entries = Vec::with_capacity(total_entries);
    let mut pos = cd_offset;
    for _ in 0..total_entries {
        assert_eq!(u32_at(bytes, pos), CENTRAL_DIRECTORY_SIGNATURE);

        let name_len = u16_at(bytes, pos + 28) as usize;
        let extra_len = u16_at(bytes, pos + 30) as usize;
        let comment_len = u16_at(bytes, pos + 32) as usize;
        let raw_name = bytes[pos + 46..pos + 46 + name_len].to_vec();
        let extra_start = pos + 46 + name_len;

        let mut entry = ReadEntry {
            name: String::from_utf8_lossy(&raw_name).into_owned(),
            raw_name,
            version_made_by: u16_at(bytes, pos + 4),
            flags: u16_at(bytes, pos + 8),
            compression_method: u16_at(bytes, pos + 10),
            mod_time: u16_at(bytes, pos + 12),
            mod_date: u16_at(bytes, pos + 14),
            crc32: u32_at(bytes, pos + 16),
            compressed_size: u32_at(bytes, pos + 20) as u64,
            uncompressed_size: u32_at(bytes, pos + 24) as u64,
            external_attributes: u32_at(bytes, pos + 38),
            offset: u32_at(bytes, pos + 42) as u64,
            extra: bytes[extra_start..extra_start + extra_len].to_vec(),
            local_extra: Vec::new(),
            data: Vec::new(),
        };
        entry.local_extra = local_extra(bytes, &entry);
        entry.data = read_entry_data(bytes, &entry);

        pos += 46 + name_len + extra_len + comment_len;
        entries.push(entry);
    }

    entries
}

fn local_extra(bytes: &[u8], entry: &ReadEntry) -> Vec<u8> {
    let header = entry.offset as usize;
    let name_len = u16_at(bytes, header + 26) as usize;
    let extra_len = u16_at(bytes, header + 28) as usize;
    assert_eq!(
        &bytes[header + 30..header + 30 + name_len],
        entry.raw_name.as_slice(),
        "local and central name must agree"
    );
    let start = header + 30 + name_len;
    bytes[start..start + extra_len].to_vec()
}

/// Modification time from an extended timestamp (0x5455) block, if present
pub fn extended_timestamp(extra: &[u8]) -> Option<u32> {
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let id = u16_at(extra, pos);
        let size = u16_at(extra, pos + 2) as usize;
        let body = extra.get(pos + 4..pos + 4 + size)?;
        if id == 0x5455 && size >= 5 && body[0] & 0x01 != 0 {
            return Some(u32_at(body, 1));
        }
        pos += 4 + size;
    }
    None
}

fn read_entry_data(bytes: &[u8], entry: &ReadEntry) -> Vec<u8> {
    let header = entry.offset as usize;
    assert_eq!(u32_at(bytes, header), LOCAL_FILE_HEADER_SIGNATURE);
    assert_eq!(
        u16_at(bytes, header + 8),
        entry.compression_method,
        "local and central method must agree for {}",
        entry.name
    );

    let name_len = u16_at(bytes, header + 26) as usize;
    let extra_len = u16_at(bytes, header + 28) as usize;
    let start = header + 30 + name_len + extra_len;
    let compressed = &bytes[start..start + entry.compressed_size as usize];

    let data = match entry.compression_method {
        8 => {
            let mut out = Vec::new();
            DeflateDecoder::new(compressed)
                .read_to_end(&mut out)
                .expect("entry should inflate");
            out
        }
        0 => compressed.to_vec(),
        other => panic!("unexpected compression method {other}"),
    };

    assert_eq!(data.len() as u64, entry.uncompressed_size);
    assert_eq!(crc32fast::hash(&data), entry.crc32, "CRC mismatch for {}", entry.name);
    data
}
