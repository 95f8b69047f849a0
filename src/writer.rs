//! Sequential ZIP writer that compresses entries on-the-fly
//!
//! Entries are laid down strictly one after another: a local file header,
//! the DEFLATE stream, then a data descriptor carrying the CRC-32 and sizes
//! (which are unknown until the entry ends). `finish` appends the central
//! directory and end-of-central-directory record, switching to ZIP64
//! structures when counts, sizes or offsets overflow the classic fields.
//!
//! Works over any `Write + Seek` destination (File, Cursor<Vec<u8>>, etc.)

use crate::error::{Result, ZipperError};
use crate::header::{EntryOptions, VERSION_DEFLATE, VERSION_ZIP64};
use crc32fast::Hasher as Crc32;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Seek, Write};

/// DEFLATE, the only method this writer produces
pub(crate) const METHOD_DEFLATE: u16 = 8;

/// zlib's default trade-off between speed and ratio
const COMPRESSION_LEVEL: u32 = 6;

/// Sizes and CRC follow the data in a data descriptor
const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;

/// Entry name is UTF-8 rather than CP437
const FLAG_UTF8: u16 = 1 << 11;

const ZIP64_EXTRA_ID: u16 = 0x0001;

/// Finished entry, kept for the central directory
struct ZipEntry {
    name: Vec<u8>,
    local_header_offset: u64,
    flags: u16,
    local_zip64: bool,
    options: EntryOptions,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
}

/// Streaming ZIP writer that compresses data on-the-fly
///
/// Only one entry is open at a time. Starting a new entry closes the previous
/// one; there is no way to go back and append to an earlier entry.
pub struct ZipWriter<W: Write + Seek> {
    output: W,
    entries: Vec<ZipEntry>,
    current_entry: Option<CurrentEntry>,
}

struct CurrentEntry {
    name: Vec<u8>,
    local_header_offset: u64,
    flags: u16,
    local_zip64: bool,
    options: EntryOptions,
    encoder: DeflateEncoder<CompressedBuffer>,
    counter: CrcCounter,
}

/// Metadata tracker for CRC and byte counts
struct CrcCounter {
    crc: Crc32,
    uncompressed_count: u64,
    compressed_count: u64,
}

impl CrcCounter {
    fn new() -> Self {
        Self {
            crc: Crc32::new(),
            uncompressed_count: 0,
            compressed_count: 0,
        }
    }

    fn update_uncompressed(&mut self, data: &[u8]) {
        self.crc.update(data);
        self.uncompressed_count += data.len() as u64;
    }

    fn add_compressed(&mut self, count: u64) {
        self.compressed_count += count;
    }

    fn finalize(&self) -> u32 {
        self.crc.clone().finalize()
    }
}

/// Buffered writer for compressed data with adaptive sizing
///
/// Initial capacity and flush threshold follow the entry's size hint:
/// - Tiny (<10KB): 8KB initial, 256KB threshold
/// - Small (<100KB): 32KB initial, 512KB threshold
/// - Medium (<1MB): 128KB initial, 2MB threshold
/// - Large (<10MB): 256KB initial, 4MB threshold
/// - Unknown or larger: 512KB initial, 8MB threshold
struct CompressedBuffer {
    buffer: Vec<u8>,
    flush_threshold: usize,
}

impl CompressedBuffer {
    fn with_size_hint(size_hint: Option<u64>) -> Self {
        let (initial_capacity, flush_threshold) = match size_hint {
            Some(size) if size < 10_000 => (8 * 1024, 256 * 1024),
            Some(size) if size < 100_000 => (32 * 1024, 512 * 1024),
            Some(size) if size < 1_000_000 => (128 * 1024, 2 * 1024 * 1024),
            Some(size) if size < 10_000_000 => (256 * 1024, 4 * 1024 * 1024),
            _ => (512 * 1024, 8 * 1024 * 1024),
        };

        Self {
            buffer: Vec::with_capacity(initial_capacity),
            flush_threshold,
        }
    }

    fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    fn should_flush(&self) -> bool {
        self.buffer.len() >= self.flush_threshold
    }
}

impl Write for CompressedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<W: Write + Seek> ZipWriter<W> {
    /// Create a writer over an arbitrary destination
    ///
    /// Entries are placed relative to the destination's current position.
    pub fn new(output: W) -> Self {
        Self {
            output,
            entries: Vec::new(),
            current_entry: None,
        }
    }

    /// Number of entries started so far, including the open one
    pub fn entry_count(&self) -> usize {
        self.entries.len() + usize::from(self.current_entry.is_some())
    }

    /// Start a new DEFLATE entry, finishing the previous one
    ///
    /// The name is stored as given. Names that do not fit the 16-bit length
    /// field are refused before anything reaches the output.
    pub fn start_entry(&mut self, name: &str, options: &EntryOptions) -> Result<()> {
        self.start_entry_bytes(name.as_bytes(), options)
    }

    /// Start a new entry whose name is raw bytes
    ///
    /// Names that are not valid UTF-8 are written without the UTF-8 flag and
    /// left for the reader to interpret, as most unix tools do.
    ///
    /// When the size hint exceeds 4 GiB the local header carries a ZIP64 extra
    /// field and the data descriptor uses 64-bit sizes. An entry that grows past
    /// 4 GiB without such a hint still gets a 64-bit descriptor, which strict
    /// readers may reject; pass a hint for entries that large.
    pub fn start_entry_bytes(&mut self, name: &[u8], options: &EntryOptions) -> Result<()> {
        if name.len() > u16::MAX as usize {
            return Err(ZipperError::InvalidFormat(format!(
                "Entry name is {} bytes, limit is {}",
                name.len(),
                u16::MAX
            )));
        }

        self.finish_current_entry()?;

        let local_header_offset = self.output.stream_position()?;
        let flags = match std::str::from_utf8(name) {
            Ok(text) if !text.is_ascii() => FLAG_DATA_DESCRIPTOR | FLAG_UTF8,
            _ => FLAG_DATA_DESCRIPTOR,
        };
        let local_zip64 = options
            .size_hint
            .map_or(false, |size| size > u32::MAX as u64);
        let modified = options.modified();

        let mut extra_field: Vec<u8> = Vec::new();
        if let Some(timestamp) = options.extended_timestamp() {
            extra_field.extend_from_slice(&timestamp);
        }
        if local_zip64 {
            // Sizes live in the data descriptor; the extra field holds zeros
            extra_field.extend_from_slice(&ZIP64_EXTRA_ID.to_le_bytes());
            extra_field.extend_from_slice(&16u16.to_le_bytes());
            extra_field.extend_from_slice(&[0u8; 16]);
        }
        let (version_needed, size_placeholder) = if local_zip64 {
            (VERSION_ZIP64, 0xFFFFFFFFu32)
        } else {
            (VERSION_DEFLATE, 0u32)
        };

        log::debug!(
            "starting entry {:?} at offset {local_header_offset}",
            String::from_utf8_lossy(name)
        );

        self.output.write_all(&[0x50, 0x4b, 0x03, 0x04])?; // signature
        self.output.write_all(&version_needed.to_le_bytes())?;
        self.output.write_all(&flags.to_le_bytes())?; // general purpose bit flag
        self.output.write_all(&METHOD_DEFLATE.to_le_bytes())?; // compression method
        self.output.write_all(&modified.time().to_le_bytes())?; // mod time
        self.output.write_all(&modified.date().to_le_bytes())?; // mod date
        self.output.write_all(&0u32.to_le_bytes())?; // crc32 placeholder
        self.output.write_all(&size_placeholder.to_le_bytes())?; // compressed size
        self.output.write_all(&size_placeholder.to_le_bytes())?; // uncompressed size
        self.output.write_all(&(name.len() as u16).to_le_bytes())?;
        self.output
            .write_all(&(extra_field.len() as u16).to_le_bytes())?;
        self.output.write_all(name)?;
        self.output.write_all(&extra_field)?;

        let encoder = DeflateEncoder::new(
            CompressedBuffer::with_size_hint(options.size_hint),
            Compression::new(COMPRESSION_LEVEL),
        );

        self.current_entry = Some(CurrentEntry {
            name: name.to_vec(),
            local_header_offset,
            flags,
            local_zip64,
            options: options.clone(),
            encoder,
            counter: CrcCounter::new(),
        });

        Ok(())
    }

    /// Write uncompressed data to the current entry
    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        let entry = self
            .current_entry
            .as_mut()
            .ok_or_else(|| ZipperError::InvalidFormat("No entry started".to_string()))?;

        entry.counter.update_uncompressed(data);
        entry.encoder.write_all(data)?;

        // Keep memory bounded on large entries
        let buffer = entry.encoder.get_mut();
        if buffer.should_flush() {
            let compressed_data = buffer.take();
            self.output.write_all(&compressed_data)?;
            entry.counter.add_compressed(compressed_data.len() as u64);
        }

        Ok(())
    }

    /// Push everything compressed so far for the current entry to the output
    ///
    /// The DEFLATE stream is sync-flushed, so frequent calls cost ratio.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(entry) = self.current_entry.as_mut() {
            entry.encoder.flush()?;
            let compressed_data = entry.encoder.get_mut().take();
            if !compressed_data.is_empty() {
                self.output.write_all(&compressed_data)?;
                entry.counter.add_compressed(compressed_data.len() as u64);
            }
        }
        self.output.flush()?;
        Ok(())
    }

    /// Finish current entry and write its data descriptor
    fn finish_current_entry(&mut self) -> Result<()> {
        if let Some(mut entry) = self.current_entry.take() {
            let mut buffer = entry.encoder.finish()?;

            let remaining_data = buffer.take();
            if !remaining_data.is_empty() {
                self.output.write_all(&remaining_data)?;
                entry.counter.add_compressed(remaining_data.len() as u64);
            }

            let crc = entry.counter.finalize();
            let compressed_size = entry.counter.compressed_count;
            let uncompressed_size = entry.counter.uncompressed_count;

            self.output.write_all(&[0x50, 0x4b, 0x07, 0x08])?;
            self.output.write_all(&crc.to_le_bytes())?;
            // ZIP64 data descriptor carries 64-bit sizes
            if entry.local_zip64
                || compressed_size > u32::MAX as u64
                || uncompressed_size > u32::MAX as u64
            {
                self.output.write_all(&compressed_size.to_le_bytes())?;
                self.output.write_all(&uncompressed_size.to_le_bytes())?;
            } else {
                self.output
                    .write_all(&(compressed_size as u32).to_le_bytes())?;
                self.output
                    .write_all(&(uncompressed_size as u32).to_le_bytes())?;
            }

            self.entries.push(ZipEntry {
                name: entry.name,
                local_header_offset: entry.local_header_offset,
                flags: entry.flags,
                local_zip64: entry.local_zip64,
                options: entry.options,
                crc32: crc,
                compressed_size,
                uncompressed_size,
            });
        }
        Ok(())
    }

    /// Finish the archive (write central directory and return the destination)
    pub fn finish(mut self) -> Result<W> {
        self.finish_current_entry()?;

        let central_dir_offset = self.output.stream_position()?;

        for entry in &self.entries {
            let needs_zip64 = entry.uncompressed_size > u32::MAX as u64
                || entry.compressed_size > u32::MAX as u64
                || entry.local_header_offset > u32::MAX as u64;
            let version_needed = if needs_zip64 || entry.local_zip64 {
                VERSION_ZIP64
            } else {
                VERSION_DEFLATE
            };
            let modified = entry.options.modified();

            self.output.write_all(&[0x50, 0x4b, 0x01, 0x02])?; // central dir sig
            self.output
                .write_all(&entry.options.version_made_by(version_needed).to_le_bytes())?;
            self.output.write_all(&version_needed.to_le_bytes())?;
            self.output.write_all(&entry.flags.to_le_bytes())?;
            self.output.write_all(&METHOD_DEFLATE.to_le_bytes())?;
            self.output.write_all(&modified.time().to_le_bytes())?;
            self.output.write_all(&modified.date().to_le_bytes())?;
            self.output.write_all(&entry.crc32.to_le_bytes())?;

            // Sizes (actual values or ZIP64 placeholders)
            if entry.compressed_size > u32::MAX as u64 {
                self.output.write_all(&0xFFFFFFFFu32.to_le_bytes())?;
            } else {
                self.output
                    .write_all(&(entry.compressed_size as u32).to_le_bytes())?;
            }

            if entry.uncompressed_size > u32::MAX as u64 {
                self.output.write_all(&0xFFFFFFFFu32.to_le_bytes())?;
            } else {
                self.output
                    .write_all(&(entry.uncompressed_size as u32).to_le_bytes())?;
            }

            self.output
                .write_all(&(entry.name.len() as u16).to_le_bytes())?;

            let mut extra_field: Vec<u8> = Vec::new();
            if let Some(timestamp) = entry.options.extended_timestamp() {
                extra_field.extend_from_slice(&timestamp);
            }

            // ZIP64 extra field holds only the values that overflowed, in fixed order
            if needs_zip64 {
                let mut data: Vec<u8> = Vec::new();
                if entry.uncompressed_size > u32::MAX as u64 {
                    data.extend_from_slice(&entry.uncompressed_size.to_le_bytes());
                }
                if entry.compressed_size > u32::MAX as u64 {
                    data.extend_from_slice(&entry.compressed_size.to_le_bytes());
                }
                if entry.local_header_offset > u32::MAX as u64 {
                    data.extend_from_slice(&entry.local_header_offset.to_le_bytes());
                }
                extra_field.extend_from_slice(&ZIP64_EXTRA_ID.to_le_bytes());
                extra_field.extend_from_slice(&(data.len() as u16).to_le_bytes());
                extra_field.extend_from_slice(&data);
            }

            self.output
                .write_all(&(extra_field.len() as u16).to_le_bytes())?; // extra len
            self.output.write_all(&0u16.to_le_bytes())?; // file comment len
            self.output.write_all(&0u16.to_le_bytes())?; // disk number start
            self.output.write_all(&0u16.to_le_bytes())?; // internal attrs
            self.output
                .write_all(&entry.options.external_attributes().to_le_bytes())?;

            if entry.local_header_offset > u32::MAX as u64 {
                self.output.write_all(&0xFFFFFFFFu32.to_le_bytes())?;
            } else {
                self.output
                    .write_all(&(entry.local_header_offset as u32).to_le_bytes())?;
            }

            self.output.write_all(&entry.name)?;
            if !extra_field.is_empty() {
                self.output.write_all(&extra_field)?;
            }
        }

        let central_dir_size = self.output.stream_position()? - central_dir_offset;

        let need_zip64 = self.entries.len() >= u16::MAX as usize
            || central_dir_size >= u32::MAX as u64
            || central_dir_offset >= u32::MAX as u64;

        if need_zip64 {
            // ZIP64 end of central directory record
            self.output.write_all(&[0x50, 0x4b, 0x06, 0x06])?;
            // size of the remaining record: versions(2+2) + disks(4+4) + counts(8+8) + cd size/offset(8+8)
            self.output.write_all(&44u64.to_le_bytes())?;
            self.output.write_all(&VERSION_ZIP64.to_le_bytes())?; // version made by
            self.output.write_all(&VERSION_ZIP64.to_le_bytes())?; // version needed
            self.output.write_all(&0u32.to_le_bytes())?; // disk number
            self.output.write_all(&0u32.to_le_bytes())?; // disk where central dir starts
            self.output
                .write_all(&(self.entries.len() as u64).to_le_bytes())?;
            self.output
                .write_all(&(self.entries.len() as u64).to_le_bytes())?;
            self.output.write_all(&central_dir_size.to_le_bytes())?;
            self.output.write_all(&central_dir_offset.to_le_bytes())?;

            // ZIP64 end of central directory locator
            self.output.write_all(&[0x50, 0x4b, 0x06, 0x07])?;
            self.output.write_all(&0u32.to_le_bytes())?; // disk with ZIP64 EOCD
            let zip64_eocd_pos = central_dir_offset + central_dir_size;
            self.output.write_all(&zip64_eocd_pos.to_le_bytes())?;
            self.output.write_all(&1u32.to_le_bytes())?; // total number of disks
        }

        // End of central directory (classic)
        self.output.write_all(&[0x50, 0x4b, 0x05, 0x06])?;
        self.output.write_all(&0u16.to_le_bytes())?; // disk number
        self.output.write_all(&0u16.to_le_bytes())?; // disk with central dir

        if self.entries.len() >= u16::MAX as usize {
            self.output.write_all(&0xFFFFu16.to_le_bytes())?;
            self.output.write_all(&0xFFFFu16.to_le_bytes())?;
        } else {
            self.output
                .write_all(&(self.entries.len() as u16).to_le_bytes())?;
            self.output
                .write_all(&(self.entries.len() as u16).to_le_bytes())?;
        }

        if central_dir_size >= u32::MAX as u64 {
            self.output.write_all(&0xFFFFFFFFu32.to_le_bytes())?;
        } else {
            self.output
                .write_all(&(central_dir_size as u32).to_le_bytes())?;
        }

        if central_dir_offset >= u32::MAX as u64 {
            self.output.write_all(&0xFFFFFFFFu32.to_le_bytes())?;
        } else {
            self.output
                .write_all(&(central_dir_offset as u32).to_le_bytes())?;
        }

        self.output.write_all(&0u16.to_le_bytes())?; // comment len

        self.output.flush()?;

        log::debug!(
            "finished archive: {} entries, central directory at {central_dir_offset}",
            self.entries.len()
        );

        Ok(self.output)
    }
}
