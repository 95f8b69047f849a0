//! The archive handle: one destination plus the ZIP writer layered on it
//!
//! An [`Archive`] owns its destination and writer as a pair. Both are opened
//! together by [`Archive::create`] and released together, writer first, by
//! [`Archive::close`]. Closing consumes the handle, so adding entries after
//! close does not compile.
//!
//! An archive that is dropped without being closed is still finalized, but any
//! error from that finalization can only be logged. Call `close` to see it.
//!
//! `Archive` does no internal locking. Share it across threads only behind
//! external synchronization.

use crate::error::{Result, ZipperError};
use crate::header::EntryOptions;
use crate::writer::ZipWriter;
use std::ffi::OsStr;
use std::fs::File;
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};

/// A ZIP archive being written
///
/// ```no_run
/// use zipper::Archive;
///
/// let mut archive = Archive::create("out.zip")?;
/// archive.add_bytes("data.txt", b"Hello world!")?;
/// archive.insert_file("/var/log/syslog")?;
/// archive.close()?;
/// # Ok::<(), zipper::ZipperError>(())
/// ```
pub struct Archive<W: Write + Seek = File> {
    path: Option<PathBuf>,
    writer: Option<ZipWriter<W>>,
}

impl Archive<File> {
    /// Create (or truncate) the file at `path` and start an empty archive in it
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)?;

        log::debug!("created archive at {}", path.display());

        Ok(Self {
            path: Some(path.to_path_buf()),
            writer: Some(ZipWriter::new(file)),
        })
    }
}

impl<W: Write + Seek> Archive<W> {
    /// Start an empty archive in an arbitrary destination
    ///
    /// ```
    /// use std::io::Cursor;
    /// use zipper::Archive;
    ///
    /// let mut archive = Archive::from_writer(Cursor::new(Vec::new()));
    /// archive.add_bytes("hello.txt", b"hi")?;
    /// let zip_bytes = archive.into_inner()?.into_inner();
    /// assert!(zip_bytes.starts_with(b"PK\x03\x04"));
    /// # Ok::<(), zipper::ZipperError>(())
    /// ```
    pub fn from_writer(output: W) -> Self {
        Self {
            path: None,
            writer: Some(ZipWriter::new(output)),
        }
    }

    /// Destination path, when the archive was created from one
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of entries added so far
    pub fn entry_count(&self) -> usize {
        self.writer.as_ref().map_or(0, ZipWriter::entry_count)
    }

    fn writer_mut(&mut self) -> Result<&mut ZipWriter<W>> {
        self.writer
            .as_mut()
            .ok_or_else(|| ZipperError::InvalidFormat("Archive already finished".to_string()))
    }

    /// Begin an entry named `name` and return a sink for its content
    ///
    /// The name is stored verbatim: no normalization, no duplicate check.
    /// The returned [`EntryWriter`] borrows the archive, so it must be dropped
    /// before the next entry can be started.
    ///
    /// ```no_run
    /// use std::io::Write;
    /// use zipper::Archive;
    ///
    /// let mut archive = Archive::create("out.zip")?;
    /// let mut sink = archive.new_entry("writer.txt")?;
    /// sink.write_all(b"Hello ")?;
    /// sink.write_all(b"world!")?;
    /// archive.close()?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn new_entry(&mut self, name: &str) -> Result<EntryWriter<'_, W>> {
        self.new_entry_with_options(name, &EntryOptions::default())
    }

    /// Like [`new_entry`](Self::new_entry), with explicit header fields
    pub fn new_entry_with_options(
        &mut self,
        name: &str,
        options: &EntryOptions,
    ) -> Result<EntryWriter<'_, W>> {
        let writer = self.writer_mut()?;
        writer.start_entry(name, options)?;
        Ok(EntryWriter { writer })
    }

    /// Add an entry named `name` whose content is exactly `data`
    ///
    /// On error the archive may hold a partial entry; discard it.
    pub fn add_bytes(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let writer = self.writer_mut()?;
        writer.start_entry(name, &EntryOptions::default())?;
        writer.write_data(data)
    }

    /// Copy an existing file into the archive under its base name
    ///
    /// Parent directories of `path` are not kept: `/tmp/a/b.txt` becomes the
    /// root-level entry `b.txt`. Modification time and permission bits come
    /// from the file's metadata. Directories are refused.
    ///
    /// On unix the base name's bytes are stored unchanged, even when they are
    /// not UTF-8. Elsewhere a name that is not valid Unicode is refused.
    pub fn insert_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();

        let file_name = path
            .file_name()
            .ok_or_else(|| ZipperError::MissingFileName(path.to_path_buf()))?;
        let name = entry_name_bytes(file_name, path)?;

        // Dropped on every return path below
        let mut source = File::open(path)?;
        let metadata = source.metadata()?;
        let options = EntryOptions::from_metadata(&metadata, path)?;

        let writer = self.writer_mut()?;
        writer.start_entry_bytes(name, &options)?;
        let mut sink = EntryWriter { writer };
        let copied = io::copy(&mut source, &mut sink)?;

        log::debug!(
            "inserted {} as {:?} ({copied} bytes)",
            path.display(),
            file_name
        );

        Ok(())
    }

    /// Write the central directory and release the destination
    ///
    /// Errors from finalizing are returned rather than discarded.
    pub fn close(self) -> Result<()> {
        self.into_inner().map(drop)
    }

    /// Write the central directory and hand the destination back
    pub fn into_inner(mut self) -> Result<W> {
        let writer = self.writer.take().ok_or_else(|| {
            ZipperError::InvalidFormat("Archive already finished".to_string())
        })?;
        writer.finish()
    }
}

#[cfg(unix)]
fn entry_name_bytes<'a>(file_name: &'a OsStr, _path: &Path) -> Result<&'a [u8]> {
    use std::os::unix::ffi::OsStrExt;
    Ok(file_name.as_bytes())
}

#[cfg(not(unix))]
fn entry_name_bytes<'a>(file_name: &'a OsStr, path: &Path) -> Result<&'a [u8]> {
    file_name.to_str().map(str::as_bytes).ok_or_else(|| {
        ZipperError::InvalidFormat(format!("File name is not valid Unicode: {}", path.display()))
    })
}

impl<W: Write + Seek> Drop for Archive<W> {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finish() {
                match &self.path {
                    Some(path) => {
                        log::warn!("failed to finalize archive {}: {}", path.display(), e)
                    }
                    None => log::warn!("failed to finalize archive: {}", e),
                }
            }
        }
    }
}

/// Sink for the content of the entry most recently begun
///
/// Everything written here is compressed into that entry. The sink holds a
/// mutable borrow of its [`Archive`], so it cannot outlive the entry.
///
/// `flush` pushes the data compressed so far through to the destination.
pub struct EntryWriter<'a, W: Write + Seek> {
    writer: &'a mut ZipWriter<W>,
}

impl<W: Write + Seek> Write for EntryWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write_data(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
