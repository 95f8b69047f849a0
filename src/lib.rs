//! # zipper: Minimal ZIP Archive Builder
//!
//! `zipper` creates ZIP archives with as little ceremony as possible. Open an
//! archive at a path, then add entries from in-memory bytes, from a writer you
//! stream into, or by copying an existing file in under its base name.
//!
//! ## Features
//!
//! - **Three ways to add**: byte slices, streaming sinks, existing files
//! - **Streaming Write**: entries are compressed on-the-fly, no temp files
//! - **DEFLATE everywhere**: every entry is compressed, even empty files
//! - **File metadata kept**: inserted files carry their modification time and unix mode
//! - **Checked lifecycle**: `close` consumes the archive and reports finalize errors
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::io::Write;
//! use zipper::Archive;
//!
//! let mut archive = Archive::create("out.zip")?;
//!
//! // From bytes
//! archive.add_bytes("data.txt", b"Hello world!")?;
//!
//! // From a stream
//! let mut sink = archive.new_entry("writer.txt")?;
//! sink.write_all(b"Hello world!")?;
//!
//! // From an existing file, stored as "report.csv"
//! archive.insert_file("/srv/exports/report.csv")?;
//!
//! archive.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Entry names
//!
//! Names passed to `add_bytes` and `new_entry` are stored exactly as given.
//! Nothing rejects duplicates or `../` components; validate names yourself
//! if they come from untrusted input.
//!
//! ## Logging
//!
//! Diagnostics go through the [`log`](https://docs.rs/log) facade at `debug`
//! level, plus a `warn` when an archive dropped without `close` fails to
//! finalize. Install any logger to see them.

pub mod archive;
pub mod error;
pub mod header;
pub mod writer;

pub use archive::{Archive, EntryWriter};
pub use error::{Result, ZipperError};
pub use header::{DosDateTime, EntryOptions};
pub use writer::ZipWriter;
