//! Boot entry filter.
//!
//! `TarStreamFilter` consumes the filesystem tar of one or more container
//! images and emits only the boot-relevant entries, relocated under the
//! canonical `boot/` layout. What happens to each source entry is decided
//! by an explicit [`RoutingTable`]; entries without a route are discarded.
//!
//! ```text
//!   kernel      ──► boot/ (once) + boot/cmdline + boot/kernel
//!   initrd.img  ──► boot/ (once) + boot/initrd.img
//!   <other>     ──► dropped
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::{self, Write};

use bootkit_core::error::{BootError, Result};
use tar::{Archive, Header};

use super::tar_writer::{dir_header, file_header, TarSink, TarWriter};
use super::{BOOT_DIR, CMDLINE_ENTRY, INITRD_ENTRY, INITRD_SOURCE, KERNEL_ENTRY, KERNEL_SOURCE};

/// Mode of the synthesized `boot/` directory.
const BOOT_DIR_MODE: u32 = 0o755;

/// Mode of the synthesized `boot/cmdline` file.
const CMDLINE_MODE: u32 = 0o644;

/// Action taken for a source entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Emit as `boot/kernel`, preceded by `boot/cmdline`. At most one per build.
    Kernel,
    /// Emit as `boot/initrd.img`.
    Initrd,
    /// Buffer the body as a nested tar and append its entries verbatim.
    Reconstruct,
    /// Drop the entry and its body.
    Discard,
}

/// Source entry name → action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    routes: BTreeMap<String, Route>,
}

impl Default for RoutingTable {
    /// `kernel` and `initrd.img` at the image root; nothing else.
    fn default() -> Self {
        Self::empty()
            .with_route(KERNEL_SOURCE, Route::Kernel)
            .with_route(INITRD_SOURCE, Route::Initrd)
    }
}

impl RoutingTable {
    /// A table that discards everything.
    pub fn empty() -> Self {
        Self {
            routes: BTreeMap::new(),
        }
    }

    /// Add or replace the route for an exact source entry name.
    pub fn with_route(mut self, name: impl Into<String>, route: Route) -> Self {
        self.routes.insert(name.into(), route);
        self
    }

    /// Route for a source entry name.
    pub fn route(&self, name: &[u8]) -> Route {
        std::str::from_utf8(name)
            .ok()
            .and_then(|n| self.routes.get(n))
            .copied()
            .unwrap_or(Route::Discard)
    }

    /// All explicit routes, ordered by name.
    pub fn routes(&self) -> impl Iterator<Item = (&str, Route)> {
        self.routes.iter().map(|(name, route)| (name.as_str(), *route))
    }
}

/// Where body bytes of the current source entry go.
#[derive(Debug)]
enum BodyMode {
    Forward,
    Discard,
    Buffer(Vec<u8>),
}

/// Entry and byte counters for a filter's lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FilterStats {
    /// Source entries seen
    pub entries: u64,
    /// Source entries dropped
    pub discarded_entries: u64,
    /// Body bytes dropped
    pub discarded_bytes: u64,
}

/// Tar-to-tar transformer producing the canonical boot archive.
///
/// One filter is created per build and receives the kernel image followed
/// by every init image, so a second `kernel` from any image is rejected.
pub struct TarStreamFilter<W: Write> {
    writer: TarWriter<W>,
    routes: RoutingTable,
    cmdline: String,
    mode: BodyMode,
    found_kernel: bool,
    found_initrd: bool,
    boot_dir_written: bool,
    stats: FilterStats,
}

impl<W: Write> TarStreamFilter<W> {
    /// Create a filter with the default routing table.
    pub fn new(writer: TarWriter<W>, cmdline: impl Into<String>) -> Self {
        Self::with_routes(writer, cmdline, RoutingTable::default())
    }

    /// Create a filter with a custom routing table.
    pub fn with_routes(
        writer: TarWriter<W>,
        cmdline: impl Into<String>,
        routes: RoutingTable,
    ) -> Self {
        Self {
            writer,
            routes,
            cmdline: cmdline.into(),
            mode: BodyMode::Forward,
            found_kernel: false,
            found_initrd: false,
            boot_dir_written: false,
            stats: FilterStats::default(),
        }
    }

    pub fn found_kernel(&self) -> bool {
        self.found_kernel
    }

    pub fn found_initrd(&self) -> bool {
        self.found_initrd
    }

    pub fn stats(&self) -> FilterStats {
        self.stats
    }

    /// Fail unless a kernel entry has been seen.
    pub fn check_kernel(&self) -> Result<()> {
        if self.found_kernel {
            Ok(())
        } else {
            Err(BootError::MissingKernel)
        }
    }

    /// Check the kernel invariant, emit any buffered entry, and hand back
    /// the canonical writer for finalization.
    pub fn close(mut self) -> Result<TarWriter<W>> {
        self.check_kernel()?;
        self.finish_buffer()?;
        tracing::debug!(
            entries = self.stats.entries,
            discarded_entries = self.stats.discarded_entries,
            discarded_bytes = self.stats.discarded_bytes,
            initrd = self.found_initrd,
            "Boot filter closed"
        );
        Ok(self.writer)
    }

    fn ensure_boot_dir(&mut self) -> Result<()> {
        if !self.boot_dir_written {
            self.writer
                .write_header(BOOT_DIR.as_bytes(), &dir_header(BOOT_DIR_MODE))?;
            self.boot_dir_written = true;
        }
        Ok(())
    }

    /// Append the entries of a buffered nested tar, if any.
    fn finish_buffer(&mut self) -> Result<()> {
        let buffer = match std::mem::replace(&mut self.mode, BodyMode::Discard) {
            BodyMode::Buffer(buffer) => buffer,
            other => {
                self.mode = other;
                return Ok(());
            }
        };
        append_archive(&mut self.writer, &buffer)
    }
}

impl<W: Write> TarSink for TarStreamFilter<W> {
    fn write_entry(&mut self, path: &[u8], _link: Option<&[u8]>, header: &Header) -> Result<()> {
        self.finish_buffer()?;
        self.stats.entries += 1;

        match self.routes.route(path) {
            Route::Kernel => {
                if self.found_kernel {
                    return Err(BootError::DuplicateKernel);
                }
                self.found_kernel = true;
                self.mode = BodyMode::Forward;
                self.ensure_boot_dir()?;

                self.writer.append_data(
                    CMDLINE_ENTRY.as_bytes(),
                    &file_header(CMDLINE_MODE, 0),
                    self.cmdline.as_bytes(),
                )?;

                let size = header.size()?;
                self.writer.write_header(
                    KERNEL_ENTRY.as_bytes(),
                    &file_header(header.mode().unwrap_or(0), size),
                )?;
                tracing::info!(size, "Found kernel");
            }
            Route::Initrd => {
                self.found_initrd = true;
                self.mode = BodyMode::Forward;
                self.ensure_boot_dir()?;

                let size = header.size()?;
                self.writer.write_header(
                    INITRD_ENTRY.as_bytes(),
                    &file_header(header.mode().unwrap_or(0), size),
                )?;
                tracing::info!(size, "Found initrd");
            }
            Route::Reconstruct => {
                let size = header.size()?;
                tracing::debug!(entry = %String::from_utf8_lossy(path), size, "Buffering nested archive");
                self.mode = BodyMode::Buffer(Vec::new());
            }
            Route::Discard => {
                tracing::debug!(entry = %String::from_utf8_lossy(path), "Discarding entry");
                self.stats.discarded_entries += 1;
                self.mode = BodyMode::Discard;
            }
        }
        Ok(())
    }
}

impl<W: Write> Write for TarStreamFilter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.mode {
            BodyMode::Forward => self.writer.write(buf),
            BodyMode::Discard => {
                self.stats.discarded_bytes += buf.len() as u64;
                Ok(buf.len())
            }
            BodyMode::Buffer(buffer) => {
                buffer.extend_from_slice(buf);
                Ok(buf.len())
            }
        }
    }

    /// Emits any buffered nested archive before flushing the writer.
    fn flush(&mut self) -> io::Result<()> {
        self.finish_buffer().map_err(into_io_error)?;
        self.writer.flush()
    }
}

fn into_io_error(err: BootError) -> io::Error {
    match err {
        BootError::IoError(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}

/// Copy every entry of the tar in `bytes` to `writer`.
fn append_archive<W: Write>(writer: &mut TarWriter<W>, bytes: &[u8]) -> Result<()> {
    let mut archive = Archive::new(bytes);
    let entries = archive
        .entries()
        .map_err(|e| BootError::ArchiveError(format!("nested archive: {}", e)))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| BootError::ArchiveError(format!("nested archive: {}", e)))?;
        let path = entry.path_bytes().into_owned();
        let link = entry.link_name_bytes().map(Cow::into_owned);
        let mut header = entry.header().clone();
        header.set_size(entry.size());
        writer.write_entry(&path, link.as_deref(), &header)?;
        io::copy(&mut entry, writer)?;
    }
    Ok(())
}
