//! Push-style tar encoder.
//!
//! `tar::Builder` wants each entry's body as a reader up front. The boot
//! filter instead receives a header and then an arbitrary number of body
//! writes, so the canonical archive is written with this encoder: one
//! header, exactly `size` body bytes, block padding, and the two-block
//! end-of-archive marker on `finish`.

use std::borrow::Cow;
use std::io::{self, Write};

use bootkit_core::error::{BootError, Result};
use tar::{EntryType, Header};

/// Tar block size.
const BLOCK_SIZE: u64 = 512;

/// Width of the name and linkname fields in a GNU header.
const NAME_FIELD_LEN: usize = 100;

/// Path used by GNU long name and long link records.
const GNU_LONG_LINK: &[u8] = b"././@LongLink";

const ZERO_BLOCK: [u8; BLOCK_SIZE as usize] = [0; BLOCK_SIZE as usize];

/// A tar entry sink: a header starts an entry, body bytes follow through
/// [`Write`].
pub trait TarSink: Write {
    /// Start a new entry named `path` whose link target, if any, is `link`.
    /// Every other field is taken from `header`, and exactly
    /// `header.size()` body bytes must be written before the next entry
    /// starts. A `None` link falls back to the header's linkname field.
    fn write_entry(&mut self, path: &[u8], link: Option<&[u8]>, header: &Header) -> Result<()>;

    /// Start a new entry named `path`, taking everything else from `header`.
    fn write_header(&mut self, path: &[u8], header: &Header) -> Result<()> {
        self.write_entry(path, None, header)
    }
}

/// Streaming tar writer over any [`Write`].
pub struct TarWriter<W: Write> {
    inner: W,
    /// Body bytes still owed for the current entry
    remaining: u64,
    /// Zero bytes to write once the current body is complete
    padding: u64,
    /// Entries started so far
    entries: u64,
}

impl<W: Write> TarWriter<W> {
    /// Create a writer emitting to `inner`.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            remaining: 0,
            padding: 0,
            entries: 0,
        }
    }

    /// Number of entries started, not counting long name records.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Borrow the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Write a complete entry whose body is `data`.
    pub fn append_data(&mut self, path: &[u8], header: &Header, data: &[u8]) -> Result<()> {
        let mut header = header.clone();
        header.set_size(data.len() as u64);
        self.write_header(path, &header)?;
        self.write_all(data)?;
        Ok(())
    }

    /// Complete the current entry, write the end-of-archive marker and
    /// return the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.close_entry()?;
        self.inner.write_all(&ZERO_BLOCK)?;
        self.inner.write_all(&ZERO_BLOCK)?;
        self.inner.flush()?;
        Ok(self.inner)
    }

    fn close_entry(&mut self) -> Result<()> {
        if self.remaining > 0 {
            return Err(BootError::ArchiveError(format!(
                "entry closed with {} body bytes missing",
                self.remaining
            )));
        }
        if self.padding > 0 {
            self.inner.write_all(&ZERO_BLOCK[..self.padding as usize])?;
            self.padding = 0;
        }
        Ok(())
    }

    /// Emit a GNU `L`/`K` record carrying a value too long for its field.
    fn write_long_record(&mut self, kind: EntryType, value: &[u8]) -> Result<()> {
        let size = value.len() as u64 + 1;
        let mut header = Header::new_gnu();
        set_field(&mut header.as_old_mut().name, GNU_LONG_LINK);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);
        header.set_entry_type(kind);
        header.set_size(size);
        header.set_cksum();

        self.inner.write_all(header.as_bytes())?;
        self.inner.write_all(value)?;
        self.inner.write_all(&[0])?;
        self.inner
            .write_all(&ZERO_BLOCK[..padding_for(size) as usize])?;
        Ok(())
    }
}

impl<W: Write> TarSink for TarWriter<W> {
    fn write_entry(&mut self, path: &[u8], link: Option<&[u8]>, header: &Header) -> Result<()> {
        self.close_entry()?;

        if path.is_empty() {
            return Err(BootError::ArchiveError("entry with empty name".to_string()));
        }

        let size = header.size().map_err(|e| {
            BootError::ArchiveError(format!(
                "unreadable size for {}: {}",
                String::from_utf8_lossy(path),
                e
            ))
        })?;

        // Blank or malformed metadata fields are written as zero
        let mut out = Header::new_gnu();
        out.set_mode(header.mode().unwrap_or(0));
        out.set_uid(header.uid().unwrap_or(0));
        out.set_gid(header.gid().unwrap_or(0));
        out.set_mtime(header.mtime().unwrap_or(0));
        out.set_entry_type(header.entry_type());
        out.set_size(size);

        let link = link.map(Cow::Borrowed).or_else(|| header.link_name_bytes());
        if let Some(link) = link {
            if link.len() > NAME_FIELD_LEN {
                self.write_long_record(EntryType::GNULongLink, &link)?;
            }
            let len = link.len().min(NAME_FIELD_LEN);
            set_field(&mut out.as_old_mut().linkname, &link[..len]);
        }

        if path.len() > NAME_FIELD_LEN {
            self.write_long_record(EntryType::GNULongName, path)?;
        }
        set_field(
            &mut out.as_old_mut().name,
            &path[..path.len().min(NAME_FIELD_LEN)],
        );
        out.set_cksum();

        self.inner.write_all(out.as_bytes())?;
        self.remaining = size;
        self.padding = padding_for(size);
        self.entries += 1;
        Ok(())
    }
}

impl<W: Write> Write for TarWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.remaining == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "tar: write past the end of the current entry",
            ));
        }
        let len = usize::try_from(self.remaining)
            .unwrap_or(usize::MAX)
            .min(buf.len());
        let n = self.inner.write(&buf[..len])?;
        self.remaining -= n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Regular file header with the given mode and size.
pub(crate) fn file_header(mode: u32, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_mode(mode);
    header.set_uid(0);
    header.set_gid(0);
    header.set_size(size);
    header.set_mtime(0);
    header
}

/// Directory header with the given mode.
pub(crate) fn dir_header(mode: u32) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Directory);
    header.set_mode(mode);
    header.set_uid(0);
    header.set_gid(0);
    header.set_size(0);
    header.set_mtime(0);
    header
}

fn padding_for(size: u64) -> u64 {
    (BLOCK_SIZE - size % BLOCK_SIZE) % BLOCK_SIZE
}

fn set_field(field: &mut [u8], value: &[u8]) {
    field.fill(0);
    field[..value.len()].copy_from_slice(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tar::Archive;

    fn read_entries(bytes: &[u8]) -> Vec<(Vec<u8>, EntryType, Vec<u8>)> {
        let mut archive = Archive::new(bytes);
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let mut e = e.unwrap();
                let path = e.path_bytes().into_owned();
                let kind = e.header().entry_type();
                let mut body = Vec::new();
                e.read_to_end(&mut body).unwrap();
                (path, kind, body)
            })
            .collect()
    }

    #[test]
    fn test_single_entry_written_in_pieces() {
        let mut writer = TarWriter::new(Vec::new());
        writer
            .write_header(b"boot/kernel", &file_header(0o755, 11))
            .unwrap();
        writer.write_all(b"hello ").unwrap();
        writer.write_all(b"world").unwrap();
        let bytes = writer.finish().unwrap();

        assert_eq!(bytes.len() % 512, 0);
        let entries = read_entries(&bytes);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, b"boot/kernel");
        assert_eq!(entries[0].2, b"hello world");
    }

    #[test]
    fn test_mode_is_preserved() {
        let mut writer = TarWriter::new(Vec::new());
        writer
            .append_data(b"boot/kernel", &file_header(0o600, 0), b"abc")
            .unwrap();
        let bytes = writer.finish().unwrap();
        let mut archive = Archive::new(&bytes[..]);
        let entry = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(entry.header().mode().unwrap(), 0o600);
        assert_eq!(entry.header().size().unwrap(), 3);
    }

    #[test]
    fn test_directory_name_keeps_trailing_slash() {
        let mut writer = TarWriter::new(Vec::new());
        writer.write_header(b"boot/", &dir_header(0o755)).unwrap();
        let bytes = writer.finish().unwrap();
        let entries = read_entries(&bytes);
        assert_eq!(entries[0].0, b"boot/");
        assert_eq!(entries[0].1, EntryType::Directory);
    }

    #[test]
    fn test_write_past_entry_size_fails() {
        let mut writer = TarWriter::new(Vec::new());
        writer.write_header(b"a", &file_header(0o644, 2)).unwrap();
        let err = writer.write_all(b"abc").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_short_body_fails_on_next_header() {
        let mut writer = TarWriter::new(Vec::new());
        writer.write_header(b"a", &file_header(0o644, 4)).unwrap();
        writer.write_all(b"ab").unwrap();
        let err = writer.write_header(b"b", &file_header(0o644, 0)).unwrap_err();
        assert!(matches!(err, BootError::ArchiveError(_)));
    }

    #[test]
    fn test_short_body_fails_on_finish() {
        let mut writer = TarWriter::new(Vec::new());
        writer.write_header(b"a", &file_header(0o644, 4)).unwrap();
        assert!(writer.finish().is_err());
    }

    #[test]
    fn test_write_before_any_header_fails() {
        let mut writer = TarWriter::new(Vec::new());
        assert!(writer.write_all(b"x").is_err());
    }

    #[test]
    fn test_long_path_uses_gnu_long_name() {
        let long = format!("lib/modules/{}/kernel.ko", "x".repeat(150));
        let mut writer = TarWriter::new(Vec::new());
        writer
            .append_data(long.as_bytes(), &file_header(0o644, 0), b"ko")
            .unwrap();
        assert_eq!(writer.entries(), 1);
        let bytes = writer.finish().unwrap();
        let entries = read_entries(&bytes);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, long.as_bytes());
        assert_eq!(entries[0].2, b"ko");
    }

    #[test]
    fn test_symlink_target_is_copied() {
        let mut source = Header::new_gnu();
        source.set_entry_type(EntryType::Symlink);
        source.set_size(0);
        source.set_mode(0o777);
        source.set_link_name("vmlinuz-5.10").unwrap();

        let mut writer = TarWriter::new(Vec::new());
        writer.write_header(b"vmlinuz", &source).unwrap();
        let bytes = writer.finish().unwrap();

        let mut archive = Archive::new(&bytes[..]);
        let entry = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(
            entry.link_name_bytes().unwrap().as_ref(),
            b"vmlinuz-5.10"
        );
    }

    #[test]
    fn test_synthesized_headers_have_numeric_ids() {
        for header in [file_header(0o644, 1), dir_header(0o755)] {
            assert_eq!(header.uid().unwrap(), 0);
            assert_eq!(header.gid().unwrap(), 0);
            assert_eq!(header.mtime().unwrap(), 0);
        }
    }

    #[test]
    fn test_blank_metadata_written_as_zero() {
        // Only the fields a bare builder header carries
        let mut source = Header::new_gnu();
        source.set_size(2);
        assert!(source.uid().is_err());

        let mut writer = TarWriter::new(Vec::new());
        writer.write_header(b"etc/motd", &source).unwrap();
        writer.write_all(b"hi").unwrap();
        let bytes = writer.finish().unwrap();

        let mut archive = Archive::new(&bytes[..]);
        let entry = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(entry.header().uid().unwrap(), 0);
        assert_eq!(entry.header().gid().unwrap(), 0);
        assert_eq!(entry.header().mtime().unwrap(), 0);
        assert_eq!(entry.header().mode().unwrap(), 0);
    }

    #[test]
    fn test_unreadable_size_is_archive_error() {
        let header = Header::new_gnu();
        let mut writer = TarWriter::new(Vec::new());
        let err = writer.write_header(b"a", &header).unwrap_err();
        assert!(matches!(err, BootError::ArchiveError(_)));
    }

    #[test]
    fn test_link_argument_overrides_header_field() {
        let target = format!("/lib/firmware/{}/fw.bin", "v".repeat(120));
        let mut source = file_header(0o777, 0);
        source.set_entry_type(EntryType::Symlink);

        let mut writer = TarWriter::new(Vec::new());
        writer
            .write_entry(b"lib/fw.bin", Some(target.as_bytes()), &source)
            .unwrap();
        let bytes = writer.finish().unwrap();

        let mut archive = Archive::new(&bytes[..]);
        let entry = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(&*entry.link_name_bytes().unwrap(), target.as_bytes());
        assert_eq!(&*entry.path_bytes(), b"lib/fw.bin");
    }

    #[test]
    fn test_empty_archive() {
        let bytes = TarWriter::new(Vec::new()).finish().unwrap();
        assert_eq!(bytes.len(), 1024);
        assert!(read_entries(&bytes).is_empty());
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut writer = TarWriter::new(Vec::new());
        assert!(writer.write_header(b"", &file_header(0o644, 0)).is_err());
    }
}
