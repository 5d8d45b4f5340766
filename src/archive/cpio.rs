// src/archive/cpio.rs

//! CPIO (New ASCII / CRC) reader and writer
//!
//! SWUpdate images are `070702` ("crc") archives: the newc layout plus a
//! 32-bit additive checksum of each member's content. Both magics are read;
//! only the CRC variant is written.

use super::{validate_member_name, ArchiveAdapter};
use crate::error::{Error, IoResultExt, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

/// CPIO New ASCII Format (newc) header size
const HEADER_SIZE: usize = 110;
/// Magic string for newc format
const MAGIC_NEWC: &[u8] = b"070701";
/// Magic string for CRC format
const MAGIC_CRC: &[u8] = b"070702";
/// Name of the end-of-archive marker entry
const TRAILER: &str = "TRAILER!!!";
/// Longest member name accepted, including the trailing NUL
const MAX_NAME_SIZE: u64 = 4096;
/// Output archives are padded to a multiple of this size, like `cpio -o`
const BLOCK_SIZE: u64 = 512;

const S_IFMT: u32 = 0o170000;
const S_IFREG: u32 = 0o100000;

/// Extracted CPIO entry metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpioEntry {
    pub name: String,
    pub size: u64,
    pub mode: u32,
    pub mtime: u64,
    pub uid: u32,
    pub gid: u32,
    pub ino: u32,
    pub nlink: u32,
    /// Content checksum, present for `070702` entries
    pub checksum: Option<u32>,
}

impl CpioEntry {
    /// Check if this entry is a regular file
    pub fn is_regular_file(&self) -> bool {
        (self.mode & S_IFMT) == S_IFREG
    }
}

fn padding(len: u64) -> usize {
    ((4 - (len % 4)) % 4) as usize
}

/// Additive checksum used by the `070702` format
fn checksum_update(sum: u32, data: &[u8]) -> u32 {
    data.iter().fold(sum, |acc, b| acc.wrapping_add(*b as u32))
}

/// A streaming reader for CPIO (New ASCII) archives
///
/// Entry content is not buffered: after [`next_entry`](Self::next_entry) the
/// caller may copy it out with [`copy_content`](Self::copy_content); anything
/// left unread is skipped on the next call.
pub struct CpioReader<R: Read> {
    reader: R,
    /// Current entry, while its content has not been consumed
    pending: Option<CpioEntry>,
    /// Set once the trailer has been read
    finished: bool,
}

impl<R: Read> CpioReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending: None,
            finished: false,
        }
    }

    /// Read the next entry header from the CPIO archive
    /// Returns Ok(None) if end of archive (TRAILER!!!)
    ///
    /// Running out of data before the trailer is an `UnexpectedEof` error.
    pub fn next_entry(&mut self) -> io::Result<Option<CpioEntry>> {
        if self.finished {
            return Ok(None);
        }
        if self.pending.is_some() {
            self.skip_content()?;
        }

        // Read fixed header
        let mut header_buf = [0u8; HEADER_SIZE];
        self.read_header_part(&mut header_buf)?;

        // Verify magic
        let magic = &header_buf[0..6];
        if magic != MAGIC_NEWC && magic != MAGIC_CRC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid CPIO magic: {:?}", String::from_utf8_lossy(magic)),
            ));
        }

        // Parse hex fields
        let parse_hex = |start: usize, len: usize| -> io::Result<u32> {
            let s = std::str::from_utf8(&header_buf[start..start + len])
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            u32::from_str_radix(s, 16).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        };

        let ino = parse_hex(6, 8)?;
        let mode = parse_hex(14, 8)?;
        let uid = parse_hex(22, 8)?;
        let gid = parse_hex(30, 8)?;
        let nlink = parse_hex(38, 8)?;
        let mtime = parse_hex(46, 8)? as u64;
        let filesize = parse_hex(54, 8)? as u64;
        let namesize = parse_hex(94, 8)? as u64;
        let check = parse_hex(102, 8)?;

        if namesize == 0 || namesize > MAX_NAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("CPIO name size {} out of range (1..={})", namesize, MAX_NAME_SIZE),
            ));
        }

        // Read filename (including trailing NUL)
        let mut name_buf = vec![0u8; namesize as usize];
        self.read_header_part(&mut name_buf)?;
        if name_buf.last() == Some(&0) {
            name_buf.pop();
        }
        let name = String::from_utf8(name_buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        // Skip padding after filename (align to 4 bytes)
        let pad = padding(HEADER_SIZE as u64 + namesize);
        if pad > 0 {
            let mut skip = [0u8; 3];
            self.read_header_part(&mut skip[..pad])?;
        }

        // Check for trailer
        if name == TRAILER {
            self.finished = true;
            return Ok(None);
        }

        let entry = CpioEntry {
            name,
            size: filesize,
            mode,
            mtime,
            uid,
            gid,
            ino,
            nlink,
            checksum: (magic == MAGIC_CRC).then_some(check),
        };
        self.pending = Some(entry.clone());

        Ok(Some(entry))
    }

    /// Copy the current entry's content into `writer`
    ///
    /// For `070702` entries the checksum is verified.
    pub fn copy_content<W: Write>(&mut self, writer: &mut W) -> io::Result<u64> {
        let Some(entry) = self.pending.take() else {
            return Ok(0);
        };

        let mut remaining = entry.size;
        let mut sum = 0u32;
        let mut buffer = vec![0u8; 64 * 1024];
        while remaining > 0 {
            let want = remaining.min(buffer.len() as u64) as usize;
            self.reader.read_exact(&mut buffer[..want])?;
            sum = checksum_update(sum, &buffer[..want]);
            writer.write_all(&buffer[..want])?;
            remaining -= want as u64;
        }
        self.skip_padding(entry.size)?;

        if let Some(expected) = entry.checksum {
            if expected != sum {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "CPIO checksum mismatch for {}: header {:08x}, content {:08x}",
                        entry.name, expected, sum
                    ),
                ));
            }
        }

        Ok(entry.size)
    }

    /// Skip the current entry's content
    pub fn skip_content(&mut self) -> io::Result<()> {
        if let Some(entry) = self.pending.take() {
            let skipped = io::copy(&mut (&mut self.reader).take(entry.size), &mut io::sink())?;
            if skipped != entry.size {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("CPIO archive truncated inside {}", entry.name),
                ));
            }
            self.skip_padding(entry.size)?;
        }
        Ok(())
    }

    fn read_header_part(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.reader.read_exact(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("CPIO archive truncated before {}", TRAILER),
                )
            } else {
                e
            }
        })
    }

    fn skip_padding(&mut self, size: u64) -> io::Result<()> {
        let pad = padding(size);
        if pad > 0 {
            let mut skip = [0u8; 3];
            self.reader.read_exact(&mut skip[..pad])?;
        }
        Ok(())
    }
}

/// A writer for CPIO `070702` archives
pub struct CpioWriter<W: Write> {
    writer: W,
    written: u64,
    next_ino: u32,
}

impl<W: Write> CpioWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            written: 0,
            next_ino: 1,
        }
    }

    /// Append an in-memory regular file
    pub fn append_data(&mut self, name: &str, mode: u32, mtime: u32, data: &[u8]) -> io::Result<()> {
        let size = u32::try_from(data.len()).map_err(|_| too_large(name))?;
        let checksum = checksum_update(0, data);
        self.write_header(name, S_IFREG | (mode & 0o7777), mtime, size, checksum, 1)?;
        self.write_raw(data)?;
        self.write_padding(data.len() as u64)
    }

    /// Append a regular file from disk, streaming its content
    ///
    /// The file is read twice: once for the header checksum, once for the data.
    pub fn append_file(&mut self, name: &str, path: &Path) -> io::Result<()> {
        let metadata = fs::metadata(path)?;
        let size = u32::try_from(metadata.len()).map_err(|_| too_large(name))?;

        let mut checksum = 0u32;
        let mut reader = BufReader::new(File::open(path)?);
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            checksum = checksum_update(checksum, &buffer[..n]);
        }

        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);

        self.write_header(name, S_IFREG | file_permissions(&metadata), mtime, size, checksum, 1)?;

        let mut file = File::open(path)?;
        let copied = io::copy(&mut (&mut file).take(size as u64), &mut self.writer)?;
        if copied != size as u64 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} changed size while archiving", path.display()),
            ));
        }
        self.written += copied;
        self.write_padding(copied)
    }

    /// Write the trailer, pad to the block size and return the inner writer
    pub fn finish(mut self) -> io::Result<W> {
        self.next_ino = 0;
        self.write_header(TRAILER, 0, 0, 0, 0, 1)?;

        let remainder = self.written % BLOCK_SIZE;
        if remainder != 0 {
            let fill = vec![0u8; (BLOCK_SIZE - remainder) as usize];
            self.write_raw(&fill)?;
        }

        self.writer.flush()?;
        Ok(self.writer)
    }

    fn write_header(
        &mut self,
        name: &str,
        mode: u32,
        mtime: u32,
        size: u32,
        checksum: u32,
        nlink: u32,
    ) -> io::Result<()> {
        let ino = self.next_ino;
        if ino != 0 {
            self.next_ino += 1;
        }
        let namesize = name.len() as u32 + 1;

        let header = format!(
            "070702{:08X}{:08X}{:08X}{:08X}{:08X}{:08X}{:08X}{:08X}{:08X}{:08X}{:08X}{:08X}{:08X}",
            ino, mode, 0, 0, nlink, mtime, size, 0, 0, 0, 0, namesize, checksum
        );
        debug_assert_eq!(header.len(), HEADER_SIZE);

        self.write_raw(header.as_bytes())?;
        self.write_raw(name.as_bytes())?;
        self.write_raw(&[0])?;
        self.write_padding(HEADER_SIZE as u64 + namesize as u64)
    }

    fn write_raw(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data)?;
        self.written += data.len() as u64;
        Ok(())
    }

    fn write_padding(&mut self, len: u64) -> io::Result<()> {
        let pad = padding(len);
        if pad > 0 {
            self.write_raw(&[0u8; 3][..pad])?;
        }
        Ok(())
    }
}

fn too_large(name: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{} exceeds the 4 GiB CPIO member limit", name),
    )
}

#[cfg(unix)]
fn file_permissions(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_permissions(_metadata: &fs::Metadata) -> u32 {
    0o644
}

/// Native CPIO container adapter
#[derive(Debug, Clone, Copy, Default)]
pub struct CpioArchive;

impl CpioArchive {
    pub fn new() -> Self {
        Self
    }

    fn open(container: &Path) -> Result<CpioReader<BufReader<File>>> {
        let file = File::open(container).at_path(container)?;
        Ok(CpioReader::new(BufReader::new(file)))
    }
}

fn archive_error(container: &Path, e: io::Error) -> Error {
    Error::Archive(format!("{}: {}", container.display(), e))
}

impl ArchiveAdapter for CpioArchive {
    fn list_members(&self, container: &Path) -> Result<Vec<String>> {
        let mut reader = Self::open(container)?;
        let mut members = Vec::new();

        while let Some(entry) = reader.next_entry().map_err(|e| archive_error(container, e))? {
            members.push(entry.name);
        }

        debug!("{} lists {} members", container.display(), members.len());
        Ok(members)
    }

    fn extract_all(&self, container: &Path, dest: &Path) -> Result<()> {
        let mut reader = Self::open(container)?;

        while let Some(entry) = reader.next_entry().map_err(|e| archive_error(container, e))? {
            validate_member_name(&entry.name)?;
            if !entry.is_regular_file() {
                return Err(Error::Archive(format!(
                    "{}: member {} is not a regular file (mode {:o})",
                    container.display(),
                    entry.name,
                    entry.mode
                )));
            }

            let target = dest.join(&entry.name);
            let mut writer = BufWriter::new(File::create(&target).at_path(&target)?);
            reader
                .copy_content(&mut writer)
                .map_err(|e| archive_error(container, e))?;
            writer.flush().at_path(&target)?;

            debug!("Extracted {} ({} bytes)", entry.name, entry.size);
        }

        Ok(())
    }

    fn build(&self, output: &Path, source_dir: &Path, members: &[String]) -> Result<()> {
        for name in members {
            validate_member_name(name)?;
            if !source_dir.join(name).is_file() {
                return Err(Error::Archive(format!(
                    "Member {} missing from {}",
                    name,
                    source_dir.display()
                )));
            }
        }

        // Written next to the destination, then renamed into place
        let file_name = output
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());
        let partial = output.with_file_name(format!(".{}.partial", file_name));

        let result = (|| -> io::Result<()> {
            let mut writer = CpioWriter::new(BufWriter::new(File::create(&partial)?));
            for name in members {
                writer.append_file(name, &source_dir.join(name))?;
            }
            writer.finish()?;
            Ok(())
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&partial);
            return Err(archive_error(output, e));
        }

        fs::rename(&partial, output).at_path(output)?;
        debug!("Wrote {} with {} members", output.display(), members.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn archive_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = CpioWriter::new(Vec::new());
        for (name, data) in entries {
            writer.append_data(name, 0o644, 0, data).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn test_write_then_read_entries() {
        let bytes = archive_bytes(&[("sw-description", b"software = {};"), ("a.gz", b"xyz")]);
        assert_eq!(bytes.len() % BLOCK_SIZE as usize, 0);

        let mut reader = CpioReader::new(Cursor::new(bytes));

        let first = reader.next_entry().unwrap().unwrap();
        assert_eq!(first.name, "sw-description");
        assert!(first.is_regular_file());
        assert_eq!(first.checksum, Some(checksum_update(0, b"software = {};")));
        let mut content = Vec::new();
        reader.copy_content(&mut content).unwrap();
        assert_eq!(content, b"software = {};");

        // Content of the second entry is skipped implicitly
        let second = reader.next_entry().unwrap().unwrap();
        assert_eq!(second.name, "a.gz");
        assert_eq!(second.size, 3);

        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_header_layout() {
        let bytes = archive_bytes(&[("x", b"ab")]);
        assert_eq!(&bytes[0..6], MAGIC_CRC);
        // 110 header + "x\0" = 112, already aligned
        assert_eq!(&bytes[110..112], b"x\0");
        assert_eq!(&bytes[112..114], b"ab");
        assert_eq!(&bytes[114..116], &[0, 0]);
        assert_eq!(&bytes[116..122], MAGIC_CRC);
    }

    #[test]
    fn test_reads_newc_magic() {
        let mut bytes = archive_bytes(&[("file", b"data")]);
        bytes[5] = b'1';

        let mut reader = CpioReader::new(Cursor::new(bytes));
        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.name, "file");
        assert_eq!(entry.checksum, None);
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let mut bytes = archive_bytes(&[("file", b"data")]);
        // Corrupt the first content byte (header 110 + "file\0" 5 + pad 1)
        bytes[116] = b'X';

        let mut reader = CpioReader::new(Cursor::new(bytes));
        reader.next_entry().unwrap().unwrap();
        let err = reader.copy_content(&mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_trailer_ends_iteration() {
        let mut reader = CpioReader::new(Cursor::new(archive_bytes(&[("a", b"1")])));
        reader.next_entry().unwrap().unwrap();
        assert!(reader.next_entry().unwrap().is_none());
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_truncated_inside_header() {
        let bytes = archive_bytes(&[("sw-description", b"m"), ("image1.raw", b"r"), ("image2.raw", b"s")]);
        // Start of the third header: two entries of 110 + name + pad + 1 byte + pad
        let third = (0..2).fold(0usize, |offset, i| {
            let name_len = ["sw-description", "image1.raw"][i].len() + 1;
            let header = HEADER_SIZE + name_len + padding((HEADER_SIZE + name_len) as u64);
            offset + header + 1 + padding(1)
        });
        assert_eq!(&bytes[third..third + 6], MAGIC_CRC);

        let mut reader = CpioReader::new(Cursor::new(bytes[..third + 40].to_vec()));
        reader.next_entry().unwrap().unwrap();
        reader.next_entry().unwrap().unwrap();
        let err = reader.next_entry().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_missing_trailer() {
        let bytes = archive_bytes(&[("sw-description", b"m"), ("image1.raw", b"r")]);
        let trailer = bytes
            .windows(TRAILER.len())
            .position(|w| w == TRAILER.as_bytes())
            .unwrap()
            - HEADER_SIZE;

        let mut reader = CpioReader::new(Cursor::new(bytes[..trailer].to_vec()));
        reader.next_entry().unwrap().unwrap();
        reader.next_entry().unwrap().unwrap();
        assert_eq!(reader.next_entry().unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_oversized_name_rejected() {
        let mut bytes = archive_bytes(&[("file", b"data")]);
        bytes[94..102].copy_from_slice(b"FFFFFFFF");

        let mut reader = CpioReader::new(Cursor::new(bytes));
        let err = reader.next_entry().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncated_container_is_archive_error() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("cut.swu");
        let extract_dir = temp_dir.path().join("extract");
        fs::create_dir(&extract_dir).unwrap();

        let bytes = archive_bytes(&[("sw-description", b"m"), ("image1.raw", b"r"), ("image2.raw", b"s")]);
        let third = bytes
            .windows(b"image2.raw".len())
            .position(|w| w == b"image2.raw")
            .unwrap()
            - HEADER_SIZE;
        fs::write(&input, &bytes[..third + 20]).unwrap();

        let archive = CpioArchive::new();
        let err = archive.list_members(&input).unwrap_err();
        assert!(matches!(err, Error::Archive(ref msg) if msg.contains("truncated")));
        assert!(matches!(
            archive.extract_all(&input, &extract_dir).unwrap_err(),
            Error::Archive(_)
        ));
    }

    #[test]
    fn test_invalid_magic() {
        let mut reader = CpioReader::new(Cursor::new(vec![b'0'; HEADER_SIZE]));
        assert!(reader.next_entry().is_err());
    }

    #[test]
    fn test_list_extract_build_preserves_order() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("in.swu");
        let output = temp_dir.path().join("out.swu");
        let extract_dir = temp_dir.path().join("extract");
        fs::create_dir(&extract_dir).unwrap();

        let entries: [(&str, &[u8]); 4] = [
            ("sw-description", b"manifest"),
            ("zeta.gz", b"z"),
            ("alpha.raw", b"alpha contents"),
            ("mid.zst", b""),
        ];
        fs::write(&input, archive_bytes(&entries)).unwrap();

        let archive = CpioArchive::new();
        let members = archive.list_members(&input).unwrap();
        assert_eq!(members, vec!["sw-description", "zeta.gz", "alpha.raw", "mid.zst"]);

        archive.extract_all(&input, &extract_dir).unwrap();
        assert_eq!(fs::read(extract_dir.join("alpha.raw")).unwrap(), b"alpha contents");
        assert_eq!(fs::read(extract_dir.join("mid.zst")).unwrap(), b"");

        archive.build(&output, &extract_dir, &members).unwrap();
        assert_eq!(archive.list_members(&output).unwrap(), members);
        assert!(!temp_dir.path().join(".out.swu.partial").exists());
    }

    #[test]
    fn test_build_missing_member() {
        let temp_dir = TempDir::new().unwrap();
        let output = temp_dir.path().join("out.swu");

        let err = CpioArchive::new()
            .build(&output, temp_dir.path(), &["sw-description".to_string()])
            .unwrap_err();
        assert!(matches!(err, Error::Archive(ref msg) if msg.contains("sw-description")));
        assert!(!output.exists());
    }

    #[test]
    fn test_extract_rejects_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("evil.swu");
        fs::write(&input, archive_bytes(&[("../escape", b"x")])).unwrap();

        let err = CpioArchive::new().extract_all(&input, temp_dir.path()).unwrap_err();
        assert!(matches!(err, Error::Archive(_)));
        assert!(!temp_dir.path().parent().unwrap().join("escape").exists());
    }

    #[test]
    fn test_list_missing_container() {
        let err = CpioArchive::new()
            .list_members(Path::new("/nonexistent/in.swu"))
            .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
