//! Local file abstraction
//!
//! A `LocalFile` is either framed (every record carries a 4-byte big-endian
//! length) or plain (records are separated by `\n` on read). With
//! compression on, every `write` call lands as one complete LZ4 frame, so a
//! file is a sequence of frames that decodes back into the original bytes.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use lz4_flex::frame::{FrameDecoder, FrameEncoder};

/// Bytes in a record frame header
pub const FRAME_LEN: usize = 4;

/// Length header written ahead of a `len`-byte record in a framed file
#[inline]
pub fn frame_header(len: usize) -> [u8; FRAME_LEN] {
    (len as u32).to_be_bytes()
}

/// One file on local disk
#[derive(Debug)]
pub struct LocalFile {
    path: PathBuf,
    framed: bool,
    compressed: bool,
    writer: Option<File>,
    reader: Option<Cursor<Vec<u8>>>,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>, framed: bool) -> Self {
        Self {
            path: path.into(),
            framed,
            compressed: false,
            writer: None,
            reader: None,
        }
    }

    /// Enable or disable LZ4 frames
    pub fn with_compression(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open for appending, creating the file if needed
    pub fn open_write(&mut self) -> io::Result<()> {
        self.reader = None;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = Some(file);
        Ok(())
    }

    /// Open for writing, discarding existing contents
    pub fn open_truncate(&mut self) -> io::Result<()> {
        self.reader = None;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.writer = Some(file);
        Ok(())
    }

    /// Load the whole file for `read_next`
    pub fn open_read(&mut self) -> io::Result<()> {
        self.writer = None;
        let raw = fs::read(&self.path)?;
        let data = if self.compressed && !raw.is_empty() {
            let mut decoded = Vec::with_capacity(raw.len() * 2);
            FrameDecoder::new(raw.as_slice()).read_to_end(&mut decoded)?;
            decoded
        } else {
            raw
        };
        self.reader = Some(Cursor::new(data));
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some() || self.reader.is_some()
    }

    pub fn close(&mut self) {
        if let Some(mut file) = self.writer.take()
            && let Err(e) = file.flush()
        {
            tracing::warn!(file = %self.path.display(), error = %e, "flush on close failed");
        }
        self.reader = None;
    }

    /// Write `data` in one call
    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let file = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "file not open for writing"))?;

        if self.compressed {
            let mut encoder = FrameEncoder::new(Vec::with_capacity(data.len() / 2 + 64));
            encoder.write_all(data)?;
            let frame = encoder.finish().map_err(io::Error::other)?;
            file.write_all(&frame)
        } else {
            file.write_all(data)
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }

    /// Size on disk, zero if the file does not exist
    pub fn file_size(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    pub fn delete(&self) -> io::Result<()> {
        fs::remove_file(&self.path)
    }

    /// Next record, or `None` at end of data
    ///
    /// A truncated trailing record is dropped with a warning.
    pub fn read_next(&mut self) -> Option<Vec<u8>> {
        let framed = self.framed;
        let cursor = self.reader.as_mut()?;
        let pos = cursor.position() as usize;
        let total = cursor.get_ref().len();
        if pos >= total {
            return None;
        }

        match next_record(cursor.get_ref(), pos, framed) {
            Ok((record, next)) => {
                cursor.set_position(next as u64);
                Some(record)
            }
            Err(reason) => {
                cursor.set_position(total as u64);
                tracing::warn!(file = %self.path.display(), offset = pos, "{}", reason);
                None
            }
        }
    }
}

fn next_record(data: &[u8], pos: usize, framed: bool) -> Result<(Vec<u8>, usize), &'static str> {
    let rest = &data[pos..];
    if !framed {
        return Ok(match rest.iter().position(|&b| b == b'\n') {
            Some(i) => (rest[..i].to_vec(), pos + i + 1),
            None => (rest.to_vec(), data.len()),
        });
    }

    if rest.len() < FRAME_LEN {
        return Err("truncated frame header");
    }
    let mut header = [0u8; FRAME_LEN];
    header.copy_from_slice(&rest[..FRAME_LEN]);
    let len = u32::from_be_bytes(header) as usize;
    let body = &rest[FRAME_LEN..];
    if body.len() < len {
        return Err("truncated record");
    }
    Ok((body[..len].to_vec(), pos + FRAME_LEN + len))
}

/// File names in `dir`; a missing directory lists as empty
pub fn list(dir: &Path) -> io::Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

/// Create `dir` and any missing parents
pub fn create_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

/// Point `link` at `target`, replacing whatever `link` was
#[cfg(unix)]
pub fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    match fs::remove_file(link) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
pub fn create_symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks not supported on this platform",
    ))
}

#[cfg(test)]
#[path = "fs_test.rs"]
mod fs_test;
