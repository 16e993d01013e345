//! Random-access byte sources for upload parts.
//!
//! The engine slices the source by byte range, one range per part. Reads
//! are synchronous and run inside `spawn_blocking` at the call site.

use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;

/// A source of bytes supporting random-access slicing.
pub trait FileSource: Send + Sync + 'static {
    /// Total length in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads exactly `len` bytes starting at `offset`.
    fn read_range(&self, offset: u64, len: usize) -> io::Result<Bytes>;
}

/// File-backed source.
///
/// Each read opens its own handle, so concurrent part reads never contend
/// on a shared cursor, and the source survives pause/resume: only the
/// path needs to stay valid.
pub struct FsFileSource {
    path: PathBuf,
    len: u64,
}

impl FsFileSource {
    /// Stats and validates the file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        Ok(Self {
            path: path.to_path_buf(),
            len: meta.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileSource for FsFileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_range(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        let mut file = std::fs::File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }
}
