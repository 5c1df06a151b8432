//! Where stream data comes from.
//!
//! Streams read through a [`FileSystem`]; the default opens plain files,
//! and [`CallbackFileSystem`] lets a host route reads into its own
//! archive format.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::sync::Arc;

/// A readable, seekable stream source
pub trait AudioFile: Read + Seek + Send {}

impl<T: Read + Seek + Send> AudioFile for T {}

pub trait FileSystem: Send + Sync {
    fn open(&self, path: &str) -> io::Result<Box<dyn AudioFile>>;
}

/// Opens paths on the local disk
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn open(&self, path: &str) -> io::Result<Box<dyn AudioFile>> {
        let file = File::open(path)?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Opaque per-file value handed back to the callbacks
pub type FileToken = u64;

type OpenFn = dyn Fn(&str) -> io::Result<FileToken> + Send + Sync;
type CloseFn = dyn Fn(FileToken) + Send + Sync;
type SeekFn = dyn Fn(FileToken, SeekFrom) -> io::Result<u64> + Send + Sync;
type ReadFn = dyn Fn(FileToken, &mut [u8]) -> io::Result<usize> + Send + Sync;

struct Callbacks {
    open: Box<OpenFn>,
    close: Box<CloseFn>,
    seek: Box<SeekFn>,
    read: Box<ReadFn>,
}

/// File system built from host-supplied open/close/seek/read functions.
///
/// `close` runs when the engine drops the file.
#[derive(Clone)]
pub struct CallbackFileSystem {
    callbacks: Arc<Callbacks>,
}

impl CallbackFileSystem {
    pub fn new<O, C, S, R>(open: O, close: C, seek: S, read: R) -> Self
    where
        O: Fn(&str) -> io::Result<FileToken> + Send + Sync + 'static,
        C: Fn(FileToken) + Send + Sync + 'static,
        S: Fn(FileToken, SeekFrom) -> io::Result<u64> + Send + Sync + 'static,
        R: Fn(FileToken, &mut [u8]) -> io::Result<usize> + Send + Sync + 'static,
    {
        Self {
            callbacks: Arc::new(Callbacks {
                open: Box::new(open),
                close: Box::new(close),
                seek: Box::new(seek),
                read: Box::new(read),
            }),
        }
    }
}

impl FileSystem for CallbackFileSystem {
    fn open(&self, path: &str) -> io::Result<Box<dyn AudioFile>> {
        let token = (self.callbacks.open)(path)?;
        Ok(Box::new(CallbackFile {
            token,
            callbacks: Arc::clone(&self.callbacks),
        }))
    }
}

struct CallbackFile {
    token: FileToken,
    callbacks: Arc<Callbacks>,
}

impl Read for CallbackFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (self.callbacks.read)(self.token, buf)
    }
}

impl Seek for CallbackFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        (self.callbacks.seek)(self.token, pos)
    }
}

impl Drop for CallbackFile {
    fn drop(&mut self) {
        (self.callbacks.close)(self.token);
    }
}
