//! Font file access
//!
//! Names registered in the catalogue are resolved through a `FontStorage`:
//! either a directory on disk or a table of in-memory streams.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::debug;

use super::engine::FaceSource;

/// Seekable byte stream over a collection container
pub trait ContainerStream: Read + Seek {
    /// Total stream length in bytes
    fn byte_len(&mut self) -> io::Result<u64> {
        let pos = self.stream_position()?;
        let len = self.seek(io::SeekFrom::End(0))?;
        self.seek(io::SeekFrom::Start(pos))?;
        Ok(len)
    }
}

impl<T: Read + Seek> ContainerStream for T {}

/// Named font file provider
pub trait FontStorage {
    /// How the engine should open `name`
    fn face_source(&self, name: &str) -> io::Result<FaceSource>;

    /// Whole-file contents
    fn read(&self, name: &str) -> io::Result<Vec<u8>>;

    /// Open a seekable stream (collection containers)
    fn open_stream(&self, name: &str) -> io::Result<Box<dyn ContainerStream>>;
}

/// Fonts stored as files under one directory
#[derive(Debug, Clone)]
pub struct DirStorage {
    dir: PathBuf,
}

impl DirStorage {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn set_dir<P: AsRef<Path>>(&mut self, dir: P) {
        self.dir = dir.as_ref().to_path_buf();
        debug!("Font directory: {}", self.dir.display());
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

impl FontStorage for DirStorage {
    fn face_source(&self, name: &str) -> io::Result<FaceSource> {
        let path = self.path(name);
        if !path.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("font file not found: {}", path.display()),
            ));
        }
        Ok(FaceSource::Path(path))
    }

    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.path(name))
    }

    fn open_stream(&self, name: &str) -> io::Result<Box<dyn ContainerStream>> {
        Ok(Box::new(File::open(self.path(name))?))
    }
}

/// Fonts held in memory, keyed by name
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    files: HashMap<String, Rc<Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, data: Vec<u8>) {
        self.files.insert(name.to_string(), Rc::new(data));
    }

    pub fn with_file(mut self, name: &str, data: Vec<u8>) -> Self {
        self.insert(name, data);
        self
    }

    fn get(&self, name: &str) -> io::Result<&Rc<Vec<u8>>> {
        self.files.get(name).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("font not found: {name}"))
        })
    }
}

impl FontStorage for MemoryStorage {
    fn face_source(&self, name: &str) -> io::Result<FaceSource> {
        Ok(FaceSource::Memory(Rc::clone(self.get(name)?)))
    }

    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        Ok(self.get(name)?.as_ref().clone())
    }

    fn open_stream(&self, name: &str) -> io::Result<Box<dyn ContainerStream>> {
        Ok(Box::new(Cursor::new(self.get(name)?.as_ref().clone())))
    }
}
