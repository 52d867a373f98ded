//! Filesystem reads behind a trait, so secret lookup can run against an in-memory map.
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

pub trait ReadFile {
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
}

/// Zero-sized type, delegates to `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemFs;

impl ReadFile for SystemFs {
    #[inline]
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// In-memory files keyed by path.
///
/// Paths are compared as raw [`PathBuf`]s with no normalization: `"a.json"` and
/// `"./a.json"` are distinct entries.
impl ReadFile for HashMap<PathBuf, String> {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "file not found"))
    }
}
