//! Filesystem cache backend

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tempfile::NamedTempFile;

use super::{Cache, CacheEntry, CacheError};
use crate::block::hex_digest;

/// Cache storing one file per key in a directory
///
/// File names are the SHA-256 of the key. Writes go to a temporary file in
/// the same directory which is then renamed over the entry, so readers see
/// either the old entry or the new one.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Use `dir` as the cache directory, creating it if needed
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of the entry for `key`
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(hex_digest(&[key.as_bytes()]))
    }

    fn io_error(key: &str, source: io::Error) -> CacheError {
        CacheError::Io {
            key: key.to_string(),
            source,
        }
    }
}

impl Cache for FileCache {
    fn has(&self, key: &str) -> bool {
        let Ok(mut file) = File::open(self.entry_path(key)) else {
            return false;
        };
        let mut field = [0u8; CacheEntry::EXPIRY_WIDTH];
        if file.read_exact(&mut field).is_err() {
            return false;
        }
        CacheEntry::decode_expiry(&field).is_some_and(|expires_at| Utc::now() < expires_at)
    }

    fn get(&self, key: &str) -> Result<String, CacheError> {
        let bytes = match fs::read(self.entry_path(key)) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(CacheError::NotFound {
                    key: key.to_string(),
                })
            }
            Err(err) => return Err(Self::io_error(key, err)),
        };
        CacheEntry::decode(key, &bytes)?.into_payload(key)
    }

    fn put(&self, key: &str, content: &str, ttl: Duration) -> Result<(), CacheError> {
        let entry = CacheEntry::new(content, ttl);
        let mut temp = NamedTempFile::new_in(&self.dir).map_err(|e| Self::io_error(key, e))?;
        temp.write_all(&entry.encode())
            .map_err(|e| Self::io_error(key, e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| Self::io_error(key, e))?;
        temp.persist(self.entry_path(key))
            .map_err(|e| Self::io_error(key, e.error))?;
        Ok(())
    }
}
