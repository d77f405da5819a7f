//! Storage collaborator: where locations actually live.
//!
//! The engine only needs existence checks, deletion, whole-location line
//! reads and line-oriented writes. Two implementations are provided:
//! `LocalFs` (plain files and part-file directories) and `MemoryStorage`
//! (in-process, for tests and embedding).

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::debug;
use parking_lot::Mutex;

use crate::error::{FlowError, Result};
use crate::tap::Location;

/// File name used for the single part written into a sink directory.
pub const PART_FILE: &str = "part-00000";

pub trait Storage: Send + Sync {
    fn exists(&self, location: &Location) -> Result<bool>;

    fn delete(&self, location: &Location, recursive: bool) -> Result<()>;

    /// All lines stored at `location`, in storage order. Lines are split on
    /// `\n` only; a `\r` before it stays part of the line.
    fn open_for_read(&self, location: &Location) -> Result<Vec<String>>;

    fn open_for_write(&self, location: &Location) -> Result<Box<dyn LineSink + '_>>;
}

/// Write side of a location. Data is only guaranteed visible after `finish`.
pub trait LineSink: Send {
    fn write_line(&mut self, line: &str) -> Result<()>;

    fn finish(self: Box<Self>) -> Result<()>;
}

/// Local file system. A location is either a single file or a directory of
/// part files; relative locations resolve against `root`.
#[derive(Debug, Clone, Default)]
pub struct LocalFs {
    root: Option<PathBuf>,
}

impl LocalFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    pub fn resolve(&self, location: &Location) -> PathBuf {
        match &self.root {
            Some(root) => root.join(location.as_str()),
            None => PathBuf::from(location.as_str()),
        }
    }
}

/// A line that is not valid UTF-8 is a `Parse` error naming that line.
fn read_lines(path: &Path, location: &Location) -> Result<Vec<String>> {
    let bytes = fs::read(path).map_err(|e| FlowError::io(location, e))?;
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let body = bytes.strip_suffix(b"\n").unwrap_or(&bytes[..]);
    body.split(|&b| b == b'\n')
        .map(|line| {
            String::from_utf8(line.to_vec()).map_err(|_| FlowError::Parse {
                line: String::from_utf8_lossy(line).into_owned(),
                pattern: "utf-8 text".to_string(),
            })
        })
        .collect()
}

impl Storage for LocalFs {
    fn exists(&self, location: &Location) -> Result<bool> {
        self.resolve(location)
            .try_exists()
            .map_err(|e| FlowError::io(location, e))
    }

    fn delete(&self, location: &Location, recursive: bool) -> Result<()> {
        let path = self.resolve(location);
        let meta = fs::metadata(&path).map_err(|e| FlowError::io(location, e))?;
        let res = if meta.is_dir() {
            if recursive {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_dir(&path)
            }
        } else {
            fs::remove_file(&path)
        };
        res.map_err(|e| FlowError::io(location, e))?;
        debug!("deleted {}", path.display());
        Ok(())
    }

    fn open_for_read(&self, location: &Location) -> Result<Vec<String>> {
        let path = self.resolve(location);
        let meta = fs::metadata(&path).map_err(|e| FlowError::io(location, e))?;
        if !meta.is_dir() {
            return read_lines(&path, location);
        }

        // Hidden and underscore-prefixed entries are bookkeeping, not data.
        let mut parts = Vec::new();
        for entry in fs::read_dir(&path).map_err(|e| FlowError::io(location, e))? {
            let entry = entry.map_err(|e| FlowError::io(location, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || name.starts_with('_') {
                continue;
            }
            if entry.path().is_file() {
                parts.push(entry.path());
            }
        }
        parts.sort();

        let mut lines = Vec::new();
        for part in parts {
            lines.extend(read_lines(&part, location)?);
        }
        Ok(lines)
    }

    fn open_for_write(&self, location: &Location) -> Result<Box<dyn LineSink + '_>> {
        let dir = self.resolve(location);
        fs::create_dir_all(&dir).map_err(|e| FlowError::io(location, e))?;
        let file = fs::File::create(dir.join(PART_FILE)).map_err(|e| FlowError::io(location, e))?;
        Ok(Box::new(FileSink {
            location: location.clone(),
            out: BufWriter::new(file),
        }))
    }
}

struct FileSink {
    location: Location,
    out: BufWriter<fs::File>,
}

impl LineSink for FileSink {
    fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.out, "{}", line).map_err(|e| FlowError::io(&self.location, e))
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        self.out
            .flush()
            .map_err(|e| FlowError::io(&self.location, e))
    }
}

/// In-process storage keyed by location.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Mutex<BTreeMap<Location, Vec<String>>>,
    denied: Mutex<BTreeSet<Location>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<I, S>(&self, location: impl Into<Location>, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data
            .lock()
            .insert(location.into(), lines.into_iter().map(Into::into).collect());
    }

    pub fn lines(&self, location: impl Into<Location>) -> Option<Vec<String>> {
        self.data.lock().get(&location.into()).cloned()
    }

    /// Make every access to `location` fail with a permission error.
    pub fn deny(&self, location: impl Into<Location>) {
        self.denied.lock().insert(location.into());
    }

    fn check(&self, location: &Location) -> Result<()> {
        if self.denied.lock().contains(location) {
            return Err(FlowError::io(
                location,
                io::Error::new(io::ErrorKind::PermissionDenied, "access denied"),
            ));
        }
        Ok(())
    }

    fn is_within(candidate: &Location, location: &Location) -> bool {
        candidate
            .as_str()
            .strip_prefix(location.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

impl Storage for MemoryStorage {
    fn exists(&self, location: &Location) -> Result<bool> {
        self.check(location)?;
        let data = self.data.lock();
        Ok(data.contains_key(location) || data.keys().any(|k| Self::is_within(k, location)))
    }

    fn delete(&self, location: &Location, recursive: bool) -> Result<()> {
        self.check(location)?;
        let mut data = self.data.lock();
        let nested: Vec<Location> = data
            .keys()
            .filter(|k| Self::is_within(k, location))
            .cloned()
            .collect();
        if !nested.is_empty() && !recursive {
            return Err(FlowError::io(
                location,
                io::Error::new(io::ErrorKind::Other, "location is not empty"),
            ));
        }
        let removed = data.remove(location).is_some() | !nested.is_empty();
        for k in nested {
            data.remove(&k);
        }
        if !removed {
            return Err(FlowError::io(
                location,
                io::Error::new(io::ErrorKind::NotFound, "no such location"),
            ));
        }
        Ok(())
    }

    fn open_for_read(&self, location: &Location) -> Result<Vec<String>> {
        self.check(location)?;
        self.data.lock().get(location).cloned().ok_or_else(|| {
            FlowError::io(
                location,
                io::Error::new(io::ErrorKind::NotFound, "no such location"),
            )
        })
    }

    fn open_for_write(&self, location: &Location) -> Result<Box<dyn LineSink + '_>> {
        self.check(location)?;
        Ok(Box::new(MemorySink {
            storage: self,
            location: location.clone(),
            lines: Vec::new(),
        }))
    }
}

// Buffers until `finish` so readers never observe a half-written location.
struct MemorySink<'a> {
    storage: &'a MemoryStorage,
    location: Location,
    lines: Vec<String>,
}

impl LineSink for MemorySink<'_> {
    fn write_line(&mut self, line: &str) -> Result<()> {
        self.lines.push(line.to_string());
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let MemorySink {
            storage,
            location,
            lines,
        } = *self;
        storage.data.lock().insert(location, lines);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write(storage: &dyn Storage, location: &Location, lines: &[&str]) {
        let mut sink = storage.open_for_write(location).unwrap();
        for line in lines {
            sink.write_line(line).unwrap();
        }
        sink.finish().unwrap();
    }

    #[test]
    fn local_fs_writes_part_files() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFs::with_root(dir.path());
        let loc = Location::new("out/logs/");

        assert!(!fs.exists(&loc).unwrap());
        write(&fs, &loc, &["a\t1", "b\t2"]);
        assert!(fs.exists(&loc).unwrap());
        assert!(dir.path().join("out/logs").join(PART_FILE).is_file());
        assert_eq!(fs.open_for_read(&loc).unwrap(), vec!["a\t1", "b\t2"]);

        fs.delete(&loc, true).unwrap();
        assert!(!fs.exists(&loc).unwrap());
    }

    #[test]
    fn local_fs_reads_plain_files_and_skips_hidden_parts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("access.log"), "one\ntwo\n").unwrap();
        std::fs::create_dir(dir.path().join("parts")).unwrap();
        std::fs::write(dir.path().join("parts/part-00001"), "y\n").unwrap();
        std::fs::write(dir.path().join("parts/part-00000"), "x\n").unwrap();
        std::fs::write(dir.path().join("parts/_SUCCESS"), "").unwrap();

        let fs = LocalFs::with_root(dir.path());
        assert_eq!(fs.open_for_read(&"access.log".into()).unwrap(), vec!["one", "two"]);
        assert_eq!(fs.open_for_read(&"parts".into()).unwrap(), vec!["x", "y"]);

        let err = fs.open_for_read(&"missing".into()).unwrap_err();
        assert!(matches!(err, FlowError::Io { .. }));
    }

    #[test]
    fn local_fs_keeps_carriage_returns_and_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("dos.log"), "ab\r\n\ncd\r\n").unwrap();
        std::fs::write(dir.path().join("empty.log"), "").unwrap();

        let fs = LocalFs::with_root(dir.path());
        assert_eq!(fs.open_for_read(&"dos.log".into()).unwrap(), vec!["ab\r", "", "cd\r"]);
        assert!(fs.open_for_read(&"empty.log".into()).unwrap().is_empty());
    }

    #[test]
    fn invalid_utf8_is_a_parse_error_for_that_line() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.log"), b"fine\nbro\xffken\nalso fine\n").unwrap();

        let fs = LocalFs::with_root(dir.path());
        match fs.open_for_read(&"bad.log".into()) {
            Err(FlowError::Parse { line, pattern }) => {
                assert_eq!(line, "bro\u{fffd}ken");
                assert_eq!(pattern, "utf-8 text");
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn memory_storage_nested_delete() {
        let storage = MemoryStorage::new();
        storage.insert("out/urls", ["u"]);
        storage.insert("out/words", ["w"]);

        let out = Location::new("out");
        assert!(storage.exists(&out).unwrap());
        assert!(storage.delete(&out, false).is_err());
        storage.delete(&out, true).unwrap();
        assert!(!storage.exists(&out).unwrap());
        assert!(storage.lines("out/urls").is_none());
    }

    #[test]
    fn memory_storage_denied_location() {
        let storage = MemoryStorage::new();
        storage.deny("secret");
        let err = storage.open_for_write(&"secret".into()).err().unwrap();
        assert!(matches!(err, FlowError::Io { .. }));
    }
}
