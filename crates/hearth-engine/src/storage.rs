//! Named byte sections: the boundary between persistence and the filesystem.
//!
//! Save games and replays are written as a set of named sections (`"header"`,
//! `"entities/soldier"`, `"replay/commands"`, ...). A [`ByteStore`] only needs
//! to store and return whole sections; everything above it is plain bytes.
//!
//! - [`MemoryStore`] keeps sections in a sorted map. It is what tests use and
//!   what state hashing serializes into.
//! - [`DirStore`] maps each section to a file under a root directory. A
//!   section is written to a temporary file and renamed into place, so a
//!   reader never observes a half-written section.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::trace;

/// Suffix of in-flight section files in a [`DirStore`].
const TEMP_SUFFIX: &str = ".partial";

// ---------------------------------------------------------------------------
// ByteStore
// ---------------------------------------------------------------------------

/// Storage of whole named sections.
///
/// Section names are `/`-separated relative paths without empty, `.` or `..`
/// components.
pub trait ByteStore {
    /// Store `bytes` under `name`, replacing any previous section.
    fn write(&mut self, name: &str, bytes: &[u8]) -> io::Result<()>;

    /// Return the section `name`. A missing section is an
    /// [`io::ErrorKind::NotFound`] error.
    fn read(&self, name: &str) -> io::Result<Vec<u8>>;

    /// Every stored section name, ascending.
    fn names(&self) -> io::Result<Vec<String>>;
}

/// Check that `name` is a valid section name.
pub fn validate_name(name: &str) -> io::Result<()> {
    let valid = !name.is_empty()
        && !name.ends_with(TEMP_SUFFIX)
        && name
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != ".." && !part.contains(['\\', '\0']));
    if valid {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid section name {name:?}"),
        ))
    }
}

/// Copy every section of `src` into `dst`, prefixing names with `prefix`.
pub fn copy_prefixed(src: &dyn ByteStore, dst: &mut dyn ByteStore, prefix: &str) -> io::Result<()> {
    for name in src.names()? {
        let bytes = src.read(&name)?;
        dst.write(&format!("{prefix}{name}"), &bytes)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory sections, sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStore {
    sections: BTreeMap<String, Vec<u8>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The sections of `src` whose names start with `prefix`, with the prefix
    /// removed.
    pub fn extract_prefixed(src: &dyn ByteStore, prefix: &str) -> io::Result<Self> {
        let mut out = Self::new();
        for name in src.names()? {
            if let Some(rest) = name.strip_prefix(prefix) {
                let bytes = src.read(&name)?;
                out.sections.insert(rest.to_owned(), bytes);
            }
        }
        Ok(out)
    }

    /// Borrow a section.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.sections.get(name).map(Vec::as_slice)
    }

    /// Mutable access to a section, for tests that corrupt saved data.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Vec<u8>> {
        self.sections.get_mut(name)
    }

    /// Remove a section.
    pub fn remove(&mut self, name: &str) -> Option<Vec<u8>> {
        self.sections.remove(name)
    }

    /// Sections in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.sections.iter().map(|(n, b)| (n.as_str(), b.as_slice()))
    }

    /// Number of sections.
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Whether the store holds no section.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

impl ByteStore for MemoryStore {
    fn write(&mut self, name: &str, bytes: &[u8]) -> io::Result<()> {
        validate_name(name)?;
        self.sections.insert(name.to_owned(), bytes.to_vec());
        Ok(())
    }

    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        self.sections.get(name).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no section named {name:?}"))
        })
    }

    fn names(&self) -> io::Result<Vec<String>> {
        Ok(self.sections.keys().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// DirStore
// ---------------------------------------------------------------------------

/// Sections stored as files below a root directory.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Use `root` as the store, creating it if needed.
    pub fn create(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> io::Result<PathBuf> {
        validate_name(name)?;
        Ok(name.split('/').fold(self.root.clone(), |p, part| p.join(part)))
    }

    fn collect_names(dir: &Path, prefix: &str, out: &mut Vec<String>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let Some(file_name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let name = format!("{prefix}{file_name}");
            if entry.file_type()?.is_dir() {
                Self::collect_names(&entry.path(), &format!("{name}/"), out)?;
            } else if !file_name.ends_with(TEMP_SUFFIX) {
                out.push(name);
            }
        }
        Ok(())
    }
}

impl ByteStore for DirStore {
    fn write(&mut self, name: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.path_of(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut temp = path.clone().into_os_string();
        temp.push(TEMP_SUFFIX);
        let temp = PathBuf::from(temp);
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &path)?;
        trace!(section = name, bytes = bytes.len(), "section written");
        Ok(())
    }

    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path_of(name)?)
    }

    fn names(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        Self::collect_names(&self.root, "", &mut names)?;
        names.sort();
        Ok(names)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
