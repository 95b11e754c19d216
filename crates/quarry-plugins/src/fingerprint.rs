//! Content fingerprints for plugin directories and argument tuples.
//!
//! A [`ContentFingerprint`] is a blake3 digest. For a directory it covers the
//! bytes of every regular file, visited in sorted relative-path order. File
//! names and metadata are not hashed, so a pure rename keeps the fingerprint.
//! Each file is length-framed before its bytes are fed to the digest, so
//! bytes cannot move from one file to the next without changing the result.
//!
//! For argument tuples the values are hashed as a JSON array, which keeps
//! `(1, 23)` and `(12, 3)` apart.

use std::ffi::OsString;
use std::fmt;
use std::path::Path;

use serde::Serialize;
use tracing::trace;
use walkdir::WalkDir;

use crate::error::{PluginError, PluginResult};

/// A 32-byte content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentFingerprint([u8; 32]);

impl ContentFingerprint {
    /// Raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl From<blake3::Hash> for ContentFingerprint {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentFingerprint({})", self.to_hex())
    }
}

/// Hash every regular file under `path`.
///
/// # Errors
///
/// Returns [`PluginError::Io`] if the directory cannot be walked or any file
/// cannot be read.
pub fn hash_directory(path: &Path) -> PluginResult<ContentFingerprint> {
    DirectoryHasher::new().hash(path)
}

/// Directory hashing with optional top-level exclusions.
///
/// The loader excludes the plugin's vendor directory, which the dependency
/// toolchain regenerates on every preparation.
#[derive(Debug, Clone, Default)]
pub struct DirectoryHasher {
    excluded: Vec<OsString>,
}

impl DirectoryHasher {
    /// A hasher that covers every file.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip a direct child directory of the hashed root.
    #[must_use]
    pub fn exclude_dir(mut self, name: impl Into<OsString>) -> Self {
        self.excluded.push(name.into());
        self
    }

    /// Hash the tree rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Io`] if the directory cannot be walked or any
    /// file cannot be read.
    pub fn hash(&self, root: &Path) -> PluginResult<ContentFingerprint> {
        let mut hasher = blake3::Hasher::new();

        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.is_excluded(entry));

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(root).to_path_buf();
                PluginError::io(path, e.into())
            })?;

            // Symlinks are neither followed nor hashed.
            if !entry.file_type().is_file() {
                continue;
            }

            let content =
                std::fs::read(entry.path()).map_err(|e| PluginError::io(entry.path(), e))?;
            hasher.update(&(content.len() as u64).to_le_bytes());
            hasher.update(&content);
            trace!(path = %entry.path().display(), bytes = content.len(), "hashed file");
        }

        Ok(hasher.finalize().into())
    }

    fn is_excluded(&self, entry: &walkdir::DirEntry) -> bool {
        entry.depth() == 1
            && entry.file_type().is_dir()
            && self.excluded.iter().any(|name| name == entry.file_name())
    }
}

/// Incremental hasher over a heterogeneous argument tuple.
///
/// Values are serialized to JSON and framed as an array. A value that fails
/// to serialize contributes an empty element instead of an error.
///
/// ```
/// use quarry_plugins::ArgumentHasher;
///
/// let mut hasher = ArgumentHasher::new();
/// hasher.push(&"greeter").push(&3_u32);
/// let fp = hasher.finish();
/// assert_eq!(fp, quarry_plugins::hash_args!("greeter", 3_u32));
/// ```
#[derive(Debug, Clone)]
pub struct ArgumentHasher {
    hasher: blake3::Hasher,
    first: bool,
}

impl Default for ArgumentHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl ArgumentHasher {
    /// Start an empty tuple.
    #[must_use]
    pub fn new() -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"[");
        Self {
            hasher,
            first: true,
        }
    }

    /// Append one value.
    pub fn push<T: Serialize + ?Sized>(&mut self, value: &T) -> &mut Self {
        if !self.first {
            self.hasher.update(b",");
        }
        self.first = false;
        let bytes = serde_json::to_vec(value).unwrap_or_default();
        self.hasher.update(&bytes);
        self
    }

    /// Finish the tuple and return its fingerprint.
    #[must_use]
    pub fn finish(&self) -> ContentFingerprint {
        let mut hasher = self.hasher.clone();
        hasher.update(b"]");
        hasher.finalize().into()
    }
}

/// Hash a homogeneous sequence of arguments.
///
/// For mixed argument types use [`hash_args!`](crate::hash_args) or
/// [`ArgumentHasher`].
pub fn hash_arguments<I, T>(values: I) -> ContentFingerprint
where
    I: IntoIterator<Item = T>,
    T: Serialize,
{
    let mut hasher = ArgumentHasher::new();
    for value in values {
        hasher.push(&value);
    }
    hasher.finish()
}

/// Hash a heterogeneous argument tuple.
///
/// ```
/// let a = quarry_plugins::hash_args!(1, "two", [3.0]);
/// let b = quarry_plugins::hash_args!(1, "two", [3.0]);
/// assert_eq!(a, b);
/// ```
#[macro_export]
macro_rules! hash_args {
    ($($arg:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut hasher = $crate::fingerprint::ArgumentHasher::new();
        $( hasher.push(&$arg); )*
        hasher.finish()
    }};
}
