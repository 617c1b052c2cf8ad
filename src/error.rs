use std::io;
use std::path::{Path, PathBuf};

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while diffing, patching or discovering updates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A version string matched neither the release nor the snapshot scheme.
    #[error("unrecognized version pattern: {0}")]
    InvalidVersionFormat(String),

    /// The archive was written by an engine with another format version.
    #[error("incompatible patch format: archive has version {found}, engine expects {expected}")]
    IncompatiblePatchFormat { found: u32, expected: u32 },

    /// A base file does not hash to the recorded "before" digest (wrong base version).
    #[error("original file does not match the patch: {0}")]
    InvalidOriginalFile(String),

    /// A reconstructed file does not hash to the recorded "after" digest.
    #[error("patched file does not match the expected result: {0}")]
    InvalidResultingFile(String),

    /// The container is truncated, has no magic header or holds an unusable entry.
    #[error("invalid patch archive: {0}")]
    InvalidArchive(String),

    /// A link pattern failed to compile or lacks the `from`/`to` captures.
    #[error("invalid link pattern: {0}")]
    InvalidPattern(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("patch info encoding failed: {0}")]
    Encoding(#[from] bincode::Error),

    /// Network failures are passed through untouched; retrying is up to the caller.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Attach the offending path to a raw I/O result.
pub(crate) trait IoResultExt<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
