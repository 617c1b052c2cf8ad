//! Directory-tree delta updates.
//!
//! [`create_patch`] compares two versions of a directory tree and writes a single
//! archive holding binary deltas for changed files and verbatim copies of new ones.
//! [`apply_patch`] rebuilds the new tree from the old one, verifying every patched file
//! against checksums recorded at creation time. [`apply_chain`] applies several archives
//! in sequence, and [`remote`] discovers published archives on an HTML listing page.

pub mod apply;
pub mod archive;
pub mod binary_diff;
pub mod binary_patch;
pub mod chain;
pub mod checksum;
pub mod create;
pub mod error;
pub mod patch_format;
pub mod progress;
pub mod remote;
pub mod rolling_hash;
pub mod util;
pub mod version;

pub use apply::apply_patch;
pub use chain::{apply_chain, install};
pub use create::create_patch;
pub use error::{Error, Result};
pub use patch_format::{ApplySummary, DiffSummary, FORMAT_VERSION};
pub use progress::{ProgressObserver, Silent, Stage};
pub use remote::{
    download_patches, find_patch_groups, PatchGroups, PatchLink, PatchServer,
    DEFAULT_LINK_PATTERN,
};
pub use version::Version;
