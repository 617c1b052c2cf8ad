//! Version identifiers with two numbering schemes.
//!
//! * release versions: dotted numbers plus an optional suffix, e.g. `1.0`, `1.0beta`,
//!   `1.1.2_10`. A suffix containing `_` is split on the last `_` into a tag and a
//!   micro-revision. Tags compare as raw strings, so `a < beta < pre`.
//! * snapshot versions: `r<revision>` with an optional `-<branch>`. The branch is
//!   carried for display only and ignored by comparisons.
//!
//! Every snapshot is newer than every release.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

static RELEASE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<numbers>[0-9]+(?:\.[0-9]+)*)(?P<suffix>.*)$").expect("valid release regex")
});

static SNAPSHOT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^r(?P<revision>[0-9]+)(?:-(?P<branch>.*))?$").expect("valid snapshot regex")
});

/// A non-negative integer of any size, kept as its decimal digits without leading zeros.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Number(String);

impl Number {
    fn parse(digits: &str) -> Option<Self> {
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let trimmed = digits.trim_start_matches('0');
        Some(Number(if trimmed.is_empty() { "0" } else { trimmed }.to_string()))
    }

    fn zero() -> Self {
        Number("0".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
pub enum VersionKind {
    Release {
        numbers: Vec<Number>,
        tag: String,
        micro: Number,
    },
    Snapshot {
        revision: Number,
        branch: String,
    },
}

/// A parsed, immutable version. Displays as the string it was parsed from.
#[derive(Debug, Clone)]
pub struct Version {
    text: String,
    kind: VersionKind,
}

impl Version {
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidVersionFormat(s.to_string());

        if let Some(caps) = RELEASE_PATTERN.captures(s) {
            let numbers = caps["numbers"]
                .split('.')
                .map(|n| Number::parse(n).ok_or_else(invalid))
                .collect::<Result<Vec<_>>>()?;
            let suffix = &caps["suffix"];
            let (tag, micro) = match suffix.rsplit_once('_') {
                Some((tag, rev)) => (tag, Number::parse(rev).ok_or_else(invalid)?),
                None => (suffix, Number::zero()),
            };
            return Ok(Version {
                text: s.to_string(),
                kind: VersionKind::Release {
                    numbers,
                    tag: tag.to_string(),
                    micro,
                },
            });
        }

        if let Some(caps) = SNAPSHOT_PATTERN.captures(s) {
            let revision = Number::parse(&caps["revision"]).ok_or_else(invalid)?;
            let branch = caps
                .name("branch")
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            return Ok(Version {
                text: s.to_string(),
                kind: VersionKind::Snapshot { revision, branch },
            });
        }

        Err(invalid())
    }

    pub fn kind(&self) -> &VersionKind {
        &self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_snapshot(&self) -> bool {
        matches!(self.kind, VersionKind::Snapshot { .. })
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        use VersionKind::{Release, Snapshot};

        match (&self.kind, &other.kind) {
            (
                Release {
                    numbers: a,
                    tag: ta,
                    micro: ma,
                },
                Release {
                    numbers: b,
                    tag: tb,
                    micro: mb,
                },
            ) => a.cmp(b).then_with(|| (ta, ma).cmp(&(tb, mb))),
            (Release { .. }, Snapshot { .. }) => Ordering::Less,
            (Snapshot { .. }, Release { .. }) => Ordering::Greater,
            (Snapshot { revision: a, .. }, Snapshot { revision: b, .. }) => a.cmp(b),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.kind {
            VersionKind::Release {
                numbers,
                tag,
                micro,
            } => {
                0u8.hash(state);
                numbers.hash(state);
                tag.hash(state);
                micro.hash(state);
            }
            VersionKind::Snapshot { revision, .. } => {
                1u8.hash(state);
                revision.hash(state);
            }
        }
    }
}
