use std::fmt;

use serde::{Deserialize, Serialize};

/// Source line number of a frame.  0 when the host does not know it.
pub type LineNo = u32;

/// Opaque handle of one call site.  Two captures of the same call site yield
/// equal handles; handles are ordered by their raw value.  `FrameId(0)` is the
/// empty placeholder and never names a real frame.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FrameId(pub u64);

impl FrameId {
    pub fn is_placeholder(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Opaque handle of the type of an allocated object.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ClassId(pub u64);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Display metadata of a frame, as reported by a `FrameResolver`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub label: String,
    pub path: Option<String>,
}

impl FrameInfo {
    pub fn new(label: impl Into<String>, path: Option<String>) -> Self {
        Self {
            label: label.into(),
            path,
        }
    }
}

impl fmt::Display for FrameInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{} (in {})", self.label, path),
            None => f.write_str(&self.label),
        }
    }
}
