//! Failure types surfaced to callers.
//!
//! Degenerate geometry discovered mid-pipeline is logged and worked around
//! rather than reported, so `SlicerError` only covers inputs the pipeline
//! cannot start from. Configuration problems get their own type because
//! they carry file and line context.

use thiserror::Error;

/// A reason the pipeline could not run at all.
#[derive(Error, Debug)]
pub enum SlicerError {
    /// The input mesh has no triangles to slice.
    #[error("input mesh contains no triangles")]
    EmptyMesh,

    /// No slab plane intersects the printable half-space.
    #[error("no printable geometry: {0}")]
    SliceFailed(String),

    /// The resolved settings contradict each other.
    #[error("bad configuration: {0}")]
    InvalidSettings(String),
}

/// Errors raised while loading or updating the configuration record.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Key does not name a recognized setting.
    #[error("invalid setting: {0}")]
    UnknownKey(String),

    /// Key names a derived setting that cannot be assigned.
    #[error("setting {0} is read-only")]
    ReadOnly(String),

    /// Value could not be parsed as the setting's type.
    #[error("invalid value for {key}: {value}")]
    BadValue {
        /// Setting name.
        key: String,
        /// Offending input.
        value: String,
    },

    /// Value parsed but falls outside the setting's accepted range.
    #[error("{key} must be {bound}")]
    OutOfRange {
        /// Setting name.
        key: String,
        /// Human-readable bound, e.g. "within [0,1]" or "> 0".
        bound: String,
    },

    /// A `gcode_variable` name collides with a setting name.
    #[error("cannot set variable {0}: is a setting")]
    VariableIsSetting(String),
}

impl ConfigError {
    /// Attach `file:line` context for configuration-file diagnostics.
    pub fn at(self, path: &str, line: usize) -> String {
        format!("line {line} in {path}: {self}")
    }
}

/// Result type for slicer operations.
pub type Result<T> = std::result::Result<T, SlicerError>;
