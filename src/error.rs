use std::fmt;

use crate::storage::Selection;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The dimension schema cannot be represented as an OME-NGFF image.
    #[error("schema violation: {0}")]
    SchemaViolation(String),
    /// The destination could not be turned into a storage location.
    #[error("cannot resolve location {location:?}: {reason}")]
    LocationResolution { location: String, reason: String },
    /// One or more asynchronous writes failed; reported together at flush.
    #[error("{} write(s) failed: {}", .0.len(), FailureList(.0))]
    WriteFailures(Vec<WriteFailure>),
    /// Work from a previous array is still in flight.
    #[error("stale state: {0}")]
    StaleState(String),
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: crate::writer::WriterState,
    },
    #[error("axis {axis:?} is not a dimension of the array")]
    UnknownAxis { axis: String },
    #[error("index {index} is out of bounds for axis {axis:?} of size {size}")]
    IndexOutOfBounds { axis: String, index: u64, size: u64 },
    #[error("plan has per-position sub-plans; resolve jagged sizes instead")]
    JaggedSizes,
    #[error("{0}")]
    General(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    Wrapped(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn general(message: impl Into<String>) -> Self {
        Self::General(message.into())
    }

    pub fn wrap(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Wrapped(Box::new(error))
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::SchemaViolation(message.into())
    }

    pub fn location(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LocationResolution {
            location: location.into(),
            reason: reason.into(),
        }
    }
}

/// A single failed write, identified by the array it targeted and its index.
#[derive(Debug)]
pub struct WriteFailure {
    pub position: usize,
    pub index: Vec<Selection>,
    pub source: Error,
}

impl WriteFailure {
    /// A copy of this failure whose source is reduced to its message.
    pub(crate) fn detached(&self) -> Self {
        Self {
            position: self.position,
            index: self.index.clone(),
            source: Error::general(self.source.to_string()),
        }
    }
}

impl fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "position {} at [", self.position)?;
        for (i, sel) in self.index.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{sel}")?;
        }
        write!(f, "]: {}", self.source)
    }
}

struct FailureList<'a>(&'a [WriteFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}
