use std::fmt;

/// Failure kinds surfaced by the access layer.
///
/// These travel inside [`anyhow::Error`], use `err.downcast_ref::<Error>()` to branch on them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// More indices than the dataset has dimensions.
    SelectionOverflow { rank: usize },

    /// Index past the current extent of an axis.
    IndexOutOfBounds { axis: usize, index: u64, extent: u64 },

    /// Whole-dataset assignment between incompatible shapes.
    ShapeMismatch { dest: Vec<u64>, source: Vec<u64> },

    /// Stored type outside the supported closure of the reflector.
    UnsupportedSchema { path: String, reason: String },

    /// Number of values does not match the selected element count.
    ElementCountMismatch { expected: usize, got: usize },

    /// Value of the wrong primitive kind for this node.
    KindMismatch { expected: String, got: String },

    NotFound(String),

    ReadOnly,

    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Error::*;

        match self {
            SelectionOverflow { rank } => {
                write!(f, "selection overflow: all {rank} dimensions are already fixed")
            }
            IndexOutOfBounds {
                axis,
                index,
                extent,
            } => write!(
                f,
                "index {index} out of bounds for axis {axis} with extent {extent}"
            ),
            ShapeMismatch { dest, source } => write!(
                f,
                "shape mismatch: cannot assign dataset of shape {source:?} to {dest:?}"
            ),
            UnsupportedSchema { path, reason } => {
                write!(f, "unsupported schema at {path}: {reason}")
            }
            ElementCountMismatch { expected, got } => write!(
                f,
                "element count mismatch: selection holds {expected} elements, got {got}"
            ),
            KindMismatch { expected, got } => {
                write!(f, "kind mismatch: expected {expected}, got {got}")
            }
            NotFound(name) => write!(f, "no such object: {name}"),
            ReadOnly => write!(f, "container is opened read-only"),
            Closed => write!(f, "container is closed"),
        }
    }
}

impl std::error::Error for Error {}

/// Check whether an `anyhow::Error` carries a specific [`Error`] kind.
pub fn is_kind(err: &anyhow::Error, f: impl Fn(&Error) -> bool) -> bool {
    err.downcast_ref::<Error>().map(f).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downcast_through_anyhow() {
        let e: anyhow::Error = Error::SelectionOverflow { rank: 2 }.into();
        assert!(is_kind(&e, |k| matches!(k, Error::SelectionOverflow { rank: 2 })));
        assert!(!is_kind(&e, |k| matches!(k, Error::Closed)));
        assert_eq!(
            e.to_string(),
            "selection overflow: all 2 dimensions are already fixed"
        );
    }
}
