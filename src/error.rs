//! Error taxonomy shared across the sync engine (§7 of the design).

use std::fmt;

/// Library-level error type. Binaries fold this into `anyhow::Error` at the
/// boundary; inside the engine it is matched on to decide retry/skip behavior.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("missing required field `{field}` on {entity} create")]
    MissingRequiredField { entity: &'static str, field: &'static str },

    #[error("sheet adapter rejected unknown field name(s): {0:?}")]
    UnknownField(Vec<String>),

    #[error("sheet adapter rejected invalid value for field(s): {0:?}")]
    InvalidValue(Vec<String>),

    #[error("transient remote failure: {0}")]
    Transient(String),

    #[error("adapter error: {0}")]
    Adapter(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification used to key the run-level error summary (§7).
///
/// Kept distinct from `SyncError`'s variants because several distinct error
/// messages can legitimately collapse into one `ErrorKind` bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    MissingRequiredField,
    UnknownField,
    InvalidValue,
    Transient,
    Adapter,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Config => "config",
            ErrorKind::MissingRequiredField => "missing_required_field",
            ErrorKind::UnknownField => "unknown_field",
            ErrorKind::InvalidValue => "invalid_value",
            ErrorKind::Transient => "transient",
            ErrorKind::Adapter => "adapter",
            ErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Config(_) => ErrorKind::Config,
            SyncError::MissingRequiredField { .. } => ErrorKind::MissingRequiredField,
            SyncError::UnknownField(_) => ErrorKind::UnknownField,
            SyncError::InvalidValue(_) => ErrorKind::InvalidValue,
            SyncError::Transient(_) => ErrorKind::Transient,
            SyncError::Adapter(_) => ErrorKind::Adapter,
            SyncError::Other(_) => ErrorKind::Other,
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let err = SyncError::MissingRequiredField { entity: "car", field: "make" };
        assert_eq!(err.kind(), ErrorKind::MissingRequiredField);
    }

    #[test]
    fn display_is_stable() {
        assert_eq!(ErrorKind::UnknownField.to_string(), "unknown_field");
    }
}
