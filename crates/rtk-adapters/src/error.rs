//! Transform error taxonomy.

use thiserror::Error;

/// Stable failure kinds reported by adapter transforms.
///
/// The pipeline maps each kind to a drop reason and a metrics counter;
/// `Retryable` additionally earns one delayed retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformErrorKind {
    MissingField,
    TypeMismatch,
    Validation,
    Retryable,
}

impl TransformErrorKind {
    /// Stable kind string used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingField => "transform.missing_field",
            Self::TypeMismatch => "transform.type_mismatch",
            Self::Validation => "transform.validation",
            Self::Retryable => "transform.retryable",
        }
    }
}

/// Failure of an uplink or downlink transform.
#[derive(Debug, Clone, Error)]
#[error("{} ({detail})", kind.as_str())]
pub struct TransformError {
    pub kind: TransformErrorKind,
    pub detail: String,
}

impl TransformError {
    pub fn missing_field(detail: impl Into<String>) -> Self {
        Self {
            kind: TransformErrorKind::MissingField,
            detail: detail.into(),
        }
    }

    pub fn type_mismatch(detail: impl Into<String>) -> Self {
        Self {
            kind: TransformErrorKind::TypeMismatch,
            detail: detail.into(),
        }
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self {
            kind: TransformErrorKind::Validation,
            detail: detail.into(),
        }
    }

    pub fn retryable(detail: impl Into<String>) -> Self {
        Self {
            kind: TransformErrorKind::Retryable,
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(
            TransformErrorKind::MissingField.as_str(),
            "transform.missing_field"
        );
        assert_eq!(
            TransformErrorKind::TypeMismatch.as_str(),
            "transform.type_mismatch"
        );
        assert_eq!(
            TransformErrorKind::Validation.as_str(),
            "transform.validation"
        );
        assert_eq!(TransformErrorKind::Retryable.as_str(), "transform.retryable");
    }

    #[test]
    fn display_includes_kind_and_detail() {
        let err = TransformError::missing_field("no 'brightness' in payload");
        let msg = err.to_string();
        assert!(msg.contains("transform.missing_field"));
        assert!(msg.contains("brightness"));
    }
}
