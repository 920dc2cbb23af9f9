use pipeprims_stage::StageError;

use crate::tag::Tag;

/// Errors that can occur while decoding or encoding BER/DER.
#[derive(Debug, thiserror::Error)]
pub enum BerError {
    /// The source ran out before the declared content was read.
    #[error("truncated input: needed {needed} bytes, {available} available")]
    Truncated { needed: u64, available: u64 },

    /// The identifier octet differs from the one expected.
    #[error("unexpected tag: expected {expected}, found {found}")]
    UnexpectedTag { expected: Tag, found: Tag },

    /// Multi-octet (high tag number) identifiers are not supported.
    #[error("high tag number form is not supported")]
    HighTagNumber,

    /// A primitive value announced an indefinite length.
    #[error("indefinite length on a primitive value")]
    IndefinitePrimitive,

    /// The length does not fit in a `usize`.
    #[error("length overflows the platform size")]
    LengthOverflow,

    /// The reserved `0xFF` length octet was found.
    #[error("reserved length octet 0xff")]
    ReservedLength,

    /// An indefinite length appeared where only a definite one is allowed.
    #[error("indefinite length not allowed here")]
    IndefiniteNotAllowed,

    /// A definite-length value was closed before all content was consumed.
    #[error("{remaining} content bytes left unread")]
    TrailingData { remaining: usize },

    /// An indefinite-length value was closed without its end-of-contents marker.
    #[error("missing end-of-contents marker")]
    MissingEndOfContents,

    /// End-of-contents appeared outside any indefinite-length value.
    #[error("unexpected end-of-contents marker")]
    UnexpectedEndOfContents,

    /// The content is well framed but not a valid value of its type.
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),

    #[error(transparent)]
    Stage(#[from] StageError),

    /// A scoped value failed, and closing it failed as well.
    ///
    /// Displays as the primary failure; the close failure is kept for
    /// diagnostics.
    #[error("{primary}")]
    Unwound {
        #[source]
        primary: Box<BerError>,
        secondary: Box<BerError>,
    },
}

impl BerError {
    /// The failure that caused the error, skipping any unwinding wrapper.
    pub fn primary(&self) -> &BerError {
        match self {
            Self::Unwound { primary, .. } => primary.primary(),
            other => other,
        }
    }

    /// The close failure recorded while unwinding, if any.
    pub fn secondary(&self) -> Option<&BerError> {
        match self {
            Self::Unwound { secondary, .. } => Some(secondary.as_ref()),
            _ => None,
        }
    }

    pub(crate) fn unwound(primary: BerError, secondary: BerError) -> Self {
        Self::Unwound {
            primary: Box::new(primary),
            secondary: Box::new(secondary),
        }
    }
}

/// Decode failures raised inside a stage surface as filter errors.
impl From<BerError> for StageError {
    fn from(err: BerError) -> Self {
        match err {
            BerError::Stage(inner) => inner,
            other => StageError::Filter {
                stage: "BER",
                source: Box::new(other),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, BerError>;
