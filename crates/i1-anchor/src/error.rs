use thiserror::Error;

/// Result type alias for trust anchor data operations
pub type Result<T> = std::result::Result<T, AnchorError>;

/// Errors that can occur when building or parsing trust anchor records
#[derive(Error, Debug)]
pub enum AnchorError {
    /// Record text ended before all required fields were read
    #[error("record is truncated: missing {0}")]
    Truncated(&'static str),

    /// Owner name could not be parsed
    #[error("invalid owner name {name:?}: {reason}")]
    InvalidName {
        /// Name text as written
        name: String,
        /// Parser message
        reason: String,
    },

    /// Record class is not a known mnemonic or `CLASSn` form
    #[error("invalid record class: {0}")]
    InvalidClass(String),

    /// Record type is neither DNSKEY nor DS
    #[error("unsupported record type {0}: only DNSKEY and DS are trust anchors")]
    UnsupportedType(String),

    /// A numeric rdata field is out of range or not a number
    #[error("invalid {field}: {value:?}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Offending text
        value: String,
    },

    /// DNSKEY public key is not valid base64
    #[error("invalid base64 public key: {0}")]
    Base64(#[from] base64::DecodeError),

    /// DS digest is not valid hex
    #[error("invalid hex digest: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl AnchorError {
    /// Build an [`AnchorError::InvalidField`] from any displayable value
    pub(crate) fn field(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            value: value.into(),
        }
    }
}
