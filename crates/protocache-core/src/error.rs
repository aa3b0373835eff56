//! Error types for the protocache fetch / decode / refresh pipeline.

use thiserror::Error;

/// Low-level protobuf wire format errors.
///
/// Offsets are byte positions into the buffer being read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("unexpected end of input at offset {offset}")]
    Truncated { offset: usize },

    #[error("varint longer than 10 bytes at offset {offset}")]
    VarintOverflow { offset: usize },

    #[error("invalid wire type {wire_type} at offset {offset}")]
    InvalidWireType { wire_type: u8, offset: usize },

    #[error("invalid field number {number} at offset {offset}")]
    InvalidFieldNumber { number: u64, offset: usize },

    #[error("length prefix {len} exceeds remaining {remaining} bytes")]
    LengthOutOfBounds { len: u64, remaining: usize },

    #[error("invalid UTF-8 in string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("group for field {field} is not terminated")]
    UnterminatedGroup { field: u32 },

    #[error("unexpected end-group tag for field {field}")]
    UnexpectedEndGroup { field: u32 },

    #[error("nested deeper than {limit} levels")]
    NestingTooDeep { limit: usize },
}

/// Errors that can occur while decoding a descriptor-set payload.
///
/// Any of these aborts the whole payload: no partial registry is produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed descriptor set: {reason}")]
    MalformedPayload { reason: String },

    #[error("type '{type_name}' referenced by '{referenced_by}' is not defined in the payload")]
    UnresolvedReference {
        type_name: String,
        referenced_by: String,
    },

    #[error("type '{name}' is defined more than once in the payload")]
    DuplicateDefinition { name: String },
}

impl From<WireError> for DecodeError {
    fn from(err: WireError) -> Self {
        DecodeError::MalformedPayload {
            reason: err.to_string(),
        }
    }
}

/// Errors surfaced by a [`crate::Fetcher`].
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("request to {url} timed out after {ms}ms")]
    Timeout { url: String, ms: u64 },

    #[error("{url} returned HTTP {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("failed to read response body from {url}: {reason}")]
    Body { url: String, reason: String },

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("HTTP client could not be built: {0}")]
    Client(String),
}

impl FetchError {
    /// Returns `true` if the next scheduled refresh may succeed without
    /// any change on the caller's side.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request { .. } | Self::Timeout { .. } | Self::Body { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidUrl { .. } | Self::Client(_) => false,
        }
    }
}

/// Why a single refresh source failed.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("invalid version index from {url}: {reason}")]
    VersionIndex { url: String, reason: String },
}

impl SourceError {
    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch",
            Self::Decode(_) => "decode",
            Self::VersionIndex { .. } => "version_index",
        }
    }
}

/// Errors from the dynamic message codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("'{name}' is an enum, not a message")]
    NotAMessage { name: String },

    #[error("field '{field}' expects wire type {expected}, got {actual}")]
    WireTypeMismatch {
        field: String,
        expected: u8,
        actual: u8,
    },

    #[error("nesting deeper than {limit} levels")]
    RecursionLimit { limit: usize },

    #[error("message '{message}' has no field '{field}'")]
    UnknownField { message: String, field: String },

    #[error("invalid value for field '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("enum '{enum_name}' has no value '{value}'")]
    UnknownEnumValue { enum_name: String, value: String },
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("at least one source URL is required")]
    NoSources,

    #[error("refresh interval must be a positive number of seconds")]
    ZeroInterval,

    #[error("invalid header '{0}', expected NAME=VALUE")]
    InvalidHeader(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_error_becomes_malformed_payload() {
        let err: DecodeError = WireError::Truncated { offset: 7 }.into();
        match err {
            DecodeError::MalformedPayload { reason } => assert!(reason.contains("offset 7")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fetch_retryable_classification() {
        let server = FetchError::Status {
            url: "http://x".into(),
            status: 503,
            body: String::new(),
        };
        let missing = FetchError::Status {
            url: "http://x".into(),
            status: 404,
            body: String::new(),
        };
        assert!(server.is_retryable());
        assert!(!missing.is_retryable());
        assert!(FetchError::Timeout { url: "http://x".into(), ms: 10 }.is_retryable());
        assert!(!FetchError::Client("tls".into()).is_retryable());
    }

    #[test]
    fn source_error_kinds() {
        let fetch: SourceError = FetchError::Client("x".into()).into();
        let decode: SourceError = DecodeError::DuplicateDefinition { name: "a.B".into() }.into();
        assert_eq!(fetch.kind(), "fetch");
        assert_eq!(decode.kind(), "decode");
    }
}
