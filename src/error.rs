//! Error kinds produced by the query translator and command pipeline.
//!
//! The numeric result-code table and the `Display` shape of
//! [`DirectoryOperationError`] are carried over from the collaborator
//! library's own `LdapResult`, so that a server diagnostic looks the same
//! whether it surfaced from a raw connection call or from a translated
//! query.

use std::fmt;

/// The outcome of a non-zero-result-code LDAP operation.
#[derive(Clone, Debug)]
pub struct DirectoryOperationError {
    /// LDAP result code. See [RFC 4511 §A.1](https://tools.ietf.org/html/rfc4511#appendix-A.1).
    pub rc: u32,
    /// Matched component DN, where applicable.
    pub matched: String,
    /// Additional diagnostic text returned by the server.
    pub text: String,
}

impl DirectoryOperationError {
    fn description(&self) -> &'static str {
        match self.rc {
            0 => "success",
            1 => "operationsError",
            2 => "protocolError",
            3 => "timeLimitExceeded",
            4 => "sizeLimitExceeded",
            8 => "strongerAuthRequired",
            10 => "referral",
            11 => "adminLimitExceeded",
            12 => "unavailableCriticalExtension",
            16 => "noSuchAttribute",
            17 => "undefinedAttributeType",
            18 => "inappropriateMatching",
            19 => "constraintViolation",
            20 => "attributeOrValueExists",
            21 => "invalidAttributeSyntax",
            32 => "noSuchObject",
            34 => "invalidDNSyntax",
            48 => "inappropriateAuthentication",
            49 => "invalidCredentials",
            50 => "insufficientAccessRights",
            51 => "busy",
            52 => "unavailable",
            53 => "unwillingToPerform",
            64 => "namingViolation",
            65 => "objectClassViolation",
            66 => "notAllowedOnNonLeaf",
            67 => "notAllowedOnRDN",
            68 => "entryAlreadyExists",
            69 => "objectClassModsProhibited",
            80 => "other",
            _ => "unknown",
        }
    }
}

impl std::error::Error for DirectoryOperationError {}

impl fmt::Display for DirectoryOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rc={} ({}), matched: \"{}\", text: \"{}\"",
            self.rc,
            self.description(),
            self.matched,
            self.text
        )
    }
}

/// The error kinds a translator pass or a command can fail with.
///
/// Kinds are distinguished by variant, not by a separate enum, so callers can
/// match on `Error` directly instead of inspecting a secondary tag.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A type or property is not registered, or a required mapping
    /// attribute (e.g. the distinguished-name property) is absent.
    #[error("mapping error: {0}")]
    Mapping(String),

    /// The expression tree contains a node the translator cannot lower,
    /// or a request assembled two controls of the same kind.
    #[error("translation error: {0}")]
    Translation(String),

    /// A caller-supplied argument is structurally invalid (null/blank DN,
    /// malformed RDN, absent naming context).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The server returned a non-zero result code.
    #[error("directory operation failed: {0}")]
    DirectoryOperation(#[from] DirectoryOperationError),

    /// `first`/`single` found no matching entry.
    #[error("no result for query: {0}")]
    NoResult(String),

    /// `single` found more than one matching entry.
    #[error("multiple results for query: {0}")]
    MultipleResults(String),

    /// The server reported `sizeLimitExceeded` and the query did not opt
    /// into `within_size_limit`.
    #[error("size limit exceeded")]
    SizeLimitExceeded,

    /// `update` was called on an entry that was materialised without
    /// change tracking.
    #[error("update called on an untracked entry")]
    UntrackedUpdate,

    /// A `DirectoryContext` was dropped while a request was still in
    /// flight on one of its connections.
    #[error("context disposed while a request was in use")]
    DisposedInUse,

    /// The underlying transport failed (I/O, TLS, protocol framing).
    #[error("connection error: {0}")]
    Connection(String),

    /// The operation was cancelled before completion.
    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
