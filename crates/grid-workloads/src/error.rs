//! Errors raised while validating, generating or rebuilding user workloads.

use grid_chain::ChainError;
use grid_types::TypesError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkloadError {
    /// A user-supplied field failed validation.
    #[error("{0}")]
    Invalid(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<WorkloadError>,
    },

    #[error(transparent)]
    Types(#[from] TypesError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Regex(#[from] regex::Error),

    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("invalid wireguard key: {0}")]
    InvalidKey(String),

    // ── Flist ───────────────────────────────────────────────────
    #[error("failed to get flist checksum: {0}")]
    FlistChecksum(#[from] reqwest::Error),

    #[error("passed checksum {given} does not match {actual} returned from {url}")]
    ChecksumMismatch {
        given: String,
        actual: String,
        url: String,
    },

    // ── Address allocation ──────────────────────────────────────
    #[error("deployment ip range '{range}' doesn't contain ip '{ip}' for vm '{vm}'")]
    IpOutOfRange { range: String, ip: String, vm: String },

    #[error("ip '{ip}' of vm '{vm}' is already used by another machine on the node")]
    IpTaken { ip: String, vm: String },

    #[error("all 253 ips of the network are exhausted")]
    IpsExhausted,

    #[error("could not find a free ip to add node")]
    NoFreeSubnet,

    #[error("failed to process network {0}")]
    MissingEndpoint(String),

    #[error("failed to get public node for {0}")]
    NoPublicNode(String),
}

pub type WorkloadsResult<T> = Result<T, WorkloadError>;

impl WorkloadError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        WorkloadError::Invalid(msg.into())
    }

    /// Prefix the error with what was being checked.
    pub fn context(self, context: impl Into<String>) -> Self {
        WorkloadError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// `.context()` on results, mirroring the error-wrapping style of the
/// facades.
pub(crate) trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> WorkloadsResult<T>;
}

impl<T, E: Into<WorkloadError>> ResultExt<T> for Result<T, E> {
    fn context(self, context: impl Into<String>) -> WorkloadsResult<T> {
        self.map_err(|e| e.into().context(context))
    }
}
