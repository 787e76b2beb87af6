//! Error types for mesos-dns.

use thiserror::Error;

/// Errors that can occur in the DNS server core.
#[derive(Debug, Error)]
pub enum DnsError {
    /// IO error (socket bind, read, write)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error while fetching master state
    #[error("master fetch error: {0}")]
    Http(#[from] reqwest::Error),

    /// No configured master answered as leader
    #[error("no master")]
    NoMaster,

    /// A name template failed to compile
    #[error(transparent)]
    Template(#[from] crate::template::TemplateError),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    /// A single upstream exchange failed
    #[error("upstream exchange failed: {0}")]
    Upstream(String),

    /// Every configured upstream resolver failed or timed out
    #[error("all upstream resolvers failed")]
    UpstreamsFailed,
}
