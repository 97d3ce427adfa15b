use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to join multicast group {group}: {source}")]
    JoinGroup {
        group: std::net::Ipv4Addr,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("recovery setup failed: {0}")]
    Recovery(#[from] replicast_recovery::RecoveryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ReceiverResult<T> = Result<T, ReceiverError>;
