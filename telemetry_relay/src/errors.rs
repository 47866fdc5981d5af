//thiserror-based error types
use thiserror::Error;

/// Persistence failure of a collaborator store. Never fatal to a connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")] Unavailable(String),
    #[error("store corrupt: {0}")] Corrupt(String),
}

/// Why a handshake ended without a session. Always terminates the connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    #[error("malformed station id")] MalformedId,
    #[error("unknown station")] UnknownStation,
    #[error("station inactive")] InactiveStation,
    #[error("credential lookup failed: {0}")] LookupFailed(StoreError),
    #[error("access ledger write failed: {0}")] LedgerFailed(StoreError),
    #[error("challenge response mismatch")] ResponseMismatch,
    #[error("peer disconnected during handshake")] Disconnected,
    #[error("protocol violation: {0}")] ProtocolViolation(String),
}

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("connection closed")] Closed,
    #[error("Protocol: {0}")] Protocol(#[from] station_protocol::ProtocolError),
}
