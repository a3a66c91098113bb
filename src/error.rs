//! Author: Quayside contributors
//! License: MIT

use std::fmt;

/// Crate-wide result alias used at the process boundary and by `main`.
pub type AnyError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced at the JSON-RPC boundary. Every variant renders to the
/// exact human-readable string the router puts into a response's `error`
/// field (spec.md §6-7): callers match on the string, not the variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    InvalidJson,
    UnknownMethod(String),
    ManagerNotInitialized(&'static str),
    MissingParam(&'static str),
    BadParam(&'static str),
    Operation(String),
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::InvalidJson => write!(f, "invalid json"),
            RpcError::UnknownMethod(m) => write!(f, "unknown method: {m}"),
            RpcError::ManagerNotInitialized(name) => {
                write!(f, "{name} manager not initialized")
            }
            RpcError::MissingParam(name) => write!(f, "missing param: {name}"),
            RpcError::BadParam(name) => write!(f, "bad param: {name}"),
            RpcError::Operation(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for RpcError {}

impl From<String> for RpcError {
    fn from(s: String) -> Self {
        RpcError::Operation(s)
    }
}

impl From<&str> for RpcError {
    fn from(s: &str) -> Self {
        RpcError::Operation(s.to_string())
    }
}

/// Stable network-error taxonomy (spec.md §4.4/§7). These strings are part
/// of the wire contract: clients match on them, so renaming a variant must
/// not change its `Display` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorCode {
    BadCredentials,
    UserCanceled,
    NoSuchSsid,
    DhcpTimeout,
    AssocTimeout,
    AlreadyConnected,
    WifiDisabled,
    ConnectionFailed,
}

impl NetworkErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkErrorCode::BadCredentials => "bad-credentials",
            NetworkErrorCode::UserCanceled => "user-canceled",
            NetworkErrorCode::NoSuchSsid => "no-such-ssid",
            NetworkErrorCode::DhcpTimeout => "dhcp-timeout",
            NetworkErrorCode::AssocTimeout => "assoc-timeout",
            NetworkErrorCode::AlreadyConnected => "already-connected",
            NetworkErrorCode::WifiDisabled => "wifi-disabled",
            NetworkErrorCode::ConnectionFailed => "connection-failed",
        }
    }
}

impl fmt::Display for NetworkErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secret-prompt control errors (spec.md §4.5/§7), mapped to the OS
/// boundary's `Failed` / `UserCanceled` secret-agent results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PromptError {
    #[error("secret prompt timed out")]
    Timeout,
    #[error("secret prompt was cancelled")]
    Cancelled,
    #[error("unknown or expired prompt token")]
    UnknownToken,
    #[error("reply channel full")]
    ChannelFull,
}
