// Consistent exit codes for the tably CLI.
//
//   0  = success
//   1  = general error
//   2  = usage/argument error
//   3  = operation rejected by the daemon (`success: false`)
//   10 = daemon not reachable
//   13 = document store not reachable

use std::process;

use tably_common::protocol::jsonrpc::{INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND};

use crate::client::{DaemonRpcError, DaemonUnavailable, OperationFailed};

/// Named exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    Rejected = 3,
    DaemonDown = 10,
    StoreDown = 13,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if cause.downcast_ref::<DaemonUnavailable>().is_some() {
                return Self::DaemonDown;
            }
            if cause.downcast_ref::<OperationFailed>().is_some() {
                return Self::Rejected;
            }
            if let Some(rpc_err) = cause.downcast_ref::<DaemonRpcError>() {
                return Self::from_rpc_code(rpc_err.code);
            }
            if cause.downcast_ref::<StoreUnreachable>().is_some() {
                return Self::StoreDown;
            }
            if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
                return match io_err.kind() {
                    std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound => {
                        Self::DaemonDown
                    }
                    _ => Self::Error,
                };
            }
        }

        Self::Error
    }

    /// Map a JSON-RPC error code to an exit code.
    pub fn from_rpc_code(code: i32) -> Self {
        match code {
            INVALID_PARAMS | INVALID_REQUEST | METHOD_NOT_FOUND => Self::Usage,
            _ => Self::Error,
        }
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}

/// `tably check` found the daemon up but its document store unreachable.
#[derive(Debug)]
pub struct StoreUnreachable {
    pub detail: String,
}

impl std::fmt::Display for StoreUnreachable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "document store is not reachable: {}", self.detail)
    }
}

impl std::error::Error for StoreUnreachable {}
