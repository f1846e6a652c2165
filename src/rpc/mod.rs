// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Minimal XML-RPC transport.
//!
//! Masters expose their registration API and status endpoints over XML-RPC.
//! Only what the synchronizer needs is implemented: scalar, array and struct
//! values, single calls and `system.multicall` batches over HTTP.

mod client;
mod codec;
pub mod value;

pub use client::XmlRpcClient;
pub use codec::{decode_response, encode_call};
pub use value::Value;

use thiserror::Error;

use crate::error::SyncError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    #[error("http error: {0}")]
    Http(String),
    #[error("call timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("fault {code}: {message}")]
    Fault { code: i64, message: String },
    #[error("invalid response document: {0}")]
    Parse(String),
    #[error("unexpected response shape: {0}")]
    Shape(String),
}

impl From<RpcError> for SyncError {
    fn from(err: RpcError) -> Self {
        SyncError::Transport(err.to_string())
    }
}
