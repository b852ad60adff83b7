// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::node_id::NodeId;

use std::io;
use thiserror::Error;

/// The type returned by mesh core operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Internal error.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Invalid configuration, fatal at startup.
    #[error("Invalid configuration: {0}")]
    Config(String),
    /// Frame digest did not verify under the current credential.
    #[error("Frame signature mismatch")]
    Signature,
    /// Malformed or unknown frame.
    #[error("Malformed frame: {0}")]
    Codec(String),
    /// JSON serialisation error.
    #[error("JSON serialisation error: {0}")]
    Json(#[from] serde_json::Error),
    /// The peer closed the stream.
    #[error("Connection closed by peer {0}")]
    ClosedByPeer(NodeId),
    /// The credential exchange did not complete within its window.
    #[error("Credential exchange timed out")]
    MpsTimeout,
    /// No route towards the destination.
    #[error("No route to {0}")]
    Routing(NodeId),
    /// Error raised by the application deliver path.
    #[error("Application error: {0}")]
    App(String),
    /// An internal channel was closed.
    #[error("Internal channel closed: {0}")]
    Channel(&'static str),
}
