// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Firmware core for a fleet of dual-radio nodes that self-organise into a
//! single-rooted tree mesh.
//!
//! The broadcast radio carries neighbour discovery, the button-gated
//! credential exchange and the child-claim primitive; the stream transport
//! carries the tree itself: parent/child links, topology synchronisation and
//! application traffic routed along the tree.
//!
//! Radio drivers and physical I/O are collaborators behind the seams in
//! [`radio`]; an in-process simulator in [`sim`] implements them for tests
//! and for running a whole mesh on one host.

#[macro_use]
extern crate tracing;

pub mod app;
pub mod config;
pub mod crypto;
pub mod discovery;
pub mod error;
pub mod log;
pub mod node;
pub mod node_id;
pub mod radio;
pub mod sim;
pub mod topology;
pub mod transport;
pub mod wire;

pub use self::{
    config::Config,
    error::{Error, Result},
    node::{Node, NodeHandle},
    node_id::NodeId,
};
