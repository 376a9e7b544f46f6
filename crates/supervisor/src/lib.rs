//! Runtime supervision for installed skills.
//!
//! Each enabled skill runs as a protocol-server subprocess speaking JSON-RPC
//! over stdio. The supervisor spawns them, runs the initialize handshake,
//! restarts crashed processes with exponential backoff up to a limit, and
//! stops them cooperatively (stdin EOF, then kill after a grace period).

pub mod error;
pub mod supervisor;
pub mod traits;
pub mod transport;
pub mod types;

pub use {
    error::{Error, Result},
    supervisor::Supervisor,
    traits::SkillTransport,
    transport::StdioTransport,
    types::{InitializeResult, ProcessState, SkillStatus, PROTOCOL_VERSION},
};
