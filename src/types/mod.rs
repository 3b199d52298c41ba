//! EtherNet/IP and CIP wire-level type definitions.
//!
//! - `Command` - Encapsulation commands and header status
//! - `EPath` - Logical path segments
//! - `CommonPacketFormat` - CPF items and socket addresses
//! - `CipService` - Service codes and Message Router framing
//! - `ConnectionParams` - Class-1 connection parameters
//! - `CipIdentityItem` - ListIdentity device descriptor
//! - status tables for general and extended status codes

mod command;
mod connection;
mod cpf;
mod epath;
mod identity;
mod service;
mod status;

pub use command::*;
pub use connection::*;
pub use cpf::*;
pub use epath::*;
pub use identity::*;
pub use service::*;
pub use status::*;

#[cfg(test)]
pub(crate) use identity::tests as identity_tests;
