//! # voltage_enip
//!
//! EtherNet/IP (CIP over TCP/UDP) client implementation for Rust.
//!
//! This crate provides explicit messaging and class-1 implicit I/O against
//! EtherNet/IP adapters, sensors and drives.
//!
//! ## Features
//!
//! - **Explicit messaging**: Get_Attribute_Single/All, Set_Attribute_Single
//! - **Implicit I/O**: Forward_Open / Large_Forward_Open with a cyclic UDP pump
//! - **Event-driven**: Session, connection and I/O events via channels
//! - **Object wrappers**: Identity, Assembly, Message Router, TCP/IP Interface
//! - **Discovery**: Broadcast ListIdentity
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use voltage_enip::{ClientConfig, EipClient};
//!
//! #[tokio::main]
//! async fn main() -> voltage_enip::Result<()> {
//!     let config = ClientConfig::new("192.168.0.10");
//!     let mut client = EipClient::new(config);
//!
//!     // Register a session and read an attribute
//!     client.register_session().await?;
//!     let vendor = client.get_attribute_single(0x01, 1, 1).await?;
//!     println!("Vendor ID: {}", voltage_enip::objects::to_ushort(&vendor)?);
//!
//!     // Open a class-1 connection and exchange I/O data
//!     client.forward_open(false).await?;
//!     client.set_o_t_data(&[0x01, 0x00]);
//!     tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!     println!("Inputs: {:?}", client.t_o_data());
//!
//!     client.forward_close().await?;
//!     client.unregister_session().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Protocol Overview
//!
//! EtherNet/IP carries CIP in two ways:
//!
//! - **Explicit**: request/response over TCP (default port 44818)
//! - **Implicit**: cyclic connected data over UDP (default port 2222)
//!
//! ### Encapsulation Header
//!
//! ```text
//! +---------+--------+----------------+--------+----------------+---------+
//! | Command | Length | Session handle | Status | Sender context | Options |
//! | 2       | 2      | 4              | 4      | 8              | 4       |
//! +---------+--------+----------------+--------+----------------+---------+
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod client;
pub mod codec;
pub mod discovery;
pub mod error;
pub mod forward_open;
pub mod objects;
pub mod pump;
pub mod session;
pub mod types;

// Re-export main types
pub use client::{ClientConfig, ConnectionState, EipClient, EipEvent};
pub use codec::{EncapsulationCodec, EncapsulationPacket};
pub use discovery::discover;
pub use error::{EnipError, Result};
pub use forward_open::{multicast_address, ConnectionInfo};
pub use pump::{IoBuffer, LastReceived};
pub use session::{SessionChannel, SessionState};
pub use types::*;
