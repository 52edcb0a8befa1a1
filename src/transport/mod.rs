//! Transport module - packet view over byte streams.
//!
//! Provides:
//! - [`StreamPacketAdapter`]: datagram semantics over any duplex stream
//! - [`open_device`]: serial character device as a duplex stream

mod adapter;
mod device;

pub use adapter::{
    synthetic_peer_addr, AdapterConfig, DeadlineMode, PacketSender, StreamPacketAdapter,
};
pub use device::{open_device, DeviceStream};
