//! Virtual network interface backend over Netmap rings.
//!
//! A [`Bridge`] opens a netmap port, runs a receiver thread that drains every
//! RX ring into a [`Deliver`] consumer one packet at a time, and places
//! outgoing packets into the TX ring on [`Bridge::send`].
//!
//! # Features
//! - Zero-copy delivery: the consumer sees the slot's buffer directly
//! - Bounded backpressure: a full TX ring is waited on for a fixed budget, then the packet is dropped
//! - Scheduler-token discipline for cooperatively scheduled hosts ([`sched`])
//! - An in-memory port with the netmap layout for tests ([`fallback`])
//!
//! # Scheduler token
//!
//! The host that calls into the bridge owns a single virtual CPU. Every entry
//! point is called with the token held and releases it around anything that
//! can block (device setup, polling, sync ioctls, joining the receiver). The
//! receiver thread runs without the token and takes it only while the
//! consumer runs. Hosts without such a token use [`NoopScheduler`].
//!
//! # Usage
//!
//! ```no_run
//! use netmap_vif::prelude::*;
//! use std::io::IoSlice;
//!
//! fn main() -> Result<(), Error> {
//!     let config = BridgeConfig::new("netmap:em0");
//!     let mut bridge = Bridge::create(config, NoopScheduler, |frame: &Frame<'_>| {
//!         println!("received {} bytes", frame.len());
//!     })?;
//!
//!     println!("hwaddr {}", bridge.hardware_address());
//!     bridge.send(&[IoSlice::new(b"hello "), IoSlice::new(b"netmap!")]);
//!
//!     bridge.dying();
//!     bridge.destroy();
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

/// Lifecycle controller.
pub mod bridge;
/// Bridge configuration.
pub mod config;
/// Error types for the bridge.
pub mod error;
pub mod fallback;
/// Frame structures for representing network packets.
pub mod frame;
pub mod hwaddr;
/// Netmap device handle.
pub mod netmap;
pub mod port;
/// Netmap ring manipulation.
pub mod ring;
/// Bounded retry.
pub mod retry;
mod rx;
pub mod sched;
mod stats;
pub mod sys;
/// Transmit path.
pub mod tx;

pub use crate::{
    bridge::{Bridge, Deliver},
    config::BridgeConfig,
    error::Error,
    frame::Frame,
    hwaddr::MacAddr,
    netmap::NetmapPort,
    port::Port,
    sched::{NoopScheduler, Scheduler, SchedulerExt},
    stats::StatsSnapshot,
    tx::SendOutcome,
};

/// The `prelude` module re-exports commonly used types from this crate
/// for easier access.
///
/// It is recommended to import all items from the prelude:
/// ```
/// use netmap_vif::prelude::*;
/// ```
pub mod prelude {
    pub use crate::bridge::{Bridge, Deliver};
    pub use crate::config::BridgeConfig;
    pub use crate::error::Error;
    pub use crate::frame::Frame;
    pub use crate::hwaddr::MacAddr;
    pub use crate::netmap::NetmapPort;
    pub use crate::port::Port;
    pub use crate::retry::RetryPolicy;
    pub use crate::sched::{NoopScheduler, Scheduler, SchedulerExt};
    pub use crate::sys::RingIdFlags;
    pub use crate::tx::SendOutcome;
}
