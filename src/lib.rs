//! # mcv4fwdd
//!
//! User-space IPv4 multicast forwarding daemon.
//!
//! Joins UDP multicast groups on designated inbound interfaces, filters
//! received datagrams by source network, and re-emits each accepted datagram
//! verbatim onto one or more outbound interfaces. Bridges link-local
//! multicast services (mDNS, SSDP) between layer-2 segments that are not
//! joined by a multicast router.

use std::net::Ipv4Addr;

#[macro_use]
extern crate thiserror;

pub mod config;
pub mod daemon;
pub mod errors;
pub mod net;

mod forwarder;
mod receiver;
mod router;
mod sender;
mod supervisor;

pub use forwarder::Forwarder;
pub use receiver::{PacketHandler, Receiver};
pub use router::{Router, RunningRouter};
pub use sender::Sender;
pub use supervisor::Supervisor;

pub const MDNS_PORT: u16 = 5353;
pub const MDNS_V4_IP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

pub const SSDP_PORT: u16 = 1900;
pub const SSDP_V4_IP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
