//! # Conduit
//!
//! A protocol-parsing man-in-the-middle proxy for the Minecraft wire
//! protocol. Every frame is decoded into a typed packet, offered to handler
//! logic, and re-encoded on the opposite leg.

pub mod net;
pub mod plugin;
pub mod plugins;
