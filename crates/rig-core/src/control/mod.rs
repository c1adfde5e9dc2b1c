//! Control plane: the per-rig socket server, the administrative client,
//! and the wire protocol they share.

pub mod client;
pub mod protocol;
pub mod server;
