//! Action implementations.

pub mod gcore;
pub mod kdump;
pub mod noop;
pub mod sos;
pub mod tcpdump;
pub mod watch;

pub use gcore::GcoreAction;
pub use kdump::KdumpAction;
pub use noop::NoopAction;
pub use sos::SosAction;
pub use tcpdump::TcpdumpAction;
pub use watch::WatchAction;
