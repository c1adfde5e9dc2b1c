//! # rig-core
//!
//! Runtime library for `rig`, the host-local diagnostic automation
//! daemon. An operator declares monitors (host conditions to watch) and
//! actions (diagnostic collectors) in a rigfile; a deployed rig polls
//! its monitors until one trips, runs the actions, bundles their output
//! into an archive, and exits.
//!
//! | Area | Key types |
//! |---|---|
//! | Configuration | [`config::RigFile`], [`config::RigSettings`] |
//! | Plugin registry | [`registry::build_monitors`], [`registry::build_actions`] |
//! | Monitors | [`monitor::Monitor`], [`monitors::LogsMonitor`], [`monitors::ProcessMonitor`], [`monitors::FilesystemMonitor`] |
//! | Actions | [`action::Action`], [`actions`] |
//! | Supervisor | [`rig::Rig`], [`rig::RigOutcome`], [`rig::RigState`] |
//! | Control plane | [`control::server`], [`control::client`], [`control::protocol`] |
//!
//! The binary crate (`rig-cli`) wires these together behind the
//! `create` / `list` / `info` / `destroy` subcommands.

pub mod action;
pub mod actions;
pub mod adapters;
pub mod config;
pub mod control;
pub mod error;
pub mod monitor;
pub mod monitors;
pub mod paths;
pub mod registry;
pub mod rig;
pub mod units;

pub use config::RigFile;
pub use error::RigError;
pub use rig::{Rig, RigOutcome};
