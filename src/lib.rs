//! Horde - control plane for fleets of parallel AI coding agents

pub mod clan;
pub mod commands;
pub mod config;
pub mod drums;
pub mod encampment;
pub mod error;
pub mod events;
pub mod fsutil;
pub mod protocol;
pub mod raider;
pub mod session;
pub mod store;
pub mod subprocess;
pub mod telemetry;
pub mod template;
pub mod vcs;
pub mod warband;
pub mod workspace;
