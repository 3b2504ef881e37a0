//! Antinuke engine
//!
//! Watches destructive administrative actions, attributes them to a moderator
//! through the audit log, counts them inside a sliding window, and punishes
//! the offender according to the guild's configuration.

pub mod config;
pub mod coordinator;
pub mod correlator;
pub mod error;
pub mod executor;
pub mod resolver;
pub mod tracker;

pub use config::{AntinukeConfig, Module, ModuleConfig, Punishment};
pub use error::{AntinukeError, AntinukeResult};
pub use executor::{PunishOutcome, PunishmentRegistry};
pub use tracker::EventTracker;
