//! VoiceMaster: lobby-spawned personal voice channels
//!
//! A guild designates one voice channel as the lobby. Joining it spawns a
//! fresh child channel owned by the joiner, who then controls it through the
//! `/voicemaster` command surface. A janitor deletes children the moment they
//! empty out.

pub mod config;
pub mod error;
pub mod interface;
pub mod registry;
pub mod watcher;

pub use config::{ChildDefaults, VoicemasterConfig, render_name, validate_bitrate, validate_limit};
pub use error::{VoiceError, VoiceResult};
pub use registry::{ChildRecord, VoiceRegistry};
