pub mod antinuke;
pub mod commands;
pub mod data;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod store;
pub mod voicemaster;

// Customize these constants for your bot
pub const BOT_NAME: &str = "guardsman";
pub const COMMAND_TARGET: &str = "guardsman::command";
pub const ERROR_TARGET: &str = "guardsman::error";
pub const EVENT_TARGET: &str = "guardsman::handlers";
pub const ANTINUKE_TARGET: &str = "guardsman::antinuke";
pub const VOICE_TARGET: &str = "guardsman::voicemaster";
pub const CONSOLE_TARGET: &str = "guardsman";

pub use data::{Data, DataInner};
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
