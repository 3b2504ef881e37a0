//! Logging setup and the poise command hooks.
//!
//! Three sinks: a human-readable console layer, a JSON `commands` file fed by
//! the command and error targets, and a JSON `guard` file fed by the antinuke
//! and voicemaster targets so enforcement decisions can be audited after the
//! fact. Files rotate daily under `logs/`.

use crate::{
    ANTINUKE_TARGET, COMMAND_TARGET, CONSOLE_TARGET, Data, ERROR_TARGET, Error, VOICE_TARGET,
};
use poise::{Context, FrameworkError};
use std::path::Path;
use std::time::Instant;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::filter_fn,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log directory name
pub const LOG_DIR: &str = "logs";
/// Command log file name
pub const COMMAND_LOG_FILE: &str = "commands";
/// Enforcement log file name, shared by the antinuke and voice watchers
pub const GUARD_LOG_FILE: &str = "guard";

fn is_command_event(target: &str) -> bool {
    target == COMMAND_TARGET || target == ERROR_TARGET
}

fn is_guard_event(target: &str) -> bool {
    target == ANTINUKE_TARGET || target == VOICE_TARGET
}

/// Initialize the console and file logging layers
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if !Path::new(LOG_DIR).exists() {
        std::fs::create_dir_all(LOG_DIR)?;
    }

    let command_file = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, COMMAND_LOG_FILE);
    let guard_file = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, GUARD_LOG_FILE);

    let console_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(true);

    let command_layer = fmt::layer()
        .with_ansi(false)
        .json()
        .with_writer(command_file)
        .with_filter(filter_fn(|meta| is_command_event(meta.target())));

    let guard_layer = fmt::layer()
        .with_ansi(false)
        .json()
        .with_writer(guard_file)
        .with_filter(filter_fn(|meta| is_guard_event(meta.target())));

    // RUST_LOG wins when set; the default keeps serenity's own logs quiet.
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new("info,serenity=error")?,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(command_layer)
        .with(guard_layer)
        .init();

    info!("Logging initialized");
    Ok(())
}

/// Who invoked which command, for the structured log fields.
struct CommandScope {
    name: String,
    guild: String,
    user: u64,
}

fn scope_of(ctx: &Context<'_, Data, Error>) -> CommandScope {
    CommandScope {
        name: ctx.command().qualified_name.clone(),
        guild: ctx
            .guild_id()
            .map_or_else(|| "DM".to_string(), |id| id.get().to_string()),
        user: ctx.author().id.get(),
    }
}

/// Pre-command hook. Stashes the start instant in the invocation data so the
/// post hook can report the duration.
pub async fn log_command_start(ctx: Context<'_, Data, Error>) {
    ctx.set_invocation_data(Instant::now()).await;

    let scope = scope_of(&ctx);
    info!(
        target: COMMAND_TARGET,
        command = %scope.name,
        guild_id = %scope.guild,
        user_id = scope.user,
        invocation = %ctx.invocation_string(),
        event = "start",
        "Command started"
    );
}

/// Post-command hook
pub async fn log_command_end(ctx: Context<'_, Data, Error>) {
    let duration_ms = match ctx.invocation_data::<Instant>().await {
        Some(start) => u64::try_from(start.elapsed().as_millis()).unwrap_or_default(),
        None => 0,
    };

    let scope = scope_of(&ctx);
    info!(
        target: COMMAND_TARGET,
        command = %scope.name,
        guild_id = %scope.guild,
        user_id = scope.user,
        duration_ms,
        event = "end",
        "Command completed"
    );
}

/// poise `on_error` hook
pub fn log_command_error(error: &FrameworkError<'_, Data, Error>) {
    match error {
        FrameworkError::Command { error, ctx, .. } => {
            let scope = scope_of(ctx);
            error!(
                target: ERROR_TARGET,
                command = %scope.name,
                guild_id = %scope.guild,
                user_id = scope.user,
                error = %error,
                "Command failed"
            );
        }
        FrameworkError::CommandCheckFailed { error, ctx, .. } => {
            let scope = scope_of(ctx);
            let reason = error
                .as_ref()
                .map_or_else(|| "check failed".to_string(), ToString::to_string);
            error!(
                target: ERROR_TARGET,
                command = %scope.name,
                guild_id = %scope.guild,
                user_id = scope.user,
                error = %reason,
                "Command check refused the invocation"
            );
        }
        err => {
            error!(
                target: ERROR_TARGET,
                error = ?err,
                "Framework error"
            );
        }
    }
}

/// One-off console status line
pub fn log_console(message: &str) {
    info!(
        target: CONSOLE_TARGET,
        message = %message,
        event = "console",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_routing_by_target() {
        assert!(is_command_event(COMMAND_TARGET));
        assert!(is_command_event(ERROR_TARGET));
        assert!(!is_command_event(ANTINUKE_TARGET));

        assert!(is_guard_event(ANTINUKE_TARGET));
        assert!(is_guard_event(VOICE_TARGET));
        assert!(!is_guard_event(COMMAND_TARGET));
        assert!(!is_guard_event("guardsman::handlers"));
    }
}
