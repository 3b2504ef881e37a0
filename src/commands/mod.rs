pub mod antinuke;
pub mod voicemaster;

use crate::{Context, Data, Error};

/// Basic ping command
/// This command is used to check if the bot is responsive.
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    ctx.say("Pong!").await?;
    Ok(())
}

/// Every command the framework registers.
#[must_use]
pub fn all() -> Vec<poise::Command<Data, Error>> {
    vec![ping(), antinuke::antinuke(), voicemaster::voicemaster()]
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test that the ping command is properly defined
    #[test]
    fn test_ping_command_definition() {
        let cmd = ping();
        assert_eq!(cmd.name, "ping");
        assert!(cmd.guild_only);
    }

    #[test]
    fn test_all_commands_registered() {
        let commands = all();
        let names: Vec<&str> = commands.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"ping"));
        assert!(names.contains(&"antinuke"));
        assert!(names.contains(&"voicemaster"));
    }

    #[test]
    fn test_parent_commands_have_subcommands() {
        let antinuke = antinuke::antinuke();
        assert!(!antinuke.subcommands.is_empty());
        let voicemaster = voicemaster::voicemaster();
        assert!(!voicemaster.subcommands.is_empty());
    }
}
