use std::env;

use poise::serenity_prelude::{self as serenity};
use serenity::GatewayIntents;
use tracing::{info, warn};

use guardsman::store::ConfigStore;
use guardsman::{commands, handlers, logging, Data, Error};

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    // Initialize logging
    logging::init()?;

    // Load environment variables
    let token = env::var("DISCORD_TOKEN").expect("DISCORD_TOKEN must be set");
    let owner_id: Option<u64> = env::var("OWNER_ID").ok().and_then(|v| v.parse().ok());

    // Connect the config store; without a database the bot still runs, but
    // configuration lives only in memory.
    let store = match env::var("DATABASE_URL") {
        Ok(url) => ConfigStore::connect(&url).await?,
        Err(_) => {
            warn!("DATABASE_URL not set; guild configuration will not survive restarts");
            ConfigStore::in_memory()
        }
    };

    // Set up the bot's data
    let data = Data::new(store, owner_id);
    let handler_data = data.clone();

    // Sweep decayed tracker windows so the map does not grow with every
    // (guild, moderator, module) tuple ever seen.
    let tracker_data = data.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            tick.tick().await;
            tracker_data
                .tracker
                .purge_expired(chrono::Utc::now().timestamp_millis());
        }
    });

    let mut owners = std::collections::HashSet::new();
    if let Some(id) = owner_id {
        owners.insert(serenity::UserId::new(id));
    }

    // Configure the Poise framework
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            owners,
            pre_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_start(ctx).await;
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_end(ctx).await;
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    // Log the error using our logging system
                    guardsman::logging::log_command_error(&error);
                })
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                logging::log_console("Registering slash commands");
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                Ok(data)
            })
        })
        .build();

    // Configure the Serenity client
    let intents = GatewayIntents::non_privileged() | GatewayIntents::GUILD_MEMBERS;
    let mut client = serenity::ClientBuilder::new(token, intents)
        .event_handler(handlers::Handler)
        .framework(framework)
        .await
        .expect("Failed to create client");

    // Event handlers reach the shared data through the typemap.
    {
        let mut typemap = client.data.write().await;
        typemap.insert::<Data>(handler_data);
    }

    info!("Starting bot...");
    // Start the bot
    if let Err(err) = client.start().await {
        eprintln!("Error starting the bot: {}", err);
    }

    Ok(())
}

fn main() {
    // Run the async main function
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(async_main());

    // Handle any errors that occurred during execution
    if let Err(err) = result {
        eprintln!("Error: {}", err);
    }
}
