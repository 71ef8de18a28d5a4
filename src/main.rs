use std::error::Error;
use std::sync::Arc;

use dotenvy::dotenv;
use teloxide::prelude::*;
use teloxide::types::Me;
use teloxide::utils::command::BotCommands;
use tracing::{error, info};

mod config;
mod handlers;
mod llm;
mod state;
mod submission;
mod utils;
mod validation;

use config::Config;
use handlers::commands;
use llm::{GeminiClient, Mediators, ModelRoster};
use state::AppState;
use utils::logging::init_logging;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum Command {
    Start,
    Help,
    Ask(String),
    Image(String),
    Search(String),
}

type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    dotenv().ok();

    let config = Arc::new(Config::load()?);
    let _logging_guards = init_logging(&config);

    let client = GeminiClient::new(&config)?;
    let mediators = Mediators::new(Arc::new(client), ModelRoster::from_config(&config));
    let state = AppState::new(Arc::clone(&config), mediators)?;

    let bot = Bot::new(config.bot_token.clone());
    info!("Starting Gemini Studio bot");

    let command_handler = dptree::entry()
        .filter_command::<Command>()
        .endpoint(handle_command);

    // Photos and documents carry their command in the caption, which
    // `filter_command` does not look at.
    let caption_command_handler = dptree::filter_map(|message: Message, me: Me| {
        message
            .caption()
            .and_then(|caption| Command::parse(caption, me.username()).ok())
    })
    .endpoint(handle_command);

    let handler = Update::filter_message()
        .branch(command_handler)
        .branch(caption_command_handler)
        .endpoint(ignore_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_command(
    bot: Bot,
    state: AppState,
    message: Message,
    command: Command,
) -> HandlerResult {
    match command {
        Command::Start => commands::start_handler(bot, message).await?,
        Command::Help => commands::help_handler(bot, state, message).await?,
        Command::Ask(prompt) => {
            tokio::spawn(async move {
                if let Err(err) = commands::ask_handler(bot, state, message, prompt).await {
                    error!("ask handler failed: {err}");
                }
            });
        }
        Command::Image(prompt) => {
            tokio::spawn(async move {
                if let Err(err) = commands::image_handler(bot, state, message, prompt).await {
                    error!("image handler failed: {err}");
                }
            });
        }
        Command::Search(query) => {
            tokio::spawn(async move {
                if let Err(err) = commands::search_handler(bot, state, message, query).await {
                    error!("search handler failed: {err}");
                }
            });
        }
    }
    Ok(())
}

async fn ignore_message(_message: Message) -> HandlerResult {
    Ok(())
}
