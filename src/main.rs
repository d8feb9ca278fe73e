use std::{collections::HashMap, process::ExitCode, sync::Arc};

use backend::PgBackend;
use config::Config;
use db::get_db_pool;
use handlers::{handle_callback_query, handle_message, Sessions};
use tokio::sync::Mutex;
mod backend;
mod booking;
mod config;
mod dashboard;
mod db;
mod flow;
mod handlers;
mod models;
mod views;
use teloxide::{
    dispatching::UpdateFilterExt,
    prelude::*,
    types::CallbackQuery,
};

extern crate pretty_env_logger;
#[macro_use] extern crate log;

#[tokio::main]
async fn main() -> ExitCode {
    pretty_env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let pool = match get_db_pool(&config).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("failed to connect to the database: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let backend = Arc::new(PgBackend::new(pool));
    let bot = Bot::from_env();
    let sessions: Sessions = Arc::new(Mutex::new(HashMap::new()));

    let handler = dptree::entry()
    .branch(
        Update::filter_message().endpoint({
        let backend = backend.clone();
        let config = config.clone();
        let sessions = sessions.clone();

        move |bot: Bot, msg: Message| {
            let backend = backend.clone();
            let config = config.clone();
            let sessions = sessions.clone();

            async move {
                if let Err(e) = handle_message(bot, msg, backend, config, sessions).await {
                    error!("message handler failed: {}", e);
                }
                respond(())
            }
        }
    }))
    .branch(Update::filter_callback_query().endpoint({
        let backend = backend.clone();
        let config = config.clone();
        let sessions = sessions.clone();

        move |q: CallbackQuery, bot: Bot| {
            let backend = backend.clone();
            let config = config.clone();
            let sessions = sessions.clone();

            async move {
                if let Err(e) = handle_callback_query(bot, q, backend, config, sessions).await {
                    error!("callback handler failed: {}", e);
                }
                respond(())
            }
        }
    }));

    info!("ProKick bot starting");
    Dispatcher::builder(bot, handler)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
    ExitCode::SUCCESS
}
