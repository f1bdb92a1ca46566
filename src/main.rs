use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::{error, info};
use wireci_relay::chat::{ChatService, LatestMessages, TelegramChat};
use wireci_relay::ci::HttpCiClient;
use wireci_relay::commands::CommandRunner;
use wireci_relay::contributors::SqliteContributors;
use wireci_relay::handlers::{self, BotContext};
use wireci_relay::quality::QualityOracle;
use wireci_relay::reconciler::Reconciler;
use wireci_relay::servers::{FleetDirectory, ServerDirectory};
use wireci_relay::webhook::{self, WebhookState};
use wireci_relay::{config, db};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/wireci.db", cfg.app.data_dir));
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let bot = Bot::new(cfg.telegram.bot_token.clone());
    let latest = LatestMessages::default();
    let chat: Arc<dyn ChatService> = Arc::new(TelegramChat::new(bot.clone(), latest.clone()));
    let servers: Arc<dyn ServerDirectory> = Arc::new(FleetDirectory::new(cfg.servers.clone()));
    let ci = Arc::new(HttpCiClient::new(&cfg.ci.base_url, cfg.ci.outgoing_api_key.clone())?);
    let reconciler = Arc::new(Reconciler::new(
        chat.clone(),
        Some(Arc::new(SqliteContributors::new(pool.clone()))),
        QualityOracle::new(cfg.quips()?),
    ));
    let runner = CommandRunner::new(ci, servers.clone(), chat.clone(), pool.clone());

    let app = webhook::router(WebhookState {
        reconciler,
        servers,
        pool,
        api_key: cfg.ci.incoming_api_key.as_str().into(),
    });
    let listener = tokio::net::TcpListener::bind(&cfg.app.listen)
        .await
        .with_context(|| format!("failed to bind {}", cfg.app.listen))?;
    info!(addr = %cfg.app.listen, "build webhook listening");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!(?err, "webhook server stopped");
        }
    });

    let ctx = Arc::new(BotContext {
        chat,
        runner,
        latest,
        admins: cfg.telegram.admins.clone(),
    });
    info!("starting telegram bot");
    Dispatcher::builder(bot, handlers::schema())
        .dependencies(dptree::deps![ctx])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
