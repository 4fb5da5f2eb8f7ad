use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use dotenv::dotenv;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

use crate::config::app_config::AppConfig;
use crate::logger::init_logger;
use crate::services::campaign_service::CampaignService;
use crate::services::campaign_store::{CampaignStore, SqliteCampaignStore};
use crate::services::delivery_transport::{DeliveryTransport, SmtpDeliveryTransport};
use crate::services::dispatcher::Dispatcher;
use crate::services::engagement_tracker::EngagementTracker;
use crate::services::scheduler::Scheduler;
use crate::services::template_renderer::TemplateRenderer;

mod app;
mod config;
mod errors;
mod handlers;
mod logger;
mod models;
mod services;

#[cfg(test)]
mod tests;

/// Tiempo máximo para vaciar la cola de tracking al apagar
const TRACKING_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

async fn setup_database(database_path: &str) -> Result<Pool<Sqlite>> {
    // 1) Crear carpeta contenedora (p.ej. "data")
    if let Some(parent) = Path::new(database_path).parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("No se pudo crear directorio {:?}", parent))?;
    }

    let db_url = format!("sqlite:{}", database_path);
    log::info!("Conectando a SQLite en {}", db_url);

    // 2) Conectarnos con SQLx, creando el archivo si no existe
    let options = SqliteConnectOptions::from_str(&db_url)?.create_if_missing(true);
    let db_pool = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .context("No se pudo conectar a la base de datos SQLite.")?;

    Ok(db_pool)
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv().ok(); // Cargar .env al inicio
    init_logger();

    let config = AppConfig::from_env()?;

    // Store
    let db_pool = setup_database(&config.database_path).await?;
    let sqlite_store = SqliteCampaignStore::new(db_pool);
    sqlite_store.run_migrations().await?;
    let store: Arc<dyn CampaignStore> = Arc::new(sqlite_store);

    // Transporte SMTP + dispatcher
    let transport: Arc<dyn DeliveryTransport> = Arc::new(SmtpDeliveryTransport::new(
        config.mail_host.clone(),
        config.mail_port,
    ));
    let dispatcher = Dispatcher::new(
        store.clone(),
        transport,
        TemplateRenderer::new(&config.backend_url),
        config.dispatch.clone(),
    );

    // Scheduler: la tabla de jobs es volátil, se reconstruye desde la DB
    let scheduler = Scheduler::new(store.clone(), dispatcher.clone(), config.schedule_timezone);
    scheduler.rehydrate().await?;

    let (tracker, recorder) = EngagementTracker::start(store.clone())?;
    let campaign_service = CampaignService::new(store.clone(), scheduler, dispatcher);

    log::info!("Levantando servidor en {}:{}", config.host, config.port);
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(campaign_service.clone()))
            .app_data(web::Data::new(tracker.clone()))
            .configure(app::init_app)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await?;

    // Los trackers murieron con el servidor; esperar lo que quede en cola
    if tokio::time::timeout(TRACKING_DRAIN_TIMEOUT, recorder.drain())
        .await
        .is_err()
    {
        log::warn!("Cola de tracking sin vaciar al apagar");
    }
    Ok(())
}
