use anyhow::{Context, Result};
use outreach_core::SqliteStore;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod response;

use config::{BusKind, Config};
use dbus_interface::GalleryService;

const BUS_NAME: &str = "org.outreach.Gallery1";
const OBJECT_PATH: &str = "/org/outreach/Gallery1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("outreachd starting");

    let config = Config::from_env();
    tracing::info!(
        db = %config.db_path.display(),
        photos = %config.photo_dir.display(),
        threshold = config.match_threshold,
        bus = ?config.bus,
        "configuration loaded"
    );

    let store = SqliteStore::open(&config.db_path)
        .await
        .with_context(|| format!("opening {}", config.db_path.display()))?;

    let engine = engine::spawn_engine(&config.model_path, config.min_face_score)
        .with_context(|| format!("loading model {}", config.model_path.display()))?;

    let service = GalleryService::new(store, engine, &config);

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("registering D-Bus service")?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "outreachd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("outreachd shutting down");

    Ok(())
}
