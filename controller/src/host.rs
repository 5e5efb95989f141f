use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use daylight_common::{ConfigError, DayModelBuilder, GeoFix, RuntimeConfig, Topics};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::{
    connection::ConnectionManager,
    geo::GeoProvider,
    health::HealthRecorder,
    scheduler::{self, DayRunner},
};

/// Exit status when mandatory configuration is absent.
pub const EXIT_MISSING_CONFIG: i32 = 2;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match RuntimeConfig::from_env() {
        Ok(config) => config,
        Err(ConfigError::MissingBrokerHost) => {
            error!("MQTT_HOST is required");
            std::process::exit(EXIT_MISSING_CONFIG);
        }
        Err(err) => return Err(err).context("invalid configuration"),
    };
    let timezone = config.site.tz()?;

    if config.site.uses_default_seasons_south_of_equator() {
        warn!(
            "latitude {} is south of the equator but season anchors are the northern defaults; \
             set SEASON_LONG_SOLSTICE and SEASON_SHORT_SOLSTICE",
            config.site.latitude
        );
    }

    let mut health = HealthRecorder::new(&config.health_dir);
    health.enter_idle().await;

    let fix = Arc::new(Mutex::new(GeoFix::configured(
        config.site.latitude,
        config.site.longitude,
        config.site.altitude,
        Utc::now(),
    )));
    let geo = GeoProvider::from_config(&config.gpsd);
    if geo.is_none() {
        info!("gpsd disabled, using configured location");
    }

    let topics = Topics::new(&config.topics, &config.mqtt.client_id);
    let connection = ConnectionManager::start(&config.mqtt, topics);

    let mut runner = DayRunner::new(
        timezone,
        DayModelBuilder::new(config.site.seasons),
        geo,
        config.gpsd.refresh_interval(),
        fix,
        connection.publisher(),
        health,
    );

    info!("daylight controller started in {timezone}");

    let outcome = tokio::select! {
        result = scheduler::run(&mut runner, &connection) => result,
        () = shutdown_signal() => {
            info!("shutdown requested");
            Ok(())
        }
    };

    connection.shutdown().await;
    outcome
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!("cannot listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {}
        () = terminate => {}
    }
}
