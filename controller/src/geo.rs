use std::{sync::Arc, time::Duration};

use anyhow::Context;
use chrono::Utc;
use daylight_common::{
    config::GpsdConfig,
    gpsd::{parse_tpv, WATCH_COMMAND},
    GeoFix,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::Mutex,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// The fix every consumer reads; replaced wholesale, never field by field.
pub type SharedFix = Arc<Mutex<GeoFix>>;

/// Queries a gpsd daemon for the current position.
#[derive(Debug, Clone)]
pub struct GeoProvider {
    host: String,
    port: u16,
    timeout: Duration,
}

impl GeoProvider {
    pub fn from_config(config: &GpsdConfig) -> Option<Self> {
        let host = config.host.clone()?;
        Some(Self {
            host,
            port: config.port,
            timeout: config.timeout(),
        })
    }

    /// First usable TPV report within the timeout, or `None`. Never fails.
    pub async fn acquire(&self) -> Option<GeoFix> {
        match tokio::time::timeout(self.timeout, self.read_fix()).await {
            Ok(Ok(Some(fix))) => {
                info!(
                    "gps fix lat={:.5} lon={:.5} alt={:.1}m",
                    fix.latitude, fix.longitude, fix.altitude
                );
                Some(fix)
            }
            Ok(Ok(None)) => {
                warn!("gpsd at {}:{} closed without a fix", self.host, self.port);
                None
            }
            Ok(Err(err)) => {
                warn!("gpsd query failed: {err:#}");
                None
            }
            Err(_) => {
                warn!("no gps fix within {:?}", self.timeout);
                None
            }
        }
    }

    async fn read_fix(&self) -> anyhow::Result<Option<GeoFix>> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .with_context(|| format!("connect to gpsd at {}:{}", self.host, self.port))?;
        stream
            .write_all(WATCH_COMMAND.as_bytes())
            .await
            .context("send WATCH")?;

        let mut lines = BufReader::new(stream).lines();
        while let Some(line) = lines.next_line().await.context("read gpsd report")? {
            if let Some(fix) = parse_tpv(&line, Utc::now()) {
                return Ok(Some(fix));
            }
            debug!("skipping gpsd line: {line}");
        }
        Ok(None)
    }
}

/// Handle to the refresh loop; dropping it stops the loop.
pub struct RefreshTask(JoinHandle<()>);

impl Drop for RefreshTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Periodically replaces the shared fix while a day is playing.
pub fn spawn_refresh(provider: GeoProvider, fix: SharedFix, every: Duration) -> RefreshTask {
    RefreshTask(tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; the day run has just refreshed.
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Some(update) = provider.acquire().await {
                *fix.lock().await = update;
            }
        }
    }))
}
