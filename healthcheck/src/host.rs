use std::{path::Path, time::Duration};

use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use daylight_common::{
    config::MqttConfig,
    health::{evaluate, LAST_TICK_FILE, NEXT_WAKE_FILE, PHASE_FILE},
    RuntimeConfig,
};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions};
use tracing::{debug, error};

const BROKER_TIMEOUT: Duration = Duration::from_secs(10);

/// Exit status 0 when healthy, 1 otherwise, with the reason logged.
pub async fn run() -> i32 {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match check().await {
        Ok(()) => {
            debug!("healthy");
            0
        }
        Err(err) => {
            error!("unhealthy: {err:#}");
            1
        }
    }
}

async fn check() -> anyhow::Result<()> {
    let config = RuntimeConfig::from_env().context("configuration")?;

    check_files(Path::new(&config.health_dir)).await?;
    check_broker(&config.mqtt).await
}

async fn check_files(dir: &Path) -> anyhow::Result<()> {
    let phase = read_optional(&dir.join(PHASE_FILE)).await?;
    let next_wake = read_optional(&dir.join(NEXT_WAKE_FILE)).await?;
    let last_tick = read_optional(&dir.join(LAST_TICK_FILE)).await?;

    evaluate(
        phase.as_deref(),
        next_wake.as_deref(),
        last_tick.as_deref(),
        Utc::now().timestamp(),
    )
    .map_err(|reason| anyhow!(reason))
}

async fn read_optional(path: &Path) -> anyhow::Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}

async fn check_broker(config: &MqttConfig) -> anyhow::Result<()> {
    let client_id = format!("{}-healthcheck-{}", config.client_id, std::process::id());
    let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
    options.set_keep_alive(Duration::from_secs(5));
    if !config.user.is_empty() {
        options.set_credentials(config.user.clone(), config.pass.clone());
    }

    let (client, mut eventloop) = AsyncClient::new(options, 4);
    let connected = tokio::time::timeout(BROKER_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(err) => return Err(err),
            }
        }
    })
    .await;

    match connected {
        Ok(Ok(())) => {
            let _ = client.try_disconnect();
            Ok(())
        }
        Ok(Err(err)) => bail!("broker {}:{} unreachable: {err}", config.host, config.port),
        Err(_) => bail!(
            "broker {}:{} did not answer within {BROKER_TIMEOUT:?}",
            config.host,
            config.port
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(label: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("daylight-healthcheck-{label}-{}", std::process::id()))
    }

    #[tokio::test]
    async fn missing_files_are_unhealthy_until_idle() {
        let dir = scratch_dir("files");
        tokio::fs::create_dir_all(&dir).await.unwrap();

        let err = check_files(&dir).await.unwrap_err();
        assert!(err.to_string().contains("without last_tick"));

        tokio::fs::write(dir.join(PHASE_FILE), "idle").await.unwrap();
        assert!(check_files(&dir).await.is_ok());

        tokio::fs::write(dir.join(PHASE_FILE), "sleep").await.unwrap();
        let err = check_files(&dir).await.unwrap_err();
        assert_eq!(err.to_string(), "sleep without next_wake");

        let wake = Utc::now().timestamp() + 3_600;
        tokio::fs::write(dir.join(NEXT_WAKE_FILE), wake.to_string())
            .await
            .unwrap();
        assert!(check_files(&dir).await.is_ok());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn stale_active_tick_is_reported() {
        let dir = scratch_dir("stale");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join(PHASE_FILE), "active").await.unwrap();
        let tick = Utc::now().timestamp() - 600;
        tokio::fs::write(dir.join(LAST_TICK_FILE), tick.to_string())
            .await
            .unwrap();

        let err = check_files(&dir).await.unwrap_err();
        assert_eq!(err.to_string(), "stale tick");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn refused_broker_is_unhealthy() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = MqttConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..MqttConfig::default()
        };
        let err = check_broker(&config).await.unwrap_err();
        assert!(err.to_string().contains("unreachable"));
    }
}
