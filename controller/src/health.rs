use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use daylight_common::HealthSignal;
use tracing::warn;

/// Mirrors the in-memory health signal into the files the healthcheck binary reads.
pub struct HealthRecorder {
    dir: PathBuf,
    signal: HealthSignal,
}

impl HealthRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            signal: HealthSignal::default(),
        }
    }

    pub async fn enter_sleep(&mut self, next_wake: DateTime<Utc>) {
        self.signal.enter_sleep(next_wake);
        self.flush().await;
    }

    pub async fn enter_active(&mut self, now: DateTime<Utc>) {
        self.signal.enter_active(now);
        self.flush().await;
    }

    pub async fn tick(&mut self, now: DateTime<Utc>) {
        self.signal.tick(now);
        self.flush().await;
    }

    pub async fn enter_idle(&mut self) {
        self.signal.enter_idle();
        self.flush().await;
    }

    /// Failures are logged, never fatal; a missing file is itself a health signal.
    pub async fn flush(&self) {
        if let Err(err) = self.write_files().await {
            warn!("failed to write health files to {}: {err:#}", self.dir.display());
        }
    }

    async fn write_files(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create {}", self.dir.display()))?;

        for (name, contents) in self.signal.files() {
            let path = self.dir.join(name);
            let staging = self.dir.join(format!(".{name}.tmp"));
            tokio::fs::write(&staging, contents.as_bytes())
                .await
                .with_context(|| format!("write {}", staging.display()))?;
            tokio::fs::rename(&staging, &path)
                .await
                .with_context(|| format!("replace {}", path.display()))?;
        }
        Ok(())
    }
}
