use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use daylight_common::{
    align, next_minute_boundary, Atmosphere, Cie1931, ClearSky, DayGate, DayModelBuilder,
    GateDecision, LightCommand, Phase, PlaybackAction, PlaybackEngine, SpectralSampler,
};
use tracing::{debug, info, warn};

use crate::{
    connection::{ConnectionManager, Publisher},
    geo::{spawn_refresh, GeoProvider, RefreshTask, SharedFix},
    health::HealthRecorder,
};

const GATE_POLL: Duration = Duration::from_secs(60);
const POST_EMIT_PAUSE: Duration = Duration::from_secs(1);

/// Everything a day run needs, owned by the scheduler task.
pub struct DayRunner {
    pub timezone: Tz,
    pub builder: DayModelBuilder,
    pub sampler: SpectralSampler<ClearSky, Cie1931>,
    pub geo: Option<GeoProvider>,
    pub geo_refresh: Option<Duration>,
    pub fix: SharedFix,
    pub publisher: Publisher,
    pub health: HealthRecorder,
}

impl DayRunner {
    pub fn new(
        timezone: Tz,
        builder: DayModelBuilder,
        geo: Option<GeoProvider>,
        geo_refresh: Option<Duration>,
        fix: SharedFix,
        publisher: Publisher,
        health: HealthRecorder,
    ) -> Self {
        Self {
            timezone,
            builder,
            sampler: SpectralSampler::new(ClearSky::default(), Cie1931, Atmosphere::default()),
            geo,
            geo_refresh,
            fix,
            publisher,
            health,
        }
    }

    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }

    /// Computes today's trajectory and plays it through to Idle.
    pub async fn run_day(&mut self, today: NaiveDate) -> anyhow::Result<()> {
        info!("starting day run for {today}");

        if let Some(geo) = &self.geo {
            match geo.acquire().await {
                Some(fix) => *self.fix.lock().await = fix,
                None => info!("keeping previous location"),
            }
        }
        let fix = *self.fix.lock().await;

        let model = self
            .builder
            .build(today, fix.latitude, fix.longitude, fix.altitude, self.timezone)
            .with_context(|| format!("day model for {today}"))?;
        info!(
            "sunrise {} sunset {} (natural day {} min), pseudo date {}",
            model.sunrise,
            model.sunset,
            model.natural_day_length().num_minutes(),
            model.pseudo_date
        );

        let sampled = self.sampler.sample(&model, &fix);
        let model = model.with_trajectory(&sampled.entries);
        info!(
            "max irradiance norm {:.3}, fake day {} min, {} minutes without light",
            sampled.peak_norm,
            model.trajectory_duration.num_minutes(),
            sampled.dropped
        );

        let now = Utc::now();
        let alignment = align(sampled.entries, model.sunset.with_timezone(&Utc), now);
        if alignment.needs_sleep() {
            info!(
                "playback starts at {}",
                (now + alignment.wait).with_timezone(&self.timezone)
            );
        } else {
            info!(
                "started {} min late, dropped {} entries",
                -alignment.wait.num_minutes(),
                alignment.dropped
            );
        }

        self.play(PlaybackEngine::new(alignment, now)).await
    }

    async fn play(&mut self, mut engine: PlaybackEngine) -> anyhow::Result<()> {
        // Dropped on every exit path, which stops the refresh loop.
        let mut refresh: Option<RefreshTask> = None;

        while let Some(action) = engine.advance()? {
            match action {
                PlaybackAction::Sleep { until } => {
                    self.publisher.phase(Phase::Sleep);
                    self.health.enter_sleep(until).await;
                    info!("sleeping until {}", until.with_timezone(&self.timezone));
                    sleep_until(until).await;
                }
                PlaybackAction::Activate => {
                    self.publisher.phase(Phase::Active);
                    self.health.enter_active(Utc::now()).await;
                    info!("playback active, {} entries", engine.remaining());
                    if let (Some(geo), Some(every)) = (&self.geo, self.geo_refresh) {
                        refresh = Some(spawn_refresh(geo.clone(), self.fix.clone(), every));
                    }
                }
                PlaybackAction::Emit(entry) => {
                    sleep_until(next_minute_boundary(Utc::now())).await;

                    let command = entry.light_command();
                    self.publisher.light(&command);
                    self.publisher.fake_time(&entry);
                    let fix = *self.fix.lock().await;
                    let now = Utc::now();
                    self.publisher
                        .status(&entry.status(now.with_timezone(&self.timezone), &fix));
                    self.health.tick(now).await;
                    debug!("{} -> {command:?}", entry.fake_time_payload());

                    tokio::time::sleep(POST_EMIT_PAUSE).await;
                }
                PlaybackAction::Finish => {
                    self.publisher.light(&LightCommand::off());
                    self.publisher.phase(Phase::Idle);
                    self.health.enter_idle().await;
                    refresh = None;
                    info!("day complete, light off");
                }
            }
        }
        Ok(())
    }
}

/// Polls the day gate once a minute and runs each due day to completion.
pub async fn run(runner: &mut DayRunner, connection: &ConnectionManager) -> anyhow::Result<()> {
    let mut gate = DayGate::new(runner.today());
    let mut interval = tokio::time::interval(GATE_POLL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let today = runner.today();
        match gate.poll(today, connection.state()) {
            GateDecision::Run => runner.run_day(today).await?,
            GateDecision::Offline => warn!(
                "broker {}, postponing run for {today}",
                connection.state().as_str()
            ),
            GateDecision::AlreadyRan => {}
        }
    }
}

async fn sleep_until(deadline: DateTime<Utc>) {
    let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    tokio::time::sleep(remaining).await;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration as ChronoDuration, FixedOffset, TimeZone};
    use daylight_common::{
        config::{GpsdConfig, TopicConfig},
        GeoFix, ScheduleEntry, Topics,
    };
    use tokio::{net::TcpListener, sync::Mutex};

    use super::*;
    use crate::connection::RecordingOutbox;

    const LIGHT: &str = "zigbee2mqtt/Coop Light/set";

    fn scratch_dir(label: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("daylight-run-{label}-{}", std::process::id()))
    }

    fn site() -> GeoFix {
        GeoFix::configured(43.0918, -73.4961, 121.0, Utc::now())
    }

    fn runner(outbox: Arc<RecordingOutbox>, label: &str, geo: Option<GeoProvider>) -> DayRunner {
        DayRunner::new(
            chrono_tz::UTC,
            DayModelBuilder::default(),
            geo,
            Some(Duration::from_secs(3_600)),
            Arc::new(Mutex::new(site())),
            Publisher::new(
                outbox,
                Topics::new(&TopicConfig::default(), "daylight-controller"),
            ),
            HealthRecorder::new(scratch_dir(label)),
        )
    }

    fn entries(count: i64) -> Vec<ScheduleEntry> {
        let start = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 7, 1, 6, 0, 0)
            .unwrap();
        (0..count)
            .map(|minute| ScheduleEntry {
                fake_time: start + ChronoDuration::minutes(minute),
                chroma_x: 0.31271,
                chroma_y: 0.32902,
                brightness: 0.5,
            })
            .collect()
    }

    fn shape(sent: &[(String, bool, String)]) -> Vec<(&str, bool)> {
        sent.iter()
            .map(|(topic, retained, _)| (topic.as_str(), *retained))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn playback_publishes_phases_entries_then_one_off() {
        let outbox = Arc::new(RecordingOutbox::default());
        let mut runner = runner(outbox.clone(), "playback", None);
        let day = entries(3);

        let now = Utc::now();
        let sunset = now + ChronoDuration::minutes(3);
        let engine = PlaybackEngine::new(align(day.clone(), sunset, now), now);
        runner.play(engine).await.unwrap();

        let sent = outbox.sent();
        let mut expected = vec![("daylight/phase", true), ("daylight/phase", true)];
        for _ in &day {
            expected.extend([(LIGHT, false), ("daylight", false), ("daylight/status", false)]);
        }
        expected.extend([(LIGHT, false), ("daylight/phase", true)]);
        assert_eq!(shape(&sent), expected);

        let phases: Vec<&str> = sent
            .iter()
            .filter(|(topic, _, _)| topic == "daylight/phase")
            .map(|(_, _, payload)| payload.as_str())
            .collect();
        assert_eq!(phases, vec!["sleep", "active", "idle"]);

        for (index, entry) in day.iter().enumerate() {
            let base = 2 + index * 3;
            let command: serde_json::Value = serde_json::from_str(&sent[base].2).unwrap();
            assert_eq!(command["state"], "on");
            assert_eq!(command["brightness"], 127);
            assert_eq!(command["color"]["x"], 0.3127);
            assert_eq!(sent[base + 1].2, entry.fake_time_payload());
            let status: serde_json::Value = serde_json::from_str(&sent[base + 2].2).unwrap();
            assert_eq!(status["brightness"], 127);
            assert_eq!(status["lat"], 43.0918);
        }

        let offs = sent
            .iter()
            .filter(|(_, _, payload)| payload == r#"{"state":"off"}"#)
            .count();
        assert_eq!(offs, 1);
        assert_eq!(sent[sent.len() - 2].2, r#"{"state":"off"}"#);

        let _ = tokio::fs::remove_dir_all(scratch_dir("playback")).await;
    }

    #[tokio::test]
    async fn silent_gpsd_keeps_the_previous_fix_for_the_day() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        let geo = GeoProvider::from_config(&GpsdConfig {
            host: Some("127.0.0.1".to_string()),
            port,
            timeout_secs: 1,
            refresh_secs: 0,
        });

        let outbox = Arc::new(RecordingOutbox::default());
        let mut runner = runner(outbox.clone(), "silent-gpsd", geo);
        let before = *runner.fix.lock().await;

        // A date long past: every entry is late, so the run goes straight to Idle.
        let long_ago = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        runner.run_day(long_ago).await.unwrap();

        assert_eq!(*runner.fix.lock().await, before);
        let sent = outbox.sent();
        assert_eq!(
            shape(&sent),
            vec![("daylight/phase", true), (LIGHT, false), ("daylight/phase", true)]
        );
        assert_eq!(sent[0].2, "active");
        assert_eq!(sent[1].2, r#"{"state":"off"}"#);
        assert_eq!(sent[2].2, "idle");

        let _ = tokio::fs::remove_dir_all(scratch_dir("silent-gpsd")).await;
    }
}
