use std::{
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use daylight_common::{
    config::MqttConfig,
    topics::{PAYLOAD_OFFLINE, PAYLOAD_ONLINE},
    ConnectionState, LightCommand, Phase, ScheduleEntry, StatusPayload, Topics,
};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, Outgoing, QoS};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const REQUEST_CAPACITY: usize = 64;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Connection state shared between the event-loop task (writer) and the scheduler (reader).
#[derive(Clone)]
pub struct ConnectionStatus(Arc<AtomicU8>);

impl ConnectionStatus {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ConnectionState::Disconnected as u8)))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ConnectionState) {
        let previous = ConnectionState::from_u8(self.0.swap(state as u8, Ordering::AcqRel));
        if previous != state {
            debug!("mqtt connection {} -> {}", previous.as_str(), state.as_str());
        }
    }
}

/// Bounded exponential reconnect delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

/// Owns the broker session: last will, availability, discovery and reconnection.
pub struct ConnectionManager {
    client: AsyncClient,
    topics: Topics,
    status: ConnectionStatus,
    stopping: Arc<AtomicBool>,
    event_task: JoinHandle<()>,
}

impl ConnectionManager {
    pub fn start(config: &MqttConfig, topics: Topics) -> Self {
        let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keepalive_secs));
        options.set_last_will(LastWill::new(
            topics.availability.clone(),
            PAYLOAD_OFFLINE,
            QoS::AtLeastOnce,
            true,
        ));
        if !config.user.is_empty() {
            options.set_credentials(config.user.clone(), config.pass.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let status = ConnectionStatus::new();
        let stopping = Arc::new(AtomicBool::new(false));
        let backoff = Backoff::new(config.reconnect_min(), config.reconnect_max());

        let event_task = tokio::spawn(drive_event_loop(
            eventloop,
            Publisher::new(Arc::new(client.clone()), topics.clone()),
            status.clone(),
            stopping.clone(),
            backoff,
        ));

        info!(
            "mqtt session to {}:{} as {}",
            config.host, config.port, config.client_id
        );

        Self {
            client,
            topics,
            status,
            stopping,
            event_task,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.status.get()
    }

    pub fn publisher(&self) -> Publisher {
        Publisher::new(Arc::new(self.client.clone()), self.topics.clone())
    }

    /// Best effort: announce offline, close the session and give it a moment to flush.
    pub async fn shutdown(self) {
        self.stopping.store(true, Ordering::Release);

        if let Err(err) =
            self.client
                .try_publish(self.topics.availability.clone(), QoS::AtLeastOnce, true, PAYLOAD_OFFLINE)
        {
            warn!("failed to queue offline availability: {err}");
        }
        if let Err(err) = self.client.try_disconnect() {
            warn!("failed to queue mqtt disconnect: {err}");
        }

        let mut event_task = self.event_task;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut event_task).await.is_err() {
            warn!("mqtt session did not close within {SHUTDOWN_GRACE:?}");
            event_task.abort();
        }
        info!("mqtt session closed");
    }
}

async fn drive_event_loop(
    mut eventloop: EventLoop,
    publisher: Publisher,
    status: ConnectionStatus,
    stopping: Arc<AtomicBool>,
    mut backoff: Backoff,
) {
    status.set(ConnectionState::Connecting);
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                status.set(ConnectionState::Connected);
                backoff.reset();
                info!("mqtt connected");
                publisher.announce();
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) if stopping.load(Ordering::Acquire) => {
                status.set(ConnectionState::Disconnected);
                break;
            }
            Ok(_) => {}
            Err(err) => {
                status.set(ConnectionState::Disconnected);
                if stopping.load(Ordering::Acquire) {
                    break;
                }
                let delay = backoff.next_delay();
                warn!("mqtt poll error: {err}; reconnecting in {delay:?}");
                tokio::time::sleep(delay).await;
                status.set(ConnectionState::Connecting);
            }
        }
    }
}

/// Destination for outgoing messages; the broker client in production.
pub trait Outbox: Send + Sync {
    fn deliver(&self, topic: &str, retain: bool, payload: Vec<u8>);
}

impl Outbox for AsyncClient {
    /// A full queue or closed session drops the message.
    fn deliver(&self, topic: &str, retain: bool, payload: Vec<u8>) {
        if let Err(err) = self.try_publish(topic, QoS::AtLeastOnce, retain, payload) {
            warn!("publish to {topic} failed: {err}");
        }
    }
}

/// Fire-and-forget publishing of everything the controller announces.
#[derive(Clone)]
pub struct Publisher {
    outbox: Arc<dyn Outbox>,
    topics: Topics,
}

impl Publisher {
    pub fn new(outbox: Arc<dyn Outbox>, topics: Topics) -> Self {
        Self { outbox, topics }
    }

    /// Retained availability and discovery; safe to repeat on every reconnect.
    fn announce(&self) {
        self.send(&self.topics.availability, true, PAYLOAD_ONLINE.as_bytes().to_vec());
        for (topic, descriptor) in self.topics.discovery_messages() {
            self.send_json(&topic, true, &descriptor);
        }
    }

    pub fn phase(&self, phase: Phase) {
        self.send(&self.topics.phase, true, phase.as_str().as_bytes().to_vec());
    }

    pub fn light(&self, command: &LightCommand) {
        self.send_json(&self.topics.light, false, command);
    }

    pub fn fake_time(&self, entry: &ScheduleEntry) {
        self.send(&self.topics.base, false, entry.fake_time_payload().into_bytes());
    }

    pub fn status(&self, payload: &StatusPayload) {
        self.send_json(&self.topics.status, false, payload);
    }

    fn send_json<T: Serialize>(&self, topic: &str, retain: bool, value: &T) {
        match serde_json::to_vec(value) {
            Ok(body) => self.send(topic, retain, body),
            Err(err) => warn!("{topic} serialization failed: {err}"),
        }
    }

    fn send(&self, topic: &str, retain: bool, payload: Vec<u8>) {
        self.outbox.deliver(topic, retain, payload);
    }
}

/// Keeps every delivered message for assertions.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingOutbox {
    sent: std::sync::Mutex<Vec<(String, bool, String)>>,
}

#[cfg(test)]
impl RecordingOutbox {
    pub fn sent(&self) -> Vec<(String, bool, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Outbox for RecordingOutbox {
    fn deliver(&self, topic: &str, retain: bool, payload: Vec<u8>) {
        let payload = String::from_utf8_lossy(&payload).into_owned();
        self.sent
            .lock()
            .unwrap()
            .push((topic.to_string(), retain, payload));
    }
}
