//! The device context and its tick loop.
//!
//! Everything runs on one thread from [`Agent::tick`]. Setup (network
//! attachment, clock synchronization) is expressed as deadline-checked
//! phases of the same loop, so a slow network never blocks it. Once
//! running, each tick:
//!
//! 1. services the persistent session (control messages, connection results),
//! 2. reconnects the session if it is down,
//! 3. samples the sensor, runs the occupancy state machine, and dispatches
//!    at most one event.

use crate::auth::WallClock;
use crate::config::Config;
use crate::delivery::{DeliveryDispatcher, DeliveryPath, DispatchReport};
use crate::error::{AgentError, Result};
use crate::hardware::{Indicators, MotionSensor, NetworkLink};
use crate::occupancy::{Debouncer, OccupancyState, OccupancyStateMachine};
use crate::session::{ConnectionSupervisor, Session};
use log::{error, info, warn};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AttachingNetwork { deadline: Instant },
    SyncingClock { deadline: Instant },
    Running,
}

/// Collaborators the agent drives.
pub struct AgentParts<S: Session, C: WallClock> {
    pub supervisor: ConnectionSupervisor<S>,
    pub clock: C,
    pub link: Box<dyn NetworkLink>,
    pub sensor: Box<dyn MotionSensor>,
    pub indicators: Box<dyn Indicators>,
    pub http: Box<dyn DeliveryPath>,
}

pub struct Agent<S: Session, C: WallClock> {
    phase: Phase,
    supervisor: ConnectionSupervisor<S>,
    clock: C,
    link: Box<dyn NetworkLink>,
    sensor: Box<dyn MotionSensor>,
    indicators: Box<dyn Indicators>,
    http: Box<dyn DeliveryPath>,
    debouncer: Debouncer,
    occupancy: OccupancyStateMachine,
    dispatcher: DeliveryDispatcher,
    attach_timeout: Duration,
    clock_sync_timeout: Duration,
    link_retry: Duration,
    next_link_retry_at: Option<Instant>,
    shown: OccupancyState,
}

impl<S: Session, C: WallClock> Agent<S, C> {
    pub fn new(config: &Config, parts: AgentParts<S, C>, now: Instant) -> Self {
        let mut indicators = parts.indicators;
        indicators.show(OccupancyState::Free);

        Self {
            phase: Phase::AttachingNetwork {
                deadline: now + config.timing.attach_timeout(),
            },
            supervisor: parts.supervisor,
            clock: parts.clock,
            link: parts.link,
            sensor: parts.sensor,
            indicators,
            http: parts.http,
            debouncer: Debouncer::new(),
            occupancy: OccupancyStateMachine::new(
                config.device.id.clone(),
                config.timing.hysteresis(),
                now,
            ),
            dispatcher: DeliveryDispatcher::new(),
            attach_timeout: config.timing.attach_timeout(),
            clock_sync_timeout: config.timing.clock_sync_timeout(),
            link_retry: config.timing.retry_backoff(),
            next_link_retry_at: None,
            shown: OccupancyState::Free,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn occupancy(&self) -> &OccupancyStateMachine {
        &self.occupancy
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor<S> {
        &self.supervisor
    }

    pub fn supervisor_mut(&mut self) -> &mut ConnectionSupervisor<S> {
        &mut self.supervisor
    }

    pub fn dispatcher(&self) -> &DeliveryDispatcher {
        &self.dispatcher
    }

    /// Run one tick. Returns the dispatch report when an event was sent.
    ///
    /// The only error is [`AgentError::NetworkAttachTimeout`], which is fatal.
    pub fn tick(&mut self, now: Instant) -> Result<Option<DispatchReport>> {
        match self.phase {
            Phase::AttachingNetwork { deadline } => {
                if self.link.is_attached() {
                    info!("[Net] Network attached");
                    info!("[Clock] Waiting for time synchronization");
                    self.phase = Phase::SyncingClock {
                        deadline: now + self.clock_sync_timeout,
                    };
                } else if now >= deadline {
                    return Err(AgentError::NetworkAttachTimeout(self.attach_timeout));
                }
                Ok(None)
            }
            Phase::SyncingClock { deadline } => {
                if self.clock.is_trustworthy() {
                    info!("[Clock] Time synchronized: {}", self.clock.now());
                    self.enter_running();
                } else if now >= deadline {
                    error!(
                        "[Clock] {} after {:?}; connection attempts will back off until it is",
                        AgentError::ClockNotReady,
                        self.clock_sync_timeout
                    );
                    self.enter_running();
                }
                Ok(None)
            }
            Phase::Running => Ok(self.run_tick(now)),
        }
    }

    /// Disconnect the session before exit.
    pub fn shutdown(&mut self) {
        info!("[Agent] Shutting down");
        self.supervisor.force_disconnect();
    }

    fn enter_running(&mut self) {
        info!("[Agent] Setup done");
        self.phase = Phase::Running;
    }

    fn run_tick(&mut self, now: Instant) -> Option<DispatchReport> {
        self.supervisor.service(now);
        self.check_link(now);
        self.supervisor.maintain(now, &self.clock);

        let raw = match self.sensor.read() {
            Ok(raw) => raw,
            Err(e) => {
                warn!("[Occupancy] Sensor read failed, treating as no motion: {}", e);
                false
            }
        };
        let motion = self.debouncer.sample(raw, now);
        let event = self.occupancy.on_sample(motion, now, self.clock.now());

        let state = self.occupancy.state();
        if state != self.shown {
            self.indicators.show(state);
            self.shown = state;
        }

        let event = event?;
        Some(
            self.dispatcher
                .dispatch(&event, &mut self.supervisor, &mut *self.http),
        )
    }

    /// Re-associate at most once per retry window while the link is down.
    fn check_link(&mut self, now: Instant) {
        if self.link.is_attached() {
            if self.next_link_retry_at.take().is_some() {
                info!("[Net] Network attached again");
            }
            return;
        }

        if let Some(at) = self.next_link_retry_at
            && now < at
        {
            return;
        }

        warn!("[Net] Network link is down");
        if let Err(e) = self.link.force_reconnect() {
            error!("[Net] Reconnect request failed: {}", e);
        }
        self.next_link_retry_at = Some(now + self.link_retry);
    }
}

/// Drive `agent` every `poll_interval` until Ctrl+C.
pub async fn run<S: Session, C: WallClock>(
    mut agent: Agent<S, C>,
    poll_interval: Duration,
) -> Result<()> {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let result = loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = agent.tick(Instant::now()) {
                    break Err(e);
                }
            }
            signal = &mut shutdown => {
                match signal {
                    Ok(()) => info!("[Agent] Received shutdown signal"),
                    Err(e) => error!("[Agent] Failed to listen for shutdown signal: {}", e),
                }
                break Ok(());
            }
        }
    };

    agent.shutdown();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{CredentialManager, SYNC_THRESHOLD_UNIX};
    use crate::delivery::{DeliveryError, DeliveryOutcome};
    use crate::session::{ConnectionState, HubIdentity, SessionEvent, SupervisorTiming};
    use crate::testing::{
        FakeLink, FakeSession, ManualClock, RecordingIndicators, RecordingPath, SharedSensor,
    };

    const TICK: Duration = Duration::from_millis(100);

    struct Harness {
        agent: Agent<FakeSession, ManualClock>,
        clock: ManualClock,
        sensor: SharedSensor,
        link: FakeLink,
        indicators: RecordingIndicators,
        http: RecordingPath,
        t0: Instant,
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.device.id = "room-1".into();
        config.device.key = "c2VjcmV0LWRldmljZS1rZXk=".into();
        config.hub.host = "hub.azure-devices.net".into();
        config
    }

    fn harness_with(http: RecordingPath, clock_unix: i64, attached: bool) -> Harness {
        let config = config();
        let identity = HubIdentity::new(&config.hub.host, &config.device.id);
        let supervisor = ConnectionSupervisor::new(
            FakeSession::default(),
            CredentialManager::new(&identity.host, &identity.device_id, &config.device.key),
            &identity,
            SupervisorTiming {
                token_duration_secs: config.timing.token_duration_secs,
                retry_backoff: config.timing.retry_backoff(),
                connect_timeout: Duration::from_secs(30),
            },
        );
        let clock = ManualClock::at_unix(clock_unix);
        let sensor = SharedSensor::default();
        let link = FakeLink::new(attached);
        let indicators = RecordingIndicators::default();
        let t0 = Instant::now();

        let agent = Agent::new(
            &config,
            AgentParts {
                supervisor,
                clock: clock.clone(),
                link: Box::new(link.clone()),
                sensor: Box::new(sensor.clone()),
                indicators: Box::new(indicators.clone()),
                http: Box::new(http.clone()),
            },
            t0,
        );

        Harness {
            agent,
            clock,
            sensor,
            link,
            indicators,
            http,
            t0,
        }
    }

    fn harness() -> Harness {
        harness_with(RecordingPath::new("http"), 1_700_000_000, true)
    }

    /// Bring the harness to Running with a connected session.
    fn running(h: &mut Harness) -> Instant {
        let mut now = h.t0;
        while h.agent.phase() != Phase::Running {
            h.agent.tick(now).unwrap();
            now += TICK;
        }
        h.agent.tick(now).unwrap();
        h.agent
            .supervisor_mut()
            .session_mut()
            .push_event(SessionEvent::Connected);
        now += TICK;
        h.agent.tick(now).unwrap();
        assert!(h.agent.supervisor().is_connected());
        now
    }

    #[test]
    fn test_setup_phases_advance_to_running() {
        let mut h = harness();
        assert!(matches!(h.agent.phase(), Phase::AttachingNetwork { .. }));

        h.agent.tick(h.t0).unwrap();
        assert!(matches!(h.agent.phase(), Phase::SyncingClock { .. }));

        h.agent.tick(h.t0 + TICK).unwrap();
        assert_eq!(h.agent.phase(), Phase::Running);
        assert_eq!(h.indicators.shown(), vec![OccupancyState::Free]);
    }

    #[test]
    fn test_network_attach_timeout_is_fatal() {
        let mut h = harness_with(RecordingPath::new("http"), 1_700_000_000, false);

        assert!(h.agent.tick(h.t0).is_ok());
        let result = h.agent.tick(h.t0 + Duration::from_millis(10_000));
        assert!(matches!(result, Err(AgentError::NetworkAttachTimeout(_))));
    }

    #[test]
    fn test_late_attachment_within_deadline_proceeds() {
        let mut h = harness_with(RecordingPath::new("http"), 1_700_000_000, false);

        h.agent.tick(h.t0 + Duration::from_millis(5_000)).unwrap();
        h.link.set_attached(true);
        h.agent.tick(h.t0 + Duration::from_millis(9_900)).unwrap();
        assert!(matches!(h.agent.phase(), Phase::SyncingClock { .. }));
    }

    #[test]
    fn test_clock_sync_timeout_still_runs_but_cannot_connect() {
        let mut h = harness_with(RecordingPath::new("http"), SYNC_THRESHOLD_UNIX - 1000, true);

        h.agent.tick(h.t0).unwrap();
        h.agent.tick(h.t0 + TICK).unwrap();
        assert!(matches!(h.agent.phase(), Phase::SyncingClock { .. }));

        let later = h.t0 + TICK + Duration::from_millis(30_000);
        h.agent.tick(later).unwrap();
        assert_eq!(h.agent.phase(), Phase::Running);

        h.agent.tick(later + TICK).unwrap();
        assert_eq!(h.agent.supervisor().state(), ConnectionState::Connecting);
        assert!(h.agent.supervisor().session().connects.is_empty());
    }

    #[test]
    fn test_motion_scenario_dispatches_occupied_then_free() {
        let mut h = harness();
        let start = running(&mut h);
        let mut reports = Vec::new();

        // Motion for 500 ms, then silence for 10.5 s.
        for i in 0..=110u32 {
            h.sensor.set(i <= 5);
            h.clock.advance_ms(100);
            if let Some(report) = h.agent.tick(start + TICK * i).unwrap() {
                reports.push((i, report));
            }
        }

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].0, 0);
        assert!(reports[0].1.occupied);
        assert_eq!(reports[1].0, 105);
        assert!(!reports[1].1.occupied);
        for (_, report) in &reports {
            assert!(report.publish.is_delivered());
            assert!(report.http.is_delivered());
        }

        let telemetry: Vec<_> = h
            .agent
            .supervisor()
            .session()
            .publishes
            .iter()
            .filter(|(topic, _)| topic == "devices/room-1/messages/events/")
            .map(|(_, body)| body.clone())
            .collect();
        assert_eq!(telemetry, h.http.sent());
        assert_eq!(
            h.indicators.shown(),
            vec![
                OccupancyState::Free,
                OccupancyState::Occupied,
                OccupancyState::Free
            ]
        );
    }

    #[test]
    fn test_motion_resumes_within_window_sends_no_free_event() {
        let mut h = harness();
        let start = running(&mut h);
        let mut reports = Vec::new();

        for i in 0..=150u32 {
            h.sensor.set(i == 0 || i == 90);
            if let Some(report) = h.agent.tick(start + TICK * i).unwrap() {
                reports.push(report);
            }
        }

        assert_eq!(reports.len(), 1);
        assert!(reports[0].occupied);
        assert_eq!(h.agent.occupancy().state(), OccupancyState::Occupied);
    }

    #[test]
    fn test_http_failure_does_not_stop_publish() {
        let http = RecordingPath::failing("http", DeliveryError::Transport("500".into()));
        let mut h = harness_with(http, 1_700_000_000, true);
        let start = running(&mut h);

        h.sensor.set(true);
        let report = h.agent.tick(start).unwrap().expect("occupied event");

        assert!(report.publish.is_delivered());
        assert!(matches!(report.http, DeliveryOutcome::Failed(_)));
    }

    #[test]
    fn test_event_while_disconnected_still_goes_over_http() {
        let mut h = harness();
        let start = running(&mut h);
        h.agent
            .supervisor_mut()
            .session_mut()
            .push_event(SessionEvent::Disconnected("lost".into()));

        h.sensor.set(true);
        let report = h.agent.tick(start).unwrap().expect("occupied event");

        assert!(matches!(report.publish, DeliveryOutcome::Failed(_)));
        assert!(report.http.is_delivered());
        assert_eq!(h.http.sent().len(), 1);
    }

    #[test]
    fn test_detached_link_forces_reconnect_once_per_window() {
        let mut h = harness();
        let start = running(&mut h);

        h.link.set_attached(false);
        for i in 0..10u32 {
            h.agent.tick(start + TICK * i).unwrap();
        }
        assert_eq!(h.link.reconnects(), 1);

        h.agent.tick(start + Duration::from_millis(5_000)).unwrap();
        assert_eq!(h.link.reconnects(), 2);
    }

    #[test]
    fn test_shutdown_disconnects_session() {
        let mut h = harness();
        running(&mut h);

        h.agent.shutdown();
        assert_eq!(h.agent.supervisor().state(), ConnectionState::Disconnected);
        assert_eq!(h.agent.supervisor().session().disconnects, 1);
    }
}
