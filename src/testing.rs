//! Fakes for the agent's seams, shared by unit tests.

use crate::auth::{Credential, WallClock};
use crate::delivery::{DeliveryError, DeliveryPath};
use crate::hardware::{Indicators, MotionSensor, NetworkLink};
use crate::occupancy::OccupancyState;
use crate::session::{Session, SessionError, SessionEvent};
use chrono::{DateTime, TimeDelta, Utc};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

/// Wall clock set by the test. Clones share the same time.
#[derive(Clone)]
pub struct ManualClock {
    now: Rc<Cell<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn at_unix(secs: i64) -> Self {
        Self {
            now: Rc::new(Cell::new(DateTime::from_timestamp(secs, 0).unwrap())),
        }
    }

    pub fn set_unix(&self, secs: i64) {
        self.now.set(DateTime::from_timestamp(secs, 0).unwrap());
    }

    pub fn advance_secs(&self, secs: i64) {
        self.now.set(self.now.get() + TimeDelta::seconds(secs));
    }

    pub fn advance_ms(&self, ms: i64) {
        self.now.set(self.now.get() + TimeDelta::milliseconds(ms));
    }
}

impl WallClock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}

/// Session that records calls and replays queued events.
#[derive(Default)]
pub struct FakeSession {
    pub connects: Vec<Credential>,
    pub subscriptions: Vec<String>,
    pub publishes: Vec<(String, Vec<u8>)>,
    pub disconnects: usize,
    pub fail_connect: Option<SessionError>,
    pub fail_subscribe: bool,
    events: VecDeque<SessionEvent>,
}

impl FakeSession {
    pub fn push_event(&mut self, event: SessionEvent) {
        self.events.push_back(event);
    }
}

impl Session for FakeSession {
    fn connect(&mut self, credential: &Credential) -> Result<(), SessionError> {
        self.connects.push(credential.clone());
        match &self.fail_connect {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        self.subscriptions.push(topic.to_string());
        if self.fail_subscribe {
            Err(SessionError::Client("request queue full".into()))
        } else {
            Ok(())
        }
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), SessionError> {
        self.publishes.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn poll_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    fn disconnect(&mut self) {
        self.disconnects += 1;
    }
}

#[derive(Default)]
struct PathLog {
    attempts: usize,
    sent: Vec<Vec<u8>>,
}

/// Delivery path that records payloads, optionally failing every attempt.
#[derive(Clone)]
pub struct RecordingPath {
    name: &'static str,
    fail_with: Option<DeliveryError>,
    log: Rc<RefCell<PathLog>>,
}

impl RecordingPath {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fail_with: None,
            log: Rc::default(),
        }
    }

    pub fn failing(name: &'static str, err: DeliveryError) -> Self {
        Self {
            fail_with: Some(err),
            ..Self::new(name)
        }
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.log.borrow().sent.clone()
    }

    pub fn attempts(&self) -> usize {
        self.log.borrow().attempts
    }
}

impl DeliveryPath for RecordingPath {
    fn name(&self) -> &'static str {
        self.name
    }

    fn deliver(&mut self, payload: &[u8]) -> Result<(), DeliveryError> {
        let mut log = self.log.borrow_mut();
        log.attempts += 1;
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        log.sent.push(payload.to_vec());
        Ok(())
    }
}

/// Motion input set by the test.
#[derive(Clone, Default)]
pub struct SharedSensor {
    motion: Rc<Cell<bool>>,
}

impl SharedSensor {
    pub fn set(&self, motion: bool) {
        self.motion.set(motion);
    }
}

impl MotionSensor for SharedSensor {
    fn read(&mut self) -> io::Result<bool> {
        Ok(self.motion.get())
    }
}

/// Indicators that remember every state shown.
#[derive(Clone, Default)]
pub struct RecordingIndicators {
    shown: Rc<RefCell<Vec<OccupancyState>>>,
}

impl RecordingIndicators {
    pub fn shown(&self) -> Vec<OccupancyState> {
        self.shown.borrow().clone()
    }
}

impl Indicators for RecordingIndicators {
    fn show(&mut self, state: OccupancyState) {
        self.shown.borrow_mut().push(state);
    }
}

/// Network link toggled by the test.
#[derive(Clone)]
pub struct FakeLink {
    attached: Rc<Cell<bool>>,
    reconnects: Rc<Cell<usize>>,
}

impl FakeLink {
    pub fn new(attached: bool) -> Self {
        Self {
            attached: Rc::new(Cell::new(attached)),
            reconnects: Rc::default(),
        }
    }

    pub fn set_attached(&self, attached: bool) {
        self.attached.set(attached);
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.get()
    }
}

impl NetworkLink for FakeLink {
    fn is_attached(&self) -> bool {
        self.attached.get()
    }

    fn force_reconnect(&mut self) -> io::Result<()> {
        self.reconnects.set(self.reconnects.get() + 1);
        Ok(())
    }
}
