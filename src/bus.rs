//! Bounded message bus with retries, backoff, and a dead-letter store.
//!
//! The bus is the only buffer between gateways and the pipeline workers.
//! Capacity counts everything the bus is responsible for: ready entries,
//! delayed retries, and in-flight leases. Enqueue fails fast when full;
//! backpressure is the gateway's problem to surface, not the bus's to hide.
//!
//! Every dequeue hands out a lease. Workers settle it with `ack` or `nack`;
//! a lease that outlives its timeout is treated as abandoned and nacked by
//! the bus itself, so a crashed worker cannot strand a message.

use crate::config::BusConfig;
use crate::error::BusError;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::InboundMessage;

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Opaque settlement token for one dequeued entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueToken(uuid::Uuid);

impl std::fmt::Display for QueueToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One leased message as handed to a worker.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub token: QueueToken,
    pub message: InboundMessage,
    /// Number of failed attempts so far. Zero on first delivery.
    pub attempt: u32,
    pub last_error: Option<String>,
}

/// A message that exhausted its retries.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub message: InboundMessage,
    pub attempts: u32,
    pub last_error: String,
    pub dead_at: chrono::DateTime<chrono::Utc>,
}

/// What `nack` did with the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackDisposition {
    /// Scheduled for another attempt after `delay`.
    Requeued { attempt: u32, delay: Duration },
    /// Retry ceiling reached; moved to the dead-letter store.
    DeadLettered { attempts: u32 },
}

/// Queue depth snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    pub ready: usize,
    pub delayed: usize,
    pub in_flight: usize,
    pub dead: usize,
}

struct DelayedEntry {
    due: Instant,
    entry: QueueEntry,
}

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.entry.token == other.entry.token
    }
}

impl Eq for DelayedEntry {}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.entry.token.0.cmp(&other.entry.token.0))
    }
}

struct InFlight {
    entry: QueueEntry,
    lease_expires: Instant,
}

#[derive(Default)]
struct BusState {
    ready: VecDeque<QueueEntry>,
    delayed: BinaryHeap<Reverse<DelayedEntry>>,
    in_flight: HashMap<QueueToken, InFlight>,
    dead: Vec<DeadLetter>,
    closed: bool,
}

impl BusState {
    fn occupancy(&self) -> usize {
        self.ready.len() + self.delayed.len() + self.in_flight.len()
    }
}

pub struct MessageBus {
    config: BusConfig,
    state: Mutex<BusState>,
    notify: Notify,
    telemetry: TelemetrySink,
}

impl MessageBus {
    pub fn new(config: BusConfig, telemetry: TelemetrySink) -> Self {
        Self {
            config,
            state: Mutex::new(BusState::default()),
            notify: Notify::new(),
            telemetry,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Enqueue one message. Fails fast when the bus is at capacity; the
    /// message is never silently dropped or blocked on.
    pub fn enqueue(&self, message: InboundMessage) -> Result<(), BusError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(BusError::Closed);
            }
            if state.occupancy() >= self.config.capacity {
                return Err(BusError::Full {
                    capacity: self.config.capacity,
                });
            }
            state.ready.push_back(QueueEntry {
                token: QueueToken(uuid::Uuid::new_v4()),
                message,
                attempt: 0,
                last_error: None,
            });
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next ready entry and lease it. Returns `None` once the
    /// bus is closed and drained.
    pub async fn dequeue(&self) -> Option<QueueEntry> {
        loop {
            let wait_until = {
                let mut state = self.lock();
                let now = Instant::now();
                self.promote_due(&mut state, now);
                self.expire_leases(&mut state, now);

                if let Some(entry) = state.ready.pop_front() {
                    state.in_flight.insert(
                        entry.token,
                        InFlight {
                            entry: entry.clone(),
                            lease_expires: now
                                + Duration::from_millis(self.config.lease_timeout_ms),
                        },
                    );
                    return Some(entry);
                }
                if state.closed && state.occupancy() == 0 {
                    return None;
                }

                // Sleep until the next scheduled event, or until notified.
                let next_due = state.delayed.peek().map(|Reverse(d)| d.due);
                let next_lease = state
                    .in_flight
                    .values()
                    .map(|in_flight| in_flight.lease_expires)
                    .min();
                match (next_due, next_lease) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (Some(a), None) => Some(a),
                    (None, Some(b)) => Some(b),
                    (None, None) => None,
                }
            };

            match wait_until {
                Some(deadline) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    /// Settle a lease successfully. The entry leaves the bus for good.
    pub fn ack(&self, token: QueueToken) -> Result<(), BusError> {
        let mut state = self.lock();
        state
            .in_flight
            .remove(&token)
            .map(|_| ())
            .ok_or(BusError::UnknownToken { token: token.0 })
    }

    /// Settle a lease with a failure. The entry is either requeued with
    /// exponential backoff or dead-lettered at the retry ceiling.
    pub fn nack(&self, token: QueueToken, error: &str) -> Result<NackDisposition, BusError> {
        let disposition = {
            let mut state = self.lock();
            let in_flight = state
                .in_flight
                .remove(&token)
                .ok_or(BusError::UnknownToken { token: token.0 })?;
            self.settle_failure(&mut state, in_flight.entry, error)
        };
        self.notify.notify_one();
        Ok(disposition)
    }

    /// Messages that exhausted their retries, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lock().dead.clone()
    }

    pub fn stats(&self) -> BusStats {
        let state = self.lock();
        BusStats {
            ready: state.ready.len(),
            delayed: state.delayed.len(),
            in_flight: state.in_flight.len(),
            dead: state.dead.len(),
        }
    }

    /// Stop accepting new messages. Workers drain what remains; `dequeue`
    /// returns `None` once everything is settled.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    fn promote_due(&self, state: &mut BusState, now: Instant) {
        while let Some(Reverse(delayed)) = state.delayed.peek() {
            if delayed.due > now {
                break;
            }
            let Some(Reverse(delayed)) = state.delayed.pop() else {
                break;
            };
            state.ready.push_back(delayed.entry);
        }
    }

    fn expire_leases(&self, state: &mut BusState, now: Instant) {
        let expired: Vec<QueueToken> = state
            .in_flight
            .iter()
            .filter(|(_, in_flight)| in_flight.lease_expires <= now)
            .map(|(token, _)| *token)
            .collect();
        for token in expired {
            if let Some(in_flight) = state.in_flight.remove(&token) {
                tracing::warn!(%token, "lease expired, nacking abandoned message");
                self.settle_failure(state, in_flight.entry, "lease expired");
            }
        }
    }

    /// Shared failure path for nack and lease expiry. Caller holds the lock.
    fn settle_failure(
        &self,
        state: &mut BusState,
        mut entry: QueueEntry,
        error: &str,
    ) -> NackDisposition {
        entry.attempt += 1;
        entry.last_error = Some(error.to_string());

        if entry.attempt >= self.config.max_attempts {
            let attempts = entry.attempt;
            self.telemetry.record(TelemetryEvent::DeadLettered {
                message_id: entry.message.id,
                attempts,
                error: error.to_string(),
            });
            entry.message.status.advance(crate::MessageStatus::DeadLettered);
            state.dead.push(DeadLetter {
                message: entry.message,
                attempts,
                last_error: error.to_string(),
                dead_at: chrono::Utc::now(),
            });
            return NackDisposition::DeadLettered { attempts };
        }

        let delay = self.backoff(entry.attempt);
        self.telemetry.record(TelemetryEvent::RetryScheduled {
            message_id: entry.message.id,
            attempt: entry.attempt,
            delay_ms: delay.as_millis() as u64,
        });
        let disposition = NackDisposition::Requeued {
            attempt: entry.attempt,
            delay,
        };
        // Fresh token per delivery: a settled or expired lease token must
        // never settle a later delivery of the same message.
        entry.token = QueueToken(uuid::Uuid::new_v4());
        state.delayed.push(Reverse(DelayedEntry {
            due: Instant::now() + delay,
            entry,
        }));
        disposition
    }

    /// Exponential backoff: base doubles per prior attempt, capped.
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let millis = self
            .config
            .base_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.config.max_backoff_ms);
        Duration::from_millis(millis)
    }
}
