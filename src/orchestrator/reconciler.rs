//! Periodic reconciliation of declared status against observed liveness.
//!
//! Each pass samples every session concurrently: a bounded liveness probe
//! and, for live processes, a console snapshot hashed into an activity
//! signature. Samples are then evaluated one session at a time:
//!
//! | declared          | observed | action                              |
//! |-------------------|----------|-------------------------------------|
//! | active / blocked  | dead     | set `exited`, emit `contradiction`  |
//! | ready / done      | dead     | nothing                             |
//! | exited            | alive    | log anomaly, no transition          |
//! | any               | unknown  | nothing (probe timed out)           |
//!
//! Live `active` sessions additionally feed the advisory `idle` and `stuck`
//! detectors, each of which fires at most once per unchanged-output run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::ReconcileConfig;
use crate::models::event::{EventKind, NotificationEvent};
use crate::models::session::{NotifiedFlags, SessionStatus};
use crate::orchestrator::registry::{ReconcileTarget, SessionRegistry};
use crate::sinks::EventPublisher;

/// Observed process state for one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// The process is running.
    Alive,
    /// The process is gone (or was never attached).
    Dead,
    /// The probe did not answer in time.
    Unknown,
}

/// Thresholds for the reconciliation loop.
#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    /// Time between passes.
    pub interval: Duration,
    /// Upper bound on each liveness probe and snapshot capture.
    pub probe_timeout: Duration,
    /// Trailing console lines hashed into the activity signature.
    pub idle_tail_lines: usize,
    /// Samples with an unchanged signature before `idle` is considered.
    pub idle_samples: u32,
    /// Unchanged-output duration in `active` before `stuck` is considered.
    pub stuck_threshold: Duration,
    /// Consecutive samples an advisory condition must hold.
    pub debounce_samples: u32,
    /// Consecutive dead samples before a contradiction is resolved.
    pub contradiction_samples: u32,
}

impl ReconcilerOptions {
    /// Derive options from the `[reconcile]` configuration section.
    #[must_use]
    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self {
            interval: config.interval(),
            probe_timeout: config.probe_timeout(),
            idle_tail_lines: config.idle_tail_lines,
            idle_samples: config.idle_samples.max(1),
            stuck_threshold: config.stuck_threshold(),
            debounce_samples: config.debounce_samples.max(1),
            contradiction_samples: config.contradiction_samples.max(1),
        }
    }
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self::from_config(&ReconcileConfig::default())
    }
}

/// Hash the last `tail_lines` non-blank-trailing lines of a console snapshot.
#[must_use]
pub fn activity_signature(snapshot: &[u8], tail_lines: usize) -> String {
    let text = String::from_utf8_lossy(snapshot);
    let mut lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    let start = lines.len().saturating_sub(tail_lines);

    let mut hasher = Sha256::new();
    hasher.update(lines[start..].join("\n").as_bytes());
    format!("{:x}", hasher.finalize())
}

struct Sample {
    liveness: Liveness,
    signature: Option<String>,
}

/// Per-session detector state. Ephemeral: rebuilt after a restart.
struct Track {
    generation: u64,
    signature: Option<String>,
    signature_since: DateTime<Utc>,
    unchanged_samples: u32,
    idle_hold: u32,
    stuck_hold: u32,
    dead_samples: u32,
    anomaly_logged: bool,
}

impl Track {
    fn new(generation: u64, now: DateTime<Utc>) -> Self {
        Self {
            generation,
            signature: None,
            signature_since: now,
            unchanged_samples: 0,
            idle_hold: 0,
            stuck_hold: 0,
            dead_samples: 0,
            anomaly_logged: false,
        }
    }

    fn reset_activity(&mut self) {
        self.signature = None;
        self.unchanged_samples = 0;
        self.idle_hold = 0;
        self.stuck_hold = 0;
    }
}

/// Reconciliation engine.
pub struct Reconciler {
    registry: SessionRegistry,
    events: EventPublisher,
    options: ReconcilerOptions,
    tracks: Mutex<HashMap<String, Track>>,
}

impl Reconciler {
    /// Create a reconciler over `registry`.
    #[must_use]
    pub fn new(registry: SessionRegistry, events: EventPublisher, options: ReconcilerOptions) -> Self {
        Self {
            registry,
            events,
            options,
            tracks: Mutex::new(HashMap::new()),
        }
    }

    /// Run one pass now.
    pub async fn run_pass(&self) -> Vec<NotificationEvent> {
        self.run_pass_at(Utc::now()).await
    }

    /// Run one pass as if the wall clock read `now`.
    ///
    /// Returns the events emitted, which are also published.
    pub async fn run_pass_at(&self, now: DateTime<Utc>) -> Vec<NotificationEvent> {
        let targets = self.registry.reconcile_targets().await;
        let samples = join_all(targets.iter().map(|target| self.sample(target))).await;

        let mut tracks = self.tracks.lock().await;
        tracks.retain(|name, _| targets.iter().any(|t| &t.session.name == name));

        let mut emitted = Vec::new();
        for (target, sample) in targets.iter().zip(samples) {
            emitted.extend(self.evaluate(target, sample, &mut tracks, now).await);
        }
        drop(tracks);

        for event in &emitted {
            self.events.publish(event.clone()).await;
        }
        emitted
    }

    /// Run passes on the configured interval until cancelled.
    #[must_use]
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let span = info_span!("reconciler");
        tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(self.options.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                info!(interval_ms = self.options.interval.as_millis(), "reconciler started");
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            info!("reconciler shutting down");
                            break;
                        }
                        _ = ticker.tick() => {
                            let events = self.run_pass().await;
                            if !events.is_empty() {
                                debug!(count = events.len(), "reconciliation pass emitted events");
                            }
                        }
                    }
                }
            }
            .instrument(span),
        )
    }

    async fn sample(&self, target: &ReconcileTarget) -> Sample {
        let Some(process) = target.process.as_ref() else {
            return Sample {
                liveness: Liveness::Dead,
                signature: None,
            };
        };
        let host = self.registry.host();
        let name = &target.session.name;

        let liveness =
            match tokio::time::timeout(self.options.probe_timeout, host.is_alive(process)).await {
                Ok(true) => Liveness::Alive,
                Ok(false) => Liveness::Dead,
                Err(_) => {
                    debug!(session = %name, "liveness probe timed out");
                    Liveness::Unknown
                }
            };

        let signature = if liveness == Liveness::Alive
            && target.session.declared_status == SessionStatus::Active
        {
            match tokio::time::timeout(self.options.probe_timeout, host.capture_snapshot(process))
                .await
            {
                Ok(Ok(snapshot)) => Some(activity_signature(&snapshot, self.options.idle_tail_lines)),
                Ok(Err(err)) => {
                    debug!(session = %name, %err, "snapshot capture failed");
                    None
                }
                Err(_) => {
                    debug!(session = %name, "snapshot capture timed out");
                    None
                }
            }
        } else {
            None
        };

        Sample {
            liveness,
            signature,
        }
    }

    async fn evaluate(
        &self,
        target: &ReconcileTarget,
        sample: Sample,
        tracks: &mut HashMap<String, Track>,
        now: DateTime<Utc>,
    ) -> Vec<NotificationEvent> {
        let name = target.session.name.as_str();

        // Session removed or respawned while sampling.
        if self.registry.generation(name).await != Some(target.generation) {
            tracks.remove(name);
            return Vec::new();
        }
        let Some(session) = self.registry.get(name).await else {
            tracks.remove(name);
            return Vec::new();
        };

        let track = tracks
            .entry(name.to_owned())
            .or_insert_with(|| Track::new(target.generation, now));
        if track.generation != target.generation {
            *track = Track::new(target.generation, now);
        }

        let status = session.declared_status;
        match (status, sample.liveness) {
            (_, Liveness::Unknown) => {
                track.dead_samples = 0;
                return Vec::new();
            }
            (SessionStatus::Spawning, _) => return Vec::new(),
            (SessionStatus::Active | SessionStatus::Blocked, Liveness::Dead) => {
                track.dead_samples += 1;
                track.reset_activity();
                if track.dead_samples < self.options.contradiction_samples {
                    return Vec::new();
                }
                return self.resolve_contradiction(name, target.generation, status).await;
            }
            (SessionStatus::Exited, Liveness::Alive) => {
                if !track.anomaly_logged {
                    warn!(session = name, "session declared exited but its process is alive");
                    track.anomaly_logged = true;
                }
                return Vec::new();
            }
            (_, Liveness::Dead) => {
                track.reset_activity();
                return Vec::new();
            }
            _ => {
                track.dead_samples = 0;
                track.anomaly_logged = false;
            }
        }

        if status != SessionStatus::Active {
            track.reset_activity();
            return Vec::new();
        }
        let Some(signature) = sample.signature else {
            return Vec::new();
        };

        let mut flags = session.notified_flags;
        if track.signature.as_deref() == Some(signature.as_str()) {
            track.unchanged_samples += 1;
        } else {
            track.signature = Some(signature.clone());
            track.signature_since = now;
            track.unchanged_samples = 1;
            track.idle_hold = 0;
            track.stuck_hold = 0;
            if flags != NotifiedFlags::default() {
                flags = NotifiedFlags::default();
                self.store_flags(name, flags).await;
            }
            if let Err(err) = self.registry.record_activity(name, Some(signature)).await {
                debug!(session = name, %err, "failed to record activity");
            }
        }

        let mut emitted = Vec::new();

        if track.unchanged_samples >= self.options.idle_samples {
            track.idle_hold += 1;
        } else {
            track.idle_hold = 0;
        }
        if track.idle_hold >= self.options.debounce_samples && !flags.idle {
            flags.idle = true;
            self.store_flags(name, flags).await;
            emitted.push(NotificationEvent::new(
                name,
                EventKind::Idle,
                status,
                status,
                format!("output unchanged for {} samples", track.unchanged_samples),
            ));
        }

        let since_status = elapsed(session.last_status_change_time, now);
        let since_output = elapsed(track.signature_since, now);
        if since_status >= self.options.stuck_threshold && since_output >= self.options.stuck_threshold {
            track.stuck_hold += 1;
        } else {
            track.stuck_hold = 0;
        }
        if track.stuck_hold >= self.options.debounce_samples && !flags.stuck {
            flags.stuck = true;
            self.store_flags(name, flags).await;
            emitted.push(NotificationEvent::new(
                name,
                EventKind::Stuck,
                status,
                status,
                format!("active with unchanged output for {}s", since_output.as_secs()),
            ));
        }

        emitted
    }

    async fn resolve_contradiction(
        &self,
        name: &str,
        generation: u64,
        declared: SessionStatus,
    ) -> Vec<NotificationEvent> {
        match self
            .registry
            .set_status_if(name, generation, SessionStatus::Exited)
            .await
        {
            Ok(Some(change)) if change.changed() => {
                warn!(session = name, declared = %declared, "declared status contradicted by dead process");
                vec![NotificationEvent::new(
                    name,
                    EventKind::Contradiction,
                    change.old,
                    SessionStatus::Exited,
                    format!("declared {declared} but the process is not running"),
                )]
            }
            Ok(_) => Vec::new(),
            Err(err) => {
                warn!(session = name, %err, "failed to resolve contradiction");
                Vec::new()
            }
        }
    }

    async fn store_flags(&self, name: &str, flags: NotifiedFlags) {
        if let Err(err) = self.registry.set_notified(name, flags).await {
            debug!(session = name, %err, "failed to store notification flags");
        }
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}
