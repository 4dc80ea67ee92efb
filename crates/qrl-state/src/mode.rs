//! Health-driven degradation mode machine.
//!
//! Escalation requires a failure source to accumulate
//! `fail_threshold_count` failures within `fail_threshold_seconds`
//! (hysteresis — a single blip never degrades the system). Recovery
//! requires `recovery_stable_seconds` of continuous success AND at least
//! `min_safe_mode_seconds` dwell in the degraded mode (anti-flap). Recovery
//! passes through `recovering` before reaching `normal`.
//!
//! An operator force-override pins the mode for a TTL; while pinned, health
//! events are still recorded but do not transition. On expiry the machine
//! resumes health-driven control, or — when `unknown_on_ttl_expiry` is set —
//! demotes to `recovering` until health proves itself again.
//!
//! All methods take `now`; nothing here reads a clock.

use chrono::{DateTime, Duration, Utc};
use qrl_config::{DegradationConfig, HysteresisConfig};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

// ---------------------------------------------------------------------------
// SystemMode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemMode {
    Normal,
    Degraded,
    SafeMode,
    SafeModeDisconnected,
    Halt,
    Recovering,
}

impl SystemMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemMode::Normal => "normal",
            SystemMode::Degraded => "degraded",
            SystemMode::SafeMode => "safe_mode",
            SystemMode::SafeModeDisconnected => "safe_mode_disconnected",
            SystemMode::Halt => "halt",
            SystemMode::Recovering => "recovering",
        }
    }

    /// Escalation depth used for stage reporting and mode comparison.
    pub fn stage(&self) -> u8 {
        match self {
            SystemMode::Normal => 0,
            SystemMode::Recovering => 1,
            SystemMode::Degraded => 1,
            SystemMode::SafeMode => 2,
            SystemMode::SafeModeDisconnected => 3,
            SystemMode::Halt => 4,
        }
    }

    pub fn is_degraded_family(&self) -> bool {
        matches!(
            self,
            SystemMode::Degraded | SystemMode::SafeMode | SystemMode::SafeModeDisconnected
        )
    }
}

/// What failed (or recovered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSource {
    Broker,
    MarketData,
    Database,
}

impl FailureSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureSource::Broker => "broker",
            FailureSource::MarketData => "market_data",
            FailureSource::Database => "database",
        }
    }

    /// The mode this source escalates to when its hysteresis window trips.
    fn target_mode(&self) -> SystemMode {
        match self {
            FailureSource::Broker => SystemMode::SafeModeDisconnected,
            FailureSource::MarketData => SystemMode::Degraded,
            FailureSource::Database => SystemMode::SafeMode,
        }
    }
}

/// Why a transition happened; recorded on every `mode_transitions` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "cause")]
pub enum TransitionCause {
    HealthEscalation { source: FailureSource },
    HealthRecovery,
    ForceOverride { operator_id: String, reason: String },
    OverrideExpired,
    BufferOverflow,
    IntegrityFailure { detail: String },
}

/// A recorded mode transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeTransition {
    pub from: SystemMode,
    pub to: SystemMode,
    pub at: DateTime<Utc>,
    pub cause: TransitionCause,
}

// ---------------------------------------------------------------------------
// Per-source hysteresis tracking
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct SourceHealth {
    cfg: HysteresisConfig,
    /// Failure timestamps within the sliding window.
    failures: VecDeque<DateTime<Utc>>,
    /// Start of the current unbroken success run.
    success_since: Option<DateTime<Utc>>,
    /// Whether this source currently holds the system in a degraded mode.
    tripped: bool,
}

impl SourceHealth {
    fn new(cfg: HysteresisConfig) -> Self {
        Self {
            cfg,
            failures: VecDeque::new(),
            success_since: None,
            tripped: false,
        }
    }

    /// Record a failure; returns true when the hysteresis threshold trips.
    fn record_failure(&mut self, now: DateTime<Utc>) -> bool {
        self.success_since = None;
        self.failures.push_back(now);
        let window = Duration::seconds(self.cfg.fail_threshold_seconds as i64);
        while let Some(front) = self.failures.front() {
            if now - *front > window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
        if self.failures.len() as u32 >= self.cfg.fail_threshold_count {
            self.tripped = true;
        }
        self.tripped
    }

    fn record_success(&mut self, now: DateTime<Utc>) {
        if self.success_since.is_none() {
            self.success_since = Some(now);
        }
    }

    /// True when the source has been continuously healthy long enough.
    fn is_stable(&self, now: DateTime<Utc>) -> bool {
        match self.success_since {
            Some(since) => {
                now - since >= Duration::seconds(self.cfg.recovery_stable_seconds as i64)
            }
            None => false,
        }
    }

    fn clear(&mut self) {
        self.failures.clear();
        self.tripped = false;
    }
}

// ---------------------------------------------------------------------------
// ModeMachine
// ---------------------------------------------------------------------------

/// The degradation FSM. Pure: feed it health events and ticks with explicit
/// timestamps; read transitions from the returned values.
#[derive(Debug, Clone)]
pub struct ModeMachine {
    cfg: DegradationConfig,
    mode: SystemMode,
    mode_since: DateTime<Utc>,
    broker: SourceHealth,
    market_data: SourceHealth,
    database: SourceHealth,
    force_override: Option<Override>,
    /// Mode to restore if a recovery attempt fails.
    degraded_from: Option<SystemMode>,
    /// Set when entering `recovering`; Normal requires a further stable
    /// window measured from this instant.
    recovering_since: Option<DateTime<Utc>>,
    transitions: Vec<ModeTransition>,
}

#[derive(Debug, Clone)]
struct Override {
    expires_at: DateTime<Utc>,
}

impl ModeMachine {
    pub fn new(cfg: DegradationConfig, now: DateTime<Utc>) -> Self {
        Self {
            broker: SourceHealth::new(cfg.broker.clone()),
            market_data: SourceHealth::new(cfg.market_data.clone()),
            database: SourceHealth::new(cfg.database.clone()),
            cfg,
            mode: SystemMode::Normal,
            mode_since: now,
            force_override: None,
            degraded_from: None,
            recovering_since: None,
            transitions: Vec::new(),
        }
    }

    pub fn mode(&self) -> SystemMode {
        self.mode
    }

    pub fn stage(&self) -> u8 {
        self.mode.stage()
    }

    pub fn is_force_override(&self) -> bool {
        self.force_override.is_some()
    }

    pub fn override_expires_at(&self) -> Option<DateTime<Utc>> {
        self.force_override.as_ref().map(|o| o.expires_at)
    }

    pub fn transitions(&self) -> &[ModeTransition] {
        &self.transitions
    }

    fn source(&mut self, source: FailureSource) -> &mut SourceHealth {
        match source {
            FailureSource::Broker => &mut self.broker,
            FailureSource::MarketData => &mut self.market_data,
            FailureSource::Database => &mut self.database,
        }
    }

    fn transition(
        &mut self,
        to: SystemMode,
        now: DateTime<Utc>,
        cause: TransitionCause,
    ) -> Option<ModeTransition> {
        if self.mode == to {
            return None;
        }
        let record = ModeTransition {
            from: self.mode,
            to,
            at: now,
            cause,
        };
        self.mode = to;
        self.mode_since = now;
        self.transitions.push(record.clone());
        Some(record)
    }

    /// Record a failure observation for a source. Returns the transition it
    /// caused, if any.
    pub fn record_failure(
        &mut self,
        source: FailureSource,
        now: DateTime<Utc>,
    ) -> Option<ModeTransition> {
        let tripped = self.source(source).record_failure(now);

        if self.force_override.is_some() {
            return None; // pinned; health recorded but not acted upon
        }
        if self.mode == SystemMode::Halt {
            return None; // halt only leaves via operator action
        }
        if !tripped {
            return None;
        }

        let target = source.target_mode();
        // Failures during a recovery attempt fall back to the degraded mode.
        if self.mode == SystemMode::Recovering {
            self.recovering_since = None;
            let back = self.degraded_from.unwrap_or(target);
            return self.transition(back, now, TransitionCause::HealthEscalation { source });
        }
        // Only escalate: a deeper stage never demotes to a shallower one.
        if target.stage() > self.mode.stage() {
            self.degraded_from = Some(target);
            return self.transition(target, now, TransitionCause::HealthEscalation { source });
        }
        None
    }

    /// Record a success observation. Returns the transition it caused, if any.
    pub fn record_success(
        &mut self,
        source: FailureSource,
        now: DateTime<Utc>,
    ) -> Option<ModeTransition> {
        self.source(source).record_success(now);

        if self.force_override.is_some() || self.mode == SystemMode::Halt {
            return None;
        }

        match self.mode {
            m if m.is_degraded_family() => {
                // Anti-flap: honor minimum dwell time first.
                if now - self.mode_since
                    < Duration::seconds(self.cfg.min_safe_mode_seconds as i64)
                {
                    return None;
                }
                if self.tripped_sources_stable(now) {
                    self.broker.clear();
                    self.market_data.clear();
                    self.database.clear();
                    self.recovering_since = Some(now);
                    self.transition(SystemMode::Recovering, now, TransitionCause::HealthRecovery)
                } else {
                    None
                }
            }
            SystemMode::Recovering => {
                let stable_window = Duration::seconds(self.cfg.recovery_window_secs() as i64);
                match self.recovering_since {
                    Some(since) if now - since >= stable_window => {
                        self.degraded_from = None;
                        self.recovering_since = None;
                        self.transition(SystemMode::Normal, now, TransitionCause::HealthRecovery)
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn tripped_sources_stable(&self, now: DateTime<Utc>) -> bool {
        [&self.broker, &self.market_data, &self.database]
            .iter()
            .filter(|s| s.tripped)
            .all(|s| s.is_stable(now))
    }

    /// Operator force-override: pin `mode` until `now + ttl`.
    pub fn force_override(
        &mut self,
        mode: SystemMode,
        ttl: Duration,
        operator_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Option<ModeTransition> {
        self.force_override = Some(Override {
            expires_at: now + ttl,
        });
        self.transition(
            mode,
            now,
            TransitionCause::ForceOverride {
                operator_id: operator_id.to_string(),
                reason: reason.to_string(),
            },
        )
    }

    /// Request a halt (WAL overflow, integrity failure). Overrides do not
    /// shield against halt requests.
    pub fn request_halt(
        &mut self,
        cause: TransitionCause,
        now: DateTime<Utc>,
    ) -> Option<ModeTransition> {
        self.force_override = None;
        self.transition(SystemMode::Halt, now, cause)
    }

    /// Periodic tick: expires force-overrides. Returns the transition the
    /// expiry caused, if any.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<ModeTransition> {
        let expired = matches!(&self.force_override, Some(o) if now >= o.expires_at);
        if !expired {
            return None;
        }
        self.force_override = None;

        let resumed = if self.cfg.unknown_on_ttl_expiry {
            // Health is unproven after a pin; demote to recovering until the
            // sources demonstrate stability again.
            SystemMode::Recovering
        } else {
            self.health_driven_mode()
        };
        self.transition(resumed, now, TransitionCause::OverrideExpired)
    }

    /// The mode health data alone would put the system in.
    fn health_driven_mode(&self) -> SystemMode {
        let mut mode = SystemMode::Normal;
        for (health, source) in [
            (&self.broker, FailureSource::Broker),
            (&self.market_data, FailureSource::MarketData),
            (&self.database, FailureSource::Database),
        ] {
            if health.tripped {
                let target = source.target_mode();
                if target.stage() > mode.stage() {
                    mode = target;
                }
            }
        }
        mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 9, 30, 0).unwrap()
    }

    fn machine() -> ModeMachine {
        ModeMachine::new(DegradationConfig::default(), t0())
    }

    #[test]
    fn single_failure_does_not_escalate() {
        let mut m = machine();
        assert!(m.record_failure(FailureSource::Broker, t0()).is_none());
        assert_eq!(m.mode(), SystemMode::Normal);
    }

    #[test]
    fn threshold_failures_within_window_escalate() {
        let mut m = machine();
        m.record_failure(FailureSource::Broker, t0());
        m.record_failure(FailureSource::Broker, t0() + Duration::seconds(10));
        let tr = m
            .record_failure(FailureSource::Broker, t0() + Duration::seconds(20))
            .expect("third failure within 60s must escalate");
        assert_eq!(tr.to, SystemMode::SafeModeDisconnected);
        assert_eq!(m.stage(), 3);
    }

    #[test]
    fn failures_outside_window_do_not_accumulate() {
        let mut m = machine();
        m.record_failure(FailureSource::Broker, t0());
        m.record_failure(FailureSource::Broker, t0() + Duration::seconds(70));
        // Only two failures remain in any 60s window.
        assert!(m
            .record_failure(FailureSource::Broker, t0() + Duration::seconds(140))
            .is_none());
        assert_eq!(m.mode(), SystemMode::Normal);
    }

    #[test]
    fn recovery_requires_dwell_and_stability() {
        let mut m = machine();
        for i in 0..3 {
            m.record_failure(FailureSource::Database, t0() + Duration::seconds(i));
        }
        assert_eq!(m.mode(), SystemMode::SafeMode);

        // Stable success but before min dwell: no transition.
        let early = t0() + Duration::seconds(200);
        m.record_success(FailureSource::Database, early);
        assert!(m
            .record_success(FailureSource::Database, early + Duration::seconds(50))
            .is_none());
        assert_eq!(m.mode(), SystemMode::SafeMode);

        // After dwell (300s) + stable window (120s since the success at
        // t0+200): the next success starts recovery.
        let later = t0() + Duration::seconds(400);
        let tr = m
            .record_success(FailureSource::Database, later)
            .expect("stable success after dwell must start recovery");
        assert_eq!(tr.to, SystemMode::Recovering);

        // Normal requires a further stable window measured from entering
        // recovering.
        assert!(m
            .record_success(FailureSource::Database, later + Duration::seconds(60))
            .is_none());
        let done = m
            .record_success(FailureSource::Database, later + Duration::seconds(121))
            .expect("continued stability completes recovery");
        assert_eq!(done.to, SystemMode::Normal);
    }

    #[test]
    fn failure_during_recovery_falls_back() {
        let mut m = machine();
        for i in 0..3 {
            m.record_failure(FailureSource::Database, t0() + Duration::seconds(i));
        }
        m.record_success(FailureSource::Database, t0() + Duration::seconds(200));
        m.record_success(FailureSource::Database, t0() + Duration::seconds(400));
        assert_eq!(m.mode(), SystemMode::Recovering);

        for i in 0..3 {
            m.record_failure(
                FailureSource::Database,
                t0() + Duration::seconds(401 + i),
            );
        }
        assert_eq!(m.mode(), SystemMode::SafeMode);
    }

    #[test]
    fn deeper_stage_is_never_demoted_by_shallower_source() {
        let mut m = machine();
        for i in 0..3 {
            m.record_failure(FailureSource::Broker, t0() + Duration::seconds(i));
        }
        assert_eq!(m.mode(), SystemMode::SafeModeDisconnected);

        for i in 0..3 {
            m.record_failure(FailureSource::MarketData, t0() + Duration::seconds(10 + i));
        }
        assert_eq!(m.mode(), SystemMode::SafeModeDisconnected, "degraded < disconnected");
    }

    #[test]
    fn force_override_pins_until_ttl() {
        let mut m = machine();
        m.force_override(
            SystemMode::SafeMode,
            Duration::seconds(600),
            "op-1",
            "broker maintenance",
            t0(),
        );
        assert!(m.is_force_override());
        assert_eq!(m.mode(), SystemMode::SafeMode);

        // Health failures do not transition while pinned.
        for i in 0..5 {
            m.record_failure(FailureSource::Broker, t0() + Duration::seconds(i));
        }
        assert_eq!(m.mode(), SystemMode::SafeMode);

        // Before TTL: tick is a no-op.
        assert!(m.tick(t0() + Duration::seconds(599)).is_none());
        assert!(m.is_force_override());

        // After TTL: health-driven control resumes — broker tripped while
        // pinned, so the machine lands in safe_mode_disconnected.
        let tr = m.tick(t0() + Duration::seconds(601)).unwrap();
        assert_eq!(tr.cause, TransitionCause::OverrideExpired);
        assert_eq!(m.mode(), SystemMode::SafeModeDisconnected);
        assert!(!m.is_force_override());
    }

    #[test]
    fn unknown_on_ttl_expiry_demotes_to_recovering() {
        let cfg = DegradationConfig {
            unknown_on_ttl_expiry: true,
            ..DegradationConfig::default()
        };
        let mut m = ModeMachine::new(cfg, t0());
        m.force_override(
            SystemMode::Normal,
            Duration::seconds(60),
            "op-1",
            "test",
            t0(),
        );
        // force_override to the current mode records no transition but pins.
        assert!(m.is_force_override());
        let tr = m.tick(t0() + Duration::seconds(61)).unwrap();
        assert_eq!(tr.to, SystemMode::Recovering);
    }

    #[test]
    fn halt_request_is_not_shielded_by_override() {
        let mut m = machine();
        m.force_override(
            SystemMode::Normal,
            Duration::seconds(600),
            "op-1",
            "pin",
            t0(),
        );
        let tr = m
            .request_halt(TransitionCause::BufferOverflow, t0() + Duration::seconds(1))
            .unwrap();
        assert_eq!(tr.to, SystemMode::Halt);
        assert!(!m.is_force_override());

        // Halt only leaves via operator action; health cannot escape it.
        for i in 0..10 {
            m.record_success(FailureSource::Broker, t0() + Duration::seconds(1000 + i));
        }
        assert_eq!(m.mode(), SystemMode::Halt);
    }

    #[test]
    fn transitions_are_recorded_in_order() {
        let mut m = machine();
        for i in 0..3 {
            m.record_failure(FailureSource::MarketData, t0() + Duration::seconds(i));
        }
        m.request_halt(
            TransitionCause::IntegrityFailure {
                detail: "checksum mismatch".into(),
            },
            t0() + Duration::seconds(10),
        );
        let modes: Vec<SystemMode> = m.transitions().iter().map(|t| t.to).collect();
        assert_eq!(modes, vec![SystemMode::Degraded, SystemMode::Halt]);
    }
}
