// Author: Quayside contributors
// License: MIT

//! The Wi-Fi connect-attempt state machine and failure classifier
//! (spec.md §4.4, §8 invariant 3, scenarios S1/S2).
//!
//! The classifier is kept as a pure function of an `Observation` record so
//! it can be driven by either backend (full-featured manager or wireless
//! driver daemon) and unit-tested without any D-Bus/netlink plumbing.

use std::time::Duration;

use crate::error::NetworkErrorCode;

pub const CONNECT_DEADLINE: Duration = Duration::from_secs(15);
pub const STABLE_CONFIRM: Duration = Duration::from_secs(3);
pub const DHCP_TIMEOUT_THRESHOLD: Duration = Duration::from_secs(12);
pub const BRIEF_CONNECT_MIN: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptPhase {
    Init,
    Dispatching,
    Authish,
    AssociatedConfiguring,
    ConnectedProvisional,
    ConnectedConfirmed,
    Failed,
}

/// Everything the classifier needs to know about one connect attempt at the
/// moment it is asked to terminate it. All durations are measured from
/// `start`.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub saw_authish: bool,
    pub saw_prompt_retry: bool,
    pub saw_ip_config: bool,
    /// Elapsed time from attempt start to `connectedAt`, if the device ever
    /// reported `connected` with the target SSID.
    pub connected_at: Option<Duration>,
    /// Elapsed time from attempt start to when the attempt is being
    /// terminated (disconnect, failure, or deadline).
    pub terminated_at: Duration,
    /// SSID appeared in a scan result within the last 30s.
    pub ssid_recently_scanned: bool,
}

/// A live connect attempt (spec.md §3 ConnectAttempt). Owned exclusively by
/// one watchdog task per spec.md §9 ("prefer sending observations onto a
/// per-attempt channel consumed by a single watchdog task that owns the
/// attempt value exclusively").
#[derive(Debug, Clone)]
pub struct ConnectAttempt {
    pub target_ssid: String,
    pub target_network_id: String,
    pub start: std::time::Instant,
    pub deadline: std::time::Instant,
    pub phase: AttemptPhase,
    pub observation: Observation,
    pub finalised: bool,
}

impl ConnectAttempt {
    pub fn start(target_ssid: String, target_network_id: String) -> Self {
        let now = std::time::Instant::now();
        Self {
            target_ssid,
            target_network_id,
            start: now,
            deadline: now + CONNECT_DEADLINE,
            phase: AttemptPhase::Dispatching,
            observation: Observation::default(),
            finalised: false,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Apply one OS-reported observation, per spec.md §4.4's transition
    /// table. Returns `Some(outcome)` when the attempt should finalise.
    pub fn on_authish(&mut self) {
        self.observation.saw_authish = true;
        if self.phase == AttemptPhase::Dispatching {
            self.phase = AttemptPhase::Authish;
        }
    }

    pub fn on_ip_config(&mut self) {
        self.observation.saw_ip_config = true;
        self.phase = AttemptPhase::AssociatedConfiguring;
    }

    pub fn on_connected(&mut self) {
        self.observation.connected_at = Some(self.elapsed());
        self.phase = AttemptPhase::ConnectedProvisional;
    }

    pub fn on_prompt_retry(&mut self) {
        self.observation.saw_prompt_retry = true;
    }

    /// True once the target has been connected and stable for
    /// `STABLE_CONFIRM` without a subsequent disconnect — the caller drives
    /// this by polling after arming a timer at `on_connected`.
    pub fn confirm_if_stable(&mut self) -> bool {
        if let Some(connected_at) = self.observation.connected_at {
            if self.elapsed() >= connected_at + STABLE_CONFIRM {
                self.phase = AttemptPhase::ConnectedConfirmed;
                self.finalised = true;
                return true;
            }
        }
        false
    }

    /// Terminate the attempt (disconnect, failure event, or 15s deadline)
    /// and classify the outcome. Idempotent bookkeeping: callers must check
    /// `finalised` before invoking a second time (spec.md §3 invariant: "an
    /// attempt is final exactly once").
    pub fn finalise(&mut self) -> NetworkErrorCode {
        self.observation.terminated_at = self.elapsed();
        self.finalised = true;
        self.phase = AttemptPhase::Failed;
        classify(&self.observation)
    }
}

/// Pure classifier (spec.md §4.4, §8 invariant 3: "the same observations
/// always yield the same classification").
pub fn classify(obs: &Observation) -> NetworkErrorCode {
    if obs.saw_prompt_retry {
        return NetworkErrorCode::BadCredentials;
    }

    if let Some(connected_at) = obs.connected_at {
        let duration = obs.terminated_at.saturating_sub(connected_at);
        if duration >= BRIEF_CONNECT_MIN && duration < STABLE_CONFIRM && !obs.saw_ip_config {
            return NetworkErrorCode::BadCredentials;
        }
    }

    let authish_or_connected = obs.saw_authish || obs.connected_at.is_some();
    if authish_or_connected
        && !obs.saw_ip_config
        && obs.terminated_at >= DHCP_TIMEOUT_THRESHOLD
    {
        return NetworkErrorCode::DhcpTimeout;
    }

    if !obs.saw_authish && obs.connected_at.is_none() && !obs.ssid_recently_scanned {
        return NetworkErrorCode::NoSuchSsid;
    }

    NetworkErrorCode::AssocTimeout
}

/// Overrides the generic classifier above when the full-featured backend
/// supplies an OS reason code (spec.md §4.4). `recent_same_ssid_failure` is
/// true if this SSID failed within the last 5s, which upgrades a generic
/// failure to bad-credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsReasonCode {
    WrongPassword,
    SupplicantTimeout,
    SupplicantFailed,
    NoSecrets,
    NoSsid,
    DhcpOrIpConfig,
    SupplicantDisconnect,
    CarrierLost,
    Other,
}

pub fn classify_with_os_reason(
    reason: OsReasonCode,
    recent_same_ssid_failure: bool,
) -> NetworkErrorCode {
    match reason {
        OsReasonCode::WrongPassword
        | OsReasonCode::SupplicantTimeout
        | OsReasonCode::SupplicantFailed
        | OsReasonCode::NoSecrets => NetworkErrorCode::BadCredentials,
        OsReasonCode::NoSsid => NetworkErrorCode::NoSuchSsid,
        OsReasonCode::DhcpOrIpConfig => NetworkErrorCode::DhcpTimeout,
        OsReasonCode::SupplicantDisconnect | OsReasonCode::CarrierLost => {
            NetworkErrorCode::AssocTimeout
        }
        OsReasonCode::Other if recent_same_ssid_failure => NetworkErrorCode::BadCredentials,
        OsReasonCode::Other => NetworkErrorCode::ConnectionFailed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // S1: bad password — associating then disconnected, saw_authish, no ip-config.
    #[test]
    fn s1_bad_password_classifies_as_bad_credentials() {
        let obs = Observation {
            saw_authish: true,
            saw_ip_config: false,
            terminated_at: Duration::from_secs(2),
            ssid_recently_scanned: true,
            ..Default::default()
        };
        assert_eq!(classify(&obs), NetworkErrorCode::AssocTimeout);
        // A brief connect without IP config is the documented bad-credentials case:
        let obs_brief = Observation {
            saw_authish: true,
            connected_at: Some(Duration::from_millis(600)),
            saw_ip_config: false,
            terminated_at: Duration::from_millis(900),
            ssid_recently_scanned: true,
            ..Default::default()
        };
        assert_eq!(classify(&obs_brief), NetworkErrorCode::BadCredentials);
    }

    #[test]
    fn prompt_retry_always_classifies_bad_credentials() {
        let obs = Observation {
            saw_prompt_retry: true,
            terminated_at: Duration::from_secs(1),
            ..Default::default()
        };
        assert_eq!(classify(&obs), NetworkErrorCode::BadCredentials);
    }

    // S2: hidden SSID, never scanned in the last 30s, 15s deadline elapses.
    #[test]
    fn s2_hidden_ssid_classifies_as_no_such_ssid() {
        let obs = Observation {
            saw_authish: false,
            connected_at: None,
            ssid_recently_scanned: false,
            terminated_at: CONNECT_DEADLINE,
            ..Default::default()
        };
        assert_eq!(classify(&obs), NetworkErrorCode::NoSuchSsid);
    }

    #[test]
    fn dhcp_timeout_after_twelve_seconds_without_ip_config() {
        let obs = Observation {
            saw_authish: true,
            saw_ip_config: false,
            terminated_at: Duration::from_secs(13),
            ssid_recently_scanned: true,
            ..Default::default()
        };
        assert_eq!(classify(&obs), NetworkErrorCode::DhcpTimeout);
    }

    #[test]
    fn classifier_is_pure() {
        let obs = Observation {
            saw_authish: true,
            terminated_at: Duration::from_secs(13),
            ..Default::default()
        };
        assert_eq!(classify(&obs), classify(&obs.clone()));
    }

    #[test]
    fn os_reason_upgrades_generic_failure_for_recent_repeat() {
        assert_eq!(
            classify_with_os_reason(OsReasonCode::Other, true),
            NetworkErrorCode::BadCredentials
        );
        assert_eq!(
            classify_with_os_reason(OsReasonCode::Other, false),
            NetworkErrorCode::ConnectionFailed
        );
    }

    #[test]
    fn confirm_if_stable_finalises_after_three_seconds() {
        let mut attempt = ConnectAttempt::start("Home".into(), "uuid-1".into());
        attempt.on_authish();
        attempt.on_ip_config();
        attempt.on_connected();
        assert!(!attempt.confirm_if_stable());
        // Simulate elapsed time by backdating start.
        attempt.start -= STABLE_CONFIRM + Duration::from_millis(10);
        assert!(attempt.confirm_if_stable());
        assert!(attempt.finalised);
    }
}
