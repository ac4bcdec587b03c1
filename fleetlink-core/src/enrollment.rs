//! Enrollment wire payloads and the persisted attempt record.

use serde::{Deserialize, Serialize};

/// Version of the enrollment protocol this agent speaks.
pub const PROTOCOL_VERSION: u32 = 1;

/// The request an unenrolled instance publishes to the fleet service.
///
/// The timestamp doubles as the replay nonce: the verifier binds it, and
/// the response must echo it back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentRequest {
    /// Protocol version of the requesting agent.
    pub protocol_version: u32,
    /// Predicted agent identity string (also the response queue name,
    /// recomputed by both sides, never transmitted as a queue name).
    pub agent_identity: String,
    /// Request creation time, epoch seconds. Nonce and replay check.
    pub timestamp: i64,
    /// Numeric token identifier assigned at launch.
    pub token_id: u64,
    /// HMAC verifier binding `token_id` and `timestamp` to the shared
    /// secret, which itself is never transmitted.
    pub verifier: String,
    /// Broker hosts the instance believes are reachable, so the fleet
    /// service can push configuration back without relying on NAT-visible
    /// source addresses.
    pub host: String,
    /// Broker ports corresponding to `host`.
    pub port: String,
}

/// The credentials the fleet service hands back on successful enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentResult {
    /// Certificate of the fleet mapper, used to verify its messages.
    pub mapper_cert: String,
    /// This instance's signed identity certificate.
    pub id_cert: String,
    /// This instance's private key.
    pub id_key: String,
    /// Echo of the request timestamp this result answers.
    pub timestamp: i64,
}

/// Persisted record of an enrollment run, written at most once.
///
/// The `started_at` of the very first attempt is authoritative across
/// process restarts; the shutdown policy computes its window from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentState {
    /// Agent root directory, if one was given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_dir: Option<String>,
    /// Broker URL the run was invoked with.
    pub url: String,
    /// Host override list, if one was given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Port override list, if one was given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// Token identifier.
    pub id: u64,
    /// Whether termination-on-failure was requested.
    pub or_die: bool,
    /// Retry budget in seconds.
    pub retry: u64,
    /// Epoch seconds at which the first attempt began.
    pub started_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrip() {
        let request = EnrollmentRequest {
            protocol_version: PROTOCOL_VERSION,
            agent_identity: "fl-instance-42-abc".into(),
            timestamp: 1_700_000_000,
            token_id: 42,
            verifier: "mac".into(),
            host: "broker1,broker2".into(),
            port: "5672".into(),
        };
        let json = serde_json::to_string(&request).unwrap();
        let parsed: EnrollmentRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn state_omits_absent_options() {
        let state = EnrollmentState {
            root_dir: None,
            url: "amqp://broker/fleet".into(),
            host: None,
            port: None,
            id: 42,
            or_die: false,
            retry: 3600,
            started_at: 1_700_000_000,
        };
        let json = serde_json::to_string(&state).unwrap();
        assert!(!json.contains("root_dir"));
        assert!(!json.contains("\"host\""));
        let parsed: EnrollmentState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }
}
