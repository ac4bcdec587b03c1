//! Concurrent credential gatherer.
//!
//! A work bundle may reference credentials held by an external vault in
//! place of literal parameter values. Before the bundle can run, every
//! reference is resolved over the local command channel, one request per
//! credential, all in flight at once. Resolved values are held aside and
//! materialized into the executables' live parameter maps only when every
//! reference has resolved; the first failure settles the run and no
//! partial writes ever reach the bundle.

use std::collections::BTreeMap;

use futures::stream::{FuturesUnordered, StreamExt};

use fleetlink_core::{
    AuditSink, CredentialValue, ExternalParameterLocation, WorkBundle,
};
use fleetlink_transport::{CommandChannel, CommandResult, TransportError};

/// Operation path for vault lookups on the command channel.
const VAULT_GET: &str = "/vault/get";

/// Identifies one external reference: executable index and parameter name.
type SlotKey = (usize, String);

/// Resolution state of one external reference.
#[derive(Debug, Clone)]
enum Slot {
    Pending(ExternalParameterLocation),
    Resolved(CredentialValue),
}

/// Slot map tracking the resolution of every external reference.
///
/// `remaining` is recomputed by a full scan on every query, which makes
/// duplicate and out-of-order responses harmless.
#[derive(Debug, Default)]
struct GatherState {
    slots: BTreeMap<SlotKey, Slot>,
}

impl GatherState {
    fn from_bundle(bundle: &WorkBundle) -> Self {
        let mut slots = BTreeMap::new();
        for (index, exe) in bundle.executables.iter().enumerate() {
            for (name, location) in exe.external_refs() {
                slots.insert((index, name.clone()), Slot::Pending(location.clone()));
            }
        }
        Self { slots }
    }

    /// Pending references, in slot order.
    fn pending(&self) -> impl Iterator<Item = (&SlotKey, &ExternalParameterLocation)> {
        self.slots.iter().filter_map(|(key, slot)| match slot {
            Slot::Pending(location) => Some((key, location)),
            Slot::Resolved(_) => None,
        })
    }

    /// Number of references still unresolved, by full scan.
    fn remaining(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Pending(_)))
            .count()
    }

    fn converged(&self) -> bool {
        self.remaining() == 0
    }

    fn resolve(&mut self, key: &SlotKey, value: CredentialValue) {
        if let Some(slot) = self.slots.get_mut(key) {
            *slot = Slot::Resolved(value);
        }
    }
}

/// The gatherer's terminal failure.
///
/// `title` names the failure class for the audit trail; `message` carries
/// the detail. The first failure wins; later ones are dropped.
#[derive(Debug, thiserror::Error)]
#[error("{title}: {message}")]
pub struct GatherFailure {
    /// Short failure class, e.g. "Failed to retrieve credential".
    pub title: String,
    /// Detail line for the audit trail.
    pub message: String,
    /// Underlying transport or decode error, when one exists.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl GatherFailure {
    fn new(
        title: &str,
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            title: title.to_string(),
            message,
            source,
        }
    }
}

/// Outcome latch: settles at most once, first outcome wins.
#[derive(Debug, Default)]
struct Settle {
    outcome: Option<Result<(), GatherFailure>>,
}

impl Settle {
    fn is_settled(&self) -> bool {
        self.outcome.is_some()
    }

    fn succeed(&mut self) {
        if self.outcome.is_none() {
            self.outcome = Some(Ok(()));
        }
    }

    fn fail(&mut self, failure: GatherFailure) {
        if self.outcome.is_none() {
            self.outcome = Some(Err(failure));
        }
    }
}

/// Resolves a bundle's external credential references concurrently.
pub struct CredentialGatherer<'a> {
    channel: &'a dyn CommandChannel,
    audit: &'a dyn AuditSink,
    state: GatherState,
    settle: Settle,
}

impl<'a> CredentialGatherer<'a> {
    /// Gatherer for `bundle`'s external references.
    pub fn new(
        bundle: &WorkBundle,
        channel: &'a dyn CommandChannel,
        audit: &'a dyn AuditSink,
    ) -> Self {
        Self {
            channel,
            audit,
            state: GatherState::from_bundle(bundle),
            settle: Settle::default(),
        }
    }

    /// Resolve every reference and materialize the values into `bundle`.
    ///
    /// With no references this succeeds immediately without touching the
    /// command channel. Otherwise one vault request per reference goes
    /// out, all concurrently, each on a fresh connection.
    ///
    /// # Errors
    ///
    /// The first failure of any kind (transport, remote, unconsumable
    /// value) settles the run; `bundle` is left untouched.
    pub async fn run(mut self, bundle: &mut WorkBundle) -> Result<(), GatherFailure> {
        if self.state.converged() {
            self.audit.append_info("No credentials to retrieve.");
            return Ok(());
        }

        self.audit.create_section("Retrieving credentials");

        let channel = self.channel;
        let mut inflight: FuturesUnordered<_> = self
            .state
            .pending()
            .map(|(key, location)| {
                let key = key.clone();
                let payload = serde_json::json!({
                    "access_token": location.access_token,
                    "namespace": location.namespace,
                    "credential_ids": [location.credential_id],
                });
                async move {
                    let result = channel.send_idempotent_request(VAULT_GET, payload).await;
                    (key, result)
                }
            })
            .collect();

        while let Some((key, result)) = inflight.next().await {
            self.handle_response(bundle, &key, result);
            if self.settle.is_settled() {
                break;
            }
        }
        drop(inflight);

        self.settle.outcome.unwrap_or_else(|| {
            // Unreachable: the last response either settles success at
            // convergence or settles a failure.
            Err(GatherFailure::new(
                "Failed to retrieve credential",
                "gatherer finished without settling".to_string(),
                None,
            ))
        })
    }

    /// Fold one vault response into the state.
    ///
    /// Idempotent after settlement: a late success may still update its
    /// slot, but nothing re-materializes and the outcome never changes.
    fn handle_response(
        &mut self,
        bundle: &mut WorkBundle,
        key: &SlotKey,
        result: Result<serde_json::Value, TransportError>,
    ) {
        let param = key.1.as_str();
        let exe = bundle
            .executables
            .get(key.0)
            .map(|e| e.name().to_string())
            .unwrap_or_default();

        let payload = match result {
            Ok(payload) => payload,
            Err(e) => {
                self.fail(
                    "Failed to retrieve credential",
                    format!("could not reach the vault for '{param}' of '{exe}'"),
                    Some(Box::new(e)),
                );
                return;
            }
        };

        match serde_json::from_value::<CommandResult>(payload) {
            Ok(CommandResult::Success { content }) => {
                // The vault answers with a list of credentials, one per
                // requested id; a single-id request yields at most one.
                match serde_json::from_value::<Vec<CredentialValue>>(content) {
                    Ok(values) => match values.into_iter().next() {
                        Some(value) if value.is_consumable() => {
                            self.state.resolve(key, value);
                            let remaining = self.state.remaining();
                            self.audit.append_info(&format!(
                                "Got '{param}' of '{exe}'; {remaining} remain."
                            ));
                            if self.state.converged() {
                                self.finish(bundle);
                            }
                        }
                        Some(value) => {
                            let mime = value.envelope_mime_type.unwrap_or_default();
                            self.fail(
                                "Cannot process credential",
                                format!(
                                    "'{param}' of '{exe}' arrived with unsupported envelope type '{mime}'; an agent upgrade is required"
                                ),
                                None,
                            );
                        }
                        None => {
                            self.fail(
                                "Failed to retrieve credential",
                                format!("vault returned no credential for '{param}' of '{exe}'"),
                                None,
                            );
                        }
                    },
                    Err(e) => {
                        self.fail(
                            "Failed to retrieve credential",
                            format!("malformed vault response for '{param}' of '{exe}'"),
                            Some(Box::new(e)),
                        );
                    }
                }
            }
            Ok(CommandResult::Error { content }) => {
                self.fail(
                    "Failed to retrieve credential",
                    format!("vault rejected '{param}' of '{exe}': {content}"),
                    None,
                );
            }
            Err(e) => {
                self.fail(
                    "Failed to retrieve credential",
                    format!("unintelligible response for '{param}' of '{exe}'"),
                    Some(Box::new(e)),
                );
            }
        }
    }

    /// Materialize every resolved value into the bundle and settle
    /// success. Runs exactly once, at convergence.
    fn finish(&mut self, bundle: &mut WorkBundle) {
        if self.settle.is_settled() {
            return;
        }
        for ((index, name), slot) in &self.state.slots {
            if let (Slot::Resolved(value), Some(exe)) =
                (slot, bundle.executables.get_mut(*index))
            {
                exe.set_param(name, serde_json::Value::String(value.value.clone()));
            }
        }
        self.audit.append_info("All credentials retrieved.");
        self.settle.succeed();
    }

    fn fail(
        &mut self,
        title: &str,
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) {
        if self.settle.is_settled() {
            tracing::debug!("late gather failure after settlement: {title}: {message}");
            return;
        }
        self.audit.append_error(&format!("{title}: {message}"));
        self.settle.fail(GatherFailure::new(title, message, source));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fleetlink_core::Executable;
    use std::collections::BTreeMap as Map;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Command channel answering from a canned table, counting requests.
    struct MockChannel {
        responses: Mutex<Map<String, serde_json::Value>>,
        requests: AtomicUsize,
        payloads: Mutex<Vec<serde_json::Value>>,
    }

    impl MockChannel {
        fn new() -> Self {
            Self {
                responses: Mutex::new(Map::new()),
                requests: AtomicUsize::new(0),
                payloads: Mutex::new(Vec::new()),
            }
        }

        fn respond(&self, credential_id: &str, response: serde_json::Value) {
            self.responses
                .lock()
                .unwrap()
                .insert(credential_id.to_string(), response);
        }

        fn respond_value(&self, credential_id: &str, value: &str) {
            self.respond(
                credential_id,
                serde_json::json!({
                    "status": "success",
                    "content": [{ "value": value }],
                }),
            );
        }
    }

    #[async_trait]
    impl CommandChannel for MockChannel {
        async fn send_idempotent_request(
            &self,
            operation: &str,
            payload: serde_json::Value,
        ) -> Result<serde_json::Value, TransportError> {
            assert_eq!(operation, VAULT_GET);
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.payloads.lock().unwrap().push(payload.clone());

            let id = payload["credential_ids"][0]
                .as_str()
                .unwrap()
                .to_string();
            match self.responses.lock().unwrap().get(&id) {
                Some(response) => Ok(response.clone()),
                None => Err(TransportError::Closed),
            }
        }
    }

    fn location(id: &str) -> ExternalParameterLocation {
        ExternalParameterLocation {
            access_token: "tok".into(),
            namespace: "ns".into(),
            credential_id: id.into(),
        }
    }

    fn script(name: &str, refs: &[(&str, &str)]) -> Executable {
        Executable::Script {
            name: name.into(),
            parameters: Map::new(),
            external_parameters: refs
                .iter()
                .map(|(param, id)| (param.to_string(), location(id)))
                .collect(),
        }
    }

    #[tokio::test]
    async fn no_references_succeeds_without_requests() {
        let channel = MockChannel::new();
        let mut bundle = WorkBundle {
            executables: vec![script("plain", &[])],
        };

        let gatherer =
            CredentialGatherer::new(&bundle, &channel, &fleetlink_core::TracingAuditSink);
        gatherer.run(&mut bundle).await.unwrap();

        assert_eq!(channel.requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn resolves_and_materializes_all_references() {
        let channel = MockChannel::new();
        channel.respond_value("c1", "hunter2");
        channel.respond_value("c2", "swordfish");
        channel.respond_value("c3", "tiger");

        let mut bundle = WorkBundle {
            executables: vec![
                script("alpha", &[("DB_PASSWORD", "c1"), ("API_KEY", "c2")]),
                script("beta", &[("SSH_KEY", "c3")]),
            ],
        };

        let gatherer =
            CredentialGatherer::new(&bundle, &channel, &fleetlink_core::TracingAuditSink);
        gatherer.run(&mut bundle).await.unwrap();

        // Exactly one request per reference.
        assert_eq!(channel.requests.load(Ordering::SeqCst), 3);
        assert_eq!(
            bundle.executables[0].param("DB_PASSWORD"),
            Some(&serde_json::Value::String("hunter2".into()))
        );
        assert_eq!(
            bundle.executables[1].param("SSH_KEY"),
            Some(&serde_json::Value::String("tiger".into()))
        );

        // Request payload carries the reference's coordinates.
        let payloads = channel.payloads.lock().unwrap();
        assert!(payloads
            .iter()
            .any(|p| p["credential_ids"] == serde_json::json!(["c2"])
                && p["access_token"] == "tok"
                && p["namespace"] == "ns"));
    }

    #[tokio::test]
    async fn remote_error_fails_and_leaves_bundle_untouched() {
        let channel = MockChannel::new();
        channel.respond_value("c1", "hunter2");
        channel.respond(
            "c2",
            serde_json::json!({ "status": "error", "content": "not authorized" }),
        );

        let mut bundle = WorkBundle {
            executables: vec![script("alpha", &[("A", "c1"), ("B", "c2")])],
        };

        let gatherer =
            CredentialGatherer::new(&bundle, &channel, &fleetlink_core::TracingAuditSink);
        let err = gatherer.run(&mut bundle).await.unwrap_err();

        assert_eq!(err.title, "Failed to retrieve credential");
        assert!(err.message.contains("not authorized"));
        // Even the reference that resolved was not materialized.
        assert_eq!(bundle.executables[0].param("A"), None);
    }

    #[tokio::test]
    async fn single_credential_list_resolves() {
        let channel = MockChannel::new();
        channel.respond(
            "c1",
            serde_json::json!({ "status": "success", "content": [{ "value": "hunter2" }] }),
        );

        let mut bundle = WorkBundle {
            executables: vec![script("alpha", &[("A", "c1")])],
        };

        let gatherer =
            CredentialGatherer::new(&bundle, &channel, &fleetlink_core::TracingAuditSink);
        gatherer.run(&mut bundle).await.unwrap();

        assert_eq!(
            bundle.executables[0].param("A"),
            Some(&serde_json::Value::String("hunter2".into()))
        );
    }

    #[tokio::test]
    async fn empty_credential_list_is_a_failure() {
        let channel = MockChannel::new();
        channel.respond(
            "c1",
            serde_json::json!({ "status": "success", "content": [] }),
        );

        let mut bundle = WorkBundle {
            executables: vec![script("alpha", &[("A", "c1")])],
        };

        let gatherer =
            CredentialGatherer::new(&bundle, &channel, &fleetlink_core::TracingAuditSink);
        let err = gatherer.run(&mut bundle).await.unwrap_err();

        assert_eq!(err.title, "Failed to retrieve credential");
        assert!(err.message.contains("no credential"));
        assert_eq!(bundle.executables[0].param("A"), None);
    }

    #[tokio::test]
    async fn enveloped_value_is_a_hard_failure() {
        let channel = MockChannel::new();
        channel.respond(
            "c1",
            serde_json::json!({
                "status": "success",
                "content": [{
                    "value": "AAAA",
                    "envelope_mime_type": "application/x-sealed",
                }],
            }),
        );

        let mut bundle = WorkBundle {
            executables: vec![script("alpha", &[("A", "c1")])],
        };

        let gatherer =
            CredentialGatherer::new(&bundle, &channel, &fleetlink_core::TracingAuditSink);
        let err = gatherer.run(&mut bundle).await.unwrap_err();

        assert_eq!(err.title, "Cannot process credential");
        assert!(err.message.contains("application/x-sealed"));
    }

    #[tokio::test]
    async fn transport_failure_carries_the_source() {
        let channel = MockChannel::new();
        // No canned response: the mock returns a transport error.
        let mut bundle = WorkBundle {
            executables: vec![script("alpha", &[("A", "missing")])],
        };

        let gatherer =
            CredentialGatherer::new(&bundle, &channel, &fleetlink_core::TracingAuditSink);
        let err = gatherer.run(&mut bundle).await.unwrap_err();

        assert!(std::error::Error::source(&err).is_some());
    }

    #[tokio::test]
    async fn duplicate_responses_never_rematerialize_or_resettle() {
        let channel = MockChannel::new();
        channel.respond_value("c1", "first");

        let mut bundle = WorkBundle {
            executables: vec![script("alpha", &[("A", "c1")])],
        };

        let mut gatherer =
            CredentialGatherer::new(&bundle, &channel, &fleetlink_core::TracingAuditSink);
        let key = (0usize, "A".to_string());

        let ok = serde_json::json!({
            "status": "success",
            "content": [{ "value": "first" }],
        });
        gatherer.handle_response(&mut bundle, &key, Ok(ok));
        assert!(gatherer.settle.is_settled());
        assert_eq!(
            bundle.executables[0].param("A"),
            Some(&serde_json::Value::String("first".into()))
        );

        // A duplicate delivery with a different value updates the slot
        // but neither rewrites the bundle nor flips the outcome.
        let dup = serde_json::json!({
            "status": "success",
            "content": [{ "value": "second" }],
        });
        gatherer.handle_response(&mut bundle, &key, Ok(dup));
        assert_eq!(
            bundle.executables[0].param("A"),
            Some(&serde_json::Value::String("first".into()))
        );

        // A late failure cannot unsettle a success either.
        gatherer.handle_response(&mut bundle, &key, Err(TransportError::Closed));
        assert!(matches!(gatherer.settle.outcome, Some(Ok(()))));
    }
}
