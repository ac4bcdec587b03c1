//! Injected audit sink capability.
//!
//! Components that produce a user-visible audit trail (the enrollment
//! engine, the credential gatherer) take a sink explicitly instead of
//! reaching for ambient state. Rendering and persistence of the trail is
//! the embedding agent's concern.

/// Destination for user-visible audit lines.
pub trait AuditSink: Send + Sync {
    /// Append an informational line to the current section.
    fn append_info(&self, text: &str);

    /// Append an error line to the current section.
    fn append_error(&self, text: &str);

    /// Start a new titled section of the audit trail.
    fn create_section(&self, title: &str);
}

/// Audit sink that forwards lines to the `tracing` subscriber.
///
/// The default sink for processes without an attached audit service.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn append_info(&self, text: &str) {
        tracing::info!(target: "audit", "{text}");
    }

    fn append_error(&self, text: &str) {
        tracing::error!(target: "audit", "{text}");
    }

    fn create_section(&self, title: &str) {
        tracing::info!(target: "audit", section = %title, "audit section");
    }
}
