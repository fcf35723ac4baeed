//! Structured diagnostics reporting.
//!
//! The core never formats human-readable trace strings itself; it hands
//! structured events to an injected [`DiagnosticsSink`] and lets the host
//! decide how to render or store them. The `log` facade is still used for
//! ordinary operational messages.

/// One structured diagnostics event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagEvent<'a> {
    /// Phase identifier, e.g. `"fw/transfer"` or `"scan/timeout-dump"`.
    pub phase: &'a str,
    /// Milliseconds elapsed since the enclosing operation started.
    pub elapsed_ms: u64,
    /// Raw register/status snapshot attached to the event, if any.
    pub snapshot: Option<&'a [u8]>,
}

/// Receiver for structured diagnostics events.
pub trait DiagnosticsSink {
    fn event(&mut self, event: &DiagEvent<'_>);
}

/// Sink that discards every event. Default when the host installs nothing.
#[derive(Debug, Default)]
pub struct NullSink;

impl DiagnosticsSink for NullSink {
    fn event(&mut self, _event: &DiagEvent<'_>) {}
}

/// Sink that retains events in memory, used by tests and interactive hosts.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Vec<(String, u64, Option<Vec<u8>>)>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded `(phase, elapsed_ms, snapshot)` tuples, in order.
    pub fn events(&self) -> &[(String, u64, Option<Vec<u8>>)] {
        &self.events
    }

    /// Number of recorded events whose phase matches `phase`.
    pub fn count_phase(&self, phase: &str) -> usize {
        self.events.iter().filter(|(p, _, _)| p == phase).count()
    }
}

impl DiagnosticsSink for CollectingSink {
    fn event(&mut self, event: &DiagEvent<'_>) {
        self.events.push((
            event.phase.to_string(),
            event.elapsed_ms,
            event.snapshot.map(<[u8]>::to_vec),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_sink_records_in_order() {
        let mut sink = CollectingSink::new();
        sink.event(&DiagEvent {
            phase: "fw/part-info",
            elapsed_ms: 3,
            snapshot: None,
        });
        sink.event(&DiagEvent {
            phase: "fw/transfer",
            elapsed_ms: 20,
            snapshot: Some(&[0xAA, 0x55]),
        });

        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.count_phase("fw/transfer"), 1);
        assert_eq!(sink.events()[1].2.as_deref(), Some(&[0xAA, 0x55][..]));
    }
}
