//! Sequential probe orchestration for one destination.

use std::{fmt, net::Ipv4Addr, thread, time::Duration};

use anyhow::Result;
use common::Statistics;

use crate::{clock, packet::EchoRequest};

/// How a single probe resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbeOutcome {
    /// A matching echo reply arrived; round-trip time in seconds.
    Success { rtt: f64 },
    /// The receive budget ran out without a matching reply.
    Timeout,
}

/// The session's view of the wire. [`crate::transport::IcmpTransport`] is
/// the real thing; tests substitute a scripted one.
pub trait ProbeTransport {
    fn send(&mut self, packet: &[u8], dst_addr: Ipv4Addr) -> Result<()>;

    /// Waits up to `budget` for an echo reply carrying `identifier`.
    /// Only socket-level failures are errors; no reply is a `Timeout`.
    fn receive(
        &mut self,
        identifier: u16,
        budget: Duration,
    ) -> Result<ProbeOutcome>;
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Number of echo requests to send.
    pub count: u16,
    /// Receive budget per probe.
    pub timeout: Duration,
    /// Pause between probes, independent of the receive budget.
    pub interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            count: 4,
            timeout: Duration::from_secs(1),
            interval: Duration::from_secs(1),
        }
    }
}

/// Runs a fixed number of probes against one destination, strictly one
/// outstanding probe at a time, and folds the outcomes into statistics.
pub struct PingSession<T> {
    transport: T,
    dst_addr: Ipv4Addr,
    /// Fixed for the whole session and threaded through every reply match;
    /// deliberately an explicit field, never ambient process state.
    identifier: u16,
    config: SessionConfig,
    outcomes: Vec<ProbeOutcome>,
}

impl<T: ProbeTransport> PingSession<T> {
    pub fn new(
        transport: T,
        dst_addr: Ipv4Addr,
        identifier: u16,
        config: SessionConfig,
    ) -> Self {
        Self {
            transport,
            dst_addr,
            identifier,
            config,
            outcomes: Vec::new(),
        }
    }

    /// Runs every probe to completion. `observe` sees the sequence number
    /// and outcome of each probe as it resolves, before the inter-probe
    /// pause, so callers can report progress without the session knowing
    /// anything about formatting.
    pub fn run<F>(&mut self, mut observe: F) -> Result<SessionStats>
    where
        F: FnMut(u16, &ProbeOutcome),
    {
        for sequence in 1..=self.config.count {
            let request = EchoRequest::new(
                self.identifier,
                sequence,
                clock::monotonic_ns()?,
            );
            self.transport.send(&request.encode(), self.dst_addr)?;

            // each probe starts with a fresh, full budget
            let outcome =
                self.transport.receive(self.identifier, self.config.timeout)?;
            observe(sequence, &outcome);
            self.outcomes.push(outcome);

            if sequence < self.config.count {
                thread::sleep(self.config.interval);
            }
        }

        Ok(self.stats())
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats::from_outcomes(&self.outcomes)
    }
}

/// Aggregates folded out of the ordered outcome sequence at session end.
pub struct SessionStats {
    sent: usize,
    received: usize,
    rtt: Statistics,
}

impl SessionStats {
    pub fn from_outcomes(outcomes: &[ProbeOutcome]) -> Self {
        let mut rtt = Statistics::new();
        let mut received = 0;
        for outcome in outcomes {
            if let ProbeOutcome::Success { rtt: sample } = outcome {
                received += 1;
                rtt.update(*sample);
            }
        }

        Self {
            sent: outcomes.len(),
            received,
            rtt,
        }
    }

    pub fn sent(&self) -> usize {
        self.sent
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn loss_percent(&self) -> f64 {
        if self.sent == 0 {
            return 0.0;
        }
        (1.0 - self.received as f64 / self.sent as f64) * 100.0
    }

    /// RTT aggregates over the successful probes, or `None` when every
    /// probe timed out and there is nothing to divide by.
    pub fn rtt(&self) -> Option<&Statistics> {
        (self.rtt.samples() > 0).then_some(&self.rtt)
    }
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} packets transmitted, {} received, {:.0}% packet loss",
            self.sent(),
            self.received(),
            self.loss_percent()
        )?;
        match self.rtt() {
            Some(rtt) => write!(
                f,
                "\nrtt min/avg/max/mdev = {:.3}/{:.3}/{:.3}/{:.3} ms",
                rtt.min() * 1e3,
                rtt.mean() * 1e3,
                rtt.max() * 1e3,
                rtt.stddev() * 1e3
            ),
            None => write!(f, "\nno round-trip samples"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::packet::ECHO_PACKET_LEN;

    struct FakeTransport {
        replies: VecDeque<ProbeOutcome>,
        sent: Vec<Vec<u8>>,
        receive_idents: Vec<u16>,
    }

    impl ProbeTransport for FakeTransport {
        fn send(&mut self, packet: &[u8], _dst_addr: Ipv4Addr) -> Result<()> {
            self.sent.push(packet.to_vec());
            Ok(())
        }

        fn receive(
            &mut self,
            identifier: u16,
            _budget: Duration,
        ) -> Result<ProbeOutcome> {
            self.receive_idents.push(identifier);
            Ok(self.replies.pop_front().unwrap_or(ProbeOutcome::Timeout))
        }
    }

    fn session_with(replies: Vec<ProbeOutcome>) -> PingSession<FakeTransport> {
        let transport = FakeTransport {
            replies: replies.into(),
            sent: Vec::new(),
            receive_idents: Vec::new(),
        };
        PingSession::new(
            transport,
            Ipv4Addr::LOCALHOST,
            0x4d2,
            SessionConfig {
                count: 4,
                timeout: Duration::from_secs(1),
                interval: Duration::ZERO,
            },
        )
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn all_success_statistics() {
        let rtts = [0.010, 0.020, 0.015, 0.005];
        let mut session = session_with(
            rtts.iter().map(|&rtt| ProbeOutcome::Success { rtt }).collect(),
        );
        let stats = session.run(|_, _| {}).unwrap();

        assert_eq!(stats.sent(), 4);
        assert_eq!(stats.received(), 4);
        assert!(close(stats.loss_percent(), 0.0));
        let rtt = stats.rtt().unwrap();
        assert!(close(rtt.min(), 0.005));
        assert!(close(rtt.max(), 0.020));
        assert!(close(rtt.mean(), 0.0125));
    }

    #[test]
    fn all_timeouts_report_no_data() {
        let mut session = session_with(Vec::new());
        let stats = session.run(|_, _| {}).unwrap();

        assert_eq!(stats.sent(), 4);
        assert_eq!(stats.received(), 0);
        assert!(close(stats.loss_percent(), 100.0));
        assert!(stats.rtt().is_none());

        let rendered = format!("{stats}");
        assert!(rendered.contains("100% packet loss"));
        assert!(rendered.contains("no round-trip samples"));
    }

    #[test]
    fn partial_loss_statistics() {
        let mut session = session_with(vec![
            ProbeOutcome::Timeout,
            ProbeOutcome::Success { rtt: 0.02 },
            ProbeOutcome::Timeout,
            ProbeOutcome::Success { rtt: 0.04 },
        ]);
        let stats = session.run(|_, _| {}).unwrap();

        assert_eq!(stats.received(), 2);
        assert!(close(stats.loss_percent(), 50.0));
        assert!(close(stats.rtt().unwrap().mean(), 0.03));
    }

    #[test]
    fn identifier_and_sequence_threaded_through_probes() {
        let mut session = session_with(Vec::new());
        session.run(|_, _| {}).unwrap();

        assert_eq!(session.transport.sent.len(), 4);
        for (i, packet) in session.transport.sent.iter().enumerate() {
            assert_eq!(packet.len(), ECHO_PACKET_LEN);
            assert_eq!(&packet[4..6], &0x4d2u16.to_be_bytes());
            // sequence starts at 1 and increments per probe
            assert_eq!(&packet[6..8], &(i as u16 + 1).to_be_bytes());
        }
        assert_eq!(session.transport.receive_idents, vec![0x4d2; 4]);
    }

    #[test]
    fn observer_sees_every_outcome_in_order() {
        let mut session = session_with(vec![
            ProbeOutcome::Success { rtt: 0.01 },
            ProbeOutcome::Timeout,
        ]);
        let mut seen = Vec::new();
        session.run(|sequence, outcome| seen.push((sequence, *outcome))).unwrap();

        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0], (1, ProbeOutcome::Success { rtt: 0.01 }));
        assert_eq!(seen[1], (2, ProbeOutcome::Timeout));
        assert_eq!(seen[3], (4, ProbeOutcome::Timeout));
    }
}
