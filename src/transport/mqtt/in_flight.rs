//! Correlation between session publish tokens and MQTT packet ids
//!
//! rumqttc assigns packet ids inside its event loop, so the id of a publish is
//! only known when the loop reports `Outgoing::Publish(pkid)`. Requests leave
//! the loop in the order they were queued, which lets the tracker pair each
//! outgoing id with the oldest queued token.

use crate::transport::PublishToken;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Default)]
pub struct InFlightTracker {
    /// Queued hand-offs in request order; `None` marks a QoS 0 publish
    queued: VecDeque<Option<PublishToken>>,
    /// Written publishes waiting for PUBACK / PUBCOMP
    awaiting: HashMap<u16, PublishToken>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a hand-off that is about to enter the request queue
    pub fn expect_outgoing(&mut self, token: Option<PublishToken>) {
        self.queued.push_back(token);
    }

    /// Forget the most recent hand-off after the queue rejected it
    pub fn discard_last(&mut self) {
        self.queued.pop_back();
    }

    /// A publish was written with `pkid`; returns the token now awaiting an ack
    pub fn on_outgoing(&mut self, pkid: u16) -> Option<PublishToken> {
        // Retransmission after a reconnect reuses an id that is already tracked
        if pkid != 0 && self.awaiting.contains_key(&pkid) {
            return None;
        }

        let token = self.queued.pop_front().flatten()?;
        if pkid != 0 {
            self.awaiting.insert(pkid, token);
        }
        Some(token)
    }

    /// The broker acknowledged `pkid`
    pub fn acknowledge(&mut self, pkid: u16) -> Option<PublishToken> {
        self.awaiting.remove(&pkid)
    }

    /// Number of hand-offs not yet acknowledged
    pub fn outstanding(&self) -> usize {
        self.queued.iter().filter(|token| token.is_some()).count() + self.awaiting.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_pair_with_ids_in_queue_order() {
        let mut tracker = InFlightTracker::new();
        tracker.expect_outgoing(Some(10));
        tracker.expect_outgoing(None);
        tracker.expect_outgoing(Some(11));

        assert_eq!(tracker.on_outgoing(1), Some(10));
        assert_eq!(tracker.on_outgoing(0), None);
        assert_eq!(tracker.on_outgoing(2), Some(11));
        assert_eq!(tracker.outstanding(), 2);

        assert_eq!(tracker.acknowledge(2), Some(11));
        assert_eq!(tracker.acknowledge(1), Some(10));
        assert_eq!(tracker.acknowledge(1), None);
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn test_retransmission_does_not_consume_queue() {
        let mut tracker = InFlightTracker::new();
        tracker.expect_outgoing(Some(1));
        assert_eq!(tracker.on_outgoing(5), Some(1));

        tracker.expect_outgoing(Some(2));
        // Resent after reconnect
        assert_eq!(tracker.on_outgoing(5), None);
        assert_eq!(tracker.on_outgoing(6), Some(2));

        assert_eq!(tracker.acknowledge(5), Some(1));
        assert_eq!(tracker.acknowledge(6), Some(2));
    }

    #[test]
    fn test_discard_last_after_rejected_handoff() {
        let mut tracker = InFlightTracker::new();
        tracker.expect_outgoing(Some(1));
        tracker.expect_outgoing(Some(2));
        tracker.discard_last();

        assert_eq!(tracker.outstanding(), 1);
        assert_eq!(tracker.on_outgoing(3), Some(1));
        assert_eq!(tracker.on_outgoing(4), None);
    }
}
