use std::sync::atomic::{AtomicU32, Ordering};

use hubwire_frame::message::{self, alert, port_info};
use hubwire_frame::Frame;

/// Ports tracked by the awaited set. Ids beyond this never carry a bit.
pub const MAX_TRACKED_PORTS: usize = 256;

const WORD_BITS: usize = 32;
const PORT_WORDS: usize = MAX_TRACKED_PORTS / WORD_BITS;

/// Which ports and alerts a synchronous caller is blocked on.
///
/// The transmitter sets a bit when it sends a request whose reply looks like
/// unsolicited traffic; the receiver takes the bit when that reply arrives.
/// Each bit changes with a single atomic read-modify-write, so threads working
/// on different indices never disturb each other.
#[derive(Debug, Default)]
pub struct AwaitedResponses {
    ports: [AtomicU32; PORT_WORDS],
    alerts: AtomicU32,
}

fn port_slot(port: u8) -> (usize, u32) {
    let index = port as usize;
    (index / WORD_BITS, 1 << (index % WORD_BITS))
}

fn alert_bit(alert_id: u8) -> Option<u32> {
    (alert_id < WORD_BITS as u8).then(|| 1 << alert_id)
}

impl AwaitedResponses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_port(&self, port: u8) {
        let (word, bit) = port_slot(port);
        self.ports[word].fetch_or(bit, Ordering::AcqRel);
    }

    /// Clear the bit for `port`. Returns whether it was set.
    pub fn take_port(&self, port: u8) -> bool {
        let (word, bit) = port_slot(port);
        self.ports[word].fetch_and(!bit, Ordering::AcqRel) & bit != 0
    }

    pub fn is_port_set(&self, port: u8) -> bool {
        let (word, bit) = port_slot(port);
        self.ports[word].load(Ordering::Acquire) & bit != 0
    }

    pub fn set_alert(&self, alert_id: u8) {
        if let Some(bit) = alert_bit(alert_id) {
            self.alerts.fetch_or(bit, Ordering::AcqRel);
        }
    }

    /// Clear the bit for `alert_id`. Returns whether it was set.
    pub fn take_alert(&self, alert_id: u8) -> bool {
        match alert_bit(alert_id) {
            Some(bit) => self.alerts.fetch_and(!bit, Ordering::AcqRel) & bit != 0,
            None => false,
        }
    }

    pub fn is_alert_set(&self, alert_id: u8) -> bool {
        alert_bit(alert_id).is_some_and(|bit| self.alerts.load(Ordering::Acquire) & bit != 0)
    }

    /// Inspect a frame about to be written and mark what its reply will look like.
    ///
    /// Only short frames are inspected; neither request ever needs the long form.
    pub fn note_outbound(&self, frame: &Frame) {
        if !frame.is_short() {
            return;
        }
        let payload = frame.payload();
        match (frame.message_type(), payload) {
            (message::PORT_INFO_REQUEST, [port, port_info::VALUE, ..]) => self.set_port(*port),
            (message::HUB_ALERT, [alert_id, alert::OP_REQUEST, ..]) => self.set_alert(*alert_id),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use hubwire_frame::request;

    use super::*;

    #[test]
    fn port_bits_are_independent() {
        let awaited = AwaitedResponses::new();
        awaited.set_port(2);
        awaited.set_port(5);
        assert!(awaited.take_port(5));
        assert!(awaited.is_port_set(2));
        assert!(!awaited.is_port_set(5));
    }

    #[test]
    fn take_reports_previous_state() {
        let awaited = AwaitedResponses::new();
        assert!(!awaited.take_port(1));
        awaited.set_port(1);
        assert!(awaited.take_port(1));
        assert!(!awaited.take_port(1));
    }

    #[test]
    fn concurrent_updates_on_different_ports() {
        let awaited = Arc::new(AwaitedResponses::new());
        awaited.set_port(2);

        let toggler = {
            let awaited = Arc::clone(&awaited);
            thread::spawn(move || {
                for _ in 0..10_000 {
                    awaited.set_port(5);
                    awaited.take_port(5);
                }
            })
        };
        for _ in 0..10_000 {
            assert!(awaited.is_port_set(2));
        }
        toggler.join().unwrap();
        assert!(awaited.is_port_set(2));
    }

    #[test]
    fn high_port_ids_use_their_own_word() {
        let awaited = AwaitedResponses::new();
        awaited.set_port(0x64);
        assert!(!awaited.is_port_set(0x04));
        assert!(awaited.take_port(0x64));
    }

    #[test]
    fn outbound_value_request_sets_port_bit() {
        let awaited = AwaitedResponses::new();
        awaited.note_outbound(&request::port_value(3));
        assert!(awaited.is_port_set(3));

        awaited.note_outbound(&request::port_info(1, port_info::MODE));
        assert!(!awaited.is_port_set(1));
    }

    #[test]
    fn outbound_alert_request_sets_alert_bit() {
        let awaited = AwaitedResponses::new();
        awaited.note_outbound(&request::alert_request(alert::LOW_VOLTAGE));
        assert!(awaited.is_alert_set(alert::LOW_VOLTAGE));

        awaited.note_outbound(&request::hub_alert(alert::HIGH_CURRENT, alert::OP_ENABLE));
        assert!(!awaited.is_alert_set(alert::HIGH_CURRENT));
        assert!(awaited.take_alert(alert::LOW_VOLTAGE));
    }
}
