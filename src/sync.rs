use crate::can::Transmit;
use crate::constant::{COB_FUNC_SYNC, COB_ID_MASK, COB_ID_PRODUCER, REG_SYNC_COB_ID, REG_SYNC_OVERFLOW,
                      REG_SYNC_PERIOD, REG_SYNC_WINDOW};
use crate::emergency::{Emergency, EmergencyErrorCode, ErrorStatus};
use crate::object_directory::{fetch_u32, fetch_u8, OdAccess};
use crate::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    None,
    /// A SYNC was received or produced during this call.
    RxTx,
    /// The synchronous window length (0x1007) elapsed since the last SYNC.
    PassedWindow,
}

/// SYNC producer and consumer.
#[derive(Debug)]
pub struct Sync {
    cob_id: u16,
    producer: bool,
    period_us: u32,
    window_us: u32,
    overflow: u8,
    counter: u8,
    timer_us: u32,
    received: bool,
    window_passed: bool,
    timeout_reported: bool,
    length_error: Option<usize>,
}

impl Default for Sync {
    fn default() -> Self {
        Self::new()
    }
}

impl Sync {
    pub fn new() -> Self {
        Sync {
            cob_id: COB_FUNC_SYNC,
            producer: false,
            period_us: 0,
            window_us: 0,
            overflow: 0,
            counter: 0,
            timer_us: 0,
            received: false,
            window_passed: false,
            timeout_reported: false,
            length_error: None,
        }
    }

    /// Reads 0x1005, 0x1006, 0x1007 and 0x1019.
    pub fn configure(&mut self, od: &dyn OdAccess) {
        let cob = fetch_u32(od, REG_SYNC_COB_ID, 0).unwrap_or(COB_FUNC_SYNC as u32);
        self.cob_id = (cob & COB_ID_MASK) as u16;
        self.producer = cob & COB_ID_PRODUCER != 0;
        self.period_us = fetch_u32(od, REG_SYNC_PERIOD, 0).unwrap_or(0);
        self.window_us = fetch_u32(od, REG_SYNC_WINDOW, 0).unwrap_or(0);
        self.overflow = match fetch_u8(od, REG_SYNC_OVERFLOW, 0).unwrap_or(0) {
            0 => 0,
            // 1 and values above 240 are reserved.
            v @ 2..=240 => v,
            v => {
                warn!("Invalid SYNC counter overflow {}, counter disabled", v);
                0
            }
        };
        self.reset_state();
    }

    fn reset_state(&mut self) {
        self.counter = 0;
        self.timer_us = 0;
        self.received = false;
        self.window_passed = false;
        self.length_error = None;
    }

    pub fn cob_id(&self) -> u16 {
        self.cob_id
    }

    pub fn is_producer(&self) -> bool {
        self.producer
    }

    pub fn period_us(&self) -> u32 {
        self.period_us
    }

    /// Counter of the last SYNC, 0 when the counter is disabled.
    pub fn counter(&self) -> u8 {
        self.counter
    }

    /// Time since the last SYNC.
    pub fn timer_us(&self) -> u32 {
        self.timer_us
    }

    pub fn is_inside_window(&self) -> bool {
        self.window_us == 0 || self.timer_us <= self.window_us
    }

    /// Consumer side. Returns `true` when the frame is a valid SYNC.
    pub fn on_frame(&mut self, data: &[u8]) -> bool {
        let expected = if self.overflow > 0 { 1 } else { 0 };
        if data.len() != expected {
            self.length_error = Some(data.len());
            return false;
        }
        if self.overflow > 0 {
            self.counter = data[0];
        }
        self.timer_us = 0;
        self.received = true;
        true
    }

    fn next_counter(&self) -> u8 {
        if self.overflow == 0 {
            0
        } else if self.counter >= self.overflow {
            1
        } else {
            self.counter + 1
        }
    }

    pub fn process(
        &mut self,
        nmt_pre_or_operational: bool,
        elapsed_us: u32,
        em: &mut Emergency,
        tx: &mut dyn Transmit,
        timer_next_us: &mut u32,
    ) -> SyncEvent {
        if !nmt_pre_or_operational {
            self.reset_state();
            return SyncEvent::None;
        }
        let mut event = SyncEvent::None;
        self.timer_us = self.timer_us.saturating_add(elapsed_us);

        if self.producer && self.period_us > 0 {
            if self.timer_us >= self.period_us {
                self.timer_us -= self.period_us;
                if self.timer_us >= self.period_us {
                    self.timer_us = 0;
                }
                self.counter = self.next_counter();
                let result = if self.overflow > 0 {
                    tx.send(self.cob_id, &[self.counter])
                } else {
                    tx.send(self.cob_id, &[])
                };
                if let Err(err) = result {
                    warn!("Failed to send SYNC: {:?}", err);
                }
                event = SyncEvent::RxTx;
            }
            *timer_next_us = (*timer_next_us).min(self.period_us - self.timer_us);
        }

        if self.received {
            self.received = false;
            event = SyncEvent::RxTx;
            em.reset(ErrorStatus::SYNC_LENGTH, 0);
        }
        if event == SyncEvent::RxTx {
            self.window_passed = false;
            if self.timeout_reported {
                self.timeout_reported = false;
                em.reset(ErrorStatus::SYNC_TIMEOUT, 0);
            }
        }

        if self.window_us > 0 && !self.window_passed {
            if self.timer_us > self.window_us {
                self.window_passed = true;
                if event == SyncEvent::None {
                    event = SyncEvent::PassedWindow;
                }
            } else {
                *timer_next_us = (*timer_next_us).min(self.window_us - self.timer_us + 1);
            }
        }

        // Consumer timeout after 1.5 periods.
        if !self.producer && self.period_us > 0 && !self.timeout_reported {
            let limit = self.period_us.saturating_add(self.period_us / 2);
            if self.timer_us > limit {
                self.timeout_reported = true;
                debug!("SYNC timeout after {} us", self.timer_us);
                em.report(ErrorStatus::SYNC_TIMEOUT, EmergencyErrorCode::Communication, self.timer_us);
            } else {
                *timer_next_us = (*timer_next_us).min(limit - self.timer_us + 1);
            }
        }

        if let Some(len) = self.length_error.take() {
            em.report(ErrorStatus::SYNC_LENGTH, EmergencyErrorCode::SyncDataLength, len as u32);
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::DataType;
    use crate::error::ErrorCode;
    use crate::object_directory::{AccessType, ObjectDirectory, Variable};
    use crate::prelude::*;
    use crate::value::Value;

    #[derive(Default)]
    struct Sent(Vec<(u16, Vec<u8>)>);

    impl Transmit for Sent {
        fn send(&mut self, cob_id: u16, data: &[u8]) -> Result<(), ErrorCode> {
            self.0.push((cob_id, data.to_vec()));
            Ok(())
        }
    }

    fn setup(cob: u32, period: u32, window: u32, overflow: u8) -> (Sync, Emergency) {
        let mut od = ObjectDirectory::empty(1);
        let rw = AccessType::new(true, true);
        od.insert(Variable::new(0x1005, 0, "cob", DataType::Unsigned32, rw.clone(), false, Value::from(cob)));
        od.insert(Variable::new(0x1006, 0, "period", DataType::Unsigned32, rw.clone(), false, Value::from(period)));
        od.insert(Variable::new(0x1007, 0, "window", DataType::Unsigned32, rw.clone(), false, Value::from(window)));
        od.insert(Variable::new(0x1019, 0, "overflow", DataType::Unsigned8, rw, false, Value::from(overflow)));
        let mut sync = Sync::new();
        sync.configure(&od);
        let mut em = Emergency::new(8);
        em.configure(1, &od);
        (sync, em)
    }

    #[test]
    fn test_producer_counter_wraps() {
        let (mut sync, mut em) = setup(0x4000_0080, 10_000, 0, 3);
        assert!(sync.is_producer());
        let mut tx = Sent::default();
        let mut next = u32::MAX;
        assert_eq!(sync.process(true, 5_000, &mut em, &mut tx, &mut next), SyncEvent::None);
        assert_eq!(next, 5_000);
        let mut counters = vec![];
        for _ in 0..4 {
            assert_eq!(sync.process(true, 10_000, &mut em, &mut tx, &mut next), SyncEvent::RxTx);
            counters.push(sync.counter());
        }
        assert_eq!(counters, vec![1, 2, 3, 1]);
        assert_eq!(tx.0[0], (0x80, vec![1]));
    }

    #[test]
    fn test_consumer_window_and_timeout() {
        let (mut sync, mut em) = setup(0x80, 10_000, 4_000, 0);
        let mut tx = Sent::default();
        let mut next = u32::MAX;
        assert!(sync.on_frame(&[]));
        assert_eq!(sync.process(true, 1_000, &mut em, &mut tx, &mut next), SyncEvent::RxTx);
        assert!(sync.is_inside_window());
        assert_eq!(sync.process(true, 4_000, &mut em, &mut tx, &mut next), SyncEvent::PassedWindow);
        assert_eq!(sync.process(true, 1_000, &mut em, &mut tx, &mut next), SyncEvent::None);
        assert!(!sync.is_inside_window());

        sync.process(true, 10_000, &mut em, &mut tx, &mut next);
        assert!(em.is_error(ErrorStatus::SYNC_TIMEOUT));
        assert!(tx.0.is_empty());

        sync.on_frame(&[]);
        sync.process(true, 0, &mut em, &mut tx, &mut next);
        assert!(!em.is_error(ErrorStatus::SYNC_TIMEOUT));
    }

    #[test]
    fn test_wrong_length() {
        let (mut sync, mut em) = setup(0x80, 0, 0, 0);
        let mut tx = Sent::default();
        let mut next = u32::MAX;
        assert!(!sync.on_frame(&[1]));
        assert_eq!(sync.process(true, 0, &mut em, &mut tx, &mut next), SyncEvent::None);
        assert!(em.is_error(ErrorStatus::SYNC_LENGTH));

        let (mut sync, _) = setup(0x80, 0, 0, 10);
        assert!(!sync.on_frame(&[]));
        assert!(sync.on_frame(&[7]));
        assert_eq!(sync.counter(), 7);
    }

    #[test]
    fn test_inactive_outside_pre_operational() {
        let (mut sync, mut em) = setup(0x4000_0080, 1_000, 0, 0);
        let mut tx = Sent::default();
        let mut next = u32::MAX;
        assert_eq!(sync.process(false, 5_000, &mut em, &mut tx, &mut next), SyncEvent::None);
        assert!(tx.0.is_empty());
    }
}
