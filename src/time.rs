use crate::can::Transmit;
use crate::constant::{COB_FUNC_TIME, COB_ID_CONSUMER, COB_ID_MASK, COB_ID_PRODUCER, REG_TIME_COB_ID};
use crate::object_directory::{fetch_u32, OdAccess};
use crate::{debug, warn};

const MS_PER_DAY: u32 = 86_400_000;

/// TIME_OF_DAY producer and consumer (0x1012).
///
/// The time is kept as milliseconds after midnight and days since 1984-01-01
/// and advances with the elapsed time given to [`Time::process`].
#[derive(Debug, Default)]
pub struct Time {
    cob_id: u16,
    consumer: bool,
    producer: bool,
    ms: u32,
    days: u16,
    residual_us: u32,
    interval_us: u32,
    producer_timer_us: u32,
    received: bool,
}

impl Time {
    pub fn new() -> Self {
        Time { cob_id: COB_FUNC_TIME, ..Default::default() }
    }

    /// `interval_ms` is the producer interval, 0 disables periodic production.
    pub fn configure(&mut self, od: &dyn OdAccess, interval_ms: u32) {
        let cob = fetch_u32(od, REG_TIME_COB_ID, 0).unwrap_or(COB_ID_CONSUMER | COB_FUNC_TIME as u32);
        self.cob_id = (cob & COB_ID_MASK) as u16;
        self.consumer = cob & COB_ID_CONSUMER != 0;
        self.producer = cob & COB_ID_PRODUCER != 0;
        self.interval_us = interval_ms.saturating_mul(1000);
        self.producer_timer_us = 0;
        self.received = false;
    }

    pub fn cob_id(&self) -> u16 {
        self.cob_id
    }

    pub fn is_consumer(&self) -> bool {
        self.consumer
    }

    pub fn is_producer(&self) -> bool {
        self.producer
    }

    /// Milliseconds after midnight and days since 1984-01-01.
    pub fn get(&self) -> (u32, u16) {
        (self.ms, self.days)
    }

    pub fn set(&mut self, ms: u32, days: u16) {
        self.ms = ms % MS_PER_DAY;
        self.days = days;
        self.residual_us = 0;
    }

    pub fn on_frame(&mut self, data: &[u8]) {
        if !self.consumer {
            return;
        }
        if data.len() != 6 {
            debug!("Ignoring TIME frame with {} bytes", data.len());
            return;
        }
        let ms = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) & 0x0FFF_FFFF;
        let days = u16::from_le_bytes([data[4], data[5]]);
        self.set(ms, days);
        self.received = true;
    }

    fn encode(&self) -> [u8; 6] {
        let mut frame = [0u8; 6];
        frame[0..4].copy_from_slice(&(self.ms & 0x0FFF_FFFF).to_le_bytes());
        frame[4..6].copy_from_slice(&self.days.to_le_bytes());
        frame
    }

    /// Sends the current time once, regardless of the interval.
    pub fn send(&mut self, tx: &mut dyn Transmit) {
        if let Err(err) = tx.send(self.cob_id, &self.encode()) {
            warn!("Failed to send TIME: {:?}", err);
        }
        self.producer_timer_us = 0;
    }

    /// Advances the clock. Returns `true` when a TIME frame was received
    /// since the previous call.
    pub fn process(
        &mut self,
        nmt_pre_or_operational: bool,
        elapsed_us: u32,
        tx: &mut dyn Transmit,
        timer_next_us: &mut u32,
    ) -> bool {
        self.residual_us += elapsed_us % 1000;
        let ms = elapsed_us / 1000 + self.residual_us / 1000;
        self.residual_us %= 1000;
        let total = self.ms as u64 + ms as u64;
        self.days = self.days.wrapping_add((total / MS_PER_DAY as u64) as u16);
        self.ms = (total % MS_PER_DAY as u64) as u32;

        if nmt_pre_or_operational && self.producer && self.interval_us > 0 {
            self.producer_timer_us = self.producer_timer_us.saturating_add(elapsed_us);
            if self.producer_timer_us >= self.interval_us {
                self.send(tx);
            }
            *timer_next_us = (*timer_next_us).min(self.interval_us - self.producer_timer_us);
        }
        core::mem::take(&mut self.received)
    }
}
