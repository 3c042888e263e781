use crate::can::Transmit;
use crate::constant::{COB_FUNC_EMCY, COB_ID_INVALID, COB_ID_MASK, EMCY_HISTORY_LEN,
                      REG_EMCY_COB_ID, REG_EMCY_INHIBIT, REG_ERROR, REG_PRE_DEFINED_ERROR};
use crate::object_directory::{exists, fetch_u16, fetch_u32, OdAccess};
use crate::prelude::*;
use crate::{debug, warn};

/// Emergency error codes raised by the communication objects (CiA 301, table 21).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum EmergencyErrorCode {
    NoError,
    Generic,
    Current,
    Voltage,
    Temperature,
    DeviceSoftware,
    Communication,
    CanOverrun,
    CanPassive,
    HeartbeatTimeout,
    BusOffRecovered,
    PdoNotProcessed,
    PdoLengthExceeded,
    SyncDataLength,
    RpdoTimeout,
    External,
    Manufacturer(u16),
}

impl EmergencyErrorCode {
    pub fn code(&self) -> u16 {
        match *self {
            EmergencyErrorCode::NoError => 0x0000,
            EmergencyErrorCode::Generic => 0x1000,
            EmergencyErrorCode::Current => 0x2000,
            EmergencyErrorCode::Voltage => 0x3000,
            EmergencyErrorCode::Temperature => 0x4000,
            EmergencyErrorCode::DeviceSoftware => 0x6100,
            EmergencyErrorCode::Communication => 0x8100,
            EmergencyErrorCode::CanOverrun => 0x8110,
            EmergencyErrorCode::CanPassive => 0x8120,
            EmergencyErrorCode::HeartbeatTimeout => 0x8130,
            EmergencyErrorCode::BusOffRecovered => 0x8140,
            EmergencyErrorCode::PdoNotProcessed => 0x8210,
            EmergencyErrorCode::PdoLengthExceeded => 0x8220,
            EmergencyErrorCode::SyncDataLength => 0x8240,
            EmergencyErrorCode::RpdoTimeout => 0x8250,
            EmergencyErrorCode::External => 0x9000,
            EmergencyErrorCode::Manufacturer(code) => code,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x0000 => Some(EmergencyErrorCode::NoError),
            0x1000 => Some(EmergencyErrorCode::Generic),
            0x2000 => Some(EmergencyErrorCode::Current),
            0x3000 => Some(EmergencyErrorCode::Voltage),
            0x4000 => Some(EmergencyErrorCode::Temperature),
            0x6100 => Some(EmergencyErrorCode::DeviceSoftware),
            0x8100 => Some(EmergencyErrorCode::Communication),
            0x8110 => Some(EmergencyErrorCode::CanOverrun),
            0x8120 => Some(EmergencyErrorCode::CanPassive),
            0x8130 => Some(EmergencyErrorCode::HeartbeatTimeout),
            0x8140 => Some(EmergencyErrorCode::BusOffRecovered),
            0x8210 => Some(EmergencyErrorCode::PdoNotProcessed),
            0x8220 => Some(EmergencyErrorCode::PdoLengthExceeded),
            0x8240 => Some(EmergencyErrorCode::SyncDataLength),
            0x8250 => Some(EmergencyErrorCode::RpdoTimeout),
            0x9000 => Some(EmergencyErrorCode::External),
            0xFF00..=0xFFFF => Some(EmergencyErrorCode::Manufacturer(code)),
            _ => None,
        }
    }

    /// Error register bit the code class maps to, besides the generic bit.
    pub fn register(&self) -> ErrorRegister {
        match self.code() & 0xF000 {
            0x2000 => ErrorRegister::Current,
            0x3000 => ErrorRegister::Voltage,
            0x4000 => ErrorRegister::Temperature,
            0x8000 => ErrorRegister::CommunicationError,
            0xF000 if self.code() >= 0xFF00 => ErrorRegister::ManufacturerSpecific,
            _ => ErrorRegister::GenericError,
        }
    }
}

/// Bits of the error register (0x1001).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorRegister {
    GenericError,
    Current,
    Voltage,
    Temperature,
    CommunicationError,  // Overrun / Error state
    DeviceProfileSpecific,
    Reserved,
    ManufacturerSpecific,
}

impl ErrorRegister {
    pub fn code(&self) -> u8 {
        match *self {
            ErrorRegister::GenericError => 0,
            ErrorRegister::Current => 1,
            ErrorRegister::Voltage => 2,
            ErrorRegister::Temperature => 3,
            ErrorRegister::CommunicationError => 4,
            ErrorRegister::DeviceProfileSpecific => 5,
            ErrorRegister::Reserved => 6,
            ErrorRegister::ManufacturerSpecific => 7,
        }
    }

    pub fn mask(&self) -> u8 {
        1 << self.code()
    }
}

pub const ERROR_REGISTER_COMMUNICATION: u8 = 0x10;

/// Error status bit numbers. Each bit is a distinct error condition; setting
/// an already set bit is a no-op, so a condition is reported once until reset.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ErrorStatus(pub u8);

impl ErrorStatus {
    pub const CAN_BUS_WARNING: ErrorStatus = ErrorStatus(0x01);
    pub const RX_MSG_WRONG_LENGTH: ErrorStatus = ErrorStatus(0x02);
    pub const RPDO_WRONG_LENGTH: ErrorStatus = ErrorStatus(0x04);
    pub const NMT_WRONG_COMMAND: ErrorStatus = ErrorStatus(0x08);
    pub const CAN_TX_OVERFLOW: ErrorStatus = ErrorStatus(0x14);
    pub const TPDO_OUTSIDE_WINDOW: ErrorStatus = ErrorStatus(0x15);
    pub const RPDO_TIMEOUT: ErrorStatus = ErrorStatus(0x17);
    pub const SYNC_TIMEOUT: ErrorStatus = ErrorStatus(0x18);
    pub const SYNC_LENGTH: ErrorStatus = ErrorStatus(0x19);
    pub const PDO_WRONG_MAPPING: ErrorStatus = ErrorStatus(0x1A);
    pub const HEARTBEAT_CONSUMER: ErrorStatus = ErrorStatus(0x1B);
    pub const HB_CONSUMER_REMOTE_RESET: ErrorStatus = ErrorStatus(0x1C);
    pub const EMERGENCY_BUFFER_FULL: ErrorStatus = ErrorStatus(0x20);
    pub const GENERIC_ERROR: ErrorStatus = ErrorStatus(0x2B);
    pub const GENERIC_SOFTWARE_ERROR: ErrorStatus = ErrorStatus(0x2C);
    /// First bit free for the application.
    pub const MANUFACTURER_START: ErrorStatus = ErrorStatus(0x30);
    pub const MANUFACTURER_END: ErrorStatus = ErrorStatus(STATUS_BITS as u8 - 1);
}

const STATUS_BITS: usize = 80;

/// An emergency message received from another node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmcyMessage {
    pub node_id: u8,
    pub error_code: u16,
    pub error_register: u8,
    pub status: u8,
    pub info: u32,
}

impl EmcyMessage {
    fn parse(node_id: u8, data: &[u8]) -> Option<Self> {
        if data.len() != 8 {
            return None;
        }
        Some(EmcyMessage {
            node_id,
            error_code: u16::from_le_bytes([data[0], data[1]]),
            error_register: data[2],
            status: data[3],
            info: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
        })
    }
}

const RECEIVED_QUEUE_LEN: usize = 16;

/// EMCY producer and consumer with the error register and the pre-defined
/// error field.
#[derive(Debug)]
pub struct Emergency {
    node_id: u8,
    cob_id: u16,
    enabled: bool,
    inhibit_us: u32,
    inhibit_timer_us: u32,
    status: [u8; STATUS_BITS / 8],
    reg_bits: [u8; STATUS_BITS],
    queue: VecDeque<[u8; 8]>,
    queue_len: usize,
    history: VecDeque<u32>,
    history_len: usize,
    history_dirty: bool,
    register_written: Option<u8>,
    received: VecDeque<EmcyMessage>,
}

impl Emergency {
    pub fn new(queue_len: usize) -> Self {
        Emergency {
            node_id: 0,
            cob_id: 0,
            enabled: false,
            inhibit_us: 0,
            inhibit_timer_us: 0,
            status: [0; STATUS_BITS / 8],
            reg_bits: [0; STATUS_BITS],
            queue: VecDeque::new(),
            queue_len: queue_len.max(1),
            history: VecDeque::new(),
            history_len: EMCY_HISTORY_LEN,
            history_dirty: false,
            register_written: None,
            received: VecDeque::new(),
        }
    }

    /// Reads 0x1014, 0x1015 and the size of 0x1003. Active errors survive a
    /// communication reset, queued messages do not.
    pub fn configure(&mut self, node_id: u8, od: &dyn OdAccess) {
        self.node_id = node_id;
        self.queue.clear();
        self.inhibit_timer_us = 0;
        let default_cob = COB_FUNC_EMCY + node_id as u16;
        match fetch_u32(od, REG_EMCY_COB_ID, 0) {
            Some(raw) if raw & COB_ID_INVALID != 0 => {
                self.enabled = false;
                self.cob_id = default_cob;
            }
            Some(raw) => {
                let id = (raw & COB_ID_MASK) as u16;
                self.enabled = true;
                // A stored value without node id follows the node id.
                self.cob_id = if id == COB_FUNC_EMCY || id == 0 { default_cob } else { id };
            }
            None => {
                self.enabled = true;
                self.cob_id = default_cob;
            }
        }
        self.inhibit_us = fetch_u16(od, REG_EMCY_INHIBIT, 0).unwrap_or(0) as u32 * 100;
        if exists(od, REG_PRE_DEFINED_ERROR, 0) {
            self.history_len = (1..=254u8).take_while(|sub| exists(od, REG_PRE_DEFINED_ERROR, *sub)).count();
        }
        self.history.truncate(self.history_len);
        self.history_dirty = true;
        self.register_written = None;
    }

    pub fn cob_id(&self) -> u16 {
        self.cob_id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_error(&self, status: ErrorStatus) -> bool {
        let bit = status.0 as usize;
        bit < STATUS_BITS && self.status[bit / 8] & (1 << (bit % 8)) != 0
    }

    pub fn has_errors(&self) -> bool {
        self.status.iter().any(|b| *b != 0)
    }

    pub fn error_register(&self) -> u8 {
        let mut register = 0;
        for bit in 0..STATUS_BITS {
            if self.status[bit / 8] & (1 << (bit % 8)) != 0 {
                register |= self.reg_bits[bit] | ErrorRegister::GenericError.mask();
            }
        }
        register
    }

    /// Sets an error condition and queues its emergency message.
    /// Returns `false` when the condition was already active.
    pub fn report(&mut self, status: ErrorStatus, code: EmergencyErrorCode, info: u32) -> bool {
        let bit = status.0 as usize;
        if bit >= STATUS_BITS {
            warn!("Emergency status bit {:#x} out of range", status.0);
            return false;
        }
        if self.is_error(status) {
            return false;
        }
        self.status[bit / 8] |= 1 << (bit % 8);
        self.reg_bits[bit] = code.register().mask();
        debug!("EMCY report {:#06x} status {:#x} info {:#x}", code.code(), status.0, info);

        if self.history_len > 0 {
            self.history.push_front(code.code() as u32 | (info & 0xFFFF) << 16);
            self.history.truncate(self.history_len);
            self.history_dirty = true;
        }
        self.enqueue(code.code(), status.0, info);
        true
    }

    /// Clears an error condition and queues an error reset message.
    /// Returns `false` when the condition was not active.
    pub fn reset(&mut self, status: ErrorStatus, info: u32) -> bool {
        if !self.is_error(status) {
            return false;
        }
        let bit = status.0 as usize;
        self.status[bit / 8] &= !(1 << (bit % 8));
        self.reg_bits[bit] = 0;
        self.enqueue(EmergencyErrorCode::NoError.code(), status.0, info);
        true
    }

    fn enqueue(&mut self, code: u16, status: u8, info: u32) {
        if self.queue.len() >= self.queue_len {
            // The overflow condition itself is not queued.
            let bit = ErrorStatus::EMERGENCY_BUFFER_FULL.0 as usize;
            self.status[bit / 8] |= 1 << (bit % 8);
            self.reg_bits[bit] = ErrorRegister::GenericError.mask();
            warn!("EMCY queue full, dropping {:#06x}", code);
            return;
        }
        let mut frame = [0u8; 8];
        frame[0..2].copy_from_slice(&code.to_le_bytes());
        frame[2] = self.error_register();
        frame[3] = status;
        frame[4..8].copy_from_slice(&info.to_le_bytes());
        self.queue.push_back(frame);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn history(&self) -> impl Iterator<Item = &u32> {
        self.history.iter()
    }

    /// Writing 0 to 0x1003:00 clears the pre-defined error field.
    pub fn clear_history(&mut self) {
        self.history.clear();
        self.history_dirty = true;
    }

    /// Mirrors the error register and history into the dictionary and sends
    /// queued messages, respecting the inhibit time. Messages stay queued
    /// while the node is not Pre-Operational or Operational.
    pub fn process(
        &mut self,
        nmt_pre_or_operational: bool,
        elapsed_us: u32,
        od: &mut dyn OdAccess,
        tx: &mut dyn Transmit,
        timer_next_us: &mut u32,
    ) {
        let register = self.error_register();
        if self.register_written != Some(register) {
            if let Err(err) = od.store(REG_ERROR, 0, &[register]) {
                warn!("Failed to store error register {:#04x}: {:?}", register, err);
            }
            self.register_written = Some(register);
        }
        if self.history_dirty {
            self.history_dirty = false;
            if let Err(err) = od.store(REG_PRE_DEFINED_ERROR, 0, &[self.history.len() as u8]) {
                warn!("Failed to store error history length: {:?}", err);
            }
            for (i, entry) in self.history.iter().enumerate() {
                if let Err(err) = od.store(REG_PRE_DEFINED_ERROR, i as u8 + 1, &entry.to_le_bytes()) {
                    warn!("Failed to store error history entry {}: {:?}", i + 1, err);
                }
            }
        }

        self.inhibit_timer_us = self.inhibit_timer_us.saturating_sub(elapsed_us);
        if !nmt_pre_or_operational || !self.enabled {
            return;
        }
        while self.inhibit_timer_us == 0 {
            let Some(frame) = self.queue.front() else { break };
            if let Err(err) = tx.send(self.cob_id, frame) {
                warn!("Failed to send EMCY: {:?}", err);
                break;
            }
            self.queue.pop_front();
            self.inhibit_timer_us = self.inhibit_us;
        }
        if !self.queue.is_empty() && self.inhibit_timer_us > 0 {
            *timer_next_us = (*timer_next_us).min(self.inhibit_timer_us);
        }
    }

    /// Consumer side: records an emergency message of another node.
    pub fn on_frame(&mut self, cob_id: u16, data: &[u8]) {
        let node_id = cob_id.wrapping_sub(COB_FUNC_EMCY) as u8;
        if cob_id == self.cob_id || node_id == 0 || node_id > 127 {
            return;
        }
        match EmcyMessage::parse(node_id, data) {
            Some(message) => {
                if self.received.len() >= RECEIVED_QUEUE_LEN {
                    self.received.pop_front();
                }
                self.received.push_back(message);
            }
            None => {
                debug!("Ignoring EMCY from {:#x} with {} bytes", cob_id, data.len());
            }
        }
    }

    pub fn take_received(&mut self) -> Vec<EmcyMessage> {
        self.received.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::DataType;
    use crate::error::ErrorCode;
    use crate::object_directory::{AccessType, ObjectDirectory, Variable};
    use crate::value::Value;

    #[derive(Default)]
    struct Sent(Vec<(u16, Vec<u8>)>);

    impl Transmit for Sent {
        fn send(&mut self, cob_id: u16, data: &[u8]) -> Result<(), ErrorCode> {
            self.0.push((cob_id, data.to_vec()));
            Ok(())
        }
    }

    fn od_with_inhibit(inhibit: u16) -> ObjectDirectory {
        let mut od = ObjectDirectory::empty(4);
        let rw = AccessType::new(true, true);
        od.insert(Variable::new(0x1001, 0, "reg", DataType::Unsigned8, AccessType::new(true, false), false, Value::from(0u8)));
        od.insert(Variable::new(0x1015, 0, "inhibit", DataType::Unsigned16, rw.clone(), false, Value::from(inhibit)));
        od.insert(Variable::new(0x1003, 0, "count", DataType::Unsigned8, rw.clone(), false, Value::from(0u8)));
        for sub in 1..=2 {
            od.insert(Variable::new(0x1003, sub, "err", DataType::Unsigned32, AccessType::new(true, false), false, Value::from(0u32)));
        }
        od
    }

    #[test]
    fn test_code_table() {
        assert_eq!(EmergencyErrorCode::from_code(0x8210), Some(EmergencyErrorCode::PdoNotProcessed));
        assert_eq!(EmergencyErrorCode::HeartbeatTimeout.code(), 0x8130);
        assert_eq!(EmergencyErrorCode::HeartbeatTimeout.register(), ErrorRegister::CommunicationError);
        assert_eq!(EmergencyErrorCode::from_code(0xFF01), Some(EmergencyErrorCode::Manufacturer(0xFF01)));
        assert_eq!(EmergencyErrorCode::from_code(0x7777), None);
    }

    #[test]
    fn test_report_and_reset() {
        let mut od = od_with_inhibit(0);
        let mut em = Emergency::new(8);
        em.configure(4, &od);
        let mut tx = Sent::default();
        let mut next = u32::MAX;

        assert!(em.report(ErrorStatus::SYNC_TIMEOUT, EmergencyErrorCode::Communication, 0x1234));
        assert!(!em.report(ErrorStatus::SYNC_TIMEOUT, EmergencyErrorCode::Communication, 0x1234));
        assert_eq!(em.error_register(), 0x11);
        em.process(true, 0, &mut od, &mut tx, &mut next);
        assert_eq!(tx.0, vec![(0x84, vec![0x00, 0x81, 0x11, 0x18, 0x34, 0x12, 0, 0])]);
        assert_eq!(od.fetch(0x1001, 0).unwrap(), vec![0x11]);
        assert_eq!(od.fetch(0x1003, 0).unwrap(), vec![1]);
        assert_eq!(od.fetch(0x1003, 1).unwrap(), 0x1234_8100u32.to_le_bytes().to_vec());

        tx.0.clear();
        assert!(em.reset(ErrorStatus::SYNC_TIMEOUT, 0));
        assert!(!em.reset(ErrorStatus::SYNC_TIMEOUT, 0));
        em.process(true, 0, &mut od, &mut tx, &mut next);
        assert_eq!(tx.0, vec![(0x84, vec![0, 0, 0, 0x18, 0, 0, 0, 0])]);
        assert_eq!(od.fetch(0x1001, 0).unwrap(), vec![0]);
    }

    #[test]
    fn test_inhibit_time_and_nmt_gate() {
        // 10 ms
        let mut od = od_with_inhibit(100);
        let mut em = Emergency::new(8);
        em.configure(4, &od);
        let mut tx = Sent::default();
        em.report(ErrorStatus(0x30), EmergencyErrorCode::Manufacturer(0xFF00), 1);
        em.report(ErrorStatus(0x31), EmergencyErrorCode::Manufacturer(0xFF01), 2);

        let mut next = u32::MAX;
        em.process(false, 0, &mut od, &mut tx, &mut next);
        assert!(tx.0.is_empty());

        em.process(true, 0, &mut od, &mut tx, &mut next);
        assert_eq!(tx.0.len(), 1);
        assert_eq!(next, 10_000);
        em.process(true, 9_000, &mut od, &mut tx, &mut next);
        assert_eq!(tx.0.len(), 1);
        em.process(true, 1_000, &mut od, &mut tx, &mut next);
        assert_eq!(tx.0.len(), 2);
        // History is newest first and bounded by 0x1003.
        em.report(ErrorStatus(0x32), EmergencyErrorCode::Manufacturer(0xFF02), 3);
        let history: Vec<u32> = em.history().copied().collect();
        assert_eq!(history, vec![0x0003_FF02, 0x0002_FF01]);
    }

    #[test]
    fn test_dictionary_without_error_objects() {
        let mut od = ObjectDirectory::empty(4);
        let mut em = Emergency::new(8);
        em.configure(4, &od);
        let mut tx = Sent::default();
        let mut next = u32::MAX;
        em.report(ErrorStatus::GENERIC_ERROR, EmergencyErrorCode::Generic, 7);
        em.process(true, 0, &mut od, &mut tx, &mut next);
        assert_eq!(tx.0, vec![(0x84, vec![0x00, 0x10, 0x01, 0x2B, 0x07, 0, 0, 0])]);
        assert!(od.fetch(0x1001, 0).is_err());
        assert_eq!(em.error_register(), 0x01);
    }

    #[test]
    fn test_queue_overflow_sets_buffer_full() {
        let mut em = Emergency::new(1);
        em.configure(4, &ObjectDirectory::empty(4));
        em.report(ErrorStatus(0x30), EmergencyErrorCode::Generic, 0);
        em.report(ErrorStatus(0x31), EmergencyErrorCode::Generic, 0);
        assert_eq!(em.pending(), 1);
        assert!(em.is_error(ErrorStatus::EMERGENCY_BUFFER_FULL));
    }

    #[test]
    fn test_consumer() {
        let mut em = Emergency::new(8);
        em.configure(4, &ObjectDirectory::empty(4));
        em.on_frame(0x85, &[0x10, 0x82, 0x11, 0x04, 1, 0, 0, 0]);
        em.on_frame(0x84, &[0x10, 0x82, 0x11, 0x04, 1, 0, 0, 0]);
        em.on_frame(0x86, &[0x10]);
        let received = em.take_received();
        assert_eq!(received, vec![EmcyMessage { node_id: 5, error_code: 0x8210, error_register: 0x11, status: 4, info: 1 }]);
    }
}
