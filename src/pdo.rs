use crate::can::{IdentRegistry, RxTarget, Transmit, TxSource};
use crate::constant::*;
use crate::data_type::DataType;
use crate::emergency::{Emergency, EmergencyErrorCode, ErrorStatus};
use crate::error::AbortCode;
use crate::object_directory::{fetch_u16, fetch_u32, fetch_u8, OdAccess};
use crate::prelude::*;
use crate::util::le_u64;
use crate::{debug, warn};

pub(crate) const MAX_PDO_MAPPING_LENGTH: u8 = 64;
pub const MAX_MAPPED_OBJECTS: usize = 8;

const TRANSMISSION_SYNC_ACYCLIC: u8 = 0;
const TRANSMISSION_SYNC_MAX: u8 = 240;
const TRANSMISSION_EVENT_MANUFACTURER: u8 = 254;
const TRANSMISSION_EVENT_PROFILE: u8 = 255;

/// Sync counter sentinel: first SYNC after entering Operational not seen yet.
const SYNC_COUNTER_UNSTARTED: u8 = 255;
/// Sync counter sentinel: waiting for the SYNC start value.
const SYNC_COUNTER_WAIT_START: u8 = 254;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdoType {
    TPDO,
    RPDO,
}

impl PdoType {
    fn comm_base(&self) -> u16 {
        match self {
            PdoType::RPDO => REG_RPDO_COMM,
            PdoType::TPDO => REG_TPDO_COMM,
        }
    }

    fn mapping_base(&self) -> u16 {
        match self {
            PdoType::RPDO => REG_RPDO_MAPPING,
            PdoType::TPDO => REG_TPDO_MAPPING,
        }
    }

    fn default_function_codes(&self) -> &'static [u16; 4] {
        match self {
            PdoType::RPDO => &COB_FUNC_RPDO,
            PdoType::TPDO => &COB_FUNC_TPDO,
        }
    }
}

/// Which PDO parameter object an index belongs to: type, PDO number, mapping or communication.
pub fn pdo_param_kind(index: u16) -> Option<(PdoType, usize, bool)> {
    match index {
        0x1400..=0x15FF => Some((PdoType::RPDO, (index - REG_RPDO_COMM) as usize, false)),
        0x1600..=0x17FF => Some((PdoType::RPDO, (index - REG_RPDO_MAPPING) as usize, true)),
        0x1800..=0x19FF => Some((PdoType::TPDO, (index - REG_TPDO_COMM) as usize, false)),
        0x1A00..=0x1BFF => Some((PdoType::TPDO, (index - REG_TPDO_MAPPING) as usize, true)),
        _ => None,
    }
}

/// COB-ID in use for PDO `num`. The first four PDOs add the node id when the
/// stored identifier is the bare function code.
fn resolve_cob_id(pdo_type: PdoType, num: usize, raw: u32, node_id: u8) -> u16 {
    let id = (raw & COB_ID_MASK) as u16;
    match pdo_type.default_function_codes().get(num) {
        Some(base) if *base == id => id + node_id as u16,
        _ => id,
    }
}

/// Identifiers reserved for other services (CiA 301, 7.3.5).
fn is_restricted_cob_id(id: u16) -> bool {
    matches!(id, 0x000..=0x07F | 0x101..=0x180 | 0x581..=0x5FF | 0x601..=0x67F | 0x6E0..=0x6FF | 0x701..=0x7FF)
}

/// One entry of a mapping parameter record: `index << 16 | sub_index << 8 | bits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MappedObject {
    pub index: u16,
    pub sub_index: u8,
    pub bits: u8,
}

impl MappedObject {
    pub fn from_raw(raw: u32) -> Self {
        MappedObject {
            index: (raw >> 16) as u16,
            sub_index: ((raw >> 8) & 0xFF) as u8,
            bits: (raw & 0xFF) as u8,
        }
    }

    pub fn raw(&self) -> u32 {
        (self.index as u32) << 16 | (self.sub_index as u32) << 8 | self.bits as u32
    }

    /// Dummy entries reference a data type index and only occupy space.
    pub fn is_dummy(&self) -> bool {
        (0x0001..=0x0007).contains(&self.index)
    }

    fn validate(&self, od: &dyn OdAccess, pdo_type: PdoType) -> Result<(), AbortCode> {
        if self.bits == 0 || self.bits > MAX_PDO_MAPPING_LENGTH {
            return Err(AbortCode::ObjectCannotBeMappedToPDO);
        }
        if self.is_dummy() {
            let size = DataType::from_u32(self.index as u32).size();
            return if self.bits as usize <= size * 8 {
                Ok(())
            } else {
                Err(AbortCode::ObjectCannotBeMappedToPDO)
            };
        }
        let entry = od.entry(self.index, self.sub_index).map_err(|_| AbortCode::ObjectCannotBeMappedToPDO)?;
        let access_ok = match pdo_type {
            PdoType::RPDO => entry.writable,
            PdoType::TPDO => entry.readable,
        };
        if !entry.pdo_mappable || !access_ok || entry.size == 0 || self.bits as usize > entry.size * 8 {
            return Err(AbortCode::ObjectCannotBeMappedToPDO);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PdoMapping {
    objects: Vec<MappedObject>,
    total_bits: u8,
}

impl PdoMapping {
    /// Reads and validates mapping record `index`. Up to 8 objects, 64 bits in total.
    pub fn from_od(od: &dyn OdAccess, pdo_type: PdoType, index: u16) -> Result<Self, AbortCode> {
        let count = fetch_u8(od, index, 0).unwrap_or(0) as usize;
        if count > MAX_MAPPED_OBJECTS {
            return Err(AbortCode::ValueRangeExceeded);
        }
        let mut raw = Vec::with_capacity(count);
        for sub in 1..=count as u8 {
            raw.push(fetch_u32(od, index, sub).ok_or(AbortCode::ObjectCannotBeMappedToPDO)?);
        }
        Self::from_raw(od, pdo_type, &raw)
    }

    pub fn from_raw(od: &dyn OdAccess, pdo_type: PdoType, raw: &[u32]) -> Result<Self, AbortCode> {
        let mut mapping = PdoMapping::default();
        let mut total = 0u32;
        for value in raw {
            let object = MappedObject::from_raw(*value);
            object.validate(od, pdo_type)?;
            total += object.bits as u32;
            mapping.objects.push(object);
        }
        if total > MAX_PDO_MAPPING_LENGTH as u32 {
            return Err(AbortCode::ExceedPDOSize);
        }
        mapping.total_bits = total as u8;
        Ok(mapping)
    }

    pub fn objects(&self) -> &[MappedObject] {
        &self.objects
    }

    pub fn total_bits(&self) -> u8 {
        self.total_bits
    }

    pub fn byte_len(&self) -> usize {
        (self.total_bits as usize + 7) / 8
    }

    /// Packs the mapped values, least significant bit first.
    pub fn pack(&self, od: &dyn OdAccess) -> Result<Vec<u8>, AbortCode> {
        let mut values = Vec::with_capacity(self.objects.len());
        for object in &self.objects {
            let value = if object.is_dummy() {
                0
            } else {
                le_u64(&od.fetch(object.index, object.sub_index)?)
            };
            values.push((value, object.bits));
        }
        Ok(pack_data(&values, self.byte_len()))
    }

    /// Writes every mapped value of `data` to the dictionary. `data` must hold
    /// at least [`PdoMapping::byte_len`] bytes.
    pub fn unpack(&self, data: &[u8], od: &mut dyn OdAccess) {
        let bits: Vec<u8> = self.objects.iter().map(|o| o.bits).collect();
        for (object, value) in self.objects.iter().zip(unpack_data(data, &bits)) {
            if object.is_dummy() {
                continue;
            }
            let entry = match od.entry(object.index, object.sub_index) {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("RPDO target {:04x}:{:02x} vanished: {:?}", object.index, object.sub_index, err);
                    continue;
                }
            };
            let value = if entry.data_type.is_signed() {
                sign_extend(value, object.bits)
            } else {
                value
            };
            let size = entry.size.min(8);
            if let Err(err) = od.store(object.index, object.sub_index, &value.to_le_bytes()[..size]) {
                warn!("RPDO write {:04x}:{:02x} failed: {:?}", object.index, object.sub_index, err);
            }
        }
    }
}

fn mask(bits: u8) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

fn sign_extend(value: u64, bits: u8) -> u64 {
    if bits == 0 || bits >= 64 {
        return value;
    }
    let shift = 64 - bits as u32;
    (((value << shift) as i64) >> shift) as u64
}

fn pack_data(values: &[(u64, u8)], byte_len: usize) -> Vec<u8> {
    let mut merged = 0u64;
    let mut offset = 0u32;
    for (data, bits) in values {
        if offset < 64 {
            merged |= (data & mask(*bits)) << offset;
        }
        offset += *bits as u32;
    }
    merged.to_le_bytes()[..byte_len.min(8)].to_vec()
}

fn unpack_data(data: &[u8], bits: &[u8]) -> Vec<u64> {
    let merged = le_u64(data);
    let mut offset = 0u32;
    bits.iter()
        .map(|b| {
            let value = if offset < 64 { (merged >> offset) & mask(*b) } else { 0 };
            offset += *b as u32;
            value
        })
        .collect()
}

/// What happened to a received RPDO frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpdoReception {
    /// PDO disabled or node not Operational.
    Ignored,
    /// Shorter than the mapping, not processed.
    TooShort,
    /// Synchronous PDO, applied after the next SYNC.
    Buffered,
    /// Asynchronous PDO, written to the dictionary.
    Applied,
}

#[derive(Debug, Clone)]
pub struct Rpdo {
    num: usize,
    valid: bool,
    cob_id: u16,
    transmission_type: u8,
    mapping: PdoMapping,
    deadline_us: u32,
    deadline_timer_us: u32,
    monitoring: bool,
    received: Option<[u8; 8]>,
    latched: Option<[u8; 8]>,
}

impl Rpdo {
    pub fn new(num: usize) -> Self {
        Rpdo {
            num,
            valid: false,
            cob_id: 0,
            transmission_type: TRANSMISSION_EVENT_PROFILE,
            mapping: PdoMapping::default(),
            deadline_us: 0,
            deadline_timer_us: 0,
            monitoring: false,
            received: None,
            latched: None,
        }
    }

    /// Reads `0x1400+num` and `0x1600+num`. An invalid mapping disables the PDO.
    pub fn configure(&mut self, od: &dyn OdAccess, node_id: u8) -> Result<(), AbortCode> {
        let comm = REG_RPDO_COMM + self.num as u16;
        self.clear();
        self.valid = false;
        let Some(raw) = fetch_u32(od, comm, 1) else {
            return Ok(());
        };
        self.cob_id = resolve_cob_id(PdoType::RPDO, self.num, raw, node_id);
        self.transmission_type = fetch_u8(od, comm, 2).unwrap_or(TRANSMISSION_EVENT_PROFILE);
        self.deadline_us = fetch_u16(od, comm, 5).unwrap_or(0) as u32 * 1000;
        self.mapping = PdoMapping::from_od(od, PdoType::RPDO, REG_RPDO_MAPPING + self.num as u16)
            .inspect_err(|err| { warn!("RPDO{} mapping rejected: {:?}", self.num + 1, err); })?;
        self.valid = raw & COB_ID_INVALID == 0 && self.cob_id != 0 && self.mapping.total_bits() > 0;
        Ok(())
    }

    pub fn num(&self) -> usize {
        self.num
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn cob_id(&self) -> u16 {
        self.cob_id
    }

    pub fn mapping(&self) -> &PdoMapping {
        &self.mapping
    }

    pub fn is_synchronous(&self) -> bool {
        self.transmission_type <= TRANSMISSION_SYNC_MAX
    }

    /// Drops buffered data, used when leaving Operational.
    pub fn clear(&mut self) {
        self.received = None;
        self.latched = None;
        self.monitoring = false;
        self.deadline_timer_us = 0;
    }

    pub fn on_frame(&mut self, data: &[u8], operational: bool, od: &mut dyn OdAccess, em: &mut Emergency)
                    -> RpdoReception {
        if !self.valid || !operational {
            return RpdoReception::Ignored;
        }
        let expected = self.mapping.byte_len();
        if data.len() < expected {
            em.report(ErrorStatus::RPDO_WRONG_LENGTH, EmergencyErrorCode::PdoNotProcessed, data.len() as u32);
            return RpdoReception::TooShort;
        }
        if data.len() > expected {
            em.report(ErrorStatus::RPDO_WRONG_LENGTH, EmergencyErrorCode::PdoLengthExceeded, data.len() as u32);
        } else {
            em.reset(ErrorStatus::RPDO_WRONG_LENGTH, data.len() as u32);
        }

        self.monitoring = true;
        self.deadline_timer_us = 0;
        em.reset(ErrorStatus::RPDO_TIMEOUT, self.num as u32);

        if self.is_synchronous() {
            let mut buf = [0u8; 8];
            buf[..expected].copy_from_slice(&data[..expected]);
            self.received = Some(buf);
            RpdoReception::Buffered
        } else {
            self.mapping.unpack(&data[..expected], od);
            RpdoReception::Applied
        }
    }

    /// Latches the frame received before this SYNC.
    pub fn on_sync(&mut self) {
        if let Some(buf) = self.received.take() {
            self.latched = Some(buf);
        }
    }

    /// Applies the latched frame of a synchronous RPDO. Returns `true` when
    /// the dictionary was written.
    pub fn process(&mut self, sync_was: bool, operational: bool, od: &mut dyn OdAccess) -> bool {
        if !operational {
            self.clear();
            return false;
        }
        if !self.valid || !sync_was || !self.is_synchronous() {
            return false;
        }
        match self.latched.take() {
            Some(buf) => {
                self.mapping.unpack(&buf[..self.mapping.byte_len()], od);
                true
            }
            None => false,
        }
    }

    /// Deadline monitoring (`0x14xx:05`), started by the first received frame.
    pub fn process_timeout(&mut self, operational: bool, elapsed_us: u32, em: &mut Emergency,
                           timer_next_us: &mut u32) {
        if !operational || !self.valid || !self.monitoring || self.deadline_us == 0 {
            return;
        }
        self.deadline_timer_us = self.deadline_timer_us.saturating_add(elapsed_us);
        if self.deadline_timer_us > self.deadline_us {
            if em.report(ErrorStatus::RPDO_TIMEOUT, EmergencyErrorCode::RpdoTimeout, self.num as u32) {
                warn!("RPDO{} deadline expired", self.num + 1);
            }
        } else {
            *timer_next_us = (*timer_next_us).min(self.deadline_us - self.deadline_timer_us + 1);
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tpdo {
    num: usize,
    valid: bool,
    cob_id: u16,
    transmission_type: u8,
    mapping: PdoMapping,
    inhibit_us: u32,
    event_us: u32,
    sync_start: u8,
    sync_overflow: u8,
    inhibit_timer_us: u32,
    event_timer_us: u32,
    sync_counter: u8,
    send_request: bool,
    last_sent: Option<Vec<u8>>,
}

impl Tpdo {
    pub fn new(num: usize) -> Self {
        Tpdo {
            num,
            valid: false,
            cob_id: 0,
            transmission_type: TRANSMISSION_EVENT_PROFILE,
            mapping: PdoMapping::default(),
            inhibit_us: 0,
            event_us: 0,
            sync_start: 0,
            sync_overflow: 0,
            inhibit_timer_us: 0,
            event_timer_us: 0,
            sync_counter: SYNC_COUNTER_UNSTARTED,
            send_request: false,
            last_sent: None,
        }
    }

    /// Reads `0x1800+num` and `0x1A00+num`.
    pub fn configure(&mut self, od: &dyn OdAccess, node_id: u8) -> Result<(), AbortCode> {
        let comm = REG_TPDO_COMM + self.num as u16;
        self.valid = false;
        self.sync_counter = SYNC_COUNTER_UNSTARTED;
        self.inhibit_timer_us = 0;
        self.last_sent = None;
        let Some(raw) = fetch_u32(od, comm, 1) else {
            return Ok(());
        };
        self.cob_id = resolve_cob_id(PdoType::TPDO, self.num, raw, node_id);
        self.transmission_type = fetch_u8(od, comm, 2).unwrap_or(TRANSMISSION_EVENT_PROFILE);
        self.inhibit_us = fetch_u16(od, comm, 3).unwrap_or(0) as u32 * 100;
        self.event_us = fetch_u16(od, comm, 5).unwrap_or(0) as u32 * 1000;
        self.sync_start = fetch_u8(od, comm, 6).unwrap_or(0);
        self.sync_overflow = fetch_u8(od, REG_SYNC_OVERFLOW, 0).unwrap_or(0);
        self.event_timer_us = self.event_us;
        self.mapping = PdoMapping::from_od(od, PdoType::TPDO, REG_TPDO_MAPPING + self.num as u16)
            .inspect_err(|err| { warn!("TPDO{} mapping rejected: {:?}", self.num + 1, err); })?;
        let supported = self.transmission_type <= TRANSMISSION_SYNC_MAX || self.is_event_driven();
        if !supported {
            warn!("TPDO{} transmission type {} not supported", self.num + 1, self.transmission_type);
        }
        self.valid = raw & COB_ID_INVALID == 0 && self.cob_id != 0 && supported && self.mapping.total_bits() > 0;
        Ok(())
    }

    pub fn num(&self) -> usize {
        self.num
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn cob_id(&self) -> u16 {
        self.cob_id
    }

    pub fn mapping(&self) -> &PdoMapping {
        &self.mapping
    }

    pub fn transmission_type(&self) -> u8 {
        self.transmission_type
    }

    fn is_event_driven(&self) -> bool {
        matches!(self.transmission_type, TRANSMISSION_EVENT_MANUFACTURER | TRANSMISSION_EVENT_PROFILE)
    }

    /// Requests a transmission of an acyclic or event driven TPDO. The
    /// request survives until the PDO can be sent.
    /// Follows a change of the SYNC counter overflow value (`0x1019`).
    pub fn set_sync_overflow(&mut self, overflow: u8) {
        self.sync_overflow = overflow;
        self.sync_counter = SYNC_COUNTER_UNSTARTED;
    }

    pub fn request_send(&mut self) {
        self.send_request = true;
    }

    pub fn is_send_pending(&self) -> bool {
        self.send_request
    }

    pub fn on_enter_operational(&mut self) {
        self.sync_counter = SYNC_COUNTER_UNSTARTED;
        self.inhibit_timer_us = 0;
        self.event_timer_us = self.event_us;
        self.last_sent = None;
        if self.is_event_driven() {
            self.send_request = true;
        }
    }

    fn send(&mut self, od: &dyn OdAccess, tx: &mut dyn Transmit) -> bool {
        let data = match self.mapping.pack(od) {
            Ok(data) => data,
            Err(err) => {
                warn!("TPDO{} pack failed: {:?}", self.num + 1, err);
                return false;
            }
        };
        if let Err(err) = tx.send(self.cob_id, &data) {
            warn!("TPDO{} transmit failed: {:?}", self.num + 1, err);
        }
        debug!("TPDO{} sent {:02x?}", self.num + 1, data);
        self.last_sent = Some(data);
        self.send_request = false;
        self.inhibit_timer_us = self.inhibit_us;
        self.event_timer_us = self.event_us;
        true
    }

    /// Returns `true` when the PDO was transmitted.
    #[allow(clippy::too_many_arguments)]
    pub fn process(
        &mut self,
        sync_was: bool,
        sync_counter: u8,
        elapsed_us: u32,
        operational: bool,
        od: &dyn OdAccess,
        tx: &mut dyn Transmit,
        timer_next_us: &mut u32,
    ) -> bool {
        if !self.valid {
            return false;
        }
        if !operational {
            self.sync_counter = SYNC_COUNTER_UNSTARTED;
            self.inhibit_timer_us = 0;
            return false;
        }
        self.inhibit_timer_us = self.inhibit_timer_us.saturating_sub(elapsed_us);

        if self.transmission_type == TRANSMISSION_SYNC_ACYCLIC {
            if self.is_changed(od) {
                self.send_request = true;
            }
            return sync_was && self.send_request && self.send(od, tx);
        }

        if self.transmission_type <= TRANSMISSION_SYNC_MAX {
            if !sync_was {
                return false;
            }
            if self.sync_counter == SYNC_COUNTER_UNSTARTED {
                // The start value only applies when SYNC carries a counter.
                self.sync_counter = if self.sync_start > 0 && self.sync_overflow > 1 {
                    SYNC_COUNTER_WAIT_START
                } else {
                    self.transmission_type
                };
            }
            if self.sync_counter == SYNC_COUNTER_WAIT_START {
                if sync_counter != self.sync_start {
                    return false;
                }
                self.sync_counter = self.transmission_type;
                return self.send(od, tx);
            }
            self.sync_counter = self.sync_counter.saturating_sub(1);
            if self.sync_counter == 0 {
                self.sync_counter = self.transmission_type;
                return self.send(od, tx);
            }
            return false;
        }

        // Event driven.
        if self.event_us > 0 {
            self.event_timer_us = self.event_timer_us.saturating_sub(elapsed_us);
            if self.event_timer_us == 0 {
                self.send_request = true;
            }
        }
        if !self.send_request && self.is_changed(od) {
            self.send_request = true;
        }
        let mut sent = false;
        if self.send_request && self.inhibit_timer_us == 0 {
            sent = self.send(od, tx);
        }
        if self.send_request {
            *timer_next_us = (*timer_next_us).min(self.inhibit_timer_us);
        } else if self.event_us > 0 {
            *timer_next_us = (*timer_next_us).min(self.event_timer_us);
        }
        sent
    }

    fn is_changed(&self, od: &dyn OdAccess) -> bool {
        match (&self.last_sent, self.mapping.pack(od)) {
            (Some(last), Ok(now)) => *last != now,
            (None, Ok(_)) => true,
            (_, Err(_)) => false,
        }
    }
}

/// Validates an SDO write to a PDO communication or mapping parameter before
/// it reaches the dictionary. Writes to other objects pass.
pub fn check_param_write(
    od: &dyn OdAccess,
    registry: &dyn IdentRegistry,
    node_id: u8,
    index: u16,
    sub_index: u8,
    data: &[u8],
) -> Result<(), AbortCode> {
    let Some((pdo_type, num, is_mapping)) = pdo_param_kind(index) else {
        return Ok(());
    };
    let comm = pdo_type.comm_base() + num as u16;
    let current_cob = fetch_u32(od, comm, 1).unwrap_or(COB_ID_INVALID);
    let is_valid = current_cob & COB_ID_INVALID == 0;
    let value = le_u64(data) as u32;

    if is_mapping {
        if is_valid {
            return Err(AbortCode::UnsupportedAccessToObject);
        }
        let mapping = pdo_type.mapping_base() + num as u16;
        if sub_index == 0 {
            let count = value as usize;
            if count > MAX_MAPPED_OBJECTS {
                return Err(AbortCode::ValueRangeExceeded);
            }
            let mut raw = Vec::with_capacity(count);
            for sub in 1..=count as u8 {
                raw.push(fetch_u32(od, mapping, sub).ok_or(AbortCode::ObjectCannotBeMappedToPDO)?);
            }
            PdoMapping::from_raw(od, pdo_type, &raw)?;
        } else {
            if fetch_u8(od, mapping, 0).unwrap_or(0) != 0 {
                return Err(AbortCode::UnsupportedAccessToObject);
            }
            if value != 0 {
                MappedObject::from_raw(value).validate(od, pdo_type)?;
            }
        }
        return Ok(());
    }

    match sub_index {
        1 => {
            // Extended frames are not supported.
            if value & 0x2000_0000 != 0 {
                return Err(AbortCode::ValueRangeExceeded);
            }
            let new_valid = value & COB_ID_INVALID == 0;
            if !new_valid {
                return Ok(());
            }
            let new_id = resolve_cob_id(pdo_type, num, value, node_id);
            let old_id = resolve_cob_id(pdo_type, num, current_cob, node_id);
            if is_valid && new_id != old_id {
                return Err(AbortCode::ValueRangeExceeded);
            }
            if new_id == 0 || is_restricted_cob_id(new_id) {
                return Err(AbortCode::ValueRangeExceeded);
            }
            let in_use = match pdo_type {
                PdoType::RPDO => registry.rx_in_use(new_id, RxTarget::Rpdo(num)),
                PdoType::TPDO => registry.tx_in_use(new_id, TxSource::Tpdo(num)),
            };
            if in_use {
                return Err(AbortCode::GeneralParameterIncompatibility);
            }
            Ok(())
        }
        2 => {
            let transmission_type = value as u8;
            if (TRANSMISSION_SYNC_MAX + 1..TRANSMISSION_EVENT_MANUFACTURER).contains(&transmission_type) {
                return Err(AbortCode::ValueRangeExceeded);
            }
            Ok(())
        }
        3 if pdo_type == PdoType::TPDO && is_valid => Err(AbortCode::ValueRangeExceeded),
        6 if pdo_type == PdoType::TPDO => {
            if is_valid || value > TRANSMISSION_SYNC_MAX as u32 {
                return Err(AbortCode::ValueRangeExceeded);
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
