//! Heartbeat consumer (0x1016).
//!
//! Each configured entry watches the heartbeat of one remote node. An entry
//! becomes active on the first heartbeat and times out once when no heartbeat
//! arrives within its period; the next heartbeat recovers it.

use crate::constant::{COB_FUNC_HEARTBEAT, NODE_ID_MAX, NODE_ID_MIN, REG_CONSUMER_HEARTBEAT_TIME};
use crate::emergency::{Emergency, EmergencyErrorCode, ErrorStatus};
use crate::error::ErrorCode;
use crate::nmt::NmtState;
use crate::object_directory::{fetch_u32, OdAccess};
use crate::prelude::*;
use crate::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HbState {
    /// Entry disabled, node id or time is 0.
    Unconfigured,
    /// Configured, no heartbeat seen since (re)start or remote reset.
    Unknown,
    Active,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HbEvent {
    Timeout { node_id: u8 },
    RemoteReset { node_id: u8 },
    StateChanged { node_id: u8, state: NmtState },
}

#[derive(Debug, Clone)]
pub struct HbEntry {
    node_id: u8,
    period_us: u32,
    timer_us: u32,
    state: HbState,
    nmt_state: Option<NmtState>,
    boot_seen: bool,
}

impl HbEntry {
    fn unconfigured() -> Self {
        HbEntry {
            node_id: 0,
            period_us: 0,
            timer_us: 0,
            state: HbState::Unconfigured,
            nmt_state: None,
            boot_seen: false,
        }
    }

    /// Decodes a 0x1016 sub-entry: node id in bits 16..24, time in ms in bits 0..16.
    fn from_raw(raw: u32) -> Self {
        let node_id = (raw >> 16) as u8;
        let period_ms = raw & 0xFFFF;
        if !(NODE_ID_MIN..=NODE_ID_MAX).contains(&node_id) || period_ms == 0 {
            return HbEntry::unconfigured();
        }
        HbEntry {
            node_id,
            period_us: period_ms * 1000,
            state: HbState::Unknown,
            ..HbEntry::unconfigured()
        }
    }

    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    pub fn state(&self) -> HbState {
        self.state
    }

    /// Last NMT state reported by the remote node.
    pub fn nmt_state(&self) -> Option<NmtState> {
        self.nmt_state
    }

    pub fn cob_id(&self) -> Option<u16> {
        (self.state != HbState::Unconfigured).then(|| COB_FUNC_HEARTBEAT + self.node_id as u16)
    }
}

#[derive(Debug)]
pub struct HbConsumer {
    entries: Vec<HbEntry>,
    events: VecDeque<HbEvent>,
}

impl HbConsumer {
    pub fn new(count: usize) -> Result<Self, ErrorCode> {
        let mut entries = Vec::new();
        entries.try_reserve_exact(count).map_err(|_| ErrorCode::OutOfMemory)?;
        entries.resize(count, HbEntry::unconfigured());
        Ok(HbConsumer { entries, events: VecDeque::new() })
    }

    pub fn configure(&mut self, od: &dyn OdAccess) {
        for (i, entry) in self.entries.iter_mut().enumerate() {
            *entry = fetch_u32(od, REG_CONSUMER_HEARTBEAT_TIME, i as u8 + 1)
                .map(HbEntry::from_raw)
                .unwrap_or_else(HbEntry::unconfigured);
        }
        for (i, a) in self.entries.iter().enumerate() {
            if a.state != HbState::Unconfigured
                && self.entries[..i].iter().any(|b| b.state != HbState::Unconfigured && b.node_id == a.node_id) {
                warn!("Heartbeat consumer node {} configured twice", a.node_id);
            }
        }
        self.events.clear();
    }

    /// Reconfigures a single entry, used after 0x1016 is written.
    pub fn configure_entry(&mut self, index: usize, raw: u32) {
        if let Some(entry) = self.entries.get_mut(index) {
            *entry = HbEntry::from_raw(raw);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, index: usize) -> Option<&HbEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[HbEntry] {
        &self.entries
    }

    pub fn all_active(&self) -> bool {
        self.entries.iter().all(|e| matches!(e.state, HbState::Active | HbState::Unconfigured))
    }

    pub fn all_operational(&self) -> bool {
        self.entries.iter().all(|e| {
            e.state == HbState::Unconfigured || (e.state == HbState::Active && e.nmt_state == Some(NmtState::Operational))
        })
    }

    /// Handles a heartbeat frame for entry `index`. Frames with a length
    /// other than 1 are ignored.
    pub fn on_frame(&mut self, index: usize, data: &[u8]) {
        let Some(entry) = self.entries.get_mut(index) else { return };
        if entry.state == HbState::Unconfigured || data.len() != 1 {
            return;
        }
        let Ok(state) = NmtState::try_from(data[0]) else {
            debug!("Invalid heartbeat code {:#x} from node {}", data[0], entry.node_id);
            return;
        };
        if state == NmtState::Initializing {
            entry.state = HbState::Unknown;
            entry.nmt_state = Some(state);
            entry.timer_us = 0;
            entry.boot_seen = true;
            self.events.push_back(HbEvent::RemoteReset { node_id: entry.node_id });
            return;
        }
        entry.timer_us = 0;
        entry.state = HbState::Active;
        if entry.nmt_state != Some(state) {
            entry.nmt_state = Some(state);
            self.events.push_back(HbEvent::StateChanged { node_id: entry.node_id, state });
        }
    }

    /// Advances the entry timers and reports timeouts and remote resets over
    /// EMCY. Timers run only while `enabled`.
    pub fn process(&mut self, enabled: bool, elapsed_us: u32, em: &mut Emergency, timer_next_us: &mut u32) {
        if !enabled {
            for entry in self.entries.iter_mut().filter(|e| e.state != HbState::Unconfigured) {
                entry.state = HbState::Unknown;
                entry.nmt_state = None;
                entry.timer_us = 0;
            }
            return;
        }
        let mut timed_out = false;
        let mut remote_reset = false;
        for entry in self.entries.iter_mut() {
            match entry.state {
                HbState::Active => {
                    entry.timer_us = entry.timer_us.saturating_add(elapsed_us);
                    if entry.timer_us > entry.period_us {
                        warn!("Heartbeat of node {} timed out", entry.node_id);
                        entry.state = HbState::TimedOut;
                        entry.nmt_state = None;
                        self.events.push_back(HbEvent::Timeout { node_id: entry.node_id });
                        em.report(ErrorStatus::HEARTBEAT_CONSUMER, EmergencyErrorCode::HeartbeatTimeout,
                                  entry.node_id as u32);
                    } else {
                        *timer_next_us = (*timer_next_us).min(entry.period_us - entry.timer_us + 1);
                    }
                }
                HbState::Unknown if entry.boot_seen => {
                    entry.boot_seen = false;
                    remote_reset = true;
                    em.report(ErrorStatus::HB_CONSUMER_REMOTE_RESET, EmergencyErrorCode::HeartbeatTimeout,
                              entry.node_id as u32);
                }
                _ => {}
            }
            timed_out |= entry.state == HbState::TimedOut;
        }
        if !timed_out {
            em.reset(ErrorStatus::HEARTBEAT_CONSUMER, 0);
        }
        if !remote_reset && self.entries.iter().all(|e| e.state != HbState::Unknown || e.nmt_state.is_none()) {
            em.reset(ErrorStatus::HB_CONSUMER_REMOTE_RESET, 0);
        }
    }

    pub fn take_events(&mut self) -> Vec<HbEvent> {
        self.events.drain(..).collect()
    }
}
