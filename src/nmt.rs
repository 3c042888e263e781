use crate::can::Transmit;
use crate::constant::{COB_FUNC_HEARTBEAT, REG_ERROR_BEHAVIOR, REG_NMT_STARTUP, REG_PRODUCER_HEARTBEAT_TIME};
use crate::emergency::ERROR_REGISTER_COMMUNICATION;
use crate::object_directory::{fetch_u16, fetch_u32, fetch_u8, OdAccess};
use crate::prelude::*;
use crate::{info, warn};

/// NMT state of the local node. The discriminant is the heartbeat code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NmtState {
    Initializing = 0,
    Stopped = 4,
    Operational = 5,
    PreOperational = 127,
}

impl NmtState {
    pub fn heartbeat_code(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for NmtState {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(NmtState::Initializing),
            4 => Ok(NmtState::Stopped),
            5 => Ok(NmtState::Operational),
            127 => Ok(NmtState::PreOperational),
            other => Err(other),
        }
    }
}

impl fmt::Display for NmtState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NmtState::Initializing => write!(f, "Initializing"),
            NmtState::Stopped => write!(f, "Stopped"),
            NmtState::Operational => write!(f, "Operational"),
            NmtState::PreOperational => write!(f, "PreOperational"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NmtCommand {
    Start,
    Stop,
    EnterPreOperational,
    ResetNode,
    ResetCommunication,
}

impl TryFrom<u8> for NmtCommand {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(NmtCommand::Start),
            0x02 => Ok(NmtCommand::Stop),
            0x80 => Ok(NmtCommand::EnterPreOperational),
            0x81 => Ok(NmtCommand::ResetNode),
            0x82 => Ok(NmtCommand::ResetCommunication),
            other => Err(other),
        }
    }
}

/// Reset requested by the network, handed to the application by `CanOpen::process`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetCommand {
    #[default]
    None,
    /// Re-run communication init (`CanOpen::init`).
    Communication,
    /// Reset the whole application.
    Application,
}

/// Reaction to a communication error while Operational (0x1029:01).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorBehavior {
    PreOperational,
    #[default]
    NoChange,
    Stopped,
}

impl From<u8> for ErrorBehavior {
    fn from(value: u8) -> Self {
        match value {
            0 => ErrorBehavior::PreOperational,
            2 => ErrorBehavior::Stopped,
            _ => ErrorBehavior::NoChange,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NmtTransition {
    pub from: NmtState,
    pub to: NmtState,
}

/// 0x1F80 bit 2: do not start automatically.
const STARTUP_NO_AUTOSTART: u32 = 0x04;

#[derive(Debug)]
pub struct Nmt {
    node_id: u8,
    state: NmtState,
    reset: ResetCommand,
    hb_time_us: u32,
    hb_timer_us: u32,
    hb_last_state: Option<NmtState>,
    autostart: bool,
    autostart_pending: bool,
    error_behavior: ErrorBehavior,
}

impl Default for Nmt {
    fn default() -> Self {
        Self::new()
    }
}

impl Nmt {
    pub fn new() -> Self {
        Nmt {
            node_id: 0,
            state: NmtState::Initializing,
            reset: ResetCommand::None,
            hb_time_us: 0,
            hb_timer_us: 0,
            hb_last_state: None,
            autostart: false,
            autostart_pending: false,
            error_behavior: ErrorBehavior::NoChange,
        }
    }

    /// Reads 0x1017, 0x1F80 and 0x1029. Missing entries mean heartbeat off,
    /// no auto-start and no state change on errors.
    pub fn configure(&mut self, node_id: u8, od: &dyn OdAccess) {
        self.node_id = node_id;
        self.state = NmtState::Initializing;
        self.reset = ResetCommand::None;
        self.set_heartbeat_time_ms(fetch_u16(od, REG_PRODUCER_HEARTBEAT_TIME, 0).unwrap_or(0));
        self.autostart = fetch_u32(od, REG_NMT_STARTUP, 0)
            .is_some_and(|v| v & STARTUP_NO_AUTOSTART == 0);
        self.error_behavior = fetch_u8(od, REG_ERROR_BEHAVIOR, 1)
            .map(ErrorBehavior::from)
            .unwrap_or_default();
    }

    pub fn set_heartbeat_time_ms(&mut self, ms: u16) {
        self.hb_time_us = ms as u32 * 1000;
        self.hb_timer_us = self.hb_time_us;
    }

    pub fn set_error_behavior(&mut self, behavior: ErrorBehavior) {
        self.error_behavior = behavior;
    }

    pub fn heartbeat_cob_id(&self) -> u16 {
        COB_FUNC_HEARTBEAT + self.node_id as u16
    }

    pub fn state(&self) -> NmtState {
        self.state
    }

    pub fn is_operational(&self) -> bool {
        self.state == NmtState::Operational
    }

    pub fn is_pre_or_operational(&self) -> bool {
        matches!(self.state, NmtState::PreOperational | NmtState::Operational)
    }

    /// Sends the boot-up message and enters Pre-Operational.
    pub fn boot(&mut self, tx: &mut dyn Transmit) -> Option<NmtTransition> {
        if let Err(err) = tx.send(self.heartbeat_cob_id(), &[NmtState::Initializing.heartbeat_code()]) {
            warn!("Failed to send boot-up message: {:?}", err);
        }
        self.autostart_pending = self.autostart;
        self.hb_timer_us = self.hb_time_us;
        self.hb_last_state = Some(NmtState::PreOperational);
        self.set_state(NmtState::PreOperational)
    }

    /// Local state change. Reset states are reached through [`Nmt::process_command`] only.
    pub fn set_state(&mut self, to: NmtState) -> Option<NmtTransition> {
        let from = self.state;
        if from == to {
            return None;
        }
        info!("NMT state {} -> {}", from, to);
        self.state = to;
        Some(NmtTransition { from, to })
    }

    /// Handles an NMT module control frame `[command, node id]`.
    pub fn process_command(&mut self, data: &[u8]) -> Option<NmtTransition> {
        if data.len() != 2 || self.state == NmtState::Initializing {
            return None;
        }
        let (cs, target) = (data[0], data[1]);
        if target != 0 && target != self.node_id {
            return None;
        }
        match NmtCommand::try_from(cs) {
            Ok(NmtCommand::Start) => self.set_state(NmtState::Operational),
            Ok(NmtCommand::Stop) => self.set_state(NmtState::Stopped),
            Ok(NmtCommand::EnterPreOperational) => self.set_state(NmtState::PreOperational),
            Ok(NmtCommand::ResetNode) => {
                self.reset = ResetCommand::Application;
                self.set_state(NmtState::Initializing)
            }
            Ok(NmtCommand::ResetCommunication) => {
                self.reset = ResetCommand::Communication;
                self.set_state(NmtState::Initializing)
            }
            Err(cs) => {
                warn!("Unknown NMT command {:#x}", cs);
                None
            }
        }
    }

    pub fn take_reset(&mut self) -> ResetCommand {
        core::mem::take(&mut self.reset)
    }

    /// Heartbeat production, auto-start and error behaviour.
    pub fn process(
        &mut self,
        elapsed_us: u32,
        error_register: u8,
        tx: &mut dyn Transmit,
        timer_next_us: &mut u32,
    ) -> Option<NmtTransition> {
        if self.state == NmtState::Initializing {
            return None;
        }
        let mut transition = None;
        if self.autostart_pending {
            self.autostart_pending = false;
            transition = self.set_state(NmtState::Operational);
        }

        if error_register & ERROR_REGISTER_COMMUNICATION != 0 {
            let target = match (self.error_behavior, self.state) {
                (ErrorBehavior::PreOperational, NmtState::Operational) => Some(NmtState::PreOperational),
                (ErrorBehavior::Stopped, NmtState::Operational | NmtState::PreOperational) => Some(NmtState::Stopped),
                _ => None,
            };
            if let Some(target) = target {
                warn!("Communication error, error behaviour {:?}", self.error_behavior);
                transition = self.set_state(target).or(transition);
            }
        }

        if self.hb_time_us > 0 {
            self.hb_timer_us = self.hb_timer_us.saturating_sub(elapsed_us);
            if self.hb_timer_us == 0 || self.hb_last_state != Some(self.state) {
                if let Err(err) = tx.send(self.heartbeat_cob_id(), &[self.state.heartbeat_code()]) {
                    warn!("Failed to send heartbeat: {:?}", err);
                }
                self.hb_timer_us = self.hb_time_us;
                self.hb_last_state = Some(self.state);
            }
            *timer_next_us = (*timer_next_us).min(self.hb_timer_us);
        }
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[derive(Default)]
    struct Sent(Vec<(u16, Vec<u8>)>);

    impl Transmit for Sent {
        fn send(&mut self, cob_id: u16, data: &[u8]) -> Result<(), ErrorCode> {
            self.0.push((cob_id, data.to_vec()));
            Ok(())
        }
    }

    fn booted(hb_ms: u16) -> (Nmt, Sent) {
        let mut nmt = Nmt::new();
        nmt.node_id = 5;
        nmt.set_heartbeat_time_ms(hb_ms);
        let mut tx = Sent::default();
        let t = nmt.boot(&mut tx);
        assert_eq!(t, Some(NmtTransition { from: NmtState::Initializing, to: NmtState::PreOperational }));
        (nmt, tx)
    }

    #[test]
    fn test_boot_sends_boot_up() {
        let (nmt, tx) = booted(0);
        assert_eq!(tx.0, vec![(0x705, vec![0])]);
        assert_eq!(nmt.state(), NmtState::PreOperational);
    }

    #[test]
    fn test_commands() {
        let (mut nmt, _) = booted(0);
        assert!(nmt.process_command(&[0x01, 0x06]).is_none());
        assert!(nmt.process_command(&[0x01]).is_none());
        assert_eq!(nmt.process_command(&[0x01, 0x05]).map(|t| t.to), Some(NmtState::Operational));
        assert_eq!(nmt.process_command(&[0x02, 0x00]).map(|t| t.to), Some(NmtState::Stopped));
        assert_eq!(nmt.process_command(&[0x80, 0x00]).map(|t| t.to), Some(NmtState::PreOperational));
        assert!(nmt.process_command(&[0x80, 0x00]).is_none());
        assert!(nmt.process_command(&[0x33, 0x00]).is_none());
        assert_eq!(nmt.take_reset(), ResetCommand::None);
    }

    #[test]
    fn test_reset_commands() {
        let (mut nmt, _) = booted(0);
        nmt.process_command(&[0x82, 0x05]);
        assert_eq!(nmt.state(), NmtState::Initializing);
        assert_eq!(nmt.take_reset(), ResetCommand::Communication);
        assert_eq!(nmt.take_reset(), ResetCommand::None);
        // Nothing is accepted until communication is initialized again.
        assert!(nmt.process_command(&[0x01, 0x05]).is_none());

        let (mut nmt, _) = booted(0);
        nmt.process_command(&[0x81, 0x00]);
        assert_eq!(nmt.take_reset(), ResetCommand::Application);
    }

    #[test]
    fn test_heartbeat_producer() {
        let (mut nmt, mut tx) = booted(100);
        tx.0.clear();
        let mut next = u32::MAX;
        nmt.process(60_000, 0, &mut tx, &mut next);
        assert!(tx.0.is_empty());
        assert_eq!(next, 40_000);
        nmt.process(40_000, 0, &mut tx, &mut next);
        assert_eq!(tx.0, vec![(0x705, vec![127])]);

        // A state change is announced at once.
        tx.0.clear();
        nmt.process_command(&[0x01, 0x00]);
        nmt.process(1_000, 0, &mut tx, &mut next);
        assert_eq!(tx.0, vec![(0x705, vec![5])]);
    }

    #[test]
    fn test_autostart_and_error_behavior() {
        let (mut nmt, mut tx) = booted(0);
        nmt.autostart_pending = true;
        let mut next = u32::MAX;
        let t = nmt.process(1_000, 0, &mut tx, &mut next);
        assert_eq!(t.map(|t| t.to), Some(NmtState::Operational));

        // Default behaviour keeps the state.
        assert!(nmt.process(1_000, ERROR_REGISTER_COMMUNICATION | 1, &mut tx, &mut next).is_none());

        nmt.set_error_behavior(ErrorBehavior::from(0));
        let t = nmt.process(1_000, ERROR_REGISTER_COMMUNICATION | 1, &mut tx, &mut next);
        assert_eq!(t.map(|t| t.to), Some(NmtState::PreOperational));

        nmt.set_error_behavior(ErrorBehavior::Stopped);
        let t = nmt.process(1_000, ERROR_REGISTER_COMMUNICATION | 1, &mut tx, &mut next);
        assert_eq!(t.map(|t| t.to), Some(NmtState::Stopped));
    }

    #[test]
    fn test_state_codes() {
        for state in [NmtState::Initializing, NmtState::Stopped, NmtState::Operational, NmtState::PreOperational] {
            assert_eq!(NmtState::try_from(state.heartbeat_code()), Ok(state));
        }
        assert_eq!(NmtState::try_from(3), Err(3));
    }
}
