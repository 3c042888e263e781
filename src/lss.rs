//! LSS slave (CiA 305), enough to commission an unconfigured node: global and
//! selective state switching, node id and bit timing configuration, inquiries.

use crate::can::Transmit;
use crate::constant::{NODE_ID_MAX, NODE_ID_MIN, NODE_ID_UNCONFIGURED, VALID_BIT_RATES};
use crate::error::ErrorCode;
use crate::prelude::*;
use crate::{debug, info, warn};

mod cs {
    pub const SWITCH_STATE_GLOBAL: u8 = 0x04;
    pub const CONFIGURE_NODE_ID: u8 = 0x11;
    pub const CONFIGURE_BIT_TIMING: u8 = 0x13;
    pub const ACTIVATE_BIT_TIMING: u8 = 0x15;
    pub const STORE_CONFIGURATION: u8 = 0x17;
    pub const SWITCH_SELECTIVE_VENDOR: u8 = 0x40;
    pub const SWITCH_SELECTIVE_SERIAL: u8 = 0x43;
    pub const SWITCH_SELECTIVE_RESPONSE: u8 = 0x44;
    pub const INQUIRE_VENDOR: u8 = 0x5A;
    pub const INQUIRE_SERIAL: u8 = 0x5D;
    pub const INQUIRE_NODE_ID: u8 = 0x5E;
}

/// CiA 305 bit timing table 0, index to kbit/s. Index 5 (100 kbit/s) is not a CiA 301 rate.
const BIT_TIMING_TABLE: [u16; 9] = [1000, 800, 500, 250, 125, 0, 50, 20, 10];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LssState {
    Waiting,
    Configuration,
}

/// Vendor id, product code, revision and serial number (0x1018:01..04).
pub type LssAddress = [u32; 4];

#[derive(Debug)]
pub struct LssSlave {
    state: LssState,
    address: LssAddress,
    active_node_id: u8,
    pending_node_id: u8,
    active_bit_rate: u16,
    pending_bit_rate: u16,
    selective_match: u8,
}

impl LssSlave {
    /// `node_id` may be [`NODE_ID_UNCONFIGURED`]; `bit_rate` must be a CiA 301 rate.
    pub fn new(node_id: u8, bit_rate: u16, address: LssAddress) -> Result<Self, ErrorCode> {
        if !is_valid_node_id(node_id) {
            return Err(ErrorCode::IllegalArgument { more_info: format!("LSS node id {}", node_id) });
        }
        if !VALID_BIT_RATES.contains(&bit_rate) {
            return Err(ErrorCode::IllegalBaudRate { bit_rate });
        }
        Ok(LssSlave {
            state: LssState::Waiting,
            address,
            active_node_id: node_id,
            pending_node_id: node_id,
            active_bit_rate: bit_rate,
            pending_bit_rate: bit_rate,
            selective_match: 0,
        })
    }

    pub fn state(&self) -> LssState {
        self.state
    }

    /// Node id configured over LSS, applied by the application on the next
    /// communication reset.
    pub fn pending_node_id(&self) -> u8 {
        self.pending_node_id
    }

    pub fn pending_bit_rate(&self) -> u16 {
        self.pending_bit_rate
    }

    pub fn active_node_id(&self) -> u8 {
        self.active_node_id
    }

    pub fn active_bit_rate(&self) -> u16 {
        self.active_bit_rate
    }

    /// Called from communication init with the node id in effect.
    pub fn activate(&mut self, node_id: u8, bit_rate: u16) {
        self.active_node_id = node_id;
        self.active_bit_rate = bit_rate;
    }

    pub fn on_request(&mut self, data: &[u8], tx: &mut dyn Transmit, tx_cob_id: u16) {
        if data.len() != 8 {
            return;
        }
        let command = data[0];
        let response = match command {
            cs::SWITCH_STATE_GLOBAL => {
                self.state = if data[1] == 1 { LssState::Configuration } else { LssState::Waiting };
                debug!("LSS state {:?}", self.state);
                self.selective_match = 0;
                None
            }
            cs::SWITCH_SELECTIVE_VENDOR..=cs::SWITCH_SELECTIVE_SERIAL => {
                let step = command - cs::SWITCH_SELECTIVE_VENDOR;
                let value = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
                if step == 0 || self.selective_match == step {
                    self.selective_match = if value == self.address[step as usize] { step + 1 } else { 0 };
                } else {
                    self.selective_match = 0;
                }
                if self.selective_match == 4 && self.state == LssState::Waiting {
                    self.selective_match = 0;
                    self.state = LssState::Configuration;
                    Some([cs::SWITCH_SELECTIVE_RESPONSE, 0, 0, 0, 0, 0, 0, 0])
                } else {
                    None
                }
            }
            cs::INQUIRE_VENDOR..=cs::INQUIRE_SERIAL if self.state == LssState::Configuration => {
                let mut response = [command, 0, 0, 0, 0, 0, 0, 0];
                let value = self.address[(command - cs::INQUIRE_VENDOR) as usize];
                response[1..5].copy_from_slice(&value.to_le_bytes());
                Some(response)
            }
            cs::INQUIRE_NODE_ID if self.state == LssState::Configuration => {
                Some([command, self.active_node_id, 0, 0, 0, 0, 0, 0])
            }
            cs::CONFIGURE_NODE_ID if self.state == LssState::Configuration => {
                let node_id = data[1];
                let error = if is_valid_node_id(node_id) {
                    info!("LSS node id {} pending", node_id);
                    self.pending_node_id = node_id;
                    0
                } else {
                    1
                };
                Some([command, error, 0, 0, 0, 0, 0, 0])
            }
            cs::CONFIGURE_BIT_TIMING if self.state == LssState::Configuration => {
                let rate = match (data[1], BIT_TIMING_TABLE.get(data[2] as usize)) {
                    (0, Some(rate)) if *rate != 0 => Some(*rate),
                    _ => None,
                };
                let error = match rate {
                    Some(rate) => {
                        self.pending_bit_rate = rate;
                        0
                    }
                    None => 1,
                };
                Some([command, error, 0, 0, 0, 0, 0, 0])
            }
            cs::ACTIVATE_BIT_TIMING => None,
            cs::STORE_CONFIGURATION if self.state == LssState::Configuration => {
                // No persistent storage.
                Some([command, 1, 0, 0, 0, 0, 0, 0])
            }
            _ => None,
        };
        if let Some(response) = response {
            if let Err(err) = tx.send(tx_cob_id, &response) {
                warn!("Failed to send LSS response: {:?}", err);
            }
        }
    }
}

fn is_valid_node_id(node_id: u8) -> bool {
    (NODE_ID_MIN..=NODE_ID_MAX).contains(&node_id) || node_id == NODE_ID_UNCONFIGURED
}
