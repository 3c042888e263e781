use embedded_can::nb::Can;
use embedded_can::Frame;

use crate::constant::VALID_BIT_RATES;
use crate::error::ErrorCode;
use crate::prelude::*;
use crate::util::create_frame;
use crate::{debug, warn};

/// Transmit side of the CAN boundary. Every producer sends through it.
pub trait Transmit {
    fn send(&mut self, cob_id: u16, data: &[u8]) -> Result<(), ErrorCode>;
}

/// Consumer a received identifier is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RxTarget {
    Nmt,
    Sync,
    Time,
    Emergency,
    Rpdo(usize),
    SdoServer(usize),
    SdoClient(usize),
    HbConsumer(usize),
    Lss,
}

/// Producer owning a transmit identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxSource {
    Heartbeat,
    Emergency,
    Sync,
    Time,
    Tpdo(usize),
    SdoServer(usize),
    SdoClient(usize),
    Lss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxFilter {
    pub ident: u16,
    pub mask: u16,
    pub target: RxTarget,
}

impl RxFilter {
    fn matches(&self, ident: u16) -> bool {
        (ident ^ self.ident) & self.mask == 0
    }

    fn is_exact(&self) -> bool {
        self.mask == 0x7FF
    }
}

/// Identifier ownership lookups, used to validate COB-ID changes over SDO.
pub trait IdentRegistry {
    fn rx_in_use(&self, ident: u16, except: RxTarget) -> bool;
    fn tx_in_use(&self, ident: u16, except: TxSource) -> bool;
}

/// Wraps a CAN driver with the receive registration table and the set of
/// transmit identifiers in use.
pub struct CanModule<CAN: Can> {
    can: CAN,
    bit_rate: u16,
    rx_filters: Vec<RxFilter>,
    tx_idents: Vec<(u16, TxSource)>,
    tx_errors: u32,
}

impl<CAN: Can> CanModule<CAN> where CAN::Frame: Frame + Debug {
    /// `bit_rate` is in kbit/s and must be one of the CiA 301 rates.
    pub fn new(can: CAN, bit_rate: u16) -> Result<Self, ErrorCode> {
        if !VALID_BIT_RATES.contains(&bit_rate) {
            return Err(ErrorCode::IllegalBaudRate { bit_rate });
        }
        Ok(CanModule {
            can,
            bit_rate,
            rx_filters: Vec::new(),
            tx_idents: Vec::new(),
            tx_errors: 0,
        })
    }

    pub fn bit_rate(&self) -> u16 {
        self.bit_rate
    }

    pub fn tx_errors(&self) -> u32 {
        self.tx_errors
    }

    pub fn inner(&self) -> &CAN {
        &self.can
    }

    pub fn inner_mut(&mut self) -> &mut CAN {
        &mut self.can
    }

    pub fn into_inner(self) -> CAN {
        self.can
    }

    pub fn clear_registrations(&mut self) {
        self.rx_filters.clear();
        self.tx_idents.clear();
    }

    /// Registers a receive filter. Filters are matched in registration order.
    /// Two exact filters for the same identifier are rejected.
    pub fn rx_config(&mut self, ident: u16, mask: u16, target: RxTarget) -> Result<(), ErrorCode> {
        if ident > 0x7FF {
            return Err(ErrorCode::IllegalArgument {
                more_info: format!("rx identifier {:#x} out of range for {:?}", ident, target),
            });
        }
        let filter = RxFilter { ident, mask: mask & 0x7FF, target };
        if filter.is_exact() && self.rx_in_use(ident, target) {
            return Err(ErrorCode::DuplicateIdentifier { cob_id: ident });
        }
        self.rx_filters.push(filter);
        Ok(())
    }

    pub fn tx_config(&mut self, ident: u16, source: TxSource) -> Result<(), ErrorCode> {
        if ident > 0x7FF {
            return Err(ErrorCode::IllegalArgument {
                more_info: format!("tx identifier {:#x} out of range for {:?}", ident, source),
            });
        }
        if self.tx_in_use(ident, source) {
            return Err(ErrorCode::DuplicateIdentifier { cob_id: ident });
        }
        self.tx_idents.push((ident, source));
        Ok(())
    }

    pub fn lookup(&self, ident: u16) -> Option<RxTarget> {
        self.rx_filters.iter().find(|f| f.matches(ident)).map(|f| f.target)
    }

    pub fn rx_filters(&self) -> &[RxFilter] {
        &self.rx_filters
    }

    pub fn tx_identifiers(&self) -> Vec<u16> {
        self.tx_idents.iter().map(|(ident, _)| *ident).collect()
    }

    pub fn rx_identifiers(&self) -> Vec<u16> {
        self.rx_filters.iter().filter(|f| f.is_exact()).map(|f| f.ident).collect()
    }

    /// Non-blocking receive. Driver errors are logged and treated as "nothing received".
    pub fn receive(&mut self) -> Option<CAN::Frame> {
        match self.can.receive() {
            Ok(frame) => Some(frame),
            Err(nb::Error::WouldBlock) => None,
            Err(nb::Error::Other(err)) => {
                warn!("CAN receive error: {:?}", err);
                None
            }
        }
    }
}

impl<CAN: Can> IdentRegistry for CanModule<CAN> {
    fn rx_in_use(&self, ident: u16, except: RxTarget) -> bool {
        self.rx_filters.iter().any(|f| f.is_exact() && f.ident == ident && f.target != except)
    }

    fn tx_in_use(&self, ident: u16, except: TxSource) -> bool {
        self.tx_idents.iter().any(|(i, s)| *i == ident && *s != except)
    }
}

impl<CAN: Can> Transmit for CanModule<CAN> where CAN::Frame: Frame + Debug {
    fn send(&mut self, cob_id: u16, data: &[u8]) -> Result<(), ErrorCode> {
        let frame: CAN::Frame = create_frame(cob_id, data)?;
        match self.can.transmit(&frame) {
            Ok(replaced) => {
                if let Some(replaced) = replaced {
                    debug!("CAN driver replaced pending frame {:?}", replaced);
                }
                Ok(())
            }
            Err(nb::Error::WouldBlock) => {
                self.tx_errors = self.tx_errors.wrapping_add(1);
                Err(ErrorCode::CanTxOverflow { cob_id })
            }
            Err(nb::Error::Other(err)) => {
                self.tx_errors = self.tx_errors.wrapping_add(1);
                warn!("CAN transmit error on {:#x}: {:?}", cob_id, err);
                Err(ErrorCode::CanTxFailed { cob_id })
            }
        }
    }
}
