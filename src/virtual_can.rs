//! In-memory CAN driver for simulation and tests.
//!
//! `VirtualCan` is a cheap handle: clones share one bus, so a test can keep a
//! handle while the stack owns another, inject frames on one side and collect
//! what the stack transmitted on the other.

use alloc::rc::Rc;
use core::cell::RefCell;

use embedded_can::{ErrorKind, Frame, Id, StandardId};

use crate::prelude::*;

#[derive(Clone, PartialEq, Eq)]
pub struct VirtualFrame {
    id: Id,
    data: [u8; 8],
    dlc: usize,
    remote: bool,
}

impl VirtualFrame {
    pub fn new_std(cob_id: u16, data: &[u8]) -> Option<Self> {
        <VirtualFrame as Frame>::new(StandardId::new(cob_id)?, data)
    }

    /// Standard identifier, 0xFFFF for extended frames.
    pub fn cob_id(&self) -> u16 {
        match self.id {
            Id::Standard(sid) => sid.as_raw(),
            Id::Extended(_) => 0xFFFF,
        }
    }
}

impl Frame for VirtualFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > 8 {
            return None;
        }
        let mut buf = [0u8; 8];
        buf[..data.len()].copy_from_slice(data);
        Some(VirtualFrame { id: id.into(), data: buf, dlc: data.len(), remote: false })
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > 8 {
            return None;
        }
        Some(VirtualFrame { id: id.into(), data: [0; 8], dlc, remote: true })
    }

    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    fn is_remote_frame(&self) -> bool {
        self.remote
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        self.dlc
    }

    fn data(&self) -> &[u8] {
        if self.remote {
            &[]
        } else {
            &self.data[..self.dlc]
        }
    }
}

impl Debug for VirtualFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03X} [{}] {:02x?}", self.cob_id(), self.dlc, self.data())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualCanError {
    TxQueueFull,
}

impl embedded_can::Error for VirtualCanError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Overrun
    }
}

#[derive(Debug, Default)]
struct Bus {
    rx: VecDeque<VirtualFrame>,
    tx: VecDeque<VirtualFrame>,
    tx_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct VirtualCan {
    bus: Rc<RefCell<Bus>>,
}

impl VirtualCan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transmit attempts beyond `capacity` untaken frames report `WouldBlock`.
    pub fn with_tx_capacity(capacity: usize) -> Self {
        let can = Self::default();
        can.bus.borrow_mut().tx_capacity = Some(capacity);
        can
    }

    /// Queues a frame for the stack to receive. Identifiers above 0x7FF are ignored.
    pub fn inject(&self, cob_id: u16, data: &[u8]) {
        if let Some(frame) = VirtualFrame::new_std(cob_id, data) {
            self.bus.borrow_mut().rx.push_back(frame);
        }
    }

    pub fn inject_frame(&self, frame: VirtualFrame) {
        self.bus.borrow_mut().rx.push_back(frame);
    }

    pub fn pending_rx(&self) -> usize {
        self.bus.borrow().rx.len()
    }

    /// Drains every frame transmitted so far, oldest first.
    pub fn take_sent(&self) -> Vec<VirtualFrame> {
        self.bus.borrow_mut().tx.drain(..).collect()
    }
}

impl embedded_can::nb::Can for VirtualCan {
    type Frame = VirtualFrame;
    type Error = VirtualCanError;

    fn transmit(&mut self, frame: &Self::Frame) -> nb::Result<Option<Self::Frame>, Self::Error> {
        let mut bus = self.bus.borrow_mut();
        if bus.tx_capacity.is_some_and(|cap| bus.tx.len() >= cap) {
            return Err(nb::Error::WouldBlock);
        }
        bus.tx.push_back(frame.clone());
        Ok(None)
    }

    fn receive(&mut self) -> nb::Result<Self::Frame, Self::Error> {
        self.bus.borrow_mut().rx.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_can::nb::Can;

    #[test]
    fn test_frame_accessors() {
        let frame = VirtualFrame::new_std(0x181, &[1, 2]).unwrap();
        assert_eq!(frame.cob_id(), 0x181);
        assert_eq!(frame.dlc(), 2);
        assert_eq!(frame.data(), &[1, 2]);
        assert!(frame.is_standard());
        assert!(VirtualFrame::new_std(0x800, &[]).is_none());
        assert!(VirtualFrame::new_std(0x100, &[0; 9]).is_none());
        assert_eq!(format!("{:?}", frame), "181 [2] [01, 02]");
    }

    #[test]
    fn test_shared_bus() {
        let test_side = VirtualCan::new();
        let mut stack_side = test_side.clone();
        test_side.inject(0x000, &[1, 0]);
        assert_eq!(stack_side.receive().unwrap().data(), &[1, 0]);
        assert!(matches!(stack_side.receive(), Err(nb::Error::WouldBlock)));
        stack_side.transmit(&VirtualFrame::new_std(0x701, &[0]).unwrap()).unwrap();
        assert_eq!(test_side.take_sent().len(), 1);
        assert!(test_side.take_sent().is_empty());
    }
}
