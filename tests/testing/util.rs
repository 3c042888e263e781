use std::fs::read_to_string;

use canopen_core::virtual_can::VirtualCan;
use canopen_core::{CanOpen, CanOpenConfig, ObjectDirectory, ResetCommand};
use embedded_can::Frame;

pub const DEMO_EDS_PATH: &str = "tests/fixtures/demo_device.eds";
pub const NODE_ID: u8 = 5;
pub const BIT_RATE: u16 = 250;

lazy_static! {
    pub static ref DEMO_EDS: String = read_to_string(DEMO_EDS_PATH).expect("Failed to read EDS file");
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn load_od(node_id: u8) -> ObjectDirectory {
    ObjectDirectory::new(node_id, &DEMO_EDS).expect("Failed to load EDS")
}

/// One device on its own virtual bus. `bus` is the test side of the bus.
pub struct TestNode {
    pub co: CanOpen<VirtualCan, ObjectDirectory>,
    pub bus: VirtualCan,
}

impl TestNode {
    /// Allocated and attached to the bus, not yet initialised.
    pub fn with_config(node_id: u8, tweak: impl FnOnce(&mut CanOpenConfig)) -> Self {
        init_logger();
        let od = load_od(node_id);
        let mut config = CanOpenConfig::from_od(&od);
        tweak(&mut config);
        let bus = VirtualCan::new();
        let mut co = CanOpen::new(config, od).expect("Failed to create CANopen objects");
        co.init_can(bus.clone(), BIT_RATE).expect("Failed to init CAN");
        TestNode { co, bus }
    }

    /// Initialised, Pre-Operational, boot-up message drained.
    pub fn new(node_id: u8) -> Self {
        let mut node = Self::with_config(node_id, |_| {});
        node.co.init(node_id).expect("Failed to init node");
        node.sent();
        node
    }

    /// Started by an NMT command, everything sent so far drained.
    pub fn operational(node_id: u8) -> Self {
        let mut node = Self::new(node_id);
        node.bus.inject(0x000, &[0x01, node_id]);
        node.tick(0);
        node.sent();
        node
    }

    pub fn sent(&self) -> Vec<(u16, Vec<u8>)> {
        self.bus.take_sent().iter().map(|f| (f.cob_id(), f.data().to_vec())).collect()
    }

    pub fn sent_on(&self, cob_id: u16) -> Vec<Vec<u8>> {
        self.sent().into_iter().filter(|(id, _)| *id == cob_id).map(|(_, data)| data).collect()
    }

    pub fn tick(&mut self, elapsed_us: u32) -> ResetCommand {
        let mut next = u32::MAX;
        self.co.process(elapsed_us, &mut next)
    }

    /// One real-time cycle in the documented order. Returns `sync_was`.
    pub fn rt_tick(&mut self, elapsed_us: u32) -> bool {
        let mut next = u32::MAX;
        let sync_was = self.co.process_sync(elapsed_us, &mut next);
        self.co.process_rpdo(sync_was);
        self.co.process_tpdo(sync_was, elapsed_us, &mut next);
        sync_was
    }

    /// Sends one SDO request to the default server and returns its responses.
    pub fn sdo(&mut self, request: &[u8]) -> Vec<Vec<u8>> {
        self.bus.inject(0x600 + self.co.node_id() as u16, &frame(request));
        self.tick(0);
        self.sent_on(0x580 + self.co.node_id() as u16)
    }
}

pub fn frame(bytes: &[u8]) -> [u8; 8] {
    let mut f = [0u8; 8];
    f[..bytes.len()].copy_from_slice(bytes);
    f
}

/// Delivers everything one node sent to the other, both ways, until the bus is quiet.
pub fn exchange(a: &mut TestNode, b: &mut TestNode) {
    for _ in 0..256 {
        let from_a = a.bus.take_sent();
        let from_b = b.bus.take_sent();
        if from_a.is_empty() && from_b.is_empty() {
            return;
        }
        for f in from_a {
            b.bus.inject_frame(f);
        }
        for f in from_b {
            a.bus.inject_frame(f);
        }
        a.tick(0);
        b.tick(0);
    }
    panic!("Bus never went quiet");
}
