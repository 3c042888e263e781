/// CANopen function code prefixes on COB-ID (pre-defined connection set).
pub const COB_FUNC_NMT: u16 = 0x000;
pub const COB_FUNC_SYNC: u16 = 0x080;
pub const COB_FUNC_EMCY: u16 = 0x080;
pub const COB_FUNC_TIME: u16 = 0x100;
pub const COB_FUNC_TPDO: [u16; 4] = [0x180, 0x280, 0x380, 0x480];
pub const COB_FUNC_RPDO: [u16; 4] = [0x200, 0x300, 0x400, 0x500];
pub const COB_FUNC_TRANSMIT_SDO: u16 = 0x580;
pub const COB_FUNC_RECEIVE_SDO: u16 = 0x600;
pub const COB_FUNC_HEARTBEAT: u16 = 0x700;
pub const COB_LSS_SLAVE: u16 = 0x7E4;
pub const COB_LSS_MASTER: u16 = 0x7E5;

pub const COB_ID_MASK: u32 = 0x7FF;
/// Bit 31 of a COB-ID entry: the object is not valid.
pub const COB_ID_INVALID: u32 = 0x8000_0000;
/// Bit 30 of the SYNC/TIME COB-ID entry: this node produces.
pub const COB_ID_PRODUCER: u32 = 0x4000_0000;
/// Bit 31 of the TIME COB-ID entry: this node consumes.
pub const COB_ID_CONSUMER: u32 = 0x8000_0000;

pub const NODE_ID_MIN: u8 = 1;
pub const NODE_ID_MAX: u8 = 127;
pub const NODE_ID_UNCONFIGURED: u8 = 0xFF;

/// Communication profile entries.
pub const REG_ERROR: u16 = 0x1001;
pub const REG_PRE_DEFINED_ERROR: u16 = 0x1003;
pub const REG_SYNC_COB_ID: u16 = 0x1005;
pub const REG_SYNC_PERIOD: u16 = 0x1006;
pub const REG_SYNC_WINDOW: u16 = 0x1007;
pub const REG_TIME_COB_ID: u16 = 0x1012;
pub const REG_EMCY_COB_ID: u16 = 0x1014;
pub const REG_EMCY_INHIBIT: u16 = 0x1015;
pub const REG_CONSUMER_HEARTBEAT_TIME: u16 = 0x1016;
pub const REG_PRODUCER_HEARTBEAT_TIME: u16 = 0x1017;
pub const REG_IDENTITY: u16 = 0x1018;
pub const REG_SYNC_OVERFLOW: u16 = 0x1019;
pub const REG_ERROR_BEHAVIOR: u16 = 0x1029;
pub const REG_SDO_SERVER_PARAM: u16 = 0x1200;
pub const REG_SDO_CLIENT_PARAM: u16 = 0x1280;
pub const REG_RPDO_COMM: u16 = 0x1400;
pub const REG_RPDO_MAPPING: u16 = 0x1600;
pub const REG_TPDO_COMM: u16 = 0x1800;
pub const REG_TPDO_MAPPING: u16 = 0x1A00;
pub const REG_NMT_STARTUP: u16 = 0x1F80;

/// Maximum number of PDOs of one direction (0x1400..=0x15FF).
pub const MAX_PDO: usize = 512;
pub const MAX_SDO_SERVER: usize = 128;
pub const MAX_SDO_CLIENT: usize = 128;
pub const MAX_HB_CONSUMER: usize = 127;

/// CAN bit rates in kbit/s accepted by `CanModule`.
pub const VALID_BIT_RATES: [u16; 8] = [10, 20, 50, 125, 250, 500, 800, 1000];

pub const SDO_DEFAULT_TIMEOUT_US: u32 = 1_000_000;
pub const SDO_MAX_BLOCK_SIZE: u8 = 127;
pub const SDO_DEFAULT_BUFFER_SIZE: usize = 1024;
pub const EMCY_DEFAULT_QUEUE_LEN: usize = 8;
pub const EMCY_HISTORY_LEN: usize = 8;
