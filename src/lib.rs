//! CANopen runtime core.
//!
//! [`CanOpen`] owns every communication object of one device (NMT, SYNC, TIME,
//! EMCY, heartbeat consumer, SDO servers and clients, RPDOs, TPDOs, LSS) and is
//! driven by four cooperative entry points:
//!
//! * [`CanOpen::process`]: the slow communication tick.
//! * [`CanOpen::process_sync`], [`CanOpen::process_rpdo`] and
//!   [`CanOpen::process_tpdo`]: the real-time ticks, called in this order from
//!   the same cadence with the same `sync_was` value.
//!
//! Every entry point takes the elapsed time in microseconds and lowers
//! `timer_next_us` to the time until it needs to run again.

#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_std)]

extern crate alloc;

pub mod can;
pub mod canopen;
pub mod cmd_header;
pub mod config;
pub mod constant;
pub mod data_type;
pub mod emergency;
pub mod error;
pub mod heartbeat;
pub mod lss;
pub mod nmt;
pub mod object_directory;
pub mod pdo;
pub mod sdo_client;
pub mod sdo_server;
pub mod sync;
pub mod time;
pub mod util;
pub mod value;
pub mod virtual_can;

mod prelude;

pub use canopen::CanOpen;
pub use config::{CanOpenConfig, SdoBusyPolicy};
pub use error::{AbortCode, ErrorCode};
pub use nmt::{NmtState, ResetCommand};
pub use object_directory::{ObjectDirectory, OdAccess};
