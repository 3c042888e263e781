use crate::constant::*;
use crate::error::ErrorCode;
use crate::object_directory::{exists, fetch_u8, OdAccess};
use crate::prelude::*;

/// Reaction of an SDO server to an initiate request while a transfer is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SdoBusyPolicy {
    /// Answer the new request with abort 0x0800_0022 and keep the running transfer.
    #[default]
    Reject,
    /// Drop the running transfer and serve the new request.
    Restart,
}

/// Cardinalities and engine parameters of one [`crate::CanOpen`] instance.
///
/// Counts are fixed for the lifetime of the instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanOpenConfig {
    pub rpdo_count: usize,
    pub tpdo_count: usize,
    pub sdo_server_count: usize,
    pub sdo_client_count: usize,
    pub hb_consumer_count: usize,
    pub sync_enabled: bool,
    pub time_enabled: bool,
    pub lss_enabled: bool,
    pub sdo_timeout_us: u32,
    pub sdo_block_size: u8,
    /// Largest object an SDO server or client can transfer in segmented or block mode.
    pub sdo_buffer_size: usize,
    pub sdo_busy_policy: SdoBusyPolicy,
    pub emcy_queue_len: usize,
    /// Interval of the TIME producer, 0 disables it.
    pub time_producer_interval_ms: u32,
}

impl Default for CanOpenConfig {
    fn default() -> Self {
        CanOpenConfig {
            rpdo_count: 4,
            tpdo_count: 4,
            sdo_server_count: 1,
            sdo_client_count: 0,
            hb_consumer_count: 4,
            sync_enabled: true,
            time_enabled: false,
            lss_enabled: false,
            sdo_timeout_us: SDO_DEFAULT_TIMEOUT_US,
            sdo_block_size: SDO_MAX_BLOCK_SIZE,
            sdo_buffer_size: SDO_DEFAULT_BUFFER_SIZE,
            sdo_busy_policy: SdoBusyPolicy::Reject,
            emcy_queue_len: EMCY_DEFAULT_QUEUE_LEN,
            time_producer_interval_ms: 0,
        }
    }
}

fn illegal(more_info: String) -> ErrorCode {
    ErrorCode::IllegalArgument { more_info }
}

fn check_range(name: &str, value: usize, min: usize, max: usize) -> Result<(), ErrorCode> {
    if value < min || value > max {
        return Err(illegal(format!("{} = {} not in {}..={}", name, value, min, max)));
    }
    Ok(())
}

impl CanOpenConfig {
    pub fn validate(&self) -> Result<(), ErrorCode> {
        check_range("rpdo_count", self.rpdo_count, 1, MAX_PDO)?;
        check_range("tpdo_count", self.tpdo_count, 1, MAX_PDO)?;
        check_range("sdo_server_count", self.sdo_server_count, 1, MAX_SDO_SERVER)?;
        check_range("sdo_client_count", self.sdo_client_count, 0, MAX_SDO_CLIENT)?;
        check_range("hb_consumer_count", self.hb_consumer_count, 0, MAX_HB_CONSUMER)?;
        check_range("sdo_block_size", self.sdo_block_size as usize, 1, SDO_MAX_BLOCK_SIZE as usize)?;
        check_range("emcy_queue_len", self.emcy_queue_len, 1, 256)?;
        // Room for at least one full segment.
        if self.sdo_buffer_size < 7 {
            return Err(illegal(format!("sdo_buffer_size = {} too small", self.sdo_buffer_size)));
        }
        if self.sdo_timeout_us == 0 {
            return Err(illegal("sdo_timeout_us must not be 0".to_string()));
        }
        Ok(())
    }

    /// Derives the cardinalities from the communication area of a dictionary:
    /// one PDO per communication parameter record present, one consumer per
    /// `0x1016` sub-entry, SYNC/TIME present when their COB-ID entry exists.
    pub fn from_od(od: &dyn OdAccess) -> Self {
        let count = |base: u16, max: usize| (0..max).take_while(|i| exists(od, base + *i as u16, 1)).count();
        let defaults = CanOpenConfig::default();
        CanOpenConfig {
            rpdo_count: count(REG_RPDO_COMM, MAX_PDO).max(1),
            tpdo_count: count(REG_TPDO_COMM, MAX_PDO).max(1),
            // 0x1200 is optional for the default server.
            sdo_server_count: (1 + (1..MAX_SDO_SERVER)
                .take_while(|i| exists(od, REG_SDO_SERVER_PARAM + *i as u16, 1))
                .count()).min(MAX_SDO_SERVER),
            sdo_client_count: count(REG_SDO_CLIENT_PARAM, MAX_SDO_CLIENT),
            hb_consumer_count: (fetch_u8(od, REG_CONSUMER_HEARTBEAT_TIME, 0).unwrap_or(0) as usize)
                .min(MAX_HB_CONSUMER),
            sync_enabled: exists(od, REG_SYNC_COB_ID, 0),
            time_enabled: exists(od, REG_TIME_COB_ID, 0),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::DataType;
    use crate::object_directory::{AccessType, ObjectDirectory, Variable};
    use crate::value::Value;

    #[test]
    fn test_default_is_valid() {
        assert!(CanOpenConfig::default().validate().is_ok());
    }

    #[test]
    fn test_out_of_range_counts() {
        let cases = [
            CanOpenConfig { rpdo_count: 0, ..Default::default() },
            CanOpenConfig { tpdo_count: 513, ..Default::default() },
            CanOpenConfig { sdo_server_count: 0, ..Default::default() },
            CanOpenConfig { sdo_client_count: 129, ..Default::default() },
            CanOpenConfig { hb_consumer_count: 128, ..Default::default() },
            CanOpenConfig { sdo_block_size: 128, ..Default::default() },
            CanOpenConfig { sdo_buffer_size: 3, ..Default::default() },
            CanOpenConfig { sdo_timeout_us: 0, ..Default::default() },
        ];
        for config in cases {
            assert!(matches!(config.validate(), Err(ErrorCode::IllegalArgument { .. })), "{:?}", config);
        }
    }

    #[test]
    fn test_from_od() {
        let mut od = ObjectDirectory::empty(3);
        let rw = AccessType::new(true, true);
        for i in 0..3u16 {
            od.insert(Variable::new(0x1400 + i, 1, "cob", DataType::Unsigned32, rw.clone(), false, Value::from(0u32)));
        }
        od.insert(Variable::new(0x1800, 1, "cob", DataType::Unsigned32, rw.clone(), false, Value::from(0u32)));
        od.insert(Variable::new(0x1016, 0, "n", DataType::Unsigned8, rw.clone(), false, Value::from(2u8)));
        od.insert(Variable::new(0x1005, 0, "sync", DataType::Unsigned32, rw, false, Value::from(0x80u32)));
        let config = CanOpenConfig::from_od(&od);
        assert_eq!(config.rpdo_count, 3);
        assert_eq!(config.tpdo_count, 1);
        assert_eq!(config.sdo_server_count, 1);
        assert_eq!(config.sdo_client_count, 0);
        assert_eq!(config.hb_consumer_count, 2);
        assert!(config.sync_enabled);
        assert!(!config.time_enabled);
        assert!(config.validate().is_ok());
    }
}
