//! The object aggregate of one CANopen device and its scheduler entry points.

use embedded_can::nb::Can;
use embedded_can::Frame;

use crate::can::{CanModule, IdentRegistry, RxTarget, Transmit, TxSource};
use crate::config::CanOpenConfig;
use crate::constant::*;
use crate::emergency::{Emergency, EmergencyErrorCode, ErrorStatus};
use crate::error::{AbortCode, ErrorCode};
use crate::heartbeat::HbConsumer;
use crate::lss::LssSlave;
use crate::nmt::{ErrorBehavior, Nmt, NmtState, NmtTransition, ResetCommand};
use crate::object_directory::{fetch_u16, fetch_u32, fetch_u8, EntryInfo, OdAccess};
use crate::pdo::{self, PdoType, Rpdo, Tpdo};
use crate::prelude::*;
use crate::sdo_client::{SdoClient, SdoClientResult};
use crate::sdo_server::SdoServer;
use crate::sync::{Sync, SyncEvent};
use crate::time::Time;
use crate::util::{get_cob_id, le_u32};
use crate::{debug, error, info, warn};

/// Frames produced while the CAN module is lent out as identifier registry.
#[derive(Default)]
struct Outbox(Vec<(u16, [u8; 8], usize)>);

impl Transmit for Outbox {
    fn send(&mut self, cob_id: u16, data: &[u8]) -> Result<(), ErrorCode> {
        if data.len() > 8 {
            return Err(ErrorCode::FrameCreationFailed { data: data.to_vec() });
        }
        let mut buf = [0u8; 8];
        buf[..data.len()].copy_from_slice(data);
        self.0.push((cob_id, buf, data.len()));
        Ok(())
    }
}

impl Outbox {
    fn flush(self, tx: &mut dyn Transmit) {
        for (cob_id, buf, len) in self.0 {
            if let Err(err) = tx.send(cob_id, &buf[..len]) {
                warn!("Failed to send SDO response: {:?}", err);
            }
        }
    }
}

/// Dictionary view of the SDO servers. Writes to communication parameters
/// are checked against the identifiers in use before they are stored.
struct GuardedOd<'a> {
    od: &'a mut dyn OdAccess,
    registry: &'a dyn IdentRegistry,
    node_id: u8,
}

fn ensure_free(in_use: bool) -> Result<(), AbortCode> {
    if in_use {
        Err(AbortCode::GeneralParameterIncompatibility)
    } else {
        Ok(())
    }
}

impl GuardedOd<'_> {
    fn check_write(&self, index: u16, sub_index: u8, data: &[u8]) -> Result<(), AbortCode> {
        let value = le_u32(data);
        let ident = (value & COB_ID_MASK) as u16;
        match index {
            REG_PRE_DEFINED_ERROR if sub_index == 0 && value != 0 => Err(AbortCode::ValueRangeExceeded),
            REG_SYNC_COB_ID => {
                if value & COB_ID_PRODUCER != 0 {
                    ensure_free(self.registry.tx_in_use(ident, TxSource::Sync))
                } else {
                    ensure_free(self.registry.rx_in_use(ident, RxTarget::Sync))
                }
            }
            REG_TIME_COB_ID => {
                if value & COB_ID_CONSUMER != 0 {
                    ensure_free(self.registry.rx_in_use(ident, RxTarget::Time))?;
                }
                if value & COB_ID_PRODUCER != 0 {
                    ensure_free(self.registry.tx_in_use(ident, TxSource::Time))?;
                }
                Ok(())
            }
            REG_EMCY_COB_ID if value & COB_ID_INVALID == 0 => {
                let ident = if ident == COB_FUNC_EMCY { COB_FUNC_EMCY + self.node_id as u16 } else { ident };
                ensure_free(self.registry.tx_in_use(ident, TxSource::Emergency))
            }
            REG_CONSUMER_HEARTBEAT_TIME if sub_index > 0 => self.check_hb_consumer(sub_index, value),
            _ if (REG_SDO_SERVER_PARAM + 1..REG_SDO_CLIENT_PARAM).contains(&index) && value & COB_ID_INVALID == 0 => {
                let num = (index - REG_SDO_SERVER_PARAM) as usize;
                match sub_index {
                    1 => ensure_free(self.registry.rx_in_use(ident, RxTarget::SdoServer(num))),
                    2 => ensure_free(self.registry.tx_in_use(ident, TxSource::SdoServer(num))),
                    _ => Ok(()),
                }
            }
            _ if (REG_SDO_CLIENT_PARAM..REG_SDO_CLIENT_PARAM + MAX_SDO_CLIENT as u16).contains(&index)
                && value & COB_ID_INVALID == 0 => {
                let num = (index - REG_SDO_CLIENT_PARAM) as usize;
                match sub_index {
                    1 => ensure_free(self.registry.tx_in_use(ident, TxSource::SdoClient(num))),
                    2 => ensure_free(self.registry.rx_in_use(ident, RxTarget::SdoClient(num))),
                    _ => Ok(()),
                }
            }
            _ => pdo::check_param_write(&*self.od, self.registry, self.node_id, index, sub_index, data),
        }
    }

    /// Two active entries must not monitor the same node.
    fn check_hb_consumer(&self, sub_index: u8, value: u32) -> Result<(), AbortCode> {
        let node_id = (value >> 16) as u8;
        if value & 0xFFFF == 0 || !(NODE_ID_MIN..=NODE_ID_MAX).contains(&node_id) {
            return Ok(());
        }
        let count = fetch_u8(&*self.od, REG_CONSUMER_HEARTBEAT_TIME, 0).unwrap_or(0);
        let taken = (1..=count)
            .filter(|sub| *sub != sub_index)
            .filter_map(|sub| fetch_u32(&*self.od, REG_CONSUMER_HEARTBEAT_TIME, sub))
            .any(|other| other & 0xFFFF != 0 && (other >> 16) as u8 == node_id);
        ensure_free(taken)
    }
}

impl OdAccess for GuardedOd<'_> {
    fn read(&mut self, index: u16, sub_index: u8) -> Result<Vec<u8>, AbortCode> {
        self.od.read(index, sub_index)
    }

    fn fetch(&self, index: u16, sub_index: u8) -> Result<Vec<u8>, AbortCode> {
        self.od.fetch(index, sub_index)
    }

    fn write(&mut self, index: u16, sub_index: u8, data: &[u8]) -> Result<(), AbortCode> {
        self.check_write(index, sub_index, data)?;
        self.od.write(index, sub_index, data)
    }

    fn store(&mut self, index: u16, sub_index: u8, data: &[u8]) -> Result<(), AbortCode> {
        self.od.store(index, sub_index, data)
    }

    fn entry(&self, index: u16, sub_index: u8) -> Result<EntryInfo, AbortCode> {
        self.od.entry(index, sub_index)
    }
}

fn allocate<T>(count: usize, mut make: impl FnMut(usize) -> Result<T, ErrorCode>) -> Result<Vec<T>, ErrorCode> {
    let mut items = Vec::new();
    items.try_reserve_exact(count).map_err(|_| ErrorCode::OutOfMemory)?;
    for i in 0..count {
        items.push(make(i)?);
    }
    Ok(items)
}

fn can_not_initialised() -> ErrorCode {
    ErrorCode::IllegalArgument { more_info: "CAN module not initialised, call init_can first".to_string() }
}

/// All communication objects of one device, driven by [`CanOpen::process`],
/// [`CanOpen::process_sync`], [`CanOpen::process_rpdo`] and [`CanOpen::process_tpdo`].
///
/// The implementation is not thread-safe. It targets MCU environments where
/// one context owns the stack and calls the entry points cooperatively. When
/// the slow and the real-time entry points run on different contexts (a main
/// loop and a timer interrupt, say), wrap the whole `CanOpen` in one mutual
/// exclusion such as `critical_section::Mutex<RefCell<_>>`. Locking single
/// objects would not be enough, as a received frame may touch the dictionary,
/// the NMT state and the PDOs in one go.
pub struct CanOpen<CAN, OD> where CAN: Can, CAN::Frame: Frame + Debug, OD: OdAccess {
    config: CanOpenConfig,
    od: OD,
    can: Option<CanModule<CAN>>,
    node_id: u8,
    nmt: Nmt,
    em: Emergency,
    sync: Option<Sync>,
    time: Option<Time>,
    rpdos: Vec<Rpdo>,
    tpdos: Vec<Tpdo>,
    sdo_servers: Vec<SdoServer>,
    sdo_clients: Vec<SdoClient>,
    hb_consumer: HbConsumer,
    lss: Option<LssSlave>,
}

impl<CAN, OD> CanOpen<CAN, OD> where CAN: Can, CAN::Frame: Frame + Debug, OD: OdAccess {
    /// Allocates every object named by `config`. Nothing is read from the
    /// dictionary and nothing is sent before [`CanOpen::init`].
    pub fn new(config: CanOpenConfig, od: OD) -> Result<Self, ErrorCode> {
        config.validate()?;
        let rpdos = allocate(config.rpdo_count, |i| Ok(Rpdo::new(i)))?;
        let tpdos = allocate(config.tpdo_count, |i| Ok(Tpdo::new(i)))?;
        let sdo_servers = allocate(config.sdo_server_count, |i| SdoServer::new(i, &config))?;
        let sdo_clients = allocate(config.sdo_client_count, |i| SdoClient::new(i, &config))?;
        let hb_consumer = HbConsumer::new(config.hb_consumer_count)?;
        info!("CANopen objects: {} RPDO, {} TPDO, {} SDO server, {} SDO client, {} HB consumer",
            rpdos.len(), tpdos.len(), sdo_servers.len(), sdo_clients.len(), hb_consumer.len());
        Ok(CanOpen {
            sync: config.sync_enabled.then(Sync::new),
            time: config.time_enabled.then(Time::new),
            em: Emergency::new(config.emcy_queue_len),
            config,
            od,
            can: None,
            node_id: 0,
            nmt: Nmt::new(),
            rpdos,
            tpdos,
            sdo_servers,
            sdo_clients,
            hb_consumer,
            lss: None,
        })
    }

    /// Releases the stack and hands the CAN driver back.
    pub fn delete(self) -> Option<CAN> {
        self.can.map(CanModule::into_inner)
    }

    /// Takes ownership of the CAN driver. `bit_rate` is in kbit/s.
    pub fn init_can(&mut self, can: CAN, bit_rate: u16) -> Result<(), ErrorCode> {
        self.can = Some(CanModule::new(can, bit_rate)?);
        Ok(())
    }

    /// Starts the LSS slave with the node id and bit rate in effect;
    /// `node_id` may be [`NODE_ID_UNCONFIGURED`]. The LSS address is read from
    /// 0x1018:01..04. Until [`CanOpen::init`] succeeds only LSS is served.
    pub fn init_lss(&mut self, node_id: u8, bit_rate: u16) -> Result<(), ErrorCode> {
        if !self.config.lss_enabled {
            return Err(ErrorCode::IllegalArgument { more_info: "LSS disabled in configuration".to_string() });
        }
        let address = [1u8, 2, 3, 4].map(|sub| fetch_u32(&self.od, REG_IDENTITY, sub).unwrap_or(0));
        let lss = LssSlave::new(node_id, bit_rate, address).map_err(|err| match err {
            ErrorCode::IllegalBaudRate { bit_rate } => {
                ErrorCode::IllegalArgument { more_info: format!("LSS bit rate {} kbit/s", bit_rate) }
            }
            other => other,
        })?;
        self.lss = Some(lss);
        if self.nmt.state() != NmtState::Initializing {
            return self.register_identifiers();
        }
        let can = self.can.as_mut().ok_or_else(can_not_initialised)?;
        can.clear_registrations();
        can.rx_config(COB_LSS_MASTER, 0x7FF, RxTarget::Lss)?;
        can.tx_config(COB_LSS_SLAVE, TxSource::Lss)?;
        Ok(())
    }

    /// Communication init: reads the communication parameters, registers the
    /// identifiers, sends the boot-up message and enters Pre-Operational.
    /// Called at start-up and again after [`ResetCommand::Communication`].
    pub fn init(&mut self, node_id: u8) -> Result<(), ErrorCode> {
        if !(NODE_ID_MIN..=NODE_ID_MAX).contains(&node_id) {
            return Err(ErrorCode::IllegalArgument { more_info: format!("node id {}", node_id) });
        }
        if self.can.is_none() {
            return Err(can_not_initialised());
        }
        self.node_id = node_id;
        self.configure_objects();
        self.register_identifiers().map_err(|err| match err {
            ErrorCode::DuplicateIdentifier { cob_id } => ErrorCode::IllegalArgument {
                more_info: format!("identifier {:#x} used by two objects", cob_id),
            },
            other => other,
        })?;
        let Some(can) = self.can.as_mut() else {
            return Err(can_not_initialised());
        };
        if let Some(lss) = self.lss.as_mut() {
            lss.activate(node_id, can.bit_rate());
        }
        let transition = self.nmt.boot(can);
        if let Some(transition) = transition {
            self.on_nmt_transition(transition);
        }
        info!("Node {} initialised", node_id);
        Ok(())
    }

    /// Re-runs communication init, with the node id configured over LSS when
    /// one is pending.
    pub fn reset_communication(&mut self) -> Result<(), ErrorCode> {
        let node_id = match &self.lss {
            Some(lss) if (NODE_ID_MIN..=NODE_ID_MAX).contains(&lss.pending_node_id()) => lss.pending_node_id(),
            _ => self.node_id,
        };
        self.init(node_id)
    }

    fn configure_objects(&mut self) {
        let node_id = self.node_id;
        self.nmt.configure(node_id, &self.od);
        self.em.configure(node_id, &self.od);
        if let Some(sync) = self.sync.as_mut() {
            sync.configure(&self.od);
        }
        if let Some(time) = self.time.as_mut() {
            time.configure(&self.od, self.config.time_producer_interval_ms);
        }
        for rpdo in self.rpdos.iter_mut() {
            if rpdo.configure(&self.od, node_id).is_err() {
                self.em.report(ErrorStatus::PDO_WRONG_MAPPING, EmergencyErrorCode::PdoNotProcessed,
                               REG_RPDO_MAPPING as u32 + rpdo.num() as u32);
            }
        }
        for tpdo in self.tpdos.iter_mut() {
            if tpdo.configure(&self.od, node_id).is_err() {
                self.em.report(ErrorStatus::PDO_WRONG_MAPPING, EmergencyErrorCode::PdoNotProcessed,
                               REG_TPDO_MAPPING as u32 + tpdo.num() as u32);
            }
        }
        for server in self.sdo_servers.iter_mut() {
            server.configure(node_id, &self.od);
        }
        for client in self.sdo_clients.iter_mut() {
            client.configure(&self.od);
        }
        self.hb_consumer.configure(&self.od);
    }

    /// Rebuilds both identifier tables from the configured objects. Exact
    /// receive filters come first so that the EMCY consumer range filter
    /// only catches what nobody else claims.
    fn register_identifiers(&mut self) -> Result<(), ErrorCode> {
        let can = self.can.as_mut().ok_or_else(can_not_initialised)?;
        can.clear_registrations();
        can.rx_config(COB_FUNC_NMT, 0x7FF, RxTarget::Nmt)?;
        if let Some(sync) = &self.sync {
            if sync.is_producer() {
                can.tx_config(sync.cob_id(), TxSource::Sync)?;
            } else {
                can.rx_config(sync.cob_id(), 0x7FF, RxTarget::Sync)?;
            }
        }
        if let Some(time) = &self.time {
            if time.is_consumer() {
                can.rx_config(time.cob_id(), 0x7FF, RxTarget::Time)?;
            }
            if time.is_producer() {
                can.tx_config(time.cob_id(), TxSource::Time)?;
            }
        }
        for (i, rpdo) in self.rpdos.iter().enumerate().filter(|(_, p)| p.is_valid()) {
            can.rx_config(rpdo.cob_id(), 0x7FF, RxTarget::Rpdo(i))?;
        }
        for (i, tpdo) in self.tpdos.iter().enumerate().filter(|(_, p)| p.is_valid()) {
            can.tx_config(tpdo.cob_id(), TxSource::Tpdo(i))?;
        }
        for (i, server) in self.sdo_servers.iter().enumerate().filter(|(_, s)| s.is_valid()) {
            can.rx_config(server.rx_cob_id(), 0x7FF, RxTarget::SdoServer(i))?;
            can.tx_config(server.tx_cob_id(), TxSource::SdoServer(i))?;
        }
        for (i, client) in self.sdo_clients.iter().enumerate().filter(|(_, c)| c.is_valid()) {
            can.tx_config(client.tx_cob_id(), TxSource::SdoClient(i))?;
            can.rx_config(client.rx_cob_id(), 0x7FF, RxTarget::SdoClient(i))?;
        }
        for (i, entry) in self.hb_consumer.entries().iter().enumerate() {
            let Some(cob_id) = entry.cob_id() else { continue };
            match can.rx_config(cob_id, 0x7FF, RxTarget::HbConsumer(i)) {
                Err(ErrorCode::DuplicateIdentifier { .. }) => {
                    warn!("Heartbeat consumer {} skipped, node {} already monitored", i + 1, entry.node_id());
                }
                other => other?,
            }
        }
        can.tx_config(self.nmt.heartbeat_cob_id(), TxSource::Heartbeat)?;
        if self.em.is_enabled() {
            can.tx_config(self.em.cob_id(), TxSource::Emergency)?;
        }
        if self.lss.is_some() {
            can.rx_config(COB_LSS_MASTER, 0x7FF, RxTarget::Lss)?;
            can.tx_config(COB_LSS_SLAVE, TxSource::Lss)?;
        }
        can.rx_config(COB_FUNC_EMCY, 0x780, RxTarget::Emergency)?;
        debug!("Registered {} rx filters, {} tx identifiers", can.rx_filters().len(), can.tx_identifiers().len());
        Ok(())
    }

    fn rebuild_identifiers(&mut self) {
        if let Err(err) = self.register_identifiers() {
            error!("Identifier registration failed: {:?}", err);
        }
    }

    fn on_nmt_transition(&mut self, transition: NmtTransition) {
        if transition.to == NmtState::Operational {
            for tpdo in self.tpdos.iter_mut() {
                tpdo.on_enter_operational();
            }
        }
        if transition.from == NmtState::Operational {
            for rpdo in self.rpdos.iter_mut() {
                rpdo.clear();
            }
        }
        if matches!(transition.to, NmtState::Stopped | NmtState::Initializing) {
            for server in self.sdo_servers.iter_mut() {
                server.reset();
            }
            for client in self.sdo_clients.iter_mut() {
                client.reset();
            }
        }
    }

    fn receive_frames(&mut self) {
        while let Some(frame) = self.can.as_mut().and_then(|can| can.receive()) {
            // Remote frames are not supported.
            if frame.is_remote_frame() {
                continue;
            }
            let Some(cob_id) = get_cob_id(&frame) else { continue };
            self.on_frame(cob_id, frame.data());
        }
    }

    fn on_frame(&mut self, cob_id: u16, data: &[u8]) {
        let Some(target) = self.can.as_ref().and_then(|can| can.lookup(cob_id)) else {
            return;
        };
        let allowed = match self.nmt.state() {
            NmtState::Initializing => target == RxTarget::Lss,
            NmtState::Stopped => matches!(target, RxTarget::Nmt | RxTarget::HbConsumer(_) | RxTarget::Lss),
            NmtState::PreOperational | NmtState::Operational => true,
        };
        if !allowed {
            return;
        }
        let operational = self.nmt.is_operational();
        match target {
            RxTarget::Nmt => {
                if let Some(transition) = self.nmt.process_command(data) {
                    self.on_nmt_transition(transition);
                }
            }
            RxTarget::Sync => {
                let valid = self.sync.as_mut().is_some_and(|sync| sync.on_frame(data));
                if valid {
                    for rpdo in self.rpdos.iter_mut() {
                        rpdo.on_sync();
                    }
                }
            }
            RxTarget::Time => {
                if let Some(time) = self.time.as_mut() {
                    time.on_frame(data);
                }
            }
            RxTarget::Emergency => self.em.on_frame(cob_id, data),
            RxTarget::Rpdo(i) => {
                if let Some(rpdo) = self.rpdos.get_mut(i) {
                    rpdo.on_frame(data, operational, &mut self.od, &mut self.em);
                }
            }
            RxTarget::SdoServer(i) => self.on_sdo_request(i, data),
            RxTarget::SdoClient(i) => {
                if let (Some(client), Some(can)) = (self.sdo_clients.get_mut(i), self.can.as_mut()) {
                    client.on_response(data, can);
                }
            }
            RxTarget::HbConsumer(i) => self.hb_consumer.on_frame(i, data),
            RxTarget::Lss => {
                if let (Some(lss), Some(can)) = (self.lss.as_mut(), self.can.as_mut()) {
                    lss.on_request(data, can, COB_LSS_SLAVE);
                }
            }
        }
    }

    fn on_sdo_request(&mut self, num: usize, data: &[u8]) {
        let (Some(server), Some(can)) = (self.sdo_servers.get_mut(num), self.can.as_mut()) else {
            return;
        };
        let mut outbox = Outbox::default();
        let written = {
            let mut od = GuardedOd { od: &mut self.od, registry: &*can, node_id: self.node_id };
            server.on_request(data, &mut od, &mut outbox)
        };
        outbox.flush(can);
        if let Some((index, sub_index)) = written {
            self.on_object_written(index, sub_index);
        }
    }

    /// Applies a communication parameter written over SDO to the running objects.
    fn on_object_written(&mut self, index: u16, sub_index: u8) {
        let node_id = self.node_id;
        let mut rebuild = false;
        match index {
            REG_PRE_DEFINED_ERROR if sub_index == 0 => self.em.clear_history(),
            REG_SYNC_COB_ID | REG_SYNC_PERIOD | REG_SYNC_WINDOW | REG_SYNC_OVERFLOW => {
                if let Some(sync) = self.sync.as_mut() {
                    sync.configure(&self.od);
                    rebuild = index == REG_SYNC_COB_ID;
                }
                if index == REG_SYNC_OVERFLOW {
                    let overflow = fetch_u8(&self.od, index, 0).unwrap_or(0);
                    self.tpdos.iter_mut().for_each(|tpdo| tpdo.set_sync_overflow(overflow));
                }
            }
            REG_TIME_COB_ID => {
                if let Some(time) = self.time.as_mut() {
                    time.configure(&self.od, self.config.time_producer_interval_ms);
                    rebuild = true;
                }
            }
            REG_EMCY_COB_ID | REG_EMCY_INHIBIT => {
                self.em.configure(node_id, &self.od);
                rebuild = index == REG_EMCY_COB_ID;
            }
            REG_CONSUMER_HEARTBEAT_TIME if sub_index > 0 => {
                let raw = fetch_u32(&self.od, index, sub_index).unwrap_or(0);
                self.hb_consumer.configure_entry(sub_index as usize - 1, raw);
                rebuild = true;
            }
            REG_PRODUCER_HEARTBEAT_TIME => {
                self.nmt.set_heartbeat_time_ms(fetch_u16(&self.od, index, 0).unwrap_or(0));
            }
            REG_ERROR_BEHAVIOR if sub_index == 1 => {
                let behavior = fetch_u8(&self.od, index, 1).map(ErrorBehavior::from).unwrap_or_default();
                self.nmt.set_error_behavior(behavior);
            }
            _ if (REG_SDO_SERVER_PARAM..REG_SDO_CLIENT_PARAM).contains(&index) => {
                if let Some(server) = self.sdo_servers.get_mut((index - REG_SDO_SERVER_PARAM) as usize) {
                    server.configure(node_id, &self.od);
                    rebuild = true;
                }
            }
            _ if (REG_SDO_CLIENT_PARAM..REG_SDO_CLIENT_PARAM + MAX_SDO_CLIENT as u16).contains(&index) => {
                if let Some(client) = self.sdo_clients.get_mut((index - REG_SDO_CLIENT_PARAM) as usize) {
                    client.configure(&self.od);
                    rebuild = true;
                }
            }
            _ => match pdo::pdo_param_kind(index) {
                Some((PdoType::RPDO, num, _)) => {
                    if let Some(rpdo) = self.rpdos.get_mut(num) {
                        // A rejected mapping leaves the PDO disabled.
                        let _ = rpdo.configure(&self.od, node_id);
                        rebuild = true;
                    }
                }
                Some((PdoType::TPDO, num, _)) => {
                    if let Some(tpdo) = self.tpdos.get_mut(num) {
                        let _ = tpdo.configure(&self.od, node_id);
                        if self.nmt.is_operational() {
                            tpdo.on_enter_operational();
                        }
                        rebuild = true;
                    }
                }
                None => {}
            },
        }
        if rebuild {
            self.rebuild_identifiers();
        }
    }

    /// Slow communication tick: received frames, EMCY, NMT and heartbeat
    /// production, SDO timeouts, heartbeat consumers, TIME and RPDO deadlines.
    /// Returns the reset requested over NMT; on [`ResetCommand::Communication`]
    /// the application calls [`CanOpen::init`] (or [`CanOpen::reset_communication`]).
    pub fn process(&mut self, elapsed_us: u32, timer_next_us: &mut u32) -> ResetCommand {
        self.receive_frames();
        let Some(can) = self.can.as_mut() else {
            return ResetCommand::None;
        };
        self.em.process(self.nmt.is_pre_or_operational(), elapsed_us, &mut self.od, can, timer_next_us);
        let transition = self.nmt.process(elapsed_us, self.em.error_register(), can, timer_next_us);
        if let Some(transition) = transition {
            self.on_nmt_transition(transition);
        }

        let Some(can) = self.can.as_mut() else {
            return ResetCommand::None;
        };
        for server in self.sdo_servers.iter_mut() {
            server.process(elapsed_us, can, timer_next_us);
        }
        for client in self.sdo_clients.iter_mut() {
            client.process(elapsed_us, can, timer_next_us);
        }
        let state = self.nmt.state();
        self.hb_consumer.process(state != NmtState::Initializing, elapsed_us, &mut self.em, timer_next_us);
        if let Some(time) = self.time.as_mut() {
            time.process(self.nmt.is_pre_or_operational(), elapsed_us, can, timer_next_us);
        }
        let operational = self.nmt.is_operational();
        for rpdo in self.rpdos.iter_mut() {
            rpdo.process_timeout(operational, elapsed_us, &mut self.em, timer_next_us);
        }
        self.nmt.take_reset()
    }

    /// Real-time tick, step one. Returns `true` when a SYNC was received or
    /// produced; pass the result to [`CanOpen::process_rpdo`] and
    /// [`CanOpen::process_tpdo`] of the same cycle.
    pub fn process_sync(&mut self, elapsed_us: u32, timer_next_us: &mut u32) -> bool {
        self.receive_frames();
        let (Some(sync), Some(can)) = (self.sync.as_mut(), self.can.as_mut()) else {
            return false;
        };
        let event = sync.process(self.nmt.is_pre_or_operational(), elapsed_us, &mut self.em, can, timer_next_us);
        match event {
            SyncEvent::RxTx => {
                if sync.is_producer() {
                    for rpdo in self.rpdos.iter_mut() {
                        rpdo.on_sync();
                    }
                }
                true
            }
            SyncEvent::PassedWindow => {
                debug!("SYNC window passed");
                false
            }
            SyncEvent::None => false,
        }
    }

    /// Real-time tick, step two: applies synchronous RPDOs latched by the SYNC.
    pub fn process_rpdo(&mut self, sync_was: bool) {
        let operational = self.nmt.is_operational();
        for rpdo in self.rpdos.iter_mut() {
            rpdo.process(sync_was, operational, &mut self.od);
        }
    }

    /// Real-time tick, step three: transmits due TPDOs.
    pub fn process_tpdo(&mut self, sync_was: bool, elapsed_us: u32, timer_next_us: &mut u32) {
        let Some(can) = self.can.as_mut() else { return };
        let operational = self.nmt.is_operational();
        let sync_counter = self.sync.as_ref().map_or(0, |sync| sync.counter());
        for tpdo in self.tpdos.iter_mut() {
            tpdo.process(sync_was, sync_counter, elapsed_us, operational, &self.od, can, timer_next_us);
        }
    }

    pub fn config(&self) -> &CanOpenConfig {
        &self.config
    }

    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    pub fn nmt_state(&self) -> NmtState {
        self.nmt.state()
    }

    pub fn od(&self) -> &OD {
        &self.od
    }

    /// Direct dictionary access for the application. Communication parameters
    /// changed here take effect on the next [`CanOpen::init`].
    pub fn od_mut(&mut self) -> &mut OD {
        &mut self.od
    }

    pub fn emergency(&self) -> &Emergency {
        &self.em
    }

    pub fn emergency_mut(&mut self) -> &mut Emergency {
        &mut self.em
    }

    pub fn hb_consumer(&self) -> &HbConsumer {
        &self.hb_consumer
    }

    pub fn hb_consumer_mut(&mut self) -> &mut HbConsumer {
        &mut self.hb_consumer
    }

    pub fn sync(&self) -> Option<&Sync> {
        self.sync.as_ref()
    }

    pub fn time(&self) -> Option<&Time> {
        self.time.as_ref()
    }

    pub fn time_mut(&mut self) -> Option<&mut Time> {
        self.time.as_mut()
    }

    pub fn lss(&self) -> Option<&LssSlave> {
        self.lss.as_ref()
    }

    pub fn rpdo(&self, num: usize) -> Option<&Rpdo> {
        self.rpdos.get(num)
    }

    pub fn tpdo(&self, num: usize) -> Option<&Tpdo> {
        self.tpdos.get(num)
    }

    /// Requests a transmission of TPDO `num`. Returns `false` for an unknown PDO.
    pub fn tpdo_request(&mut self, num: usize) -> bool {
        match self.tpdos.get_mut(num) {
            Some(tpdo) => {
                tpdo.request_send();
                true
            }
            None => false,
        }
    }

    pub fn sdo_server(&self, num: usize) -> Option<&SdoServer> {
        self.sdo_servers.get(num)
    }

    pub fn sdo_client(&self, num: usize) -> Option<&SdoClient> {
        self.sdo_clients.get(num)
    }

    fn client_and_can(&mut self, num: usize) -> Result<(&mut SdoClient, &mut CanModule<CAN>), ErrorCode> {
        let can = self.can.as_mut().ok_or_else(can_not_initialised)?;
        let client = self.sdo_clients.get_mut(num)
            .ok_or_else(|| ErrorCode::IllegalArgument { more_info: format!("no SDO client {}", num) })?;
        Ok((client, can))
    }

    /// Points SDO client `num` at a server, bypassing 0x1280. The identifiers
    /// must not be used by another object.
    pub fn sdo_client_setup(&mut self, num: usize, tx_cob_id: u32, rx_cob_id: u32, server_node_id: u8)
                            -> Result<(), ErrorCode> {
        let (client, can) = self.client_and_can(num)?;
        let tx = (tx_cob_id & COB_ID_MASK) as u16;
        let rx = (rx_cob_id & COB_ID_MASK) as u16;
        if tx_cob_id & COB_ID_INVALID == 0 && can.tx_in_use(tx, TxSource::SdoClient(num)) {
            return Err(ErrorCode::DuplicateIdentifier { cob_id: tx });
        }
        if rx_cob_id & COB_ID_INVALID == 0 && can.rx_in_use(rx, RxTarget::SdoClient(num)) {
            return Err(ErrorCode::DuplicateIdentifier { cob_id: rx });
        }
        client.setup(tx_cob_id, rx_cob_id, server_node_id);
        self.register_identifiers()
    }

    pub fn sdo_client_download(&mut self, num: usize, index: u16, sub_index: u8, data: &[u8], block: bool)
                               -> Result<(), ErrorCode> {
        let (client, can) = self.client_and_can(num)?;
        client.start_download(index, sub_index, data, block, can)
    }

    pub fn sdo_client_upload(&mut self, num: usize, index: u16, sub_index: u8, block: bool)
                             -> Result<(), ErrorCode> {
        let (client, can) = self.client_and_can(num)?;
        client.start_upload(index, sub_index, block, can)
    }

    pub fn sdo_client_abort(&mut self, num: usize, code: AbortCode) -> Result<(), ErrorCode> {
        let (client, can) = self.client_and_can(num)?;
        client.abort(code, can);
        Ok(())
    }

    pub fn sdo_client_status(&self, num: usize) -> Option<SdoClientResult> {
        self.sdo_clients.get(num).map(SdoClient::status)
    }

    /// Data of a completed upload of client `num`.
    pub fn sdo_client_take_upload(&mut self, num: usize) -> Option<Vec<u8>> {
        self.sdo_clients.get_mut(num).and_then(SdoClient::take_upload_data)
    }

    pub fn can_module(&self) -> Option<&CanModule<CAN>> {
        self.can.as_ref()
    }

    pub fn can_module_mut(&mut self) -> Option<&mut CanModule<CAN>> {
        self.can.as_mut()
    }

    /// Exact receive identifiers in registration order.
    pub fn rx_identifiers(&self) -> Vec<u16> {
        self.can.as_ref().map(|can| can.rx_identifiers()).unwrap_or_default()
    }

    pub fn tx_identifiers(&self) -> Vec<u16> {
        self.can.as_ref().map(|can| can.tx_identifiers()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::DataType;
    use crate::object_directory::{AccessType, ObjectDirectory, Variable};
    use crate::value::Value;
    use crate::virtual_can::VirtualCan;

    fn rw() -> AccessType {
        AccessType::new(true, true)
    }

    fn u8_var(index: u16, sub: u8, value: u8) -> Variable {
        Variable::new(index, sub, "param", DataType::Unsigned8, rw(), false, Value::from(value))
    }

    fn u16_var(index: u16, sub: u8, value: u16) -> Variable {
        Variable::new(index, sub, "param", DataType::Unsigned16, rw(), false, Value::from(value))
    }

    fn u32_var(index: u16, sub: u8, value: u32) -> Variable {
        Variable::new(index, sub, "param", DataType::Unsigned32, rw(), false, Value::from(value))
    }

    /// Node 5: heartbeat 100 ms, async RPDO1 into 0x2000, event TPDO1 from
    /// 0x2001, one heartbeat consumer watching node 3.
    fn device_od(rpdo_cob: u32) -> ObjectDirectory {
        let mut od = ObjectDirectory::empty(5);
        od.insert(u16_var(0x1017, 0, 100));
        od.insert(u32_var(0x1005, 0, 0x80));
        od.insert(Variable::new(0x2000, 0, "in", DataType::Unsigned8, rw(), true, Value::from(0u8)));
        od.insert(Variable::new(0x2001, 0, "out", DataType::Unsigned16, rw(), true, Value::from(0x1234u16)));
        od.insert(u8_var(0x1400, 0, 2));
        od.insert(u32_var(0x1400, 1, rpdo_cob));
        od.insert(u8_var(0x1400, 2, 255));
        od.insert(u8_var(0x1600, 0, 1));
        od.insert(u32_var(0x1600, 1, 0x2000_0008));
        od.insert(u8_var(0x1800, 0, 5));
        od.insert(u32_var(0x1800, 1, 0x180));
        od.insert(u8_var(0x1800, 2, 254));
        od.insert(u16_var(0x1800, 3, 0));
        od.insert(u16_var(0x1800, 5, 0));
        od.insert(u8_var(0x1A00, 0, 1));
        od.insert(u32_var(0x1A00, 1, 0x2001_0010));
        od.insert(u8_var(0x1016, 0, 1));
        od.insert(u32_var(0x1016, 1, (3 << 16) | 50));
        od
    }

    fn config() -> CanOpenConfig {
        CanOpenConfig { rpdo_count: 1, tpdo_count: 1, hb_consumer_count: 1, ..CanOpenConfig::default() }
    }

    fn started(rpdo_cob: u32) -> (CanOpen<VirtualCan, ObjectDirectory>, VirtualCan) {
        let bus = VirtualCan::new();
        let mut co = CanOpen::new(config(), device_od(rpdo_cob)).unwrap();
        co.init_can(bus.clone(), 250).unwrap();
        co.init(5).unwrap();
        (co, bus)
    }

    fn sent(bus: &VirtualCan) -> Vec<(u16, Vec<u8>)> {
        bus.take_sent().iter().map(|f| (f.cob_id(), f.data().to_vec())).collect()
    }

    #[test]
    fn test_lifecycle_errors() {
        let bad = CanOpenConfig { rpdo_count: 0, ..config() };
        assert!(matches!(CanOpen::<VirtualCan, _>::new(bad, device_od(0x200)),
                         Err(ErrorCode::IllegalArgument { .. })));

        let mut co = CanOpen::<VirtualCan, _>::new(config(), device_od(0x200)).unwrap();
        assert!(matches!(co.init(5), Err(ErrorCode::IllegalArgument { .. })));
        assert!(matches!(co.init_can(VirtualCan::new(), 100), Err(ErrorCode::IllegalBaudRate { bit_rate: 100 })));
        co.init_can(VirtualCan::new(), 250).unwrap();
        assert!(matches!(co.init(0), Err(ErrorCode::IllegalArgument { .. })));
        assert!(matches!(co.init(128), Err(ErrorCode::IllegalArgument { .. })));
        assert!(matches!(co.init_lss(0xFF, 250), Err(ErrorCode::IllegalArgument { .. })));
        assert!(co.init(5).is_ok());
    }

    #[test]
    fn test_init_boots_and_registers() {
        let (co, bus) = started(0x200);
        assert_eq!(co.nmt_state(), NmtState::PreOperational);
        assert_eq!(sent(&bus), vec![(0x705, vec![0])]);
        let rx = co.rx_identifiers();
        for ident in [0x000, 0x080, 0x205, 0x605, 0x703] {
            assert!(rx.contains(&ident), "missing rx {:#x}", ident);
        }
        let tx = co.tx_identifiers();
        for ident in [0x185, 0x585, 0x705, 0x085] {
            assert!(tx.contains(&ident), "missing tx {:#x}", ident);
        }
    }

    #[test]
    fn test_duplicate_identifier_is_illegal_argument() {
        let mut co = CanOpen::new(config(), device_od(0x605)).unwrap();
        co.init_can(VirtualCan::new(), 250).unwrap();
        assert!(matches!(co.init(5), Err(ErrorCode::IllegalArgument { .. })));
    }

    #[test]
    fn test_start_applies_rpdo_and_sends_tpdo() {
        let (mut co, bus) = started(0x200);
        bus.take_sent();
        bus.inject(0x000, &[0x01, 5]);
        bus.inject(0x205, &[0x42]);
        let mut next = u32::MAX;
        assert_eq!(co.process(0, &mut next), ResetCommand::None);
        assert_eq!(co.nmt_state(), NmtState::Operational);
        assert_eq!(co.od().fetch(0x2000, 0).unwrap(), vec![0x42]);
        co.process_tpdo(false, 0, &mut next);
        let frames = sent(&bus);
        assert!(frames.contains(&(0x705, vec![5])));
        assert!(frames.contains(&(0x185, vec![0x34, 0x12])));
    }

    #[test]
    fn test_sdo_write_reconfigures_heartbeat() {
        let (mut co, bus) = started(0x200);
        bus.take_sent();
        bus.inject(0x605, &[0x2B, 0x17, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00]);
        let mut next = u32::MAX;
        co.process(0, &mut next);
        assert_eq!(sent(&bus), vec![(0x585, vec![0x60, 0x17, 0x10, 0x00, 0, 0, 0, 0])]);
        co.process(500_000, &mut next);
        assert!(sent(&bus).is_empty());
    }

    #[test]
    fn test_sdo_rejects_identifier_in_use() {
        let (mut co, bus) = started(0x200);
        bus.take_sent();
        // SYNC consumer on the SDO server's request identifier.
        bus.inject(0x605, &[0x23, 0x05, 0x10, 0x00, 0x05, 0x06, 0x00, 0x00]);
        let mut next = u32::MAX;
        co.process(0, &mut next);
        assert_eq!(sent(&bus), vec![(0x585, vec![0x80, 0x05, 0x10, 0x00, 0x43, 0x00, 0x04, 0x06])]);
        assert_eq!(co.od().fetch(0x1005, 0).unwrap(), 0x80u32.to_le_bytes().to_vec());
    }

    #[test]
    fn test_stopped_serves_nmt_only() {
        let (mut co, bus) = started(0x200);
        bus.inject(0x000, &[0x02, 0]);
        bus.inject(0x605, &[0x40, 0x17, 0x10, 0x00, 0, 0, 0, 0]);
        let mut next = u32::MAX;
        co.process(0, &mut next);
        assert_eq!(co.nmt_state(), NmtState::Stopped);
        bus.take_sent();

        bus.inject(0x000, &[0x80, 5]);
        bus.inject(0x605, &[0x40, 0x17, 0x10, 0x00, 0, 0, 0, 0]);
        co.process(0, &mut next);
        assert_eq!(co.nmt_state(), NmtState::PreOperational);
        assert!(sent(&bus).contains(&(0x585, vec![0x4B, 0x17, 0x10, 0x00, 100, 0, 0, 0])));
    }

    #[test]
    fn test_reset_communication_ends_pre_operational() {
        let (mut co, bus) = started(0x200);
        bus.inject(0x000, &[0x01, 0]);
        bus.inject(0x000, &[0x82, 5]);
        let mut next = u32::MAX;
        assert_eq!(co.process(0, &mut next), ResetCommand::Communication);
        assert_eq!(co.nmt_state(), NmtState::Initializing);
        bus.take_sent();
        co.reset_communication().unwrap();
        assert_eq!(co.nmt_state(), NmtState::PreOperational);
        assert_eq!(sent(&bus), vec![(0x705, vec![0])]);
    }

    #[test]
    fn test_delete_returns_driver() {
        let (co, bus) = started(0x200);
        let driver = co.delete().unwrap();
        bus.inject(0x123, &[1]);
        let mut driver = driver;
        assert!(embedded_can::nb::Can::receive(&mut driver).is_ok());
    }
}
