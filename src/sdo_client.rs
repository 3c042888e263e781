//! Non-blocking SDO client. A transfer is started with
//! [`SdoClient::start_download`] or [`SdoClient::start_upload`] and driven by
//! the server responses and [`SdoClient::process`] until [`SdoClient::status`]
//! is no longer [`SdoClientResult::Busy`].

use crate::can::Transmit;
use crate::cmd_header::*;
use crate::config::CanOpenConfig;
use crate::constant::{COB_ID_INVALID, COB_ID_MASK, REG_SDO_CLIENT_PARAM, SDO_MAX_BLOCK_SIZE};
use crate::error::{AbortCode, ErrorCode};
use crate::object_directory::{fetch_u32, fetch_u8, OdAccess};
use crate::prelude::*;
use crate::sdo_server::SessionState;
use crate::util::{abort_payload, block_unused_bytes, crc16_canopen_with_lut, get_index, le_u32, sdo_payload};
use crate::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdoClientResult {
    Idle,
    Busy,
    Completed,
    Aborted(AbortCode),
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    InitiateDownload { expedited: bool },
    DownloadSegment { toggle: bool, last: bool },
    InitiateUpload,
    UploadSegment { toggle: bool },
    BlockDownloadInitiate,
    BlockDownloadSubBlock { block_start: usize, sent: u8 },
    BlockDownloadEnd,
    BlockUploadInitiate,
    BlockUploadSubBlock { seq: u8 },
    BlockUploadEnd,
}

pub struct SdoClient {
    num: usize,
    valid: bool,
    /// Client to server.
    tx_cob_id: u16,
    /// Server to client.
    rx_cob_id: u16,
    server_node_id: u8,
    timeout_us: u32,
    block_size: u8,
    buffer_size: usize,
    index: u16,
    sub_index: u8,
    buffer: Vec<u8>,
    cursor: usize,
    size: Option<usize>,
    crc: bool,
    timer_us: u32,
    phase: Option<Phase>,
    result: SdoClientResult,
}

impl SdoClient {
    pub fn new(num: usize, config: &CanOpenConfig) -> Result<Self, ErrorCode> {
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(config.sdo_buffer_size + 7).map_err(|_| ErrorCode::OutOfMemory)?;
        Ok(SdoClient {
            num,
            valid: false,
            tx_cob_id: 0,
            rx_cob_id: 0,
            server_node_id: 0,
            timeout_us: config.sdo_timeout_us,
            block_size: config.sdo_block_size.clamp(1, SDO_MAX_BLOCK_SIZE),
            buffer_size: config.sdo_buffer_size,
            index: 0,
            sub_index: 0,
            buffer,
            cursor: 0,
            size: None,
            crc: false,
            timer_us: 0,
            phase: None,
            result: SdoClientResult::Idle,
        })
    }

    /// Reads the client parameters from `0x1280+num`.
    pub fn configure(&mut self, od: &dyn OdAccess) {
        let index = REG_SDO_CLIENT_PARAM + self.num as u16;
        match (fetch_u32(od, index, 1), fetch_u32(od, index, 2)) {
            (Some(tx), Some(rx)) => self.apply(tx, rx, fetch_u8(od, index, 3).unwrap_or(0)),
            _ => self.valid = false,
        }
    }

    /// Points the client at a server without going through the dictionary.
    pub fn setup(&mut self, tx_cob_id: u32, rx_cob_id: u32, server_node_id: u8) {
        self.apply(tx_cob_id, rx_cob_id, server_node_id);
    }

    fn apply(&mut self, tx: u32, rx: u32, server_node_id: u8) {
        self.reset();
        self.valid = tx & COB_ID_INVALID == 0 && rx & COB_ID_INVALID == 0;
        self.tx_cob_id = (tx & COB_ID_MASK) as u16;
        self.rx_cob_id = (rx & COB_ID_MASK) as u16;
        self.server_node_id = server_node_id;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn tx_cob_id(&self) -> u16 {
        self.tx_cob_id
    }

    pub fn rx_cob_id(&self) -> u16 {
        self.rx_cob_id
    }

    pub fn server_node_id(&self) -> u8 {
        self.server_node_id
    }

    pub fn status(&self) -> SdoClientResult {
        self.result
    }

    pub fn state(&self) -> SessionState {
        match self.phase {
            None => SessionState::Idle,
            Some(Phase::DownloadSegment { .. }) | Some(Phase::UploadSegment { .. }) => SessionState::InProgress,
            Some(Phase::BlockDownloadSubBlock { .. }) | Some(Phase::BlockUploadSubBlock { .. }) => {
                SessionState::BlockInProgress
            }
            Some(_) => SessionState::WaitingResponse,
        }
    }

    /// Data of a completed upload. Clears the completed status.
    pub fn take_upload_data(&mut self) -> Option<Vec<u8>> {
        if self.result != SdoClientResult::Completed {
            return None;
        }
        self.result = SdoClientResult::Idle;
        let data = self.buffer.clone();
        self.buffer.clear();
        Some(data)
    }

    /// Drops the running transfer without notifying the server.
    pub fn reset(&mut self) {
        self.phase = None;
        self.buffer.clear();
        self.result = SdoClientResult::Idle;
    }

    fn begin(&mut self, index: u16, sub_index: u8) -> Result<(), ErrorCode> {
        if !self.valid {
            return Err(ErrorCode::IllegalArgument { more_info: format!("SDO client {} not configured", self.num) });
        }
        if self.phase.is_some() {
            return Err(ErrorCode::SdoClientBusy { num: self.num });
        }
        self.index = index;
        self.sub_index = sub_index;
        self.buffer.clear();
        self.cursor = 0;
        self.size = None;
        self.crc = false;
        self.timer_us = 0;
        self.result = SdoClientResult::Busy;
        Ok(())
    }

    fn send(&self, tx: &mut dyn Transmit, payload: &[u8; 8]) -> Result<(), ErrorCode> {
        tx.send(self.tx_cob_id, payload)
    }

    fn fail(&mut self, tx: &mut dyn Transmit, code: AbortCode) {
        info!("SDO client {} abort {:04x}:{:02x} {:#010x}", self.num, self.index, self.sub_index, code.code());
        if let Err(err) = self.send(tx, &abort_payload(self.index, self.sub_index, code)) {
            warn!("SDO client {} failed to send abort: {:?}", self.num, err);
        }
        self.phase = None;
        self.buffer.clear();
        self.result = SdoClientResult::Aborted(code);
    }

    /// Starts writing `data` to `index:sub_index` of the server. Up to four
    /// bytes go expedited unless `block` is set.
    pub fn start_download(&mut self, index: u16, sub_index: u8, data: &[u8], block: bool, tx: &mut dyn Transmit)
                          -> Result<(), ErrorCode> {
        if data.len() > self.buffer_size {
            return Err(ErrorCode::OutOfMemory);
        }
        self.begin(index, sub_index)?;
        let size = (data.len() as u32).to_le_bytes();
        let (request, phase) = if block {
            let cmd: u8 = BlockInitiateCmd::new().with_cs(ccs::BLOCK_DOWNLOAD).with_cc(true).with_s(true).into();
            (sdo_payload(cmd, index, sub_index, &size), Phase::BlockDownloadInitiate)
        } else if !data.is_empty() && data.len() <= 4 {
            let cmd: u8 = InitiateCmd::new()
                .with_cs(ccs::INITIATE_DOWNLOAD)
                .with_n((4 - data.len()) as u8)
                .with_e(true)
                .with_s(true)
                .into();
            (sdo_payload(cmd, index, sub_index, data), Phase::InitiateDownload { expedited: true })
        } else {
            let cmd: u8 = InitiateCmd::new().with_cs(ccs::INITIATE_DOWNLOAD).with_s(true).into();
            (sdo_payload(cmd, index, sub_index, &size), Phase::InitiateDownload { expedited: false })
        };
        self.buffer.extend_from_slice(data);
        self.size = Some(data.len());
        if let Err(err) = self.send(tx, &request) {
            self.reset();
            return Err(err);
        }
        self.phase = Some(phase);
        Ok(())
    }

    pub fn start_upload(&mut self, index: u16, sub_index: u8, block: bool, tx: &mut dyn Transmit)
                        -> Result<(), ErrorCode> {
        self.begin(index, sub_index)?;
        let (request, phase) = if block {
            let cmd: u8 = BlockCmd::new()
                .with_cs(ccs::BLOCK_UPLOAD)
                .with_cc(true)
                .with_sub(block_cs::INITIATE)
                .into();
            (sdo_payload(cmd, index, sub_index, &[self.block_size, 0]), Phase::BlockUploadInitiate)
        } else {
            let cmd: u8 = InitiateCmd::new().with_cs(ccs::INITIATE_UPLOAD).into();
            (sdo_payload(cmd, index, sub_index, &[]), Phase::InitiateUpload)
        };
        if let Err(err) = self.send(tx, &request) {
            self.reset();
            return Err(err);
        }
        self.phase = Some(phase);
        Ok(())
    }

    /// Aborts the running transfer, if any, with `code`.
    pub fn abort(&mut self, code: AbortCode, tx: &mut dyn Transmit) {
        if self.phase.is_some() {
            self.fail(tx, code);
        }
    }

    pub fn on_response(&mut self, data: &[u8], tx: &mut dyn Transmit) {
        let Some(phase) = self.phase else { return };
        if data.len() != 8 {
            return;
        }
        let in_sub_block = matches!(phase, Phase::BlockUploadSubBlock { .. });
        if command_specifier(data[0]) == scs::ABORT && (!in_sub_block || data[0] == 0x80) {
            let code = le_u32(&data[4..8]);
            info!("SDO client {} aborted by server: {:#010x}", self.num, code);
            self.phase = None;
            self.buffer.clear();
            self.result = SdoClientResult::Aborted(AbortCode::from_code(code).unwrap_or(AbortCode::Other));
            return;
        }
        self.timer_us = 0;
        if let Err(code) = self.handle(phase, data, tx) {
            self.fail(tx, code);
        }
    }

    fn check_index(&self, data: &[u8]) -> Result<(), AbortCode> {
        if get_index(data) != (self.index, self.sub_index) {
            return Err(AbortCode::GeneralParameterIncompatibility);
        }
        Ok(())
    }

    fn complete(&mut self) {
        debug!("SDO client {} transfer {:04x}:{:02x} completed", self.num, self.index, self.sub_index);
        self.phase = None;
        self.result = SdoClientResult::Completed;
    }

    fn handle(&mut self, phase: Phase, data: &[u8], tx: &mut dyn Transmit) -> Result<(), AbortCode> {
        match phase {
            Phase::InitiateDownload { expedited } => {
                if command_specifier(data[0]) != scs::INITIATE_DOWNLOAD {
                    return Err(AbortCode::CommandSpecifierNotValidOrUnknown);
                }
                self.check_index(data)?;
                if expedited {
                    self.buffer.clear();
                    self.complete();
                } else {
                    self.send_download_segment(false, tx);
                }
            }
            Phase::DownloadSegment { toggle, last } => {
                let cmd = SegmentCmd::from(data[0]);
                if cmd.cs() != scs::DOWNLOAD_SEGMENT {
                    return Err(AbortCode::CommandSpecifierNotValidOrUnknown);
                }
                if cmd.t() != toggle {
                    return Err(AbortCode::ToggleBitNotAlternated);
                }
                if last {
                    self.buffer.clear();
                    self.complete();
                } else {
                    self.send_download_segment(!toggle, tx);
                }
            }
            Phase::InitiateUpload => self.initiate_upload_response(data, tx)?,
            Phase::UploadSegment { toggle } => {
                let cmd = SegmentCmd::from(data[0]);
                if cmd.cs() != scs::UPLOAD_SEGMENT {
                    return Err(AbortCode::CommandSpecifierNotValidOrUnknown);
                }
                if cmd.t() != toggle {
                    return Err(AbortCode::ToggleBitNotAlternated);
                }
                let len = 7 - cmd.n() as usize;
                if self.buffer.len() + len > self.buffer_size {
                    return Err(AbortCode::OutOfMemory);
                }
                self.buffer.extend_from_slice(&data[1..1 + len]);
                if cmd.c() {
                    if self.size.is_some_and(|size| size != self.buffer.len()) {
                        return Err(AbortCode::DataTypeMismatchLengthMismatch);
                    }
                    self.complete();
                } else {
                    self.request_upload_segment(!toggle, tx);
                }
            }
            Phase::BlockDownloadInitiate => {
                let cmd = BlockCmd::from(data[0]);
                if cmd.cs() != scs::BLOCK_DOWNLOAD || cmd.sub() != block_cs::INITIATE {
                    return Err(AbortCode::CommandSpecifierNotValidOrUnknown);
                }
                self.check_index(data)?;
                let blksize = data[4];
                if blksize == 0 || blksize > SDO_MAX_BLOCK_SIZE {
                    return Err(AbortCode::InvalidBlockSize);
                }
                self.crc = cmd.cc();
                self.send_sub_block(blksize, tx);
            }
            Phase::BlockDownloadSubBlock { block_start, sent } => {
                let cmd = BlockCmd::from(data[0]);
                if cmd.cs() != scs::BLOCK_DOWNLOAD || cmd.sub() != block_cs::ACK {
                    return Err(AbortCode::CommandSpecifierNotValidOrUnknown);
                }
                let (ackseq, blksize) = (data[1], data[2]);
                if ackseq > sent {
                    return Err(AbortCode::InvalidSequenceNumber);
                }
                if blksize == 0 || blksize > SDO_MAX_BLOCK_SIZE {
                    return Err(AbortCode::InvalidBlockSize);
                }
                self.cursor = (block_start + ackseq as usize * 7).min(self.buffer.len());
                if ackseq == sent && self.cursor == self.buffer.len() {
                    let crc = (if self.crc { crc16_canopen_with_lut(&self.buffer) } else { 0 }).to_le_bytes();
                    let cmd: u8 = BlockEndCmd::new()
                        .with_cs(ccs::BLOCK_DOWNLOAD)
                        .with_n(block_unused_bytes(self.buffer.len()))
                        .with_sub(true)
                        .into();
                    self.transmit(tx, &[cmd, crc[0], crc[1], 0, 0, 0, 0, 0]);
                    self.phase = Some(Phase::BlockDownloadEnd);
                } else {
                    self.send_sub_block(blksize, tx);
                }
            }
            Phase::BlockDownloadEnd => {
                let cmd = BlockCmd::from(data[0]);
                if cmd.cs() != scs::BLOCK_DOWNLOAD || cmd.sub() != block_cs::END {
                    return Err(AbortCode::CommandSpecifierNotValidOrUnknown);
                }
                self.buffer.clear();
                self.complete();
            }
            Phase::BlockUploadInitiate => {
                // The server may switch to a normal upload below its threshold.
                if command_specifier(data[0]) == scs::INITIATE_UPLOAD {
                    return self.initiate_upload_response(data, tx);
                }
                let cmd = BlockInitiateCmd::from(data[0]);
                if cmd.cs() != scs::BLOCK_UPLOAD || cmd.sub() {
                    return Err(AbortCode::CommandSpecifierNotValidOrUnknown);
                }
                self.check_index(data)?;
                self.crc = cmd.cc();
                if cmd.s() {
                    let size = le_u32(&data[4..8]) as usize;
                    if size > self.buffer_size {
                        return Err(AbortCode::OutOfMemory);
                    }
                    self.size = Some(size);
                }
                let start: u8 = BlockCmd::new().with_cs(ccs::BLOCK_UPLOAD).with_sub(block_cs::START).into();
                self.transmit(tx, &[start, 0, 0, 0, 0, 0, 0, 0]);
                self.phase = Some(Phase::BlockUploadSubBlock { seq: 0 });
            }
            Phase::BlockUploadSubBlock { seq } => {
                let header = BlockSegmentHeader::from(data[0]);
                let seqno = header.seqno();
                if seqno == 0 {
                    return Err(AbortCode::InvalidSequenceNumber);
                }
                let in_order = seqno == seq + 1;
                let mut seq = seq;
                if in_order {
                    if self.buffer.len() > self.buffer_size {
                        return Err(AbortCode::OutOfMemory);
                    }
                    self.buffer.extend_from_slice(&data[1..8]);
                    seq = seqno;
                }
                let finished = in_order && header.c();
                if finished || header.c() || seqno >= self.block_size {
                    let ack: u8 = BlockCmd::new().with_cs(ccs::BLOCK_UPLOAD).with_sub(block_cs::ACK).into();
                    self.transmit(tx, &[ack, seq, self.block_size, 0, 0, 0, 0, 0]);
                    self.phase = Some(if finished { Phase::BlockUploadEnd } else { Phase::BlockUploadSubBlock { seq: 0 } });
                } else {
                    self.phase = Some(Phase::BlockUploadSubBlock { seq });
                }
            }
            Phase::BlockUploadEnd => {
                let cmd = BlockEndCmd::from(data[0]);
                if cmd.cs() != scs::BLOCK_UPLOAD || !cmd.sub() {
                    return Err(AbortCode::CommandSpecifierNotValidOrUnknown);
                }
                let unused = cmd.n() as usize;
                if unused > self.buffer.len() {
                    return Err(AbortCode::DataTypeMismatchLengthMismatch);
                }
                self.buffer.truncate(self.buffer.len() - unused);
                if self.size.is_some_and(|size| size != self.buffer.len()) {
                    return Err(AbortCode::DataTypeMismatchLengthMismatch);
                }
                if self.crc && u16::from_le_bytes([data[1], data[2]]) != crc16_canopen_with_lut(&self.buffer) {
                    return Err(AbortCode::CRCError);
                }
                let end: u8 = BlockCmd::new().with_cs(ccs::BLOCK_UPLOAD).with_sub(block_cs::END).into();
                self.transmit(tx, &[end, 0, 0, 0, 0, 0, 0, 0]);
                self.complete();
            }
        }
        Ok(())
    }

    fn transmit(&self, tx: &mut dyn Transmit, payload: &[u8; 8]) {
        if let Err(err) = self.send(tx, payload) {
            warn!("SDO client {} failed to send: {:?}", self.num, err);
        }
    }

    fn initiate_upload_response(&mut self, data: &[u8], tx: &mut dyn Transmit) -> Result<(), AbortCode> {
        let cmd = InitiateCmd::from(data[0]);
        if cmd.cs() != scs::INITIATE_UPLOAD {
            return Err(AbortCode::CommandSpecifierNotValidOrUnknown);
        }
        self.check_index(data)?;
        if cmd.e() {
            let len = if cmd.s() { 4 - cmd.n() as usize } else { 4 };
            self.buffer.clear();
            self.buffer.extend_from_slice(&data[4..4 + len]);
            self.complete();
            return Ok(());
        }
        if cmd.s() {
            let size = le_u32(&data[4..8]) as usize;
            if size > self.buffer_size {
                return Err(AbortCode::OutOfMemory);
            }
            self.size = Some(size);
        }
        self.request_upload_segment(false, tx);
        Ok(())
    }

    fn request_upload_segment(&mut self, toggle: bool, tx: &mut dyn Transmit) {
        let cmd: u8 = SegmentCmd::new().with_cs(ccs::UPLOAD_SEGMENT).with_t(toggle).into();
        self.transmit(tx, &[cmd, 0, 0, 0, 0, 0, 0, 0]);
        self.phase = Some(Phase::UploadSegment { toggle });
    }

    fn send_download_segment(&mut self, toggle: bool, tx: &mut dyn Transmit) {
        let remaining = self.buffer.len() - self.cursor;
        let len = remaining.min(7);
        let last = remaining <= 7;
        let mut frame = [0u8; 8];
        frame[0] = SegmentCmd::new()
            .with_cs(ccs::DOWNLOAD_SEGMENT)
            .with_t(toggle)
            .with_n((7 - len) as u8)
            .with_c(last)
            .into();
        frame[1..1 + len].copy_from_slice(&self.buffer[self.cursor..self.cursor + len]);
        self.cursor += len;
        self.transmit(tx, &frame);
        self.phase = Some(Phase::DownloadSegment { toggle, last });
    }

    fn send_sub_block(&mut self, blksize: u8, tx: &mut dyn Transmit) {
        let block_start = self.cursor;
        let mut sent = 0u8;
        loop {
            let remaining = self.buffer.len() - self.cursor;
            let len = remaining.min(7);
            let last = remaining <= 7;
            sent += 1;
            let mut frame = [0u8; 8];
            frame[0] = BlockSegmentHeader::new().with_c(last).with_seqno(sent).into();
            frame[1..1 + len].copy_from_slice(&self.buffer[self.cursor..self.cursor + len]);
            self.cursor += len;
            self.transmit(tx, &frame);
            if last || sent >= blksize {
                break;
            }
        }
        self.phase = Some(Phase::BlockDownloadSubBlock { block_start, sent });
    }

    /// Advances the response timeout. An expired transfer is aborted once.
    pub fn process(&mut self, elapsed_us: u32, tx: &mut dyn Transmit, timer_next_us: &mut u32) {
        if self.phase.is_none() {
            return;
        }
        self.timer_us = self.timer_us.saturating_add(elapsed_us);
        if self.timer_us >= self.timeout_us {
            warn!("SDO client {} transfer {:04x}:{:02x} timed out", self.num, self.index, self.sub_index);
            self.fail(tx, AbortCode::SdoProtocolTimedOut);
        } else {
            *timer_next_us = (*timer_next_us).min(self.timeout_us - self.timer_us);
        }
    }
}

impl Debug for SdoClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdoClient")
            .field("num", &self.num)
            .field("tx_cob_id", &self.tx_cob_id)
            .field("rx_cob_id", &self.rx_cob_id)
            .field("result", &self.result)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::DataType;
    use crate::object_directory::{AccessType, ObjectDirectory, Variable};
    use crate::sdo_server::SdoServer;
    use crate::value::Value;

    #[derive(Default)]
    struct Sent(Vec<Vec<u8>>);

    impl Transmit for Sent {
        fn send(&mut self, _cob_id: u16, data: &[u8]) -> Result<(), ErrorCode> {
            self.0.push(data.to_vec());
            Ok(())
        }
    }

    fn config() -> CanOpenConfig {
        CanOpenConfig { sdo_block_size: 3, sdo_buffer_size: 256, ..Default::default() }
    }

    fn client() -> SdoClient {
        let mut client = SdoClient::new(0, &config()).unwrap();
        client.setup(0x605, 0x585, 5);
        client
    }

    /// Shuttles frames between a client and a server until both are quiet.
    fn run(client: &mut SdoClient, server: &mut SdoServer, od: &mut ObjectDirectory, to_server: &mut Sent) {
        let mut to_client = Sent::default();
        for _ in 0..200 {
            let requests = core::mem::take(&mut to_server.0);
            for request in &requests {
                server.on_request(request, od, &mut to_client);
            }
            let responses = core::mem::take(&mut to_client.0);
            for response in &responses {
                client.on_response(response, to_server);
            }
            if requests.is_empty() && responses.is_empty() {
                return;
            }
        }
        panic!("transfer did not settle");
    }

    fn server_od() -> (SdoServer, ObjectDirectory) {
        let mut od = ObjectDirectory::empty(5);
        let rw = AccessType::new(true, true);
        od.insert(Variable::new(0x2000, 0, "u32", DataType::Unsigned32, rw.clone(), false, Value::from(0u32)));
        od.insert(Variable::new(0x2100, 0, "domain", DataType::Domain, rw, false, Value::new(vec![])));
        let mut server = SdoServer::new(0, &config()).unwrap();
        server.configure(5, &od);
        (server, od)
    }

    #[test]
    fn test_expedited_frames() {
        let mut client = client();
        let mut tx = Sent::default();
        client.start_download(0x2000, 0, &[1, 2], false, &mut tx).unwrap();
        assert_eq!(tx.0[0], vec![0x2B, 0x00, 0x20, 0x00, 1, 2, 0, 0]);
        assert_eq!(client.status(), SdoClientResult::Busy);
        assert!(matches!(client.start_upload(0x2000, 0, false, &mut tx), Err(ErrorCode::SdoClientBusy { num: 0 })));
        client.on_response(&[0x60, 0x00, 0x20, 0x00, 0, 0, 0, 0], &mut tx);
        assert_eq!(client.status(), SdoClientResult::Completed);

        client.start_upload(0x2000, 0, false, &mut tx).unwrap();
        client.on_response(&[0x4F, 0x00, 0x20, 0x00, 0x7F, 0, 0, 0], &mut tx);
        assert_eq!(client.take_upload_data(), Some(vec![0x7F]));
        assert_eq!(client.status(), SdoClientResult::Idle);
    }

    #[test]
    fn test_segmented_against_server() {
        let (mut server, mut od) = server_od();
        let mut client = client();
        let mut tx = Sent::default();
        let data: Vec<u8> = (0..20).collect();
        client.start_download(0x2100, 0, &data, false, &mut tx).unwrap();
        run(&mut client, &mut server, &mut od, &mut tx);
        assert_eq!(client.status(), SdoClientResult::Completed);
        assert_eq!(od.fetch(0x2100, 0).unwrap(), data);

        client.start_upload(0x2100, 0, false, &mut tx).unwrap();
        run(&mut client, &mut server, &mut od, &mut tx);
        assert_eq!(client.take_upload_data(), Some(data));
    }

    #[test]
    fn test_block_against_server() {
        let (mut server, mut od) = server_od();
        let mut client = client();
        let mut tx = Sent::default();
        let data: Vec<u8> = (0..100u8).map(|b| b.wrapping_mul(7)).collect();
        client.start_download(0x2100, 0, &data, true, &mut tx).unwrap();
        run(&mut client, &mut server, &mut od, &mut tx);
        assert_eq!(client.status(), SdoClientResult::Completed);
        assert_eq!(od.fetch(0x2100, 0).unwrap(), data);

        client.start_upload(0x2100, 0, true, &mut tx).unwrap();
        run(&mut client, &mut server, &mut od, &mut tx);
        assert_eq!(client.take_upload_data(), Some(data));
    }

    #[test]
    fn test_server_abort_and_timeout() {
        let (mut server, mut od) = server_od();
        let mut client = client();
        let mut tx = Sent::default();
        client.start_upload(0x3000, 0, false, &mut tx).unwrap();
        run(&mut client, &mut server, &mut od, &mut tx);
        assert_eq!(client.status(), SdoClientResult::Aborted(AbortCode::ObjectDoesNotExistInObjectDictionary));

        client.start_upload(0x2000, 0, false, &mut tx).unwrap();
        tx.0.clear();
        let mut next = u32::MAX;
        client.process(500_000, &mut tx, &mut next);
        assert_eq!(next, 500_000);
        client.process(500_000, &mut tx, &mut next);
        client.process(500_000, &mut tx, &mut next);
        assert_eq!(tx.0, vec![vec![0x80, 0x00, 0x20, 0x00, 0x00, 0x00, 0x04, 0x05]]);
        assert_eq!(client.status(), SdoClientResult::Aborted(AbortCode::SdoProtocolTimedOut));
    }

    #[test]
    fn test_toggle_error() {
        let mut client = client();
        let mut tx = Sent::default();
        client.start_upload(0x2100, 0, false, &mut tx).unwrap();
        client.on_response(&[0x41, 0x00, 0x21, 0x00, 10, 0, 0, 0], &mut tx);
        client.on_response(&[0x10, 1, 2, 3, 4, 5, 6, 7], &mut tx);
        assert_eq!(client.status(), SdoClientResult::Aborted(AbortCode::ToggleBitNotAlternated));
        assert_eq!(tx.0.last().unwrap()[0], 0x80);
    }
}
