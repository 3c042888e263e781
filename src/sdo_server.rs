//! SDO server: expedited, segmented and block transfers of one dictionary
//! entry at a time.
//!
//! Downloads are assembled in the server buffer and committed with a single
//! dictionary write, so an aborted or timed out transfer never leaves a
//! partially written entry behind.

use crate::can::Transmit;
use crate::cmd_header::*;
use crate::config::{CanOpenConfig, SdoBusyPolicy};
use crate::constant::{COB_FUNC_RECEIVE_SDO, COB_FUNC_TRANSMIT_SDO, COB_ID_INVALID, COB_ID_MASK,
                      REG_SDO_SERVER_PARAM, SDO_MAX_BLOCK_SIZE};
use crate::error::{AbortCode, ErrorCode};
use crate::object_directory::{fetch_u32, OdAccess};
use crate::prelude::*;
use crate::util::{abort_payload, block_unused_bytes, crc16_canopen_with_lut, get_index, le_u32, sdo_payload};
use crate::{debug, info, warn};

/// Externally visible state of an SDO session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// A response of the peer is expected before anything else can happen.
    WaitingResponse,
    /// Segmented transfer running.
    InProgress,
    /// Block sub-block transfer running.
    BlockInProgress,
    /// An abort could not be transmitted yet and is retried by `process`.
    Aborting,
}

#[derive(Debug, Clone)]
enum Phase {
    SegmentedDownload { toggle: bool, last: Option<[u8; 8]> },
    SegmentedUpload { toggle: bool },
    BlockDownload { crc: bool, blksize: u8, seq: u8 },
    BlockDownloadEnd { crc: bool },
    BlockUploadInitiated { crc: bool, blksize: u8 },
    BlockUploadAwaitAck { crc: bool, block_start: usize, sent: u8 },
    BlockUploadEnd,
    Done,
}

#[derive(Debug, Clone)]
struct Transfer {
    index: u16,
    sub_index: u8,
    /// Upload: next byte to send.
    cursor: usize,
    /// Declared size of a download.
    size: Option<usize>,
    timer_us: u32,
    phase: Phase,
}

type Outcome = Result<Option<(u16, u8)>, AbortCode>;

pub struct SdoServer {
    num: usize,
    valid: bool,
    rx_cob_id: u16,
    tx_cob_id: u16,
    timeout_us: u32,
    block_size: u8,
    buffer_size: usize,
    busy_policy: SdoBusyPolicy,
    buffer: Vec<u8>,
    session: Option<Transfer>,
    /// Final segment of the last completed segmented download.
    completed_segment: Option<[u8; 8]>,
    pending_abort: Option<[u8; 8]>,
}

impl SdoServer {
    /// Reserves the transfer buffer up front; a failed allocation is reported
    /// to the caller instead of surfacing in the middle of a transfer.
    pub fn new(num: usize, config: &CanOpenConfig) -> Result<Self, ErrorCode> {
        let mut buffer = Vec::new();
        // One spare segment for the padding of the last block segment.
        buffer.try_reserve_exact(config.sdo_buffer_size + 7).map_err(|_| ErrorCode::OutOfMemory)?;
        Ok(SdoServer {
            num,
            valid: false,
            rx_cob_id: 0,
            tx_cob_id: 0,
            timeout_us: config.sdo_timeout_us,
            block_size: config.sdo_block_size.clamp(1, SDO_MAX_BLOCK_SIZE),
            buffer_size: config.sdo_buffer_size,
            busy_policy: config.sdo_busy_policy,
            buffer,
            session: None,
            completed_segment: None,
            pending_abort: None,
        })
    }

    /// Server 0 uses the default identifiers, further servers are configured by `0x1200+num`.
    pub fn configure(&mut self, node_id: u8, od: &dyn OdAccess) {
        self.reset();
        if self.num == 0 {
            self.valid = true;
            self.rx_cob_id = COB_FUNC_RECEIVE_SDO + node_id as u16;
            self.tx_cob_id = COB_FUNC_TRANSMIT_SDO + node_id as u16;
            return;
        }
        let index = REG_SDO_SERVER_PARAM + self.num as u16;
        match (fetch_u32(od, index, 1), fetch_u32(od, index, 2)) {
            (Some(rx), Some(tx)) => {
                self.valid = rx & COB_ID_INVALID == 0 && tx & COB_ID_INVALID == 0;
                self.rx_cob_id = (rx & COB_ID_MASK) as u16;
                self.tx_cob_id = (tx & COB_ID_MASK) as u16;
            }
            _ => self.valid = false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn rx_cob_id(&self) -> u16 {
        self.rx_cob_id
    }

    pub fn tx_cob_id(&self) -> u16 {
        self.tx_cob_id
    }

    pub fn state(&self) -> SessionState {
        if self.pending_abort.is_some() {
            return SessionState::Aborting;
        }
        match self.session.as_ref().map(|s| &s.phase) {
            None => SessionState::Idle,
            Some(Phase::SegmentedDownload { .. }) | Some(Phase::SegmentedUpload { .. }) => SessionState::InProgress,
            Some(Phase::BlockDownload { .. }) => SessionState::BlockInProgress,
            Some(_) => SessionState::WaitingResponse,
        }
    }

    /// Drops the running transfer without notifying the client.
    pub fn reset(&mut self) {
        self.session = None;
        self.completed_segment = None;
        self.buffer.clear();
    }

    fn send(&mut self, tx: &mut dyn Transmit, payload: &[u8; 8]) {
        if let Err(err) = tx.send(self.tx_cob_id, payload) {
            warn!("SDO server {} failed to respond: {:?}", self.num, err);
        }
    }

    fn send_abort(&mut self, tx: &mut dyn Transmit, index: u16, sub_index: u8, code: AbortCode) {
        info!("SDO server {} abort {:04x}:{:02x} {:#010x} ({})", self.num, index, sub_index, code.code(),
              code.description());
        let payload = abort_payload(index, sub_index, code);
        if tx.send(self.tx_cob_id, &payload).is_err() {
            self.pending_abort = Some(payload);
        }
    }

    /// Handles one request frame. Returns the entry written when a download completed.
    pub fn on_request(&mut self, data: &[u8], od: &mut dyn OdAccess, tx: &mut dyn Transmit) -> Option<(u16, u8)> {
        if !self.valid || data.len() != 8 {
            return None;
        }
        let cs = command_specifier(data[0]);
        let (req_index, req_sub) = get_index(data);

        if let Some(segment) = self.completed_segment.take() {
            if self.session.is_none() && segment[..] == data[..8] {
                debug!("SDO server {} repeated final segment acknowledged", self.num);
                let response: u8 = SegmentCmd::new()
                    .with_cs(scs::DOWNLOAD_SEGMENT)
                    .with_t(SegmentCmd::from(segment[0]).t())
                    .into();
                self.send(tx, &[response, 0, 0, 0, 0, 0, 0, 0]);
                self.completed_segment = Some(segment);
                return None;
            }
        }

        let in_block_download = matches!(self.session, Some(Transfer { phase: Phase::BlockDownload { .. }, .. }));
        if cs == ccs::ABORT && (!in_block_download || data[0] == 0x80) {
            if let Some(session) = self.session.take() {
                info!("SDO server {} transfer {:04x}:{:02x} aborted by client: {:#010x}", self.num,
                      session.index, session.sub_index, le_u32(&data[4..8]));
            }
            self.buffer.clear();
            return None;
        }

        if self.session.is_some() && !in_block_download && is_initiate(data[0]) {
            match self.busy_policy {
                SdoBusyPolicy::Reject => {
                    self.send_abort(tx, req_index, req_sub, AbortCode::DataTransferOrStoreFailedDueToDeviceState);
                    return None;
                }
                SdoBusyPolicy::Restart => {
                    debug!("SDO server {} drops running transfer for a new request", self.num);
                    self.reset();
                }
            }
        }

        let result = match self.session.take() {
            None => self.initiate(data, od, tx).map_err(|code| (req_index, req_sub, code)),
            Some(mut session) => {
                session.timer_us = 0;
                let (index, sub_index) = (session.index, session.sub_index);
                let result = self.continue_transfer(&mut session, data, od, tx);
                if result.is_ok() && !matches!(session.phase, Phase::Done) {
                    self.session = Some(session);
                }
                result.map_err(|code| (index, sub_index, code))
            }
        };

        match result {
            Ok(written) => {
                if self.session.is_none() {
                    self.buffer.clear();
                }
                written
            }
            Err((index, sub_index, code)) => {
                self.reset();
                self.send_abort(tx, index, sub_index, code);
                None
            }
        }
    }

    fn initiate(&mut self, data: &[u8], od: &mut dyn OdAccess, tx: &mut dyn Transmit) -> Outcome {
        let (index, sub_index) = get_index(data);
        match command_specifier(data[0]) {
            ccs::INITIATE_DOWNLOAD => self.initiate_download(index, sub_index, data, od, tx),
            ccs::INITIATE_UPLOAD => self.initiate_upload(index, sub_index, od, tx),
            ccs::BLOCK_DOWNLOAD if !BlockInitiateCmd::from(data[0]).sub() => {
                self.init_block_download(index, sub_index, data, od, tx)
            }
            ccs::BLOCK_UPLOAD if BlockCmd::from(data[0]).sub() == block_cs::INITIATE => {
                self.init_block_upload(index, sub_index, data, od, tx)
            }
            _ => Err(AbortCode::CommandSpecifierNotValidOrUnknown),
        }
    }

    fn continue_transfer(&mut self, session: &mut Transfer, data: &[u8], od: &mut dyn OdAccess,
                         tx: &mut dyn Transmit) -> Outcome {
        match session.phase.clone() {
            Phase::SegmentedDownload { toggle, last } => self.download_segment(session, toggle, last, data, od, tx),
            Phase::SegmentedUpload { toggle } => self.upload_segment(session, toggle, data, tx),
            Phase::BlockDownload { crc, blksize, seq } => self.block_download(session, crc, blksize, seq, data, tx),
            Phase::BlockDownloadEnd { crc } => self.end_block_download(session, crc, data, od, tx),
            Phase::BlockUploadInitiated { crc, blksize } => {
                let cmd = BlockCmd::from(data[0]);
                if cmd.cs() != ccs::BLOCK_UPLOAD || cmd.sub() != block_cs::START {
                    return Err(AbortCode::CommandSpecifierNotValidOrUnknown);
                }
                self.send_sub_block(session, crc, blksize, tx);
                Ok(None)
            }
            Phase::BlockUploadAwaitAck { crc, block_start, sent } => {
                self.confirm_block_upload(session, crc, block_start, sent, data, tx)
            }
            Phase::BlockUploadEnd => {
                let cmd = BlockCmd::from(data[0]);
                if cmd.cs() != ccs::BLOCK_UPLOAD || cmd.sub() != block_cs::END {
                    return Err(AbortCode::CommandSpecifierNotValidOrUnknown);
                }
                session.phase = Phase::Done;
                Ok(None)
            }
            Phase::Done => Err(AbortCode::GeneralError),
        }
    }

    fn initiate_download(&mut self, index: u16, sub_index: u8, req: &[u8], od: &mut dyn OdAccess,
                         tx: &mut dyn Transmit) -> Outcome {
        let cmd = InitiateCmd::from(req[0]);
        let entry = od.entry(index, sub_index)?;
        if !entry.writable {
            return Err(AbortCode::AttemptToWriteReadOnlyObject);
        }
        let response = InitiateCmd::new().with_cs(scs::INITIATE_DOWNLOAD).into();

        if cmd.e() {
            // Without a size indication fixed-size entries take their own width.
            let len = match (cmd.s(), entry.size) {
                (true, _) => 4 - cmd.n() as usize,
                (false, size) if (1..4).contains(&size) => size,
                (false, _) => 4,
            };
            od.write(index, sub_index, &req[4..4 + len])?;
            self.send(tx, &sdo_payload(response, index, sub_index, &[]));
            return Ok(Some((index, sub_index)));
        }

        let size = if cmd.s() { Some(le_u32(&req[4..8]) as usize) } else { None };
        if size.is_some_and(|s| s > self.buffer_size) {
            return Err(AbortCode::OutOfMemory);
        }
        if let (Some(size), true) = (size, entry.size > 0) {
            if size != entry.size {
                return Err(AbortCode::DataTypeMismatchLengthMismatch);
            }
        }
        self.buffer.clear();
        self.session = Some(Transfer {
            index,
            sub_index,
            cursor: 0,
            size,
            timer_us: 0,
            phase: Phase::SegmentedDownload { toggle: false, last: None },
        });
        self.send(tx, &sdo_payload(response, index, sub_index, &[]));
        Ok(None)
    }

    #[allow(clippy::too_many_arguments)]
    fn download_segment(&mut self, session: &mut Transfer, toggle: bool, last: Option<[u8; 8]>, req: &[u8],
                        od: &mut dyn OdAccess, tx: &mut dyn Transmit) -> Outcome {
        let cmd = SegmentCmd::from(req[0]);
        if cmd.cs() != ccs::DOWNLOAD_SEGMENT {
            return Err(AbortCode::CommandSpecifierNotValidOrUnknown);
        }
        if cmd.t() != toggle {
            // A repeated frame is acknowledged again without touching the buffer.
            if last.is_some_and(|last| last[..] == req[..8]) {
                debug!("SDO server {} duplicate segment acknowledged", self.num);
                let response: u8 = SegmentCmd::new().with_cs(scs::DOWNLOAD_SEGMENT).with_t(cmd.t()).into();
                self.send(tx, &[response, 0, 0, 0, 0, 0, 0, 0]);
                return Ok(None);
            }
            return Err(AbortCode::ToggleBitNotAlternated);
        }

        let len = 7 - cmd.n() as usize;
        if self.buffer.len() + len > self.buffer_size {
            return Err(AbortCode::OutOfMemory);
        }
        if session.size.is_some_and(|size| self.buffer.len() + len > size) {
            return Err(AbortCode::DataTypeMismatchLengthMismatch);
        }
        self.buffer.extend_from_slice(&req[1..1 + len]);

        let mut frame = [0u8; 8];
        frame.copy_from_slice(&req[..8]);
        session.phase = Phase::SegmentedDownload { toggle: !toggle, last: Some(frame) };

        let response: u8 = SegmentCmd::new().with_cs(scs::DOWNLOAD_SEGMENT).with_t(cmd.t()).into();
        if !cmd.c() {
            self.send(tx, &[response, 0, 0, 0, 0, 0, 0, 0]);
            return Ok(None);
        }

        if session.size.is_some_and(|size| size != self.buffer.len()) {
            return Err(AbortCode::DataTypeMismatchLengthMismatch);
        }
        od.write(session.index, session.sub_index, &self.buffer)?;
        self.send(tx, &[response, 0, 0, 0, 0, 0, 0, 0]);
        self.completed_segment = Some(frame);
        session.phase = Phase::Done;
        Ok(Some((session.index, session.sub_index)))
    }

    fn initiate_upload(&mut self, index: u16, sub_index: u8, od: &mut dyn OdAccess, tx: &mut dyn Transmit)
                       -> Outcome {
        let data = od.read(index, sub_index)?;
        if (1..=4).contains(&data.len()) {
            let cmd: u8 = InitiateCmd::new()
                .with_cs(scs::INITIATE_UPLOAD)
                .with_n((4 - data.len()) as u8)
                .with_e(true)
                .with_s(true)
                .into();
            self.send(tx, &sdo_payload(cmd, index, sub_index, &data));
            return Ok(None);
        }
        if data.len() > self.buffer_size {
            return Err(AbortCode::OutOfMemory);
        }
        self.start_segmented_upload(index, sub_index, &data, tx);
        Ok(None)
    }

    fn start_segmented_upload(&mut self, index: u16, sub_index: u8, data: &[u8], tx: &mut dyn Transmit) {
        self.buffer.clear();
        self.buffer.extend_from_slice(data);
        self.session = Some(Transfer {
            index,
            sub_index,
            cursor: 0,
            size: Some(data.len()),
            timer_us: 0,
            phase: Phase::SegmentedUpload { toggle: false },
        });
        let cmd: u8 = InitiateCmd::new().with_cs(scs::INITIATE_UPLOAD).with_s(true).into();
        self.send(tx, &sdo_payload(cmd, index, sub_index, &(data.len() as u32).to_le_bytes()));
    }

    fn upload_segment(&mut self, session: &mut Transfer, toggle: bool, req: &[u8], tx: &mut dyn Transmit)
                      -> Outcome {
        let cmd = SegmentCmd::from(req[0]);
        if cmd.cs() != ccs::UPLOAD_SEGMENT {
            return Err(AbortCode::CommandSpecifierNotValidOrUnknown);
        }
        if cmd.t() != toggle {
            return Err(AbortCode::ToggleBitNotAlternated);
        }
        let remaining = self.buffer.len() - session.cursor;
        let len = remaining.min(7);
        let last = remaining <= 7;
        let mut frame = [0u8; 8];
        frame[0] = SegmentCmd::new()
            .with_cs(scs::UPLOAD_SEGMENT)
            .with_t(toggle)
            .with_n((7 - len) as u8)
            .with_c(last)
            .into();
        frame[1..1 + len].copy_from_slice(&self.buffer[session.cursor..session.cursor + len]);
        session.cursor += len;
        self.send(tx, &frame);
        if last {
            session.phase = Phase::Done;
        } else {
            session.phase = Phase::SegmentedUpload { toggle: !toggle };
        }
        Ok(None)
    }

    fn init_block_download(&mut self, index: u16, sub_index: u8, req: &[u8], od: &mut dyn OdAccess,
                           tx: &mut dyn Transmit) -> Outcome {
        let cmd = BlockInitiateCmd::from(req[0]);
        let entry = od.entry(index, sub_index)?;
        if !entry.writable {
            return Err(AbortCode::AttemptToWriteReadOnlyObject);
        }
        let size = if cmd.s() { Some(le_u32(&req[4..8]) as usize) } else { None };
        if size.is_some_and(|s| s > self.buffer_size) {
            return Err(AbortCode::OutOfMemory);
        }
        self.buffer.clear();
        self.session = Some(Transfer {
            index,
            sub_index,
            cursor: 0,
            size,
            timer_us: 0,
            phase: Phase::BlockDownload { crc: cmd.cc(), blksize: self.block_size, seq: 0 },
        });
        let response: u8 = BlockInitiateCmd::new().with_cs(scs::BLOCK_DOWNLOAD).with_cc(true).into();
        self.send(tx, &sdo_payload(response, index, sub_index, &[self.block_size]));
        Ok(None)
    }

    fn block_download(&mut self, session: &mut Transfer, crc: bool, blksize: u8, seq: u8, req: &[u8],
                      tx: &mut dyn Transmit) -> Outcome {
        let header = BlockSegmentHeader::from(req[0]);
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
            self.buffer.extend_from_slice(&req[1..8]);
            seq = seqno;
        } else {
            debug!("SDO server {} ignores block segment {} after {}", self.num, seqno, seq);
        }

        let finished = in_order && header.c();
        if finished || seqno >= blksize || (header.c() && !in_order) {
            let response: u8 = BlockCmd::new().with_cs(scs::BLOCK_DOWNLOAD).with_sub(block_cs::ACK).into();
            self.send(tx, &[response, seq, self.block_size, 0, 0, 0, 0, 0]);
            session.phase = if finished {
                Phase::BlockDownloadEnd { crc }
            } else {
                Phase::BlockDownload { crc, blksize: self.block_size, seq: 0 }
            };
        } else {
            session.phase = Phase::BlockDownload { crc, blksize, seq };
        }
        Ok(None)
    }

    fn end_block_download(&mut self, session: &mut Transfer, crc: bool, req: &[u8], od: &mut dyn OdAccess,
                          tx: &mut dyn Transmit) -> Outcome {
        let cmd = BlockEndCmd::from(req[0]);
        if cmd.cs() != ccs::BLOCK_DOWNLOAD || !cmd.sub() {
            return Err(AbortCode::CommandSpecifierNotValidOrUnknown);
        }
        let unused = cmd.n() as usize;
        if unused > self.buffer.len() {
            return Err(AbortCode::DataTypeMismatchLengthMismatch);
        }
        self.buffer.truncate(self.buffer.len() - unused);
        if self.buffer.len() > self.buffer_size {
            return Err(AbortCode::OutOfMemory);
        }
        if session.size.is_some_and(|size| size != self.buffer.len()) {
            return Err(AbortCode::DataTypeMismatchLengthMismatch);
        }
        if crc && u16::from_le_bytes([req[1], req[2]]) != crc16_canopen_with_lut(&self.buffer) {
            return Err(AbortCode::CRCError);
        }
        od.write(session.index, session.sub_index, &self.buffer)?;
        let response: u8 = BlockCmd::new().with_cs(scs::BLOCK_DOWNLOAD).with_sub(block_cs::END).into();
        self.send(tx, &[response, 0, 0, 0, 0, 0, 0, 0]);
        session.phase = Phase::Done;
        Ok(Some((session.index, session.sub_index)))
    }

    fn init_block_upload(&mut self, index: u16, sub_index: u8, req: &[u8], od: &mut dyn OdAccess,
                         tx: &mut dyn Transmit) -> Outcome {
        let cmd = BlockCmd::from(req[0]);
        let (blksize, pst) = (req[4], req[5]);
        if blksize == 0 || blksize > SDO_MAX_BLOCK_SIZE {
            return Err(AbortCode::InvalidBlockSize);
        }
        let data = od.read(index, sub_index)?;
        if data.len() > self.buffer_size {
            return Err(AbortCode::OutOfMemory);
        }
        // Protocol switch threshold: small objects go the normal way.
        if pst > 0 && data.len() <= pst as usize {
            return self.initiate_upload(index, sub_index, od, tx);
        }
        self.buffer.clear();
        self.buffer.extend_from_slice(&data);
        self.session = Some(Transfer {
            index,
            sub_index,
            cursor: 0,
            size: Some(data.len()),
            timer_us: 0,
            phase: Phase::BlockUploadInitiated { crc: cmd.cc(), blksize },
        });
        let response: u8 = BlockInitiateCmd::new()
            .with_cs(scs::BLOCK_UPLOAD)
            .with_cc(cmd.cc())
            .with_s(true)
            .into();
        self.send(tx, &sdo_payload(response, index, sub_index, &(data.len() as u32).to_le_bytes()));
        Ok(None)
    }

    /// Sends up to `blksize` segments from the cursor in one go.
    fn send_sub_block(&mut self, session: &mut Transfer, crc: bool, blksize: u8, tx: &mut dyn Transmit) {
        let block_start = session.cursor;
        let mut sent = 0u8;
        loop {
            let remaining = self.buffer.len() - session.cursor;
            let len = remaining.min(7);
            let last = remaining <= 7;
            sent += 1;
            let mut frame = [0u8; 8];
            frame[0] = BlockSegmentHeader::new().with_c(last).with_seqno(sent).into();
            frame[1..1 + len].copy_from_slice(&self.buffer[session.cursor..session.cursor + len]);
            session.cursor += len;
            self.send(tx, &frame);
            if last || sent >= blksize {
                break;
            }
        }
        session.phase = Phase::BlockUploadAwaitAck { crc, block_start, sent };
    }

    fn confirm_block_upload(&mut self, session: &mut Transfer, crc: bool, block_start: usize, sent: u8,
                            req: &[u8], tx: &mut dyn Transmit) -> Outcome {
        let cmd = BlockCmd::from(req[0]);
        if cmd.cs() != ccs::BLOCK_UPLOAD || cmd.sub() != block_cs::ACK {
            return Err(AbortCode::CommandSpecifierNotValidOrUnknown);
        }
        let (ackseq, next_blksize) = (req[1], req[2]);
        if ackseq > sent {
            return Err(AbortCode::InvalidSequenceNumber);
        }
        if next_blksize == 0 || next_blksize > SDO_MAX_BLOCK_SIZE {
            return Err(AbortCode::InvalidBlockSize);
        }
        session.cursor = (block_start + ackseq as usize * 7).min(self.buffer.len());
        let all_sent = ackseq == sent && session.cursor == self.buffer.len();
        if !all_sent {
            if ackseq < sent {
                debug!("SDO server {} repeats block from segment {}", self.num, ackseq + 1);
            }
            self.send_sub_block(session, crc, next_blksize, tx);
            return Ok(None);
        }

        let unused = block_unused_bytes(self.buffer.len());
        let crc_value = if crc { crc16_canopen_with_lut(&self.buffer) } else { 0 };
        let response: u8 = BlockEndCmd::new()
            .with_cs(scs::BLOCK_UPLOAD)
            .with_n(unused)
            .with_sub(true)
            .into();
        let crc_bytes = crc_value.to_le_bytes();
        self.send(tx, &[response, crc_bytes[0], crc_bytes[1], 0, 0, 0, 0, 0]);
        session.phase = Phase::BlockUploadEnd;
        Ok(None)
    }

    /// Advances the session timeout. An expired session is aborted exactly once.
    pub fn process(&mut self, elapsed_us: u32, tx: &mut dyn Transmit, timer_next_us: &mut u32) {
        if let Some(payload) = self.pending_abort {
            if tx.send(self.tx_cob_id, &payload).is_ok() {
                self.pending_abort = None;
            } else {
                *timer_next_us = 0;
            }
        }
        let Some(session) = self.session.as_mut() else { return };
        session.timer_us = session.timer_us.saturating_add(elapsed_us);
        if session.timer_us >= self.timeout_us {
            let (index, sub_index) = (session.index, session.sub_index);
            warn!("SDO server {} transfer {:04x}:{:02x} timed out", self.num, index, sub_index);
            self.reset();
            self.send_abort(tx, index, sub_index, AbortCode::SdoProtocolTimedOut);
        } else {
            *timer_next_us = (*timer_next_us).min(self.timeout_us - session.timer_us);
        }
    }
}

fn is_initiate(cmd: u8) -> bool {
    match command_specifier(cmd) {
        ccs::INITIATE_DOWNLOAD | ccs::INITIATE_UPLOAD => true,
        ccs::BLOCK_DOWNLOAD => !BlockInitiateCmd::from(cmd).sub(),
        ccs::BLOCK_UPLOAD => BlockCmd::from(cmd).sub() == block_cs::INITIATE,
        _ => false,
    }
}

impl Debug for SdoServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdoServer")
            .field("num", &self.num)
            .field("rx_cob_id", &self.rx_cob_id)
            .field("tx_cob_id", &self.tx_cob_id)
            .field("state", &self.state())
            .finish()
    }
}
