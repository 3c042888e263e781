//! SDO command byte layouts (CiA 301, 7.2.4.3).
//!
//! Each header is one byte, most significant bit first. The same layout is
//! shared by the request and the response where CiA 301 reuses it.

use bitfield_struct::bitfield;

/// Command specifiers in the top three bits of byte 0.
pub mod ccs {
    pub const DOWNLOAD_SEGMENT: u8 = 0;
    pub const INITIATE_DOWNLOAD: u8 = 1;
    pub const INITIATE_UPLOAD: u8 = 2;
    pub const UPLOAD_SEGMENT: u8 = 3;
    pub const ABORT: u8 = 4;
    pub const BLOCK_UPLOAD: u8 = 5;
    pub const BLOCK_DOWNLOAD: u8 = 6;
}

/// Server command specifiers.
pub mod scs {
    pub const UPLOAD_SEGMENT: u8 = 0;
    pub const DOWNLOAD_SEGMENT: u8 = 1;
    pub const INITIATE_UPLOAD: u8 = 2;
    pub const INITIATE_DOWNLOAD: u8 = 3;
    pub const ABORT: u8 = 4;
    pub const BLOCK_DOWNLOAD: u8 = 5;
    pub const BLOCK_UPLOAD: u8 = 6;
}

/// Block sub-commands in the low bits.
pub mod block_cs {
    pub const INITIATE: u8 = 0;
    pub const END: u8 = 1;
    pub const ACK: u8 = 2;
    pub const START: u8 = 3;
}

pub fn command_specifier(cmd: u8) -> u8 {
    cmd >> 5
}

/// Initiate download/upload, request and response.
#[bitfield(u8, order = Msb)]
pub struct InitiateCmd {
    #[bits(3)]
    pub cs: u8,
    #[bits(1)]
    _reserved: u8,
    /// Bytes of the 4 byte data field without data, valid when `e` and `s`.
    #[bits(2)]
    pub n: u8,
    /// Expedited transfer.
    pub e: bool,
    /// Size indicated.
    pub s: bool,
}

/// Download/upload segment, request and response.
#[bitfield(u8, order = Msb)]
pub struct SegmentCmd {
    #[bits(3)]
    pub cs: u8,
    /// Toggle bit, alternates for each segment, starting at 0.
    pub t: bool,
    /// Bytes of the 7 byte data field without data.
    #[bits(3)]
    pub n: u8,
    /// No more segments.
    pub c: bool,
}

/// Block download initiate request; also the block upload initiate response.
#[bitfield(u8, order = Msb)]
pub struct BlockInitiateCmd {
    #[bits(3)]
    pub cs: u8,
    #[bits(2)]
    _reserved: u8,
    /// CRC supported.
    pub cc: bool,
    /// Size indicated.
    pub s: bool,
    pub sub: bool,
}

/// Block upload requests (initiate, start, ack, end) and block download responses.
#[bitfield(u8, order = Msb)]
pub struct BlockCmd {
    #[bits(3)]
    pub cs: u8,
    #[bits(2)]
    _reserved: u8,
    /// CRC supported, meaningful on initiate only.
    pub cc: bool,
    #[bits(2)]
    pub sub: u8,
}

/// End of a block transfer, carries the unused byte count of the last segment.
#[bitfield(u8, order = Msb)]
pub struct BlockEndCmd {
    #[bits(3)]
    pub cs: u8,
    #[bits(3)]
    pub n: u8,
    #[bits(1)]
    _reserved: u8,
    pub sub: bool,
}

/// Byte 0 of a block segment: last segment flag and sequence number 1..=127.
#[bitfield(u8, order = Msb)]
pub struct BlockSegmentHeader {
    pub c: bool,
    #[bits(7)]
    pub seqno: u8,
}
