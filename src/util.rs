use core::str::FromStr;

use embedded_can::{Frame, Id, StandardId};

use crate::error::{AbortCode, ErrorCode};
use crate::prelude::*;

pub trait ParseRadix: FromStr {
    fn from_str_radix(s: &str, radix: u32) -> Result<Self, Self::Err>
        where
            Self: Sized;
}

macro_rules! impl_parse_radix_signed {
    ($signed:ty, $unsigned:ty, $limit:expr, $upscale:ty, $wrap_around:expr) => {
        impl ParseRadix for $signed {
            fn from_str_radix(s: &str, radix: u32) -> Result<Self, Self::Err> {
                let val = <$unsigned>::from_str_radix(s, radix)?;
                if val <= $limit {
                    Ok(val as $signed)
                } else {
                    Ok((val as $upscale - $wrap_around) as $signed)
                }
            }
        }
    };
}

impl_parse_radix_signed!(i8, u8, 0x7F, i16, 0x100);
impl_parse_radix_signed!(i16, u16, 0x7FFF, i32, 0x10000);
impl_parse_radix_signed!(i32, u32, 0x7FFFFFFF, i64, 0x100000000);
impl_parse_radix_signed!(i64, u64, 0x7FFFFFFFFFFFFFFF, i128, 0x10000000000000000);

macro_rules! impl_parse_radix_for {
    ($t:ty) => {
        impl ParseRadix for $t {
            fn from_str_radix(s: &str, radix: u32) -> Result<Self, <Self as FromStr>::Err> {
                <$t>::from_str_radix(s, radix)
            }
        }
    };
}

impl_parse_radix_for!(u8);
impl_parse_radix_for!(u16);
impl_parse_radix_for!(u32);
impl_parse_radix_for!(u64);

/// Parses decimal or `0x` prefixed hexadecimal numbers, as found in EDS files.
/// Unparsable input yields the default value.
pub fn parse_number<T: ParseRadix + Default>(s: &str) -> T {
    let s = s.trim();
    if s.starts_with("0x") || s.starts_with("0X") {
        T::from_str_radix(&s[2..], 16).unwrap_or_default()
    } else {
        s.parse().unwrap_or_default()
    }
}

pub fn get_cob_id<F: Frame>(frame: &F) -> Option<u16> {
    if let Id::Standard(sid) = frame.id() {
        return Some(sid.as_raw());
    }
    // CAN 2.0A only, extended frames are never CANopen traffic here.
    None
}

fn is_hex_char(c: char) -> bool {
    c.is_ascii_hexdigit()
}

/// `[1018]` style EDS section.
pub fn is_top(s: &str) -> bool {
    s.len() == 4 && s.chars().all(is_hex_char)
}

/// `[1018sub2]` style EDS section.
pub fn is_sub(s: &str) -> Option<(u16, u8)> {
    if s.len() > 7 && s[4..7].eq_ignore_ascii_case("sub") && s[0..4].chars().all(is_hex_char) {
        let (index_str, sub_str) = (&s[0..4], &s[7..]);
        match (u16::from_str_radix(index_str, 16), u8::from_str_radix(sub_str, 16)) {
            (Ok(index), Ok(sub)) => Some((index, sub)),
            _ => None,
        }
    } else {
        None
    }
}

/// `[1003Name]` style EDS section (CompactSubObj names).
pub fn is_name(s: &str) -> Option<u16> {
    (s.len() == 8 && s.ends_with("Name") && s[0..4].chars().all(is_hex_char))
        .then(|| u16::from_str_radix(&s[0..4], 16).ok())
        .flatten()
}

/// Index and sub-index of an SDO command frame (bytes 1..=3).
pub fn get_index(data: &[u8]) -> (u16, u8) {
    if data.len() < 4 {
        return (0, 0);
    }
    (u16::from_le_bytes([data[1], data[2]]), data[3])
}

/// Zero-extending little endian read of up to 4 bytes.
pub fn le_u32(data: &[u8]) -> u32 {
    data.iter()
        .take(4)
        .enumerate()
        .fold(0u32, |acc, (i, &b)| acc | (b as u32) << (8 * i))
}

/// Zero-extending little endian read of up to 8 bytes.
pub fn le_u64(data: &[u8]) -> u64 {
    data.iter()
        .take(8)
        .enumerate()
        .fold(0u64, |acc, (i, &b)| acc | (b as u64) << (8 * i))
}

pub fn create_frame<F: Frame + Debug>(cob_id: u16, data: &[u8]) -> Result<F, ErrorCode> {
    F::new(StandardId::new(cob_id).ok_or(ErrorCode::InvalidStandardId { cob_id })?, data)
        .ok_or(ErrorCode::FrameCreationFailed { data: data.to_vec() })
}

/// Builds an 8 byte SDO command frame payload: command, index, sub-index, data.
pub fn sdo_payload(cmd: u8, index: u16, sub_index: u8, data: &[u8]) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf[0] = cmd;
    buf[1..3].copy_from_slice(&index.to_le_bytes());
    buf[3] = sub_index;
    let len = data.len().min(4);
    buf[4..4 + len].copy_from_slice(&data[..len]);
    buf
}

/// Payload of an SDO abort frame.
pub fn abort_payload(index: u16, sub_index: u8, code: AbortCode) -> [u8; 8] {
    sdo_payload(0x80, index, sub_index, &code.code().to_le_bytes())
}

/// Bytes without data in the last segment of a block transfer of `len` bytes.
/// An empty transfer still sends one segment.
pub fn block_unused_bytes(len: usize) -> u8 {
    if len == 0 {
        7
    } else {
        ((7 - len % 7) % 7) as u8
    }
}

static CCITT_HASH: [u16; 256] = [
    0x0000, 0x1021, 0x2042, 0x3063, 0x4084, 0x50a5, 0x60c6, 0x70e7, 0x8108, 0x9129, 0xa14a, 0xb16b,
    0xc18c, 0xd1ad, 0xe1ce, 0xf1ef, 0x1231, 0x0210, 0x3273, 0x2252, 0x52b5, 0x4294, 0x72f7, 0x62d6,
    0x9339, 0x8318, 0xb37b, 0xa35a, 0xd3bd, 0xc39c, 0xf3ff, 0xe3de, 0x2462, 0x3443, 0x0420, 0x1401,
    0x64e6, 0x74c7, 0x44a4, 0x5485, 0xa56a, 0xb54b, 0x8528, 0x9509, 0xe5ee, 0xf5cf, 0xc5ac, 0xd58d,
    0x3653, 0x2672, 0x1611, 0x0630, 0x76d7, 0x66f6, 0x5695, 0x46b4, 0xb75b, 0xa77a, 0x9719, 0x8738,
    0xf7df, 0xe7fe, 0xd79d, 0xc7bc, 0x48c4, 0x58e5, 0x6886, 0x78a7, 0x0840, 0x1861, 0x2802, 0x3823,
    0xc9cc, 0xd9ed, 0xe98e, 0xf9af, 0x8948, 0x9969, 0xa90a, 0xb92b, 0x5af5, 0x4ad4, 0x7ab7, 0x6a96,
    0x1a71, 0x0a50, 0x3a33, 0x2a12, 0xdbfd, 0xcbdc, 0xfbbf, 0xeb9e, 0x9b79, 0x8b58, 0xbb3b, 0xab1a,
    0x6ca6, 0x7c87, 0x4ce4, 0x5cc5, 0x2c22, 0x3c03, 0x0c60, 0x1c41, 0xedae, 0xfd8f, 0xcdec, 0xddcd,
    0xad2a, 0xbd0b, 0x8d68, 0x9d49, 0x7e97, 0x6eb6, 0x5ed5, 0x4ef4, 0x3e13, 0x2e32, 0x1e51, 0x0e70,
    0xff9f, 0xefbe, 0xdfdd, 0xcffc, 0xbf1b, 0xaf3a, 0x9f59, 0x8f78, 0x9188, 0x81a9, 0xb1ca, 0xa1eb,
    0xd10c, 0xc12d, 0xf14e, 0xe16f, 0x1080, 0x00a1, 0x30c2, 0x20e3, 0x5004, 0x4025, 0x7046, 0x6067,
    0x83b9, 0x9398, 0xa3fb, 0xb3da, 0xc33d, 0xd31c, 0xe37f, 0xf35e, 0x02b1, 0x1290, 0x22f3, 0x32d2,
    0x4235, 0x5214, 0x6277, 0x7256, 0xb5ea, 0xa5cb, 0x95a8, 0x8589, 0xf56e, 0xe54f, 0xd52c, 0xc50d,
    0x34e2, 0x24c3, 0x14a0, 0x0481, 0x7466, 0x6447, 0x5424, 0x4405, 0xa7db, 0xb7fa, 0x8799, 0x97b8,
    0xe75f, 0xf77e, 0xc71d, 0xd73c, 0x26d3, 0x36f2, 0x0691, 0x16b0, 0x6657, 0x7676, 0x4615, 0x5634,
    0xd94c, 0xc96d, 0xf90e, 0xe92f, 0x99c8, 0x89e9, 0xb98a, 0xa9ab, 0x5844, 0x4865, 0x7806, 0x6827,
    0x18c0, 0x08e1, 0x3882, 0x28a3, 0xcb7d, 0xdb5c, 0xeb3f, 0xfb1e, 0x8bf9, 0x9bd8, 0xabbb, 0xbb9a,
    0x4a75, 0x5a54, 0x6a37, 0x7a16, 0x0af1, 0x1ad0, 0x2ab3, 0x3a92, 0xfd2e, 0xed0f, 0xdd6c, 0xcd4d,
    0xbdaa, 0xad8b, 0x9de8, 0x8dc9, 0x7c26, 0x6c07, 0x5c64, 0x4c45, 0x3ca2, 0x2c83, 0x1ce0, 0x0cc1,
    0xef1f, 0xff3e, 0xcf5d, 0xdf7c, 0xaf9b, 0xbfba, 0x8fd9, 0x9ff8, 0x6e17, 0x7e36, 0x4e55, 0x5e74,
    0x2e93, 0x3eb2, 0x0ed1, 0x1ef0,
];

/// CRC-16/CCITT (polynomial 0x1021, initial value 0) used by SDO block transfers.
pub fn crc16_canopen_with_lut(bytes: &[u8]) -> u16 {
    crc16_canopen_update(0, bytes)
}

/// Continues a CRC over another chunk of data.
pub fn crc16_canopen_update(mut crc: u16, bytes: &[u8]) -> u16 {
    for byte in bytes {
        let table_idx = ((crc >> 8) ^ (*byte as u16)) as usize;
        crc = CCITT_HASH[table_idx] ^ (crc << 8);
    }
    crc
}

#[cfg(test)]
mod util_tests {
    use super::*;
    use crate::virtual_can::VirtualFrame;

    #[test]
    fn test_create_frame_success() {
        let result = create_frame::<VirtualFrame>(0x123, &[0x01, 0x02, 0x03]);
        let frame = result.unwrap();
        assert_eq!(frame.data(), &[0x01, 0x02, 0x03]);
        assert_eq!(get_cob_id(&frame), Some(0x123));
    }

    #[test]
    fn test_create_frame_invalid_standard_id() {
        let result = create_frame::<VirtualFrame>(0x1FFF, &[0x01, 0x02, 0x03]);
        assert!(matches!(result, Err(ErrorCode::InvalidStandardId { cob_id: 0x1FFF })));
    }

    #[test]
    fn test_create_frame_too_long() {
        let data = [0u8; 9];
        match create_frame::<VirtualFrame>(0x123, &data) {
            Err(ErrorCode::FrameCreationFailed { data: returned_data }) => {
                assert_eq!(returned_data, data.to_vec());
            }
            other => panic!("Expected ErrorCode::FrameCreationFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_little_endian_helpers() {
        assert_eq!(le_u32(&[]), 0);
        assert_eq!(le_u32(&[0x34, 0x12]), 0x1234);
        assert_eq!(le_u32(&[1, 2, 3, 4, 5]), 0x0403_0201);
        assert_eq!(le_u64(&[0xFF; 8]), u64::MAX);
        assert_eq!(le_u64(&[1, 2, 3]), 0x03_0201);
    }

    #[test]
    fn test_sdo_payload() {
        assert_eq!(sdo_payload(0x43, 0x1017, 0, &[0xE8, 0x03]),
                   [0x43, 0x17, 0x10, 0x00, 0xE8, 0x03, 0, 0]);
        assert_eq!(abort_payload(0x2000, 1, AbortCode::SdoProtocolTimedOut),
                   [0x80, 0x00, 0x20, 0x01, 0x00, 0x00, 0x04, 0x05]);
        assert_eq!(get_index(&[0x40, 0x18, 0x10, 0x02]), (0x1018, 2));
        assert_eq!(get_index(&[0x40]), (0, 0));
    }

    #[test]
    fn test_block_unused_bytes() {
        assert_eq!(block_unused_bytes(0), 7);
        assert_eq!(block_unused_bytes(7), 0);
        assert_eq!(block_unused_bytes(16), 5);
        assert_eq!(block_unused_bytes(30), 5);
    }

    #[test]
    fn test_eds_section_names() {
        assert!(is_top("1A00"));
        assert!(!is_top("1A0"));
        assert_eq!(is_sub("1018sub2"), Some((0x1018, 2)));
        assert_eq!(is_sub("1600sub1A"), Some((0x1600, 0x1A)));
        assert_eq!(is_sub("1018"), None);
        assert_eq!(is_name("1003Name"), Some(0x1003));
        assert_eq!(is_name("FileInfo"), None);
    }

    #[test]
    fn test_parse_number_i8() {
        assert_eq!(parse_number::<i8>("0xFF"), -1);
        assert_eq!(parse_number::<i8>("0x7F"), 127);
        assert_eq!(parse_number::<i8>("-128"), -128);
        assert_eq!(parse_number::<i8>("0xAB"), -85);
        assert_eq!(parse_number::<i8>("abc"), 0);
    }

    #[test]
    fn test_parse_number_unsigned() {
        assert_eq!(parse_number::<u8>("0xFF"), 255);
        assert_eq!(parse_number::<u8>(" 255 "), 255);
        assert_eq!(parse_number::<u32>("0xFFFFFFFF"), 4_294_967_295);
        assert_eq!(parse_number::<u32>("abc"), 0);
    }

    #[test]
    fn test_crc16_ccitt() {
        let s = "CANopenDemoPIC32";
        let crc = crc16_canopen_with_lut(s.as_bytes());
        assert_eq!(crc, 0x43F3, "({:x} != 0x43F3)", crc);
        let (a, b) = s.as_bytes().split_at(5);
        assert_eq!(crc16_canopen_update(crc16_canopen_with_lut(a), b), 0x43F3);
    }
}
