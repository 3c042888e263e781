use crate::data_type::DataType;
use crate::error::ErrorCode;
use crate::prelude::*;
use crate::{error, util};

#[derive(Clone, Debug)]
pub struct Value {
    data: Vec<u8>,
}

impl Value {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &Vec<u8> {
        &self.data
    }

    pub(crate) fn set_data(&mut self, data: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(data);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

pub trait ByteConvertible: Sized {
    fn from_bytes(bytes: &[u8]) -> Self;
    fn to_bytes(&self) -> Vec<u8>;
}

macro_rules! impl_byte_convertible_for_int {
    ($t:ty, $len:expr) => {
        impl ByteConvertible for $t {
            fn to_bytes(&self) -> Vec<u8> {
                self.to_le_bytes().to_vec()
            }

            fn from_bytes(bytes: &[u8]) -> Self {
                if bytes.len() == $len {
                    if let Ok(arr) = bytes.try_into() {
                        return <$t>::from_le_bytes(arr);
                    }
                }
                0 as $t
            }
        }
    };
}

impl_byte_convertible_for_int!(i8, 1);
impl_byte_convertible_for_int!(i16, 2);
impl_byte_convertible_for_int!(i32, 4);
impl_byte_convertible_for_int!(i64, 8);
impl_byte_convertible_for_int!(u8, 1);
impl_byte_convertible_for_int!(u16, 2);
impl_byte_convertible_for_int!(u32, 4);
impl_byte_convertible_for_int!(u64, 8);
impl_byte_convertible_for_int!(f32, 4);
impl_byte_convertible_for_int!(f64, 8);

impl ByteConvertible for String {
    fn from_bytes(bytes: &[u8]) -> Self {
        String::from_utf8(bytes.to_vec()).unwrap_or_default()
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl Value {
    pub fn from<T: ByteConvertible>(val: T) -> Self {
        let bytes = val.to_bytes();
        Self::new(bytes)
    }

    pub fn to<T: ByteConvertible>(&self) -> T {
        T::from_bytes(self.as_slice())
    }
}

fn make_error(data_type: DataType, data_string: &str) -> ErrorCode {
    ErrorCode::StringToValueFailed {
        data_type,
        str: data_string.to_string(),
    }
}

fn parse_real<T: core::str::FromStr + ByteConvertible>(data_type: DataType, s: &str) -> Result<Vec<u8>, ErrorCode> {
    s.trim().parse::<T>().map(|v| v.to_bytes()).map_err(|_| make_error(data_type, s))
}

/// Hex dump, two characters per byte, optional `0x` prefix.
fn parse_domain(s: &str) -> Result<Vec<u8>, ErrorCode> {
    let hex = s.trim().trim_start_matches("0x").trim_start_matches("0X");
    if hex.len() % 2 != 0 {
        return Err(make_error(DataType::Domain, s));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
        .collect::<Result<Vec<u8>, _>>()
        .map_err(|_| make_error(DataType::Domain, s))
}

/// Converts an EDS `DefaultValue` string. Unparsable integers become 0, the
/// way EDS editors treat them; reals, booleans and domains are strict.
fn string_to_value(data_type: &DataType, data_string: &str) -> Result<Value, ErrorCode> {
    let s = data_string;
    let bytes = match data_type {
        DataType::Unknown => return Err(make_error(*data_type, s)),
        DataType::Boolean => match s.trim().to_lowercase().as_str() {
            "true" | "1" => vec![1],
            "false" | "0" => vec![0],
            _ => return Err(make_error(*data_type, s)),
        },
        DataType::Integer8 => util::parse_number::<i8>(s).to_bytes(),
        DataType::Integer16 => util::parse_number::<i16>(s).to_bytes(),
        DataType::Integer32 => util::parse_number::<i32>(s).to_bytes(),
        DataType::Integer64 => util::parse_number::<i64>(s).to_bytes(),
        DataType::Unsigned8 => util::parse_number::<u8>(s).to_bytes(),
        DataType::Unsigned16 => util::parse_number::<u16>(s).to_bytes(),
        DataType::Unsigned32 => util::parse_number::<u32>(s).to_bytes(),
        DataType::Unsigned64 => util::parse_number::<u64>(s).to_bytes(),
        DataType::Real32 => parse_real::<f32>(*data_type, s)?,
        DataType::Real64 => parse_real::<f64>(*data_type, s)?,
        DataType::VisibleString | DataType::OctetString | DataType::UnicodeString => s.as_bytes().to_vec(),
        DataType::Domain => parse_domain(s)?,
    };
    Ok(Value::new(bytes))
}

/// Resolves `$NODEID` sums such as `$NODEID+0x600`. Terms that are not
/// numbers contribute nothing.
fn evaluate_node_id_expression(node_id: u8, expression: &str) -> u32 {
    expression
        .split('+')
        .map(str::trim)
        .filter_map(|term| match term {
            "$NODEID" => Some(node_id as u32),
            _ => match term.strip_prefix("0x").or_else(|| term.strip_prefix("0X")) {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => term.parse::<u32>().ok(),
            },
        })
        .fold(0u32, |acc, v| acc.wrapping_add(v))
}

/// Reads one property of an EDS section as a value of `data_type`.
/// Missing and empty properties yield `None`; malformed ones are logged.
pub(crate) fn get_value(
    properties: &HashMap<String, String>,
    property_name: &str,
    node_id: u8,
    data_type: &DataType,
) -> Option<Value> {
    let raw = properties.get(property_name).filter(|v| !v.is_empty())?;
    let resolved = if raw.contains("$NODEID") {
        evaluate_node_id_expression(node_id, raw).to_string()
    } else {
        raw.clone()
    };
    string_to_value(data_type, &resolved)
        .map_err(|e| { error!("{} of {:?}: {:?}", property_name, data_type, e); })
        .ok()
}

#[cfg(test)]
mod value_tests {
    use alloc::string::{String, ToString};
    use alloc::vec;
    use crate::data_type::DataType;
    use crate::prelude::HashMap;
    use super::{evaluate_node_id_expression, get_value, make_error, string_to_value, ByteConvertible, Value};

    #[test]
    fn test_node_id_expression() {
        assert_eq!(evaluate_node_id_expression(5, "$NODEID+0x600"), 0x605);
        assert_eq!(evaluate_node_id_expression(5, "0x180 + $NODEID"), 0x185);
        assert_eq!(evaluate_node_id_expression(34, "$NODEID + 100 + 200"), 334);
        assert_eq!(evaluate_node_id_expression(2, "$NODEID"), 2);
        assert_eq!(evaluate_node_id_expression(2, "no arithmetic here"), 0);
    }

    #[test]
    fn test_get_value() {
        let mut properties = HashMap::new();
        properties.insert("DefaultValue".to_string(), "$NODEID+0x180".to_string());
        properties.insert("LowLimit".to_string(), "0x10".to_string());
        properties.insert("HighLimit".to_string(), "".to_string());
        properties.insert("Broken".to_string(), "maybe".to_string());

        let value = get_value(&properties, "DefaultValue", 5, &DataType::Unsigned32);
        assert_eq!(value.map(|v| v.to::<u32>()), Some(0x185));
        let value = get_value(&properties, "LowLimit", 5, &DataType::Unsigned16);
        assert_eq!(value.map(|v| v.to::<u16>()), Some(0x10));
        assert!(get_value(&properties, "HighLimit", 5, &DataType::Unsigned32).is_none());
        assert!(get_value(&properties, "Missing", 5, &DataType::Unsigned32).is_none());
        assert!(get_value(&properties, "Broken", 5, &DataType::Boolean).is_none());
    }

    #[test]
    fn test_integers_from_eds_strings() {
        assert_eq!(string_to_value(&DataType::Integer8, "0xFF"), Ok(Value::new(vec![0xFF])));
        assert_eq!(string_to_value(&DataType::Integer16, "-2"), Ok(Value::from(-2i16)));
        assert_eq!(string_to_value(&DataType::Unsigned32, "0x80000000"), Ok(Value::from(0x8000_0000u32)));
        assert_eq!(string_to_value(&DataType::Unsigned8, "garbage"), Ok(Value::new(vec![0])));
        assert_eq!(string_to_value(&DataType::Unknown, "1"), Err(make_error(DataType::Unknown, "1")));
    }

    #[test]
    fn test_strict_conversions() {
        assert_eq!(string_to_value(&DataType::Boolean, "TRUE"), Ok(Value::new(vec![1])));
        assert_eq!(string_to_value(&DataType::Boolean, "0"), Ok(Value::new(vec![0])));
        assert_eq!(string_to_value(&DataType::Boolean, "yes"), Err(make_error(DataType::Boolean, "yes")));
        assert_eq!(string_to_value(&DataType::Real32, "1.5"), Ok(Value::from(1.5f32)));
        assert_eq!(string_to_value(&DataType::Real64, "x"), Err(make_error(DataType::Real64, "x")));
        assert_eq!(string_to_value(&DataType::VisibleString, "Demo"), Ok(Value::new(b"Demo".to_vec())));
    }

    #[test]
    fn test_domain_hex_dump() {
        assert_eq!(string_to_value(&DataType::Domain, "0102ab"), Ok(Value::new(vec![0x01, 0x02, 0xAB])));
        assert_eq!(string_to_value(&DataType::Domain, "0x00FF"), Ok(Value::new(vec![0x00, 0xFF])));
        assert_eq!(string_to_value(&DataType::Domain, ""), Ok(Value::new(vec![])));
        assert_eq!(string_to_value(&DataType::Domain, "123"), Err(make_error(DataType::Domain, "123")));
        assert_eq!(string_to_value(&DataType::Domain, "zz"), Err(make_error(DataType::Domain, "zz")));
    }

    #[test]
    fn test_byte_conversions() {
        for val in [0x1234_5678u32, 0, u32::MAX] {
            assert_eq!(Value::from(val).to::<u32>(), val);
        }
        assert_eq!(Value::from(-1i64).as_slice(), &[0xFF; 8]);
        assert_eq!(Value::from("abc".to_string()).to::<String>(), "abc");
        // Wrong lengths and invalid UTF-8 fall back to defaults.
        assert_eq!(u32::from_bytes(&[1, 2, 3]), 0);
        assert_eq!(i16::from_bytes(&[1]), 0);
        assert_eq!(String::from_bytes(&[0xFF, 0xFE]), "");
    }

    #[test]
    fn test_set_data_replaces_content() {
        let mut value = Value::new(vec![1, 2, 3, 4]);
        value.set_data(&[9]);
        assert_eq!(value, Value::new(vec![9]));
        assert_ne!(value, Value::new(vec![9, 0]));
    }
}
