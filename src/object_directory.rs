use ini_core as ini;

use crate::data_type::DataType;
use crate::error::{AbortCode, ErrorCode};
use crate::prelude::*;
use crate::util;
use crate::value::{get_value, Value};

/// Static description of one dictionary entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryInfo {
    pub data_type: DataType,
    /// Size in bytes, 0 for variable length entries.
    pub size: usize,
    pub readable: bool,
    pub writable: bool,
    pub pdo_mappable: bool,
}

/// Object dictionary boundary used by every communication object.
///
/// `read` and `write` are the remote (SDO) view and honour access rights,
/// `fetch` and `store` are the local view used by the stack itself.
pub trait OdAccess {
    fn read(&mut self, index: u16, sub_index: u8) -> Result<Vec<u8>, AbortCode>;
    fn fetch(&self, index: u16, sub_index: u8) -> Result<Vec<u8>, AbortCode>;
    fn write(&mut self, index: u16, sub_index: u8, data: &[u8]) -> Result<(), AbortCode>;
    fn store(&mut self, index: u16, sub_index: u8, data: &[u8]) -> Result<(), AbortCode>;
    fn entry(&self, index: u16, sub_index: u8) -> Result<EntryInfo, AbortCode>;
}

pub fn fetch_u8(od: &dyn OdAccess, index: u16, sub_index: u8) -> Option<u8> {
    od.fetch(index, sub_index).ok().map(|d| util::le_u32(&d) as u8)
}

pub fn fetch_u16(od: &dyn OdAccess, index: u16, sub_index: u8) -> Option<u16> {
    od.fetch(index, sub_index).ok().map(|d| util::le_u32(&d) as u16)
}

pub fn fetch_u32(od: &dyn OdAccess, index: u16, sub_index: u8) -> Option<u32> {
    od.fetch(index, sub_index).ok().map(|d| util::le_u32(&d))
}

pub fn exists(od: &dyn OdAccess, index: u16, sub_index: u8) -> bool {
    od.entry(index, sub_index).is_ok()
}

#[derive(Clone, Debug, PartialEq)]
pub struct AccessType {
    read_access: bool,
    write_access: bool,
}

impl AccessType {
    pub fn new(read: bool, write: bool) -> Self {
        AccessType {
            read_access: read,
            write_access: write,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "rw" | "rwr" | "rww" => AccessType::new(true, true),
            "ro" | "const" => AccessType::new(true, false),
            "wo" => AccessType::new(false, true),
            _ => AccessType::new(false, false),
        }
    }

    pub fn is_readable(&self) -> bool { self.read_access }
    pub fn is_writable(&self) -> bool {
        self.write_access
    }
}

#[derive(Clone, Debug)]
pub struct Variable {
    name: String,
    data_type: DataType,
    value: Value,
    min: Option<Value>,
    max: Option<Value>,
    pdo_mappable: bool,
    access_type: AccessType,
    index: u16,
    sub_index: u8,
}

impl Variable {
    pub fn new(index: u16, sub_index: u8, name: &str, data_type: DataType,
               access_type: AccessType, pdo_mappable: bool, value: Value) -> Self {
        Variable {
            name: name.to_string(),
            data_type,
            value,
            min: None,
            max: None,
            pdo_mappable,
            access_type,
            index,
            sub_index,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn data_type(&self) -> DataType {
        self.data_type
    }
    pub fn value(&self) -> &Value {
        &self.value
    }
    pub fn index(&self) -> u16 {
        self.index
    }
    pub fn sub_index(&self) -> u8 {
        self.sub_index
    }
    pub fn pdo_mappable(&self) -> bool {
        self.pdo_mappable
    }

    fn info(&self) -> EntryInfo {
        EntryInfo {
            data_type: self.data_type,
            size: self.data_type.size(),
            readable: self.access_type.is_readable(),
            writable: self.access_type.is_writable(),
            pdo_mappable: self.pdo_mappable,
        }
    }

    fn check_size(&self, data: &[u8]) -> Result<(), AbortCode> {
        let size = self.data_type.size();
        if size == 0 || size == data.len() {
            return Ok(());
        }
        if size > data.len() {
            Err(AbortCode::DataTypeMismatchLengthTooLow)
        } else {
            Err(AbortCode::DataTypeMismatchLengthTooHigh)
        }
    }

    fn check_limits(&self, data: &[u8]) -> Result<(), AbortCode> {
        if self.data_type.is_variable_length() || matches!(self.data_type, DataType::Real32 | DataType::Real64) {
            return Ok(());
        }
        let below = |limit: &Value| compare(self.data_type, data, limit.as_slice()) == core::cmp::Ordering::Less;
        let above = |limit: &Value| compare(self.data_type, data, limit.as_slice()) == core::cmp::Ordering::Greater;
        if self.min.as_ref().is_some_and(below) {
            return Err(AbortCode::ValueWrittenTooLow);
        }
        if self.max.as_ref().is_some_and(above) {
            return Err(AbortCode::ValueWrittenTooHigh);
        }
        Ok(())
    }
}

fn compare(data_type: DataType, a: &[u8], b: &[u8]) -> core::cmp::Ordering {
    let (a, b) = (util::le_u64(a), util::le_u64(b));
    if data_type.is_signed() {
        let shift = 64 - 8 * data_type.size() as u32;
        (((a << shift) as i64) >> shift).cmp(&(((b << shift) as i64) >> shift))
    } else {
        a.cmp(&b)
    }
}

/// Array and record objects share one representation: sub-entries by sub-index.
#[derive(Clone, Debug)]
pub struct Container {
    name: String,
    index: u16,
    members: HashMap<u8, Variable>,
}

impl Container {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn index(&self) -> u16 {
        self.index
    }
    pub fn members(&self) -> &HashMap<u8, Variable> {
        &self.members
    }

    pub fn add_member(&mut self, var: Variable) {
        self.members.insert(var.sub_index, var);
    }
}

#[derive(Clone, Debug)]
pub enum ObjectType {
    Variable(Variable),
    Array(Container),
    Record(Container),
}

/// In-memory dictionary loaded from an EDS file.
#[derive(Clone, Debug)]
pub struct ObjectDirectory {
    node_id: u8,
    index_to_object: HashMap<u16, ObjectType>,
}

impl ObjectDirectory {
    /// Parses `eds_content`, evaluating `$NODEID` expressions with `node_id`.
    pub fn new(node_id: u8, eds_content: &str) -> Result<Self, ErrorCode> {
        let mut od = ObjectDirectory::empty(node_id);
        od.load_from_content(eds_content)?;
        Ok(od)
    }

    pub fn empty(node_id: u8) -> Self {
        ObjectDirectory {
            node_id,
            index_to_object: HashMap::new(),
        }
    }

    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    pub fn object(&self, index: u16) -> Option<&ObjectType> {
        self.index_to_object.get(&index)
    }

    /// Inserts a variable, creating a record at `index` for non-zero sub-indices.
    pub fn insert(&mut self, var: Variable) {
        let index = var.index;
        let is_container = matches!(
            self.index_to_object.get(&index),
            Some(ObjectType::Array(_)) | Some(ObjectType::Record(_))
        );
        if var.sub_index == 0 && !is_container {
            self.index_to_object.insert(index, ObjectType::Variable(var));
            return;
        }
        match self.index_to_object.get_mut(&index) {
            Some(ObjectType::Array(c)) | Some(ObjectType::Record(c)) => c.add_member(var),
            _ => {
                let mut record = Container { name: String::new(), index, members: HashMap::new() };
                if let Some(ObjectType::Variable(sub0)) = self.index_to_object.remove(&index) {
                    record.add_member(sub0);
                }
                record.add_member(var);
                self.index_to_object.insert(index, ObjectType::Record(record));
            }
        }
    }

    pub fn get_variable(&self, index: u16, sub_index: u8) -> Result<&Variable, AbortCode> {
        match self.index_to_object.get(&index) {
            Some(ObjectType::Variable(var)) => {
                if sub_index == 0 {
                    Ok(var)
                } else {
                    Err(AbortCode::SubIndexDoesNotExist)
                }
            }
            Some(ObjectType::Array(c)) | Some(ObjectType::Record(c)) => c
                .members
                .get(&sub_index)
                .ok_or(AbortCode::SubIndexDoesNotExist),
            None => Err(AbortCode::ObjectDoesNotExistInObjectDictionary),
        }
    }

    pub fn get_mut_variable(&mut self, index: u16, sub_index: u8) -> Result<&mut Variable, AbortCode> {
        match self.index_to_object.get_mut(&index) {
            Some(ObjectType::Variable(var)) => {
                if sub_index == 0 {
                    Ok(var)
                } else {
                    Err(AbortCode::SubIndexDoesNotExist)
                }
            }
            Some(ObjectType::Array(c)) | Some(ObjectType::Record(c)) => c
                .members
                .get_mut(&sub_index)
                .ok_or(AbortCode::SubIndexDoesNotExist),
            None => Err(AbortCode::ObjectDoesNotExistInObjectDictionary),
        }
    }

    fn process_section(
        &mut self,
        section_name: &str,
        properties: &HashMap<String, String>,
    ) -> Result<(), ErrorCode> {
        let fail = |more_info: String| ErrorCode::ProcessSectionFailed {
            section_name: section_name.to_string(),
            more_info,
        };
        if util::is_top(section_name) {
            let index = u16::from_str_radix(section_name, 16)
                .map_err(|_| fail("Invalid index".to_string()))?;
            let name = properties.get("ParameterName")
                .ok_or_else(|| fail("No 'ParameterName'".to_string()))?;
            let ot: u8 = util::parse_number(properties.get("ObjectType")
                .map(String::as_str)
                .unwrap_or("0x7"));
            match ot {
                // DEFTYPE and VAR
                5 | 7 => {
                    let variable = build_variable(properties, self.node_id, name, index, 0)?;
                    self.index_to_object.insert(index, ObjectType::Variable(variable));
                }
                // ARRAY and RECORD
                8 | 9 => {
                    let mut container = Container {
                        name: name.clone(),
                        index,
                        members: HashMap::new(),
                    };
                    if let Some(count) = properties.get("CompactSubObj") {
                        let count: u8 = util::parse_number(count);
                        container.add_member(Variable::new(
                            index, 0, "Number of entries", DataType::Unsigned8,
                            AccessType::new(true, false), false, Value::from(count)));
                        for sub in 1..=count {
                            container.add_member(build_variable(properties, self.node_id, name, index, sub)?);
                        }
                    }
                    let object = if ot == 8 {
                        ObjectType::Array(container)
                    } else {
                        ObjectType::Record(container)
                    };
                    self.index_to_object.insert(index, object);
                }
                _ => {}
            }
        } else if let Some((index, sub_index)) = util::is_sub(section_name) {
            let name = properties.get("ParameterName")
                .ok_or_else(|| fail("No 'ParameterName'".to_string()))?;
            let variable = build_variable(properties, self.node_id, name, index, sub_index)?;
            match self.index_to_object.get_mut(&index) {
                Some(ObjectType::Array(c)) | Some(ObjectType::Record(c)) => c.add_member(variable),
                _ => return Err(fail(format!("No array or record at {:#x}", index))),
            }
        } else if let Some(index) = util::is_name(section_name) {
            // Names of CompactSubObj members.
            if let Some(ObjectType::Array(c)) | Some(ObjectType::Record(c)) =
                self.index_to_object.get_mut(&index) {
                for (sub, var) in c.members.iter_mut() {
                    if let Some(name) = properties.get(&sub.to_string()) {
                        var.name = name.clone();
                    }
                }
            }
        }

        Ok(())
    }

    fn load_from_content(&mut self, content: &str) -> Result<(), ErrorCode> {
        let mut current_section_name: Option<String> = None;
        let mut current_properties: HashMap<String, String> = HashMap::new();

        for item in ini::Parser::new(content) {
            match item {
                ini::Item::Section(name) => {
                    if let Some(section_name) = current_section_name.take() {
                        self.process_section(&section_name, &current_properties)?;
                        current_properties.clear();
                    }
                    current_section_name = Some(String::from(name));
                }
                ini::Item::Property(key, maybe_value) => {
                    let value = String::from(maybe_value.unwrap_or_default().trim());
                    current_properties.insert(String::from(key.trim()), value);
                }
                _ => {}
            }
        }

        if let Some(section_name) = current_section_name {
            self.process_section(&section_name, &current_properties)?
        }

        Ok(())
    }
}

impl OdAccess for ObjectDirectory {
    fn read(&mut self, index: u16, sub_index: u8) -> Result<Vec<u8>, AbortCode> {
        let var = self.get_variable(index, sub_index)?;
        if !var.access_type.is_readable() {
            return Err(AbortCode::AttemptToReadWriteOnlyObject);
        }
        Ok(var.value.data().clone())
    }

    fn fetch(&self, index: u16, sub_index: u8) -> Result<Vec<u8>, AbortCode> {
        Ok(self.get_variable(index, sub_index)?.value.data().clone())
    }

    fn write(&mut self, index: u16, sub_index: u8, data: &[u8]) -> Result<(), AbortCode> {
        let var = self.get_mut_variable(index, sub_index)?;
        if !var.access_type.is_writable() {
            return Err(AbortCode::AttemptToWriteReadOnlyObject);
        }
        var.check_size(data)?;
        var.check_limits(data)?;
        var.value.set_data(data);
        Ok(())
    }

    fn store(&mut self, index: u16, sub_index: u8, data: &[u8]) -> Result<(), AbortCode> {
        let var = self.get_mut_variable(index, sub_index)?;
        var.check_size(data)?;
        var.value.set_data(data);
        Ok(())
    }

    fn entry(&self, index: u16, sub_index: u8) -> Result<EntryInfo, AbortCode> {
        Ok(self.get_variable(index, sub_index)?.info())
    }
}

fn build_variable(
    properties: &HashMap<String, String>,
    node_id: u8,
    name: &str,
    index: u16,
    sub_index: u8,
) -> Result<Variable, ErrorCode> {
    let access_type = AccessType::parse(
        &properties
            .get("AccessType")
            .map(String::as_str)
            .unwrap_or("rw")
            .to_lowercase(),
    );
    let pdo_mappable = util::parse_number::<u8>(
        properties.get("PDOMapping").map(String::as_str).unwrap_or("0")) != 0;
    let data_type = DataType::from_u32(util::parse_number(
        properties.get("DataType").map(String::as_str).unwrap_or("")));
    if data_type == DataType::Unknown {
        return Err(ErrorCode::ProcessSectionFailed {
            section_name: format!("{:04X}sub{:X}", index, sub_index),
            more_info: "Unknown DataType".to_string(),
        });
    }

    let value = get_value(properties, "ParameterValue", node_id, &data_type)
        .or_else(|| get_value(properties, "DefaultValue", node_id, &data_type))
        .unwrap_or(Value::new(data_type.default_value()));

    Ok(Variable {
        name: name.to_string(),
        data_type,
        value,
        min: get_value(properties, "LowLimit", node_id, &data_type),
        max: get_value(properties, "HighLimit", node_id, &data_type),
        pdo_mappable,
        access_type,
        index,
        sub_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const EDS: &str = r#"
[1000]
ParameterName=Device type
ObjectType=0x7
DataType=0x0007
AccessType=ro
DefaultValue=0x000F0191
PDOMapping=0

[1003]
ParameterName=Pre-defined error field
ObjectType=0x8
DataType=0x0007
AccessType=ro
CompactSubObj=4

[1014]
ParameterName=COB-ID EMCY
ObjectType=0x7
DataType=0x0007
AccessType=rw
DefaultValue=$NODEID+0x80

[1018]
ParameterName=Identity
ObjectType=0x9
SubNumber=2

[1018sub0]
ParameterName=Highest sub-index supported
ObjectType=0x7
DataType=0x0005
AccessType=const
DefaultValue=1

[1018sub1]
ParameterName=Vendor-ID
ObjectType=0x7
DataType=0x0007
AccessType=ro
DefaultValue=0x12345678

[2001]
ParameterName=Setpoint
ObjectType=0x7
DataType=0x0003
AccessType=rw
LowLimit=-100
HighLimit=100
PDOMapping=1
DefaultValue=0

[2002]
ParameterName=Secret
ObjectType=0x7
DataType=0x0005
AccessType=wo
DefaultValue=7

[2003]
ParameterName=Label
ObjectType=0x7
DataType=0x0009
AccessType=rw
DefaultValue=abc
"#;

    fn od() -> ObjectDirectory {
        ObjectDirectory::new(5, EDS).unwrap()
    }

    #[test]
    fn test_load_and_read() {
        let mut od = od();
        assert_eq!(od.read(0x1000, 0).unwrap(), 0x000F0191u32.to_le_bytes().to_vec());
        assert_eq!(fetch_u32(&od, 0x1014, 0), Some(0x85));
        assert_eq!(fetch_u32(&od, 0x1018, 1), Some(0x12345678));
        assert_eq!(fetch_u8(&od, 0x1003, 0), Some(4));
        assert!(exists(&od, 0x1003, 4));
        assert!(!exists(&od, 0x1003, 5));
        assert_eq!(od.read(0x1018, 9), Err(AbortCode::SubIndexDoesNotExist));
        assert_eq!(od.read(0x3000, 0), Err(AbortCode::ObjectDoesNotExistInObjectDictionary));
        assert_eq!(od.read(0x1000, 1), Err(AbortCode::SubIndexDoesNotExist));
    }

    #[test]
    fn test_access_rights() {
        let mut od = od();
        assert_eq!(od.write(0x1000, 0, &[0, 0, 0, 0]), Err(AbortCode::AttemptToWriteReadOnlyObject));
        assert_eq!(od.read(0x2002, 0), Err(AbortCode::AttemptToReadWriteOnlyObject));
        assert_eq!(od.fetch(0x2002, 0), Ok(vec![7]));
        assert!(od.store(0x1000, 0, &[1, 0, 0, 0]).is_ok());
        assert_eq!(fetch_u32(&od, 0x1000, 0), Some(1));
    }

    #[test]
    fn test_access_type_parse() {
        for (text, read, write) in [("rw", true, true), ("rww", true, true), ("const", true, false),
                                    ("ro", true, false), ("wo", false, true), ("xx", false, false)] {
            let access = AccessType::parse(text);
            assert_eq!((access.is_readable(), access.is_writable()), (read, write), "{}", text);
        }
    }

    #[test]
    fn test_variable_metadata() {
        let od = od();
        let var = od.get_variable(0x2001, 0).unwrap();
        assert_eq!(var.name(), "Setpoint");
        assert_eq!(var.data_type(), DataType::Integer16);
        assert_eq!((var.index(), var.sub_index()), (0x2001, 0));
        assert!(var.pdo_mappable());
        assert_eq!(var.value().to::<i16>(), 0);

        match od.object(0x1018) {
            Some(ObjectType::Record(record)) => {
                assert_eq!((record.name(), record.index()), ("Identity", 0x1018));
                assert_eq!(record.members().len(), 2);
            }
            other => panic!("Expected a record, got {:?}", other),
        }
    }

    #[test]
    fn test_size_and_limits() {
        let mut od = od();
        assert_eq!(od.write(0x2001, 0, &[1]), Err(AbortCode::DataTypeMismatchLengthTooLow));
        assert_eq!(od.write(0x2001, 0, &[1, 0, 0]), Err(AbortCode::DataTypeMismatchLengthTooHigh));
        assert_eq!(od.write(0x2001, 0, &101i16.to_le_bytes()), Err(AbortCode::ValueWrittenTooHigh));
        assert_eq!(od.write(0x2001, 0, &(-101i16).to_le_bytes()), Err(AbortCode::ValueWrittenTooLow));
        assert!(od.write(0x2001, 0, &(-100i16).to_le_bytes()).is_ok());
        assert!(od.write(0x2003, 0, b"a longer label").is_ok());
        assert_eq!(od.read(0x2003, 0).unwrap(), b"a longer label".to_vec());
    }

    #[test]
    fn test_entry_info() {
        let od = od();
        let info = od.entry(0x2001, 0).unwrap();
        assert_eq!(info.data_type, DataType::Integer16);
        assert_eq!(info.size, 2);
        assert!(info.pdo_mappable && info.readable && info.writable);
        assert_eq!(od.entry(0x2003, 0).unwrap().size, 0);
    }

    #[test]
    fn test_insert_builds_records() {
        let mut od = ObjectDirectory::empty(1);
        od.insert(Variable::new(0x2100, 0, "count", DataType::Unsigned8,
                                AccessType::new(true, false), false, Value::from(1u8)));
        od.insert(Variable::new(0x2100, 1, "value", DataType::Unsigned32,
                                AccessType::new(true, true), true, Value::from(9u32)));
        assert_eq!(fetch_u8(&od, 0x2100, 0), Some(1));
        assert_eq!(fetch_u32(&od, 0x2100, 1), Some(9));
        assert!(matches!(od.object(0x2100), Some(ObjectType::Record(_))));
    }

    #[test]
    fn test_unknown_data_type_is_rejected() {
        let eds = "[2000]\nParameterName=Broken\nObjectType=0x7\nDataType=0x00FF\n";
        assert!(matches!(ObjectDirectory::new(1, eds), Err(ErrorCode::ProcessSectionFailed { .. })));
    }
}
