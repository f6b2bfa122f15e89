//! PDF object types.
//!
//! The in-memory representation shared by the parser, the serializer, the
//! content hasher and the incremental writer.

use crate::error::{Error, Result};
use std::collections::HashMap;

/// Dictionary type used by dictionaries and stream dictionaries.
pub type Dict = HashMap<String, Object>;

/// PDF object representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// Null object
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value
    Integer(i64),
    /// Real (floating-point) value
    Real(f64),
    /// String (byte array)
    String(Vec<u8>),
    /// Name (starting with /)
    Name(String),
    /// Array of objects
    Array(Vec<Object>),
    /// Dictionary (key-value pairs)
    Dictionary(Dict),
    /// Stream (dictionary + data)
    Stream {
        /// Stream dictionary
        dict: Dict,
        /// Raw (still encoded) stream data
        data: bytes::Bytes,
    },
    /// Indirect object reference
    Reference(ObjectRef),
}

/// Reference to an indirect object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    /// Object number
    pub id: u32,
    /// Generation number
    pub gen: u16,
}

impl ObjectRef {
    /// Create a new object reference.
    pub fn new(id: u32, gen: u16) -> Self {
        Self { id, gen }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} R", self.id, self.gen)
    }
}

impl Object {
    /// Get the type name of this object (without data).
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Null => "Null",
            Object::Boolean(_) => "Boolean",
            Object::Integer(_) => "Integer",
            Object::Real(_) => "Real",
            Object::String(_) => "String",
            Object::Name(_) => "Name",
            Object::Array(_) => "Array",
            Object::Dictionary(_) => "Dictionary",
            Object::Stream { .. } => "Stream",
            Object::Reference(_) => "Reference",
        }
    }

    /// Try to cast to integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Object::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value of an Integer or Real.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Object::Integer(i) => Some(*i as f64),
            Object::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Try to cast to name.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Object::Name(s) => Some(s),
            _ => None,
        }
    }

    /// Try to cast to dictionary. Works for both Dictionary and Stream objects.
    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Object::Dictionary(d) => Some(d),
            Object::Stream { dict, .. } => Some(dict),
            _ => None,
        }
    }

    /// Try to cast to array.
    pub fn as_array(&self) -> Option<&Vec<Object>> {
        match self {
            Object::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Try to cast to reference.
    pub fn as_reference(&self) -> Option<ObjectRef> {
        match self {
            Object::Reference(r) => Some(*r),
            _ => None,
        }
    }

    /// Try to cast to string (bytes).
    pub fn as_string(&self) -> Option<&[u8]> {
        match self {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    /// Check if object is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    /// Decode stream data using the filters named in the stream dictionary.
    ///
    /// Returns an error if this is not a stream object or if a filter in the
    /// chain is unsupported or fails.
    pub fn decode_stream_data(&self) -> Result<Vec<u8>> {
        match self {
            Object::Stream { dict, data } => {
                let filters = dict.get("Filter").map(filter_names).unwrap_or_default();
                if filters.is_empty() {
                    return Ok(data.to_vec());
                }
                let params = decode_params(dict.get("DecodeParms"))?;
                crate::decoders::decode_stream(data, &filters, params.as_ref())
            },
            _ => Err(Error::InvalidObjectType {
                expected: "Stream".to_string(),
                found: self.type_name().to_string(),
            }),
        }
    }
}

/// Extract filter names from a Filter entry (a single Name or an Array of Names).
pub(crate) fn filter_names(filter_obj: &Object) -> Vec<String> {
    match filter_obj {
        Object::Name(name) => vec![name.clone()],
        Object::Array(arr) => arr
            .iter()
            .filter_map(|obj| obj.as_name().map(|s| s.to_string()))
            .collect(),
        _ => vec![],
    }
}

/// Extract predictor parameters from a DecodeParms entry.
///
/// Only the first dictionary is considered when DecodeParms is an array.
fn decode_params(params_obj: Option<&Object>) -> Result<Option<crate::decoders::DecodeParams>> {
    let dict = match params_obj {
        Some(Object::Dictionary(d)) => d,
        Some(Object::Array(arr)) => match arr.iter().find_map(|obj| obj.as_dict()) {
            Some(d) => d,
            None => return Ok(None),
        },
        _ => return Ok(None),
    };

    let int = |key: &str, default: i64| dict.get(key).and_then(|o| o.as_integer()).unwrap_or(default);
    let predictor = int("Predictor", 1);
    if predictor <= 1 {
        return Ok(None);
    }

    crate::decoders::DecodeParams::from_raw(
        predictor,
        int("Columns", 1),
        int("Colors", 1),
        int("BitsPerComponent", 8),
    )
    .map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_accessors() {
        assert_eq!(Object::Integer(42).as_integer(), Some(42));
        assert_eq!(Object::Name("Type".into()).as_name(), Some("Type"));
        assert_eq!(Object::Real(1.5).as_number(), Some(1.5));
        assert_eq!(Object::Integer(2).as_number(), Some(2.0));
        assert!(Object::Null.is_null());
        assert!(Object::Integer(1).as_name().is_none());
    }

    #[test]
    fn test_object_stream_dict_access() {
        let mut dict = Dict::new();
        dict.insert("Length".to_string(), Object::Integer(100));
        let obj = Object::Stream {
            dict,
            data: bytes::Bytes::from_static(b"stream data"),
        };
        assert_eq!(obj.as_dict().unwrap().get("Length").unwrap().as_integer(), Some(100));
    }

    #[test]
    fn test_object_ref_display_and_order() {
        assert_eq!(ObjectRef::new(10, 0).to_string(), "10 0 R");
        assert!(ObjectRef::new(2, 0) < ObjectRef::new(10, 0));
    }

    #[test]
    fn test_decode_stream_no_filter() {
        let obj = Object::Stream {
            dict: Dict::new(),
            data: bytes::Bytes::from_static(b"Hello"),
        };
        assert_eq!(obj.decode_stream_data().unwrap(), b"Hello");
    }

    #[test]
    fn test_decode_stream_hex_filter_array() {
        let mut dict = Dict::new();
        dict.insert(
            "Filter".to_string(),
            Object::Array(vec![Object::Name("ASCIIHexDecode".to_string())]),
        );
        let obj = Object::Stream {
            dict,
            data: bytes::Bytes::from_static(b"48656C6C6F>"),
        };
        assert_eq!(obj.decode_stream_data().unwrap(), b"Hello");
    }

    #[test]
    fn test_decode_stream_not_a_stream() {
        match Object::Integer(42).decode_stream_data() {
            Err(Error::InvalidObjectType { expected, found }) => {
                assert_eq!(expected, "Stream");
                assert_eq!(found, "Integer");
            },
            other => panic!("Expected InvalidObjectType error, got {:?}", other),
        }
    }

    #[test]
    fn test_filter_names() {
        assert_eq!(filter_names(&Object::Name("FlateDecode".into())), vec!["FlateDecode"]);
        assert!(filter_names(&Object::Integer(42)).is_empty());
    }
}
