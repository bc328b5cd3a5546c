//! Values a reader can place in a template
use std::fmt;
use std::str::FromStr;

use ndarray::{Array, Array1, ArrayD, Dimension};

/// Maximum number of characters of a value reproduced in diagnostics
const SUMMARY_LENGTH: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Str,
    Int,
    UInt,
    Float,
    Bool,
    Bytes,
}

impl ElementKind {
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Int | Self::UInt)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::UInt | Self::Float)
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Str => "string",
            Self::Int => "signed integer",
            Self::UInt => "unsigned integer",
            Self::Float => "float",
            Self::Bool => "boolean",
            Self::Bytes => "bytes",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Str(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl Scalar {
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::Str(_) => ElementKind::Str,
            Self::Int(_) => ElementKind::Int,
            Self::UInt(_) => ElementKind::UInt,
            Self::Float(_) => ElementKind::Float,
            Self::Bool(_) => ElementKind::Bool,
            Self::Bytes(_) => ElementKind::Bytes,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// An n-dimensional array of one element type
#[derive(Debug, Clone, PartialEq)]
pub enum NdValue {
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    I8(ArrayD<i8>),
    I16(ArrayD<i16>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
    U32(ArrayD<u32>),
    U64(ArrayD<u64>),
    Bool(ArrayD<bool>),
    Str(ArrayD<String>),
}

/// Apply the same expression to whichever array an NdValue holds. The second
/// form handles string arrays separately, for callers whose body needs a
/// numeric element type.
macro_rules! with_array {
    ($value:expr, $arr:ident => $body:expr) => {
        with_array!($value, $arr => $body, $arr => $body)
    };
    ($value:expr, $arr:ident => $body:expr, $strings:ident => $string_body:expr) => {
        match $value {
            $crate::value::NdValue::F32($arr) => $body,
            $crate::value::NdValue::F64($arr) => $body,
            $crate::value::NdValue::I8($arr) => $body,
            $crate::value::NdValue::I16($arr) => $body,
            $crate::value::NdValue::I32($arr) => $body,
            $crate::value::NdValue::I64($arr) => $body,
            $crate::value::NdValue::U8($arr) => $body,
            $crate::value::NdValue::U16($arr) => $body,
            $crate::value::NdValue::U32($arr) => $body,
            $crate::value::NdValue::U64($arr) => $body,
            $crate::value::NdValue::Bool($arr) => $body,
            $crate::value::NdValue::Str($strings) => $string_body,
        }
    };
}
pub(crate) use with_array;

impl NdValue {
    pub fn shape(&self) -> &[usize] {
        with_array!(self, a => a.shape())
    }

    pub fn len(&self) -> usize {
        with_array!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            Self::F32(_) | Self::F64(_) => ElementKind::Float,
            Self::I8(_) | Self::I16(_) | Self::I32(_) | Self::I64(_) => ElementKind::Int,
            Self::U8(_) | Self::U16(_) | Self::U32(_) | Self::U64(_) => ElementKind::UInt,
            Self::Bool(_) => ElementKind::Bool,
            Self::Str(_) => ElementKind::Str,
        }
    }

    /// Size in bytes of one element as stored on disk. Strings are variable length
    /// and stored as a pointer sized handle.
    pub fn element_size(&self) -> usize {
        match self {
            Self::I8(_) | Self::U8(_) | Self::Bool(_) => 1,
            Self::I16(_) | Self::U16(_) => 2,
            Self::F32(_) | Self::I32(_) | Self::U32(_) => 4,
            Self::F64(_) | Self::I64(_) | Self::U64(_) => 8,
            Self::Str(_) => std::mem::size_of::<usize>() * 2,
        }
    }

    /// The type name written in diagnostics and used to compare virtual link sources
    pub fn dtype_name(&self) -> &'static str {
        match self {
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
            Self::I8(_) => "i8",
            Self::I16(_) => "i16",
            Self::I32(_) => "i32",
            Self::I64(_) => "i64",
            Self::U8(_) => "u8",
            Self::U16(_) => "u16",
            Self::U32(_) => "u32",
            Self::U64(_) => "u64",
            Self::Bool(_) => "bool",
            Self::Str(_) => "string",
        }
    }

    /// The smallest element of an integer array
    pub fn min_integer(&self) -> Option<i128> {
        match self {
            Self::I8(a) => a.iter().map(|v| *v as i128).min(),
            Self::I16(a) => a.iter().map(|v| *v as i128).min(),
            Self::I32(a) => a.iter().map(|v| *v as i128).min(),
            Self::I64(a) => a.iter().map(|v| *v as i128).min(),
            Self::U8(a) => a.iter().map(|v| *v as i128).min(),
            Self::U16(a) => a.iter().map(|v| *v as i128).min(),
            Self::U32(a) => a.iter().map(|v| *v as i128).min(),
            Self::U64(a) => a.iter().map(|v| *v as i128).min(),
            _ => None,
        }
    }

    fn summary(&self) -> String {
        let shape: Vec<String> = self.shape().iter().map(|d| d.to_string()).collect();
        format!("{}[{}]", self.dtype_name(), shape.join(", "))
    }
}

macro_rules! impl_nd_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl<D: Dimension> From<Array<$t, D>> for NdValue {
                fn from(array: Array<$t, D>) -> Self {
                    NdValue::$variant(array.into_dyn())
                }
            }

            impl From<Vec<$t>> for NdValue {
                fn from(values: Vec<$t>) -> Self {
                    NdValue::$variant(Array1::from_vec(values).into_dyn())
                }
            }

            impl<D: Dimension> From<Array<$t, D>> for Value {
                fn from(array: Array<$t, D>) -> Self {
                    Value::Array(NdValue::from(array))
                }
            }

            impl From<Vec<$t>> for Value {
                fn from(values: Vec<$t>) -> Self {
                    Value::Array(NdValue::from(values))
                }
            }
        )*
    };
}

impl_nd_from!(
    f32 => F32,
    f64 => F64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    bool => Bool,
    String => Str,
);

/// An array the writer stores chunked and filtered
#[derive(Debug, Clone, PartialEq)]
pub struct Compressed {
    pub data: NdValue,
    pub strength: Option<u8>,
    pub filter: Option<String>,
}

impl Compressed {
    pub fn new(data: impl Into<NdValue>) -> Self {
        Self {
            data: data.into(),
            strength: None,
            filter: None,
        }
    }

    pub fn with_strength(mut self, strength: u8) -> Self {
        self.strength = Some(strength);
        self
    }

    pub fn with_filter(mut self, filter: &str) -> Self {
        self.filter = Some(filter.to_string());
        self
    }
}

/// Where a link points
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LinkTarget {
    /// An object in the file being written
    Internal(String),
    /// An object in another HDF5 file
    External { file: String, path: String },
}

impl FromStr for LinkTarget {
    type Err = String;

    /// `<path>` is internal, `<file>:<path>` external. The split happens at the first `:`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let target = match s.split_once(':') {
            Some((file, path)) => {
                if file.is_empty() || path.is_empty() {
                    return Err(s.to_string());
                }
                Self::External {
                    file: file.to_string(),
                    path: path.to_string(),
                }
            }
            None if s.is_empty() => return Err(s.to_string()),
            None => Self::Internal(s.to_string()),
        };
        Ok(target)
    }
}

impl fmt::Display for LinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(path) => write!(f, "{path}"),
            Self::External { file, path } => write!(f, "{file}:{path}"),
        }
    }
}

/// The value of a template entry
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Missing,
    Scalar(Scalar),
    Array(NdValue),
    Compressed(Compressed),
    Link(LinkTarget),
    VirtualLink(Vec<LinkTarget>),
}

impl Value {
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    pub fn is_link(&self) -> bool {
        matches!(self, Self::Link(_) | Self::VirtualLink(_))
    }

    /// Element kind of stored data. None for missing values and links.
    pub fn kind(&self) -> Option<ElementKind> {
        match self {
            Self::Scalar(s) => Some(s.kind()),
            Self::Array(a) => Some(a.kind()),
            Self::Compressed(c) => Some(c.data.kind()),
            _ => None,
        }
    }

    /// Shape of stored data; scalars have rank 0
    pub fn shape(&self) -> Option<Vec<usize>> {
        match self {
            Self::Scalar(_) => Some(Vec::new()),
            Self::Array(a) => Some(a.shape().to_vec()),
            Self::Compressed(c) => Some(c.data.shape().to_vec()),
            _ => None,
        }
    }

    /// Every string held by the value
    pub fn strings(&self) -> Option<Vec<&str>> {
        match self {
            Self::Scalar(Scalar::Str(s)) => Some(vec![s.as_str()]),
            Self::Array(NdValue::Str(a)) => Some(a.iter().map(String::as_str).collect()),
            Self::Compressed(Compressed {
                data: NdValue::Str(a),
                ..
            }) => Some(a.iter().map(String::as_str).collect()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(Scalar::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// The smallest integer held by the value, for sign checks
    pub fn min_integer(&self) -> Option<i128> {
        match self {
            Self::Scalar(Scalar::Int(v)) => Some(*v as i128),
            Self::Scalar(Scalar::UInt(v)) => Some(*v as i128),
            Self::Array(a) => a.min_integer(),
            Self::Compressed(c) => c.data.min_integer(),
            _ => None,
        }
    }

    /// A short, human readable rendition used in diagnostics and logs
    pub fn summary(&self) -> String {
        let text = match self {
            Self::Missing => String::from("None"),
            Self::Scalar(s) => s.to_string(),
            Self::Array(a) => a.summary(),
            Self::Compressed(c) => format!("compress({})", c.data.summary()),
            Self::Link(target) => format!("link({target})"),
            Self::VirtualLink(targets) => format!("link([{} sources])", targets.len()),
        };
        if text.chars().count() > SUMMARY_LENGTH {
            let short: String = text.chars().take(SUMMARY_LENGTH).collect();
            format!("{short}...")
        } else {
            text
        }
    }
}

impl From<Scalar> for Value {
    fn from(scalar: Scalar) -> Self {
        Value::Scalar(scalar)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Scalar(Scalar::Str(s.to_string()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Scalar(Scalar::Str(s))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Scalar(Scalar::Int(v))
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Scalar(Scalar::Int(v as i64))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Scalar(Scalar::UInt(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Scalar(Scalar::Float(v))
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Scalar(Scalar::Float(v as f64))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Scalar(Scalar::Bool(v))
    }
}

impl From<Compressed> for Value {
    fn from(c: Compressed) -> Self {
        Value::Compressed(c)
    }
}

impl From<LinkTarget> for Value {
    fn from(target: LinkTarget) -> Self {
        Value::Link(target)
    }
}
