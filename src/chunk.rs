use std::ops::Range;

use zarrs::array::data_type::{
    Float32DataType, Float64DataType, Int8DataType, Int16DataType, Int32DataType, Int64DataType,
    UInt8DataType, UInt16DataType, UInt32DataType, UInt64DataType,
};
use zarrs::array::{ArraySubset, DataType, ElementOwned};
use zarrs::plugin::ExtensionName;

/// Decoded array values in C order.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedBuffer {
    Float32(Vec<f32>),
    /// Every data type other than `float32`, widened.
    Float64(Vec<f64>),
}

impl TypedBuffer {
    pub fn len(&self) -> usize {
        match self {
            TypedBuffer::Float32(v) => v.len(),
            TypedBuffer::Float64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            TypedBuffer::Float32(v) => v.iter().map(|x| *x as f64).collect(),
            TypedBuffer::Float64(v) => v.clone(),
        }
    }

    pub fn into_f32_vec(self) -> Vec<f32> {
        match self {
            TypedBuffer::Float32(v) => v,
            TypedBuffer::Float64(v) => v.into_iter().map(|x| x as f32).collect(),
        }
    }
}

/// Element types which can be read into a [TypedBuffer].
pub trait Element: ElementOwned + Copy {
    fn into_buffer(values: Vec<Self>) -> TypedBuffer;

    /// Widen one native-endian element, e.g. a fill value.
    fn read_ne(bytes: &[u8]) -> Option<f64>;
}

macro_rules! impl_widened_element {
    ($($t:ty),*) => {
        $(
            impl Element for $t {
                fn into_buffer(values: Vec<Self>) -> TypedBuffer {
                    TypedBuffer::Float64(values.into_iter().map(|v| v as f64).collect())
                }

                fn read_ne(bytes: &[u8]) -> Option<f64> {
                    Some(<$t>::from_ne_bytes(bytes.try_into().ok()?) as f64)
                }
            }
        )*
    };
}

impl_widened_element!(i8, i16, i32, i64, u8, u16, u32, u64, f64);

impl Element for f32 {
    fn into_buffer(values: Vec<Self>) -> TypedBuffer {
        TypedBuffer::Float32(values)
    }

    fn read_ne(bytes: &[u8]) -> Option<f64> {
        Some(f32::from_ne_bytes(bytes.try_into().ok()?) as f64)
    }
}

/// The numeric data types the viewer reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

impl ElementKind {
    pub fn of(data_type: &DataType) -> Option<Self> {
        let kind = if data_type.is::<Float32DataType>() {
            ElementKind::Float32
        } else if data_type.is::<Float64DataType>() {
            ElementKind::Float64
        } else if data_type.is::<Int8DataType>() {
            ElementKind::Int8
        } else if data_type.is::<Int16DataType>() {
            ElementKind::Int16
        } else if data_type.is::<Int32DataType>() {
            ElementKind::Int32
        } else if data_type.is::<Int64DataType>() {
            ElementKind::Int64
        } else if data_type.is::<UInt8DataType>() {
            ElementKind::UInt8
        } else if data_type.is::<UInt16DataType>() {
            ElementKind::UInt16
        } else if data_type.is::<UInt32DataType>() {
            ElementKind::UInt32
        } else if data_type.is::<UInt64DataType>() {
            ElementKind::UInt64
        } else {
            return None;
        };
        Some(kind)
    }

    /// Like [ElementKind::of], failing with the data type's name.
    pub fn require(data_type: &DataType) -> crate::Result<Self> {
        Self::of(data_type).ok_or_else(|| {
            crate::Error::decode(format!(
                "unsupported data type {}",
                data_type_name(data_type)
            ))
        })
    }
}

pub fn data_type_name(data_type: &DataType) -> String {
    data_type
        .name_v3()
        .map_or_else(|| "<unnamed>".to_string(), |n| n.into_owned())
}

/// Run `$body` with `$t` bound to the Rust element type of an [ElementKind].
#[macro_export]
macro_rules! with_element_type {
    ($kind:expr, $t:ident => $body:expr) => {
        match $kind {
            $crate::chunk::ElementKind::Int8 => {
                type $t = i8;
                $body
            }
            $crate::chunk::ElementKind::Int16 => {
                type $t = i16;
                $body
            }
            $crate::chunk::ElementKind::Int32 => {
                type $t = i32;
                $body
            }
            $crate::chunk::ElementKind::Int64 => {
                type $t = i64;
                $body
            }
            $crate::chunk::ElementKind::UInt8 => {
                type $t = u8;
                $body
            }
            $crate::chunk::ElementKind::UInt16 => {
                type $t = u16;
                $body
            }
            $crate::chunk::ElementKind::UInt32 => {
                type $t = u32;
                $body
            }
            $crate::chunk::ElementKind::UInt64 => {
                type $t = u64;
                $body
            }
            $crate::chunk::ElementKind::Float32 => {
                type $t = f32;
                $body
            }
            $crate::chunk::ElementKind::Float64 => {
                type $t = f64;
                $body
            }
        }
    };
}

/// A hyper-rectangular region of an array: one half-open range per dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArraySlice {
    ranges: Vec<Range<u64>>,
}

impl ArraySlice {
    pub fn new(ranges: Vec<Range<u64>>) -> Self {
        Self { ranges }
    }

    /// The whole of an array with the given shape.
    pub fn all(shape: &[u64]) -> Self {
        Self::new(shape.iter().map(|n| 0..*n).collect())
    }

    /// A single index of the leading axis, the full extent of the others.
    pub fn leading_index(shape: &[u64], index: u64) -> Self {
        let mut ranges: Vec<_> = shape.iter().map(|n| 0..*n).collect();
        if let Some(first) = ranges.first_mut() {
            *first = index..index + 1;
        }
        Self::new(ranges)
    }

    pub fn ranges(&self) -> &[Range<u64>] {
        &self.ranges
    }

    pub fn shape(&self) -> Vec<u64> {
        self.ranges.iter().map(|r| r.end.saturating_sub(r.start)).collect()
    }

    pub fn num_elements(&self) -> u64 {
        self.shape().iter().product()
    }

    pub fn validate(&self, shape: &[u64]) -> crate::Result<()> {
        if self.ranges.len() != shape.len() {
            return Err(crate::Error::general(format!(
                "slice of rank {} for array of rank {}",
                self.ranges.len(),
                shape.len()
            )));
        }
        for (r, n) in self.ranges.iter().zip(shape) {
            if r.start > r.end || r.end > *n {
                return Err(crate::Error::general(format!(
                    "slice {:?} out of bounds for shape {shape:?}",
                    self.ranges
                )));
            }
        }
        Ok(())
    }

    /// The zarrs subset covering this slice of an array of `shape`.
    pub fn to_subset(&self, shape: &[u64]) -> crate::Result<ArraySubset> {
        self.validate(shape)?;
        Ok(ArraySubset::new_with_ranges(&self.ranges))
    }
}
