use serde_json::{Map, Value};
use zarrs::array::Array;
use zarrs::metadata::{ArrayMetadata as ZarrArrayMetadata, FillValueMetadata};

use crate::chunk::{Element, ElementKind, data_type_name};

/// Descriptive attributes with the well-known CF fields pulled out.
///
/// Values of well-known keys which are not strings stay in `additional`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    pub units: Option<String>,
    pub calendar: Option<String>,
    pub standard_name: Option<String>,
    pub long_name: Option<String>,
    pub description: Option<String>,
    /// Everything else, including `_FillValue`.
    pub additional: Map<String, Value>,
}

impl Attributes {
    pub fn from_map(mut map: Map<String, Value>) -> Self {
        let mut take = |key: &str| match map.remove(key) {
            Some(Value::String(s)) => Some(s),
            Some(other) => {
                map.insert(key.to_string(), other);
                None
            }
            None => None,
        };
        let units = take("units");
        let calendar = take("calendar");
        let standard_name = take("standard_name");
        let long_name = take("long_name");
        let description = take("description");
        Self {
            units,
            calendar,
            standard_name,
            long_name,
            description,
            additional: map,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.additional.get(key)
    }

    /// The `_FillValue` attribute, if numeric (or a one-element numeric list).
    pub fn fill_value(&self) -> Option<f64> {
        match self.additional.get("_FillValue")? {
            Value::Number(n) => n.as_f64(),
            Value::Array(items) if items.len() == 1 => items[0].as_f64(),
            Value::String(s) if s == "NaN" => Some(f64::NAN),
            _ => None,
        }
    }

    /// Free-text attributes other than the well-known ones.
    pub fn text_attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.additional
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.as_str(), s)))
    }
}

/// What the viewer needs to know about an opened array.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayMetadata {
    pub shape: Vec<u64>,
    /// The shape of the first chunk.
    pub chunk_shape: Vec<u64>,
    /// The Zarr v3 name of the data type, e.g. `float32`.
    pub data_type: String,
    /// The array-level fill value, if numeric. A Zarr v2 `null` is `None`.
    pub fill_value: Option<f64>,
    pub dimension_names: Option<Vec<Option<String>>>,
    pub attributes: Attributes,
}

impl ArrayMetadata {
    pub fn from_array<S: ?Sized>(array: &Array<S>) -> crate::Result<Self> {
        let shape = array.shape().to_vec();
        let chunk_shape = array
            .chunk_shape(&vec![0; shape.len()])?
            .iter()
            .map(|n| n.get())
            .collect();
        let explicit_null = matches!(
            array.metadata(),
            ZarrArrayMetadata::V2(v2) if v2.fill_value == FillValueMetadata::Null
        );
        let fill_value = if explicit_null {
            None
        } else {
            ElementKind::of(array.data_type()).and_then(|kind| {
                crate::with_element_type!(kind, T => <T as Element>::read_ne(array.fill_value().as_ne_bytes()))
            })
        };
        Ok(Self {
            shape,
            chunk_shape,
            data_type: data_type_name(array.data_type()),
            fill_value,
            dimension_names: array.dimension_names().clone(),
            attributes: Attributes::from_map(array.attributes().clone()),
        })
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}
