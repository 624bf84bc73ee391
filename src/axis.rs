//! Axis labels and insertion-ordered axis maps.

use std::{fmt, marker::PhantomData};

use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{MapAccess, Visitor},
    ser::SerializeMap,
};

pub const TIME: &str = "t";
pub const POSITION: &str = "p";
pub const GRID: &str = "g";
pub const CHANNEL: &str = "c";
pub const Z: &str = "z";
pub const Y: &str = "y";
pub const X: &str = "x";

/// Whether the axis comes from the detector frame rather than the acquisition plan.
pub fn is_planar(label: &str) -> bool {
    label == Y || label == X
}

/// Mapping from axis label to a value, iterated in insertion order.
///
/// Serialized as a JSON object whose key order is preserved.
#[derive(Clone, PartialEq, Eq)]
pub struct AxisMap<V>(Vec<(String, V)>);

/// Number of steps along each axis.
pub type AxisSizes = AxisMap<u64>;

/// Position of one frame along each axis.
pub type AxisIndex = AxisMap<u64>;

impl<V> Default for AxisMap<V> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<V> AxisMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<&V> {
        self.0.iter().find(|(k, _)| k == label).map(|(_, v)| v)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.get(label).is_some()
    }

    /// Set the value for `label`, keeping its existing slot if already present.
    ///
    /// Returns the previous value.
    pub fn insert(&mut self, label: impl Into<String>, value: V) -> Option<V> {
        let label = label.into();
        match self.0.iter_mut().find(|(k, _)| *k == label) {
            Some((_, v)) => Some(std::mem::replace(v, value)),
            None => {
                self.0.push((label, value));
                None
            }
        }
    }

    pub fn remove(&mut self, label: &str) -> Option<V> {
        let idx = self.0.iter().position(|(k, _)| k == label)?;
        Some(self.0.remove(idx).1)
    }

    pub fn retain(&mut self, mut f: impl FnMut(&str, &V) -> bool) {
        self.0.retain(|(k, v)| f(k, v));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }
}

impl AxisMap<u64> {
    /// Value for `label`, with absence reading as zero.
    pub fn size(&self, label: &str) -> u64 {
        self.get(label).copied().unwrap_or(0)
    }

    /// Drop every axis whose size is zero; singletons are kept.
    pub fn without_unused(mut self) -> Self {
        self.retain(|_, &n| n != 0);
        self
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for AxisMap<V> {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut out = Self::new();
        for (k, v) in iter {
            out.insert(k, v);
        }
        out
    }
}

impl<K: Into<String>, V, const N: usize> From<[(K, V); N]> for AxisMap<V> {
    fn from(value: [(K, V); N]) -> Self {
        value.into_iter().collect()
    }
}

impl<V> IntoIterator for AxisMap<V> {
    type Item = (String, V);
    type IntoIter = std::vec::IntoIter<(String, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<V: fmt::Debug> fmt::Debug for AxisMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<V: Serialize> Serialize for AxisMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (k, v) in self.iter() {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct AxisMapVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for AxisMapVisitor<V> {
    type Value = AxisMap<V>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map of axis labels")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut out = AxisMap::new();
        while let Some((k, v)) = access.next_entry::<String, V>()? {
            out.insert(k, v);
        }
        Ok(out)
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for AxisMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(AxisMapVisitor(PhantomData))
    }
}

/// OME-NGFF axis type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OmeDimType {
    Time,
    Channel,
    Other,
    Space,
}

impl OmeDimType {
    pub fn from_label(label: &str) -> Self {
        match label {
            Y | X | Z => Self::Space,
            TIME => Self::Time,
            CHANNEL => Self::Channel,
            _ => Self::Other,
        }
    }

    /// Position of this type in the required axis order.
    pub fn rank(self) -> u8 {
        match self {
            Self::Time => 0,
            Self::Channel => 1,
            Self::Other => 2,
            Self::Space => 3,
        }
    }
}

impl fmt::Display for OmeDimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Time => "time",
            Self::Channel => "channel",
            Self::Other => "other",
            Self::Space => "space",
        };
        f.write_str(s)
    }
}
