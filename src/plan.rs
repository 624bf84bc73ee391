//! Acquisition plans, per-frame events and detector frame descriptions.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::axis::{self, AxisIndex, AxisSizes};

/// A (possibly nested) description of a multi-dimensional acquisition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionPlan {
    /// Number of steps along each axis, in acquisition order.
    #[serde(default)]
    pub sizes: AxisSizes,
    /// Stage positions; each may run its own sub-plan.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub positions: Vec<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_plan: Option<ZPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_plan: Option<TimePlan>,
}

impl AcquisitionPlan {
    pub fn new(sizes: impl Into<AxisSizes>) -> Self {
        Self {
            sizes: sizes.into(),
            ..Default::default()
        }
    }

    pub fn with_positions(mut self, positions: impl IntoIterator<Item = Position>) -> Self {
        self.positions = positions.into_iter().collect();
        self
    }

    pub fn with_z_plan(mut self, z_plan: ZPlan) -> Self {
        self.z_plan = Some(z_plan);
        self
    }

    pub fn with_time_plan(mut self, time_plan: TimePlan) -> Self {
        self.time_plan = Some(time_plan);
        self
    }

    /// Labels of every axis with a non-zero size.
    pub fn used_axes(&self) -> Vec<&str> {
        self.sizes
            .iter()
            .filter(|&(_, &n)| n != 0)
            .map(|(k, _)| k)
            .collect()
    }

    /// Whether any position carries its own sub-plan.
    pub fn has_sub_plans(&self) -> bool {
        self.positions.iter().any(|p| p.sub_plan.is_some())
    }

    /// Number of stage positions, counting a plan without positions as one.
    pub fn num_positions(&self) -> usize {
        self.positions
            .len()
            .max(self.sizes.size(axis::POSITION) as usize)
            .max(1)
    }

    /// The physical plans governing one position.
    ///
    /// A sub-plan's z and time plans take precedence over the root's.
    pub fn effective_for(&self, position: usize) -> PhysicalPlan<'_> {
        let sub = self
            .positions
            .get(position)
            .and_then(|p| p.sub_plan.as_deref());
        PhysicalPlan {
            z_plan: sub
                .and_then(|s| s.z_plan.as_ref())
                .or(self.z_plan.as_ref()),
            time_plan: sub
                .and_then(|s| s.time_plan.as_ref())
                .or(self.time_plan.as_ref()),
        }
    }
}

/// Z and time plans in effect for one array, used to derive physical units.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhysicalPlan<'a> {
    pub z_plan: Option<&'a ZPlan>,
    pub time_plan: Option<&'a TimePlan>,
}

/// A stage position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Acquisition run at this position instead of the root plan.
    #[serde(default, rename = "sequence", skip_serializing_if = "Option::is_none")]
    pub sub_plan: Option<Box<AcquisitionPlan>>,
}

impl Position {
    pub fn with_sub_plan(sub_plan: AcquisitionPlan) -> Self {
        Self {
            name: None,
            sub_plan: Some(Box::new(sub_plan)),
        }
    }
}

/// Z-stack stepping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZPlan {
    /// Distance between planes, in micrometers.
    #[serde(default)]
    pub step: Option<f64>,
}

/// Time-lapse sampling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimePlan {
    /// Seconds between timepoints; absent or zero means "as fast as possible".
    #[serde(default)]
    pub interval: Option<f64>,
    #[serde(default)]
    pub loops: u64,
}

/// One frame's place in the acquisition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameEvent {
    pub index: AxisIndex,
    /// Opaque fields passed through to the stored frame metadata.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl FrameEvent {
    pub fn new(index: impl Into<AxisIndex>) -> Self {
        Self {
            index: index.into(),
            extra: Default::default(),
        }
    }

    /// Stage position of the frame; zero if the event carries none.
    pub fn position(&self) -> usize {
        self.index.size(axis::POSITION) as usize
    }
}

/// Side-channel metadata recorded for one frame.
pub type FrameMetadata = serde_json::Map<String, serde_json::Value>;

/// Shape and type of the frames produced by the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    /// (height, width) of one plane.
    pub plane_shape: (u64, u64),
    #[serde(default = "default_pixel_size")]
    pub pixel_size_um: f64,
    #[serde(rename = "dtype")]
    pub pixel_type: PixelType,
}

fn default_pixel_size() -> f64 {
    1.0
}

impl ImageInfo {
    pub fn new(plane_shape: (u64, u64), pixel_type: PixelType) -> Self {
        Self {
            plane_shape,
            pixel_size_um: default_pixel_size(),
            pixel_type,
        }
    }

    pub fn with_pixel_size(mut self, pixel_size_um: f64) -> Self {
        self.pixel_size_um = pixel_size_um;
        self
    }
}

/// Pixel data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelType {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Uint64,
    Int64,
    Float32,
    Float64,
}

impl PixelType {
    /// Bytes per pixel.
    pub fn size_of(self) -> usize {
        match self {
            PixelType::Uint8 | PixelType::Int8 => 1,
            PixelType::Uint16 | PixelType::Int16 => 2,
            PixelType::Uint32 | PixelType::Int32 | PixelType::Float32 => 4,
            PixelType::Uint64 | PixelType::Int64 | PixelType::Float64 => 8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PixelType::Uint8 => "uint8",
            PixelType::Int8 => "int8",
            PixelType::Uint16 => "uint16",
            PixelType::Int16 => "int16",
            PixelType::Uint32 => "uint32",
            PixelType::Int32 => "int32",
            PixelType::Uint64 => "uint64",
            PixelType::Int64 => "int64",
            PixelType::Float32 => "float32",
            PixelType::Float64 => "float64",
        }
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PixelType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let out = match s {
            "uint8" => PixelType::Uint8,
            "int8" => PixelType::Int8,
            "uint16" => PixelType::Uint16,
            "int16" => PixelType::Int16,
            "uint32" => PixelType::Uint32,
            "int32" => PixelType::Int32,
            "uint64" => PixelType::Uint64,
            "int64" => PixelType::Int64,
            "float32" => PixelType::Float32,
            "float64" => PixelType::Float64,
            s => return Err(crate::Error::general(format!("unsupported data type: {s}"))),
        };
        Ok(out)
    }
}
