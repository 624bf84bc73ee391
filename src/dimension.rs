//! Ordered, OME-NGFF compatible dimension schemas.
//!
//! OME-NGFF allows at most 5 axes, which must be ordered by type:
//! time (if present), then one channel or custom axis (if present),
//! then 2 or 3 space axes.

use std::{collections::HashMap, fmt, num::NonZeroU64};

use serde::{Deserialize, Serialize};

use crate::{
    axis::{self, AxisSizes, OmeDimType},
    plan::{ImageInfo, PhysicalPlan},
};

/// Most axes an OME-NGFF image may have.
pub const MAX_AXES: usize = 5;

/// Most non-planar axes a plan may use.
pub const MAX_PLAN_AXES: usize = 3;

/// Plan axes which can be stored.
pub const SUPPORTED_AXES: [&str; 3] = [axis::TIME, axis::CHANNEL, axis::Z];

/// Time unit used for time-resolved acquisitions without a fixed interval.
const CONTINUOUS_INTERVAL_S: f64 = 1e-6;

/// Physical size of one step along an axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub scale: f64,
    pub name: String,
}

impl Unit {
    pub fn new(scale: f64, name: impl Into<String>) -> Self {
        Self {
            scale,
            name: name.into(),
        }
    }

    /// OME-NGFF name of the unit.
    pub fn ome_unit(&self) -> &'static str {
        match self.name.as_str() {
            "um" => "micrometer",
            "ml" => "milliliter",
            "s" => "second",
            _ => "unknown",
        }
    }
}

/// Requested chunk extent along one axis.
///
/// Serialized as an integer: `0` for unconstrained, `-1` for the full extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum ChunkSize {
    #[default]
    Unconstrained,
    /// As long as the axis itself; a soft preference.
    FullExtent,
    Extent(NonZeroU64),
}

impl From<i64> for ChunkSize {
    fn from(value: i64) -> Self {
        match value {
            n if n < 0 => ChunkSize::FullExtent,
            n => NonZeroU64::new(n as u64).map_or(ChunkSize::Unconstrained, ChunkSize::Extent),
        }
    }
}

impl From<ChunkSize> for i64 {
    fn from(value: ChunkSize) -> Self {
        match value {
            ChunkSize::Unconstrained => 0,
            ChunkSize::FullExtent => -1,
            ChunkSize::Extent(n) => n.get() as i64,
        }
    }
}

impl ChunkSize {
    /// Chunk extent for an axis of the given size.
    ///
    /// Constrained extents are clamped to the axis; everything else covers it.
    pub fn resolve(self, axis_size: u64) -> u64 {
        let full = axis_size.max(1);
        match self {
            ChunkSize::Extent(n) => n.get().min(full),
            ChunkSize::FullExtent | ChunkSize::Unconstrained => full,
        }
    }
}

/// One axis of a stored array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionDescriptor {
    pub label: String,
    pub size: u64,
    pub unit: Option<Unit>,
    pub chunk_size: ChunkSize,
}

impl DimensionDescriptor {
    pub fn ome_dim_type(&self) -> OmeDimType {
        OmeDimType::from_label(&self.label)
    }

    pub fn ome_unit(&self) -> &'static str {
        self.unit.as_ref().map_or("unknown", Unit::ome_unit)
    }

    pub fn ome_scale(&self) -> f64 {
        self.unit.as_ref().map_or(1.0, |u| u.scale)
    }
}

impl fmt::Display for DimensionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.label, self.size)
    }
}

/// Physical unit of a plan axis.
pub fn axis_unit(plan: PhysicalPlan<'_>, label: &str) -> Option<Unit> {
    match label {
        axis::Z => plan
            .z_plan
            .and_then(|z| z.step)
            .map(|step| Unit::new(step, "um")),
        axis::TIME => plan.time_plan.map(|t| match t.interval {
            Some(interval) if interval > 0.0 => Unit::new(interval, "s"),
            _ => Unit::new(CONTINUOUS_INTERVAL_S, "s"),
        }),
        _ => None,
    }
}

/// Per-axis chunk size overrides.
pub type ChunkOverrides = HashMap<String, ChunkSize>;

fn default_chunk_size(label: &str) -> ChunkSize {
    if axis::is_planar(label) {
        ChunkSize::FullExtent
    } else {
        ChunkSize::Extent(NonZeroU64::MIN)
    }
}

/// Check that the plan axes can be stored in an OME-NGFF image.
pub fn validate_plan_axes(sizes: &AxisSizes) -> crate::Result<()> {
    let used: Vec<&str> = sizes
        .iter()
        .filter(|&(k, &n)| n != 0 && !axis::is_planar(k))
        .map(|(k, _)| k)
        .collect();
    if used.len() > MAX_PLAN_AXES {
        return Err(crate::Error::schema(format!(
            "only 5D data (or less) can be stored, got plan axes {used:?}"
        )));
    }
    if let Some(bad) = used.iter().find(|k| !SUPPORTED_AXES.contains(*k)) {
        return Err(crate::Error::schema(format!(
            "axis {bad:?} is not supported; plan axes must be among {SUPPORTED_AXES:?}"
        )));
    }
    Ok(())
}

/// Build the ordered dimension list of one array.
///
/// Plan axes come first in type order (time, channel, then others, then space),
/// keeping declaration order within a type; `y` and `x` from the image are always last.
pub fn build_dimensions(
    sizes: &AxisSizes,
    unit: impl Fn(&str) -> Option<Unit>,
    chunks: &ChunkOverrides,
    image: &ImageInfo,
) -> crate::Result<Vec<DimensionDescriptor>> {
    validate_plan_axes(sizes)?;

    let chunk_size = |label: &str| {
        chunks
            .get(label)
            .copied()
            .unwrap_or_else(|| default_chunk_size(label))
    };

    let mut dims: Vec<DimensionDescriptor> = sizes
        .iter()
        .filter(|&(k, &n)| n != 0 && !axis::is_planar(k))
        .map(|(k, &n)| DimensionDescriptor {
            label: k.to_owned(),
            size: n,
            unit: unit(k),
            chunk_size: chunk_size(k),
        })
        .collect();
    // stable, so declaration order is kept within a type
    dims.sort_by_key(|d| d.ome_dim_type().rank());

    let px_unit = Some(Unit::new(image.pixel_size_um, "um"));
    let (ny, nx) = image.plane_shape;
    for (label, size) in [(axis::Y, ny), (axis::X, nx)] {
        dims.push(DimensionDescriptor {
            label: label.to_owned(),
            size,
            unit: px_unit.clone(),
            chunk_size: chunk_size(label),
        });
    }

    validate_dimensions(&dims)?;
    Ok(dims)
}

/// Check a dimension list against the OME-NGFF axis rules.
pub fn validate_dimensions(dims: &[DimensionDescriptor]) -> crate::Result<()> {
    if dims.len() > MAX_AXES {
        return Err(crate::Error::schema(format!(
            "{} axes exceeds the maximum of {MAX_AXES}",
            dims.len()
        )));
    }

    let mut counts: HashMap<OmeDimType, usize> = HashMap::new();
    let mut last_rank = 0;
    for (i, dim) in dims.iter().enumerate() {
        if dims[..i].iter().any(|d| d.label == dim.label) {
            return Err(crate::Error::schema(format!(
                "duplicate axis {:?}",
                dim.label
            )));
        }
        let ty = dim.ome_dim_type();
        if ty.rank() < last_rank {
            return Err(crate::Error::schema(format!(
                "{ty} axis {:?} must come before the axes preceding it",
                dim.label
            )));
        }
        last_rank = ty.rank();
        *counts.entry(ty).or_default() += 1;
    }

    let count = |ty| counts.get(&ty).copied().unwrap_or(0);
    if count(OmeDimType::Time) > 1 {
        return Err(crate::Error::schema("at most one time axis is allowed"));
    }
    if count(OmeDimType::Channel) + count(OmeDimType::Other) > 1 {
        return Err(crate::Error::schema(
            "at most one channel or custom axis is allowed",
        ));
    }
    let n_space = count(OmeDimType::Space);
    if !(2..=3).contains(&n_space) {
        return Err(crate::Error::schema(format!(
            "2 or 3 space axes are required, got {n_space}"
        )));
    }
    Ok(())
}
