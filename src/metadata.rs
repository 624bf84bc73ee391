use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{axis::OmeDimType, dimension::DimensionDescriptor, options::OME_VERSION};

/// Name of the Zarr v3 metadata document of a node.
pub const ZARR_JSON: &str = "zarr.json";

/// Representation of Zarr v3 group metadata, optionally carrying OME-NGFF attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMetadata {
    /// Always 3.
    pub zarr_format: u8,
    /// Always "group".
    pub node_type: String,
    #[serde(default)]
    pub attributes: GroupAttributes,
}

/// Group attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ome: Option<OmeAttributes>,
    /// Unstructured attributes.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The `ome` attribute of an OME-Zarr image group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OmeAttributes {
    pub version: String,
    pub multiscales: Vec<Multiscale>,
}

/// One multiscale image; only the full-resolution level is described.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Multiscale {
    /// Same length and order as the array's dimensions.
    pub axes: Vec<AxisMetadata>,
    /// Ordered from highest to lowest resolution.
    pub datasets: Vec<Dataset>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub axis_type: OmeDimType,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Path of the array relative to the group.
    pub path: String,
    #[serde(rename = "coordinateTransformations")]
    pub coordinate_transformations: Vec<CoordinateTransformation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CoordinateTransformation {
    Scale { scale: Vec<f64> },
}

impl From<&DimensionDescriptor> for AxisMetadata {
    fn from(value: &DimensionDescriptor) -> Self {
        Self {
            name: value.label.clone(),
            axis_type: value.ome_dim_type(),
            unit: value.ome_unit().to_owned(),
        }
    }
}

impl GroupMetadata {
    /// A group with no OME attributes.
    pub fn plain() -> Self {
        Self {
            zarr_format: 3,
            node_type: "group".to_owned(),
            attributes: Default::default(),
        }
    }

    /// An OME-Zarr image group whose single scale level is the array at `array_path`.
    ///
    /// `dims` must already be in OME-NGFF order.
    pub fn multiscale(dims: &[DimensionDescriptor], array_path: &str) -> Self {
        let multiscale = Multiscale {
            axes: dims.iter().map(AxisMetadata::from).collect(),
            datasets: vec![Dataset {
                path: array_path.to_owned(),
                coordinate_transformations: vec![CoordinateTransformation::Scale {
                    scale: dims.iter().map(DimensionDescriptor::ome_scale).collect(),
                }],
            }],
        };
        let mut out = Self::plain();
        out.attributes.ome = Some(OmeAttributes {
            version: OME_VERSION.to_owned(),
            multiscales: vec![multiscale],
        });
        out
    }

    /// Create `dir` and write this metadata to its `zarr.json`.
    pub fn write_to(&self, dir: &Path) -> crate::Result<()> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(ZARR_JSON);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        log::info!("wrote group metadata to {}", path.display());
        Ok(())
    }

    pub fn read_from(dir: &Path) -> crate::Result<Self> {
        let bytes = std::fs::read(dir.join(ZARR_JSON))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
