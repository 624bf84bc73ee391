//! Engine-agnostic descriptions of the arrays to open or create.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    dimension::{ChunkSize, DimensionDescriptor, Unit, validate_dimensions},
    options::Compression,
    plan::PixelType,
};

const SCHEME_SEPARATOR: &str = "://";

/// Key-value store backing one array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "driver", content = "path")]
pub enum StoreLocation {
    /// Ephemeral, non-persistent store.
    Memory,
    /// Directory holding the array.
    File(PathBuf),
    /// Any other store URL, passed through verbatim.
    Url(String),
}

impl StoreLocation {
    pub fn is_persistent(&self) -> bool {
        !matches!(self, StoreLocation::Memory)
    }
}

/// Where a group and its array live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLocation {
    /// Location of the array data.
    pub array: StoreLocation,
    /// Directory of the group, when group metadata can be written there.
    pub group_dir: Option<PathBuf>,
}

impl ResolvedLocation {
    /// Location of a child group named `segment`, with its array at `array_path` below it.
    pub fn nested(&self, segment: &str, array_path: &str) -> Self {
        match (&self.group_dir, &self.array) {
            (Some(dir), _) => {
                let group_dir = dir.join(segment);
                Self {
                    array: StoreLocation::File(group_dir.join(array_path)),
                    group_dir: Some(group_dir),
                }
            }
            (None, StoreLocation::Url(url)) => Self {
                array: StoreLocation::Url(format!("{}/{segment}", url.trim_end_matches('/'))),
                group_dir: None,
            },
            (None, other) => Self {
                array: other.clone(),
                group_dir: None,
            },
        }
    }
}

/// Resolve a destination into the location of a group and the array one segment below it.
pub fn resolve_location(
    destination: Option<&str>,
    array_path: &str,
) -> crate::Result<ResolvedLocation> {
    let Some(dest) = destination.map(str::trim) else {
        return Ok(ResolvedLocation {
            array: StoreLocation::Memory,
            group_dir: None,
        });
    };
    if dest.is_empty() {
        return Err(crate::Error::location(dest, "empty destination"));
    }

    if let Some((scheme, rest)) = dest.split_once(SCHEME_SEPARATOR) {
        if scheme.is_empty()
            || !scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c))
        {
            return Err(crate::Error::location(dest, "malformed URL scheme"));
        }
        match scheme.to_ascii_lowercase().as_str() {
            "memory" => {
                return Ok(ResolvedLocation {
                    array: StoreLocation::Memory,
                    group_dir: None,
                });
            }
            "file" => {
                if rest.is_empty() {
                    return Err(crate::Error::location(dest, "empty path"));
                }
                return local_location(dest, Path::new(rest), array_path);
            }
            _ => {
                if rest.is_empty() {
                    return Err(crate::Error::location(dest, "empty URL path"));
                }
                return Ok(ResolvedLocation {
                    array: StoreLocation::Url(dest.to_owned()),
                    group_dir: None,
                });
            }
        }
    }
    if dest.to_ascii_lowercase().starts_with("memory:") {
        return Ok(ResolvedLocation {
            array: StoreLocation::Memory,
            group_dir: None,
        });
    }

    local_location(dest, Path::new(dest), array_path)
}

fn local_location(dest: &str, path: &Path, array_path: &str) -> crate::Result<ResolvedLocation> {
    let group_dir = absolute(expand_home(path))
        .map_err(|e| crate::Error::location(dest, e.to_string()))?;
    check_writable(&group_dir).map_err(|reason| crate::Error::location(dest, reason))?;
    Ok(ResolvedLocation {
        array: StoreLocation::File(group_dir.join(array_path)),
        group_dir: Some(group_dir),
    })
}

fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}

fn absolute(path: PathBuf) -> std::io::Result<PathBuf> {
    // canonicalize only works on paths which exist
    match path.canonicalize() {
        Ok(p) => Ok(p),
        Err(_) => std::path::absolute(path),
    }
}

/// The nearest existing ancestor must be a writable directory.
fn check_writable(path: &Path) -> Result<(), String> {
    let Some(existing) = path.ancestors().find(|p| p.exists()) else {
        return Err("no existing ancestor directory".into());
    };
    let meta = existing
        .metadata()
        .map_err(|e| format!("cannot inspect {}: {e}", existing.display()))?;
    if !meta.is_dir() {
        return Err(format!("{} is not a directory", existing.display()));
    }
    if meta.permissions().readonly() {
        return Err(format!("{} is read-only", existing.display()));
    }
    Ok(())
}

/// Everything needed to open or create one array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArraySpec {
    pub location: StoreLocation,
    pub labels: Vec<String>,
    pub shape: Vec<u64>,
    /// Passed through as requested; resolving extents is up to the engine.
    pub chunk_shape: Vec<ChunkSize>,
    pub units: Vec<Option<Unit>>,
    pub pixel_type: PixelType,
    pub compression: Compression,
    /// Create the array if it does not exist.
    pub create: bool,
    /// Remove existing data at the location first.
    pub delete_existing: bool,
}

impl ArraySpec {
    /// Compile a spec from an ordered dimension list.
    ///
    /// Fails on an invalid schema without touching storage.
    pub fn compile(
        dims: &[DimensionDescriptor],
        pixel_type: PixelType,
        location: StoreLocation,
        delete_existing: bool,
    ) -> crate::Result<Self> {
        validate_dimensions(dims)?;
        Ok(Self {
            location,
            labels: dims.iter().map(|d| d.label.to_string()).collect(),
            shape: dims.iter().map(|d| d.size).collect(),
            chunk_shape: dims.iter().map(|d| d.chunk_size).collect(),
            units: dims.iter().map(|d| d.unit.clone()).collect(),
            pixel_type,
            compression: Compression::Raw,
            create: true,
            delete_existing,
        })
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Check that every per-axis list has one entry per dimension.
    pub fn validate(&self) -> crate::Result<()> {
        let n = self.rank();
        if self.labels.len() != n || self.chunk_shape.len() != n || self.units.len() != n {
            return Err(crate::Error::schema(format!(
                "dimension names ({}), chunk shape ({}) and units ({}) must match rank {n}",
                self.labels.len(),
                self.chunk_shape.len(),
                self.units.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{axis::AxisSizes, dimension::build_dimensions, plan::ImageInfo};

    #[test]
    fn end_to_end_shape() {
        let sizes = AxisSizes::from([("t", 2), ("c", 2)]);
        let image = ImageInfo::new((16, 16), PixelType::Uint16);
        let dims = build_dimensions(&sizes, |_| None, &Default::default(), &image).unwrap();
        let spec =
            ArraySpec::compile(&dims, PixelType::Uint16, StoreLocation::Memory, false).unwrap();
        assert_eq!(spec.shape, [2, 2, 16, 16]);
        assert_eq!(spec.labels, ["t", "c", "y", "x"]);
        let chunks: Vec<i64> = spec.chunk_shape.iter().map(|&c| c.into()).collect();
        assert_eq!(chunks, [1, 1, -1, -1]);
        assert_eq!(spec.units[0], None);
        assert!(spec.create);
        spec.validate().unwrap();
    }

    #[test]
    fn memory_locations() {
        for dest in [None, Some("memory://"), Some("MEMORY:")] {
            let loc = resolve_location(dest, "0").unwrap();
            assert_eq!(loc.array, StoreLocation::Memory);
            assert!(loc.group_dir.is_none());
        }
    }

    #[test]
    fn urls_verbatim() {
        let loc = resolve_location(Some("s3://bucket/acq.zarr"), "0").unwrap();
        assert_eq!(loc.array, StoreLocation::Url("s3://bucket/acq.zarr".into()));
    }

    #[test]
    fn malformed_urls() {
        for dest in ["://nowhere", "gs://", "bad scheme://x", ""] {
            assert!(matches!(
                resolve_location(Some(dest), "0"),
                Err(crate::Error::LocationResolution { .. })
            ));
        }
    }

    #[test]
    fn local_path_array_below_group() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("acq.zarr");
        let loc = resolve_location(Some(dest.to_str().unwrap()), "0").unwrap();
        let group = loc.group_dir.unwrap();
        assert!(group.is_absolute());
        assert!(group.ends_with("acq.zarr"));
        assert_eq!(loc.array, StoreLocation::File(group.join("0")));

        let url = format!("file://{}", dest.display());
        let loc = resolve_location(Some(&url), "0").unwrap();
        assert!(matches!(loc.array, StoreLocation::File(_)));

        let nested = loc.nested("p1", "0");
        assert_eq!(nested.group_dir, Some(group.join("p1")));
        assert_eq!(
            nested.array,
            StoreLocation::File(group.join("p1").join("0"))
        );
    }

    #[test]
    fn nested_urls_and_memory() {
        let loc = resolve_location(Some("s3://bucket/acq.zarr/"), "0").unwrap();
        assert_eq!(
            loc.nested("p0", "0").array,
            StoreLocation::Url("s3://bucket/acq.zarr/p0".into())
        );
        let loc = resolve_location(None, "0").unwrap();
        assert_eq!(loc.nested("p0", "0").array, StoreLocation::Memory);
    }

    #[test]
    fn path_under_a_file_is_unwritable() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        let dest = file.join("acq.zarr");
        assert!(matches!(
            resolve_location(Some(dest.to_str().unwrap()), "0"),
            Err(crate::Error::LocationResolution { .. })
        ));
    }

    #[test]
    fn mismatched_lengths_rejected() {
        let mut spec = ArraySpec {
            location: StoreLocation::Memory,
            labels: vec!["y".into(), "x".into()],
            shape: vec![4, 4],
            chunk_shape: vec![ChunkSize::FullExtent; 2],
            units: vec![None, None],
            pixel_type: PixelType::Uint8,
            compression: Compression::Raw,
            create: true,
            delete_existing: false,
        };
        spec.validate().unwrap();
        spec.labels.pop();
        assert!(matches!(spec.validate(), Err(crate::Error::SchemaViolation(_))));
    }
}
