use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};
use zarrs::array::codec::{Bz2Codec, Bz2CompressionLevel, GzipCodec};
use zarrs_codec::BytesToBytesCodecTraits;

use crate::dimension::{ChunkOverrides, ChunkSize};

/// The only OME-NGFF version which can be written.
pub const OME_VERSION: &str = "0.5";

/// Configuration of a [StreamingWriter](crate::writer::StreamingWriter).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WriterOptions {
    /// Destination of the group: a filesystem path or a store URL.
    /// Absent (or `memory://`) means an in-memory store.
    pub path: Option<String>,
    /// Delete any existing data at the destination before creating arrays.
    pub delete_existing: bool,
    /// Per-axis chunk size; see [ChunkSize] for the integer convention.
    pub chunks: HashMap<String, ChunkSize>,
    pub ome_version: String,
    pub compression: Compression,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            path: None,
            delete_existing: false,
            chunks: HashMap::new(),
            ome_version: OME_VERSION.to_owned(),
            compression: Compression::default(),
        }
    }
}

impl WriterOptions {
    pub fn from_json(s: &str) -> crate::Result<Self> {
        let out: Self = serde_json::from_str(s)?;
        out.validate()?;
        Ok(out)
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_delete_existing(mut self, delete_existing: bool) -> Self {
        self.delete_existing = delete_existing;
        self
    }

    /// Set the chunk size of one axis; `-1` for the full extent, `0` for unconstrained.
    pub fn with_chunk_size(mut self, axis: impl Into<String>, size: i64) -> Self {
        self.chunks.insert(axis.into(), ChunkSize::from(size));
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.ome_version != OME_VERSION {
            return Err(crate::Error::general(format!(
                "only OME-Zarr version {OME_VERSION} is supported, got {}",
                self.ome_version
            )));
        }
        self.compression.to_bytes_to_bytes_codec()?;
        Ok(())
    }

    pub(crate) fn chunk_overrides(&self) -> &ChunkOverrides {
        &self.chunks
    }
}

/// Codec applied to each chunk of pixel data before it is stored.
///
/// Configured as e.g. `{"type": "gzip", "level": 5}`; an absent level takes the
/// codec's default.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum Compression {
    /// Chunks hold the raw pixel bytes.
    #[default]
    Raw,
    Gzip {
        /// 0 (fastest) to 9.
        #[serde(default = "Compression::gzip_default_level")]
        level: u32,
    },
    Bzip2 {
        /// 1 to 9, in units of 100k block size.
        #[serde(default = "Compression::bzip2_default_level")]
        level: u32,
    },
}

impl Compression {
    pub const GZIP_DEFAULT_LEVEL: u32 = 6;
    pub const BZIP2_DEFAULT_LEVEL: u32 = 9;

    fn gzip_default_level() -> u32 {
        Self::GZIP_DEFAULT_LEVEL
    }

    fn bzip2_default_level() -> u32 {
        Self::BZIP2_DEFAULT_LEVEL
    }

    /// The `zarrs` codec compressing each chunk, `None` for raw chunks.
    pub fn to_bytes_to_bytes_codec(
        &self,
    ) -> crate::Result<Option<Arc<dyn BytesToBytesCodecTraits>>> {
        let codec: Arc<dyn BytesToBytesCodecTraits> = match *self {
            Compression::Raw => return Ok(None),
            Compression::Gzip { level } => {
                Arc::new(GzipCodec::new(level).map_err(|_| level_out_of_range("gzip", level))?)
            }
            Compression::Bzip2 { level } => Arc::new(Bz2Codec::new(
                Bz2CompressionLevel::new(level).map_err(|_| level_out_of_range("bzip2", level))?,
            )),
        };
        Ok(Some(codec))
    }
}

fn level_out_of_range(codec: &str, level: u32) -> crate::Error {
    crate::Error::general(format!("{codec} compression level {level} is out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_from_json() {
        let opts = WriterOptions::from_json(
            r#"{
                "path": "/tmp/acq.zarr",
                "delete_existing": true,
                "chunks": {"y": 128, "x": 128, "t": -1},
                "compression": {"type": "gzip"}
            }"#,
        )
        .unwrap();
        assert_eq!(opts.path.as_deref(), Some("/tmp/acq.zarr"));
        assert_eq!(opts.chunks["t"], ChunkSize::FullExtent);
        assert_eq!(opts.compression, Compression::Gzip { level: 6 });
        assert_eq!(opts.ome_version, OME_VERSION);
    }

    #[test]
    fn unsupported_options() {
        assert!(WriterOptions::from_json(r#"{"ome_version": "0.4"}"#).is_err());
        assert!(WriterOptions::from_json(r#"{"kvstore": "gs://bucket"}"#).is_err());
    }

    #[test]
    fn compression_levels() {
        let bzip2: Compression = serde_json::from_str(r#"{"type": "bzip2"}"#).unwrap();
        assert_eq!(bzip2, Compression::Bzip2 { level: 9 });
        assert!(bzip2.to_bytes_to_bytes_codec().unwrap().is_some());
        assert!(
            Compression::Raw
                .to_bytes_to_bytes_codec()
                .unwrap()
                .is_none()
        );

        let opts = WriterOptions::default().with_compression(Compression::Gzip { level: 12 });
        assert!(opts.validate().is_err());
        assert!(
            Compression::Bzip2 { level: 0 }
                .to_bytes_to_bytes_codec()
                .is_err()
        );
    }
}
