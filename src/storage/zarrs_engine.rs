//! [StorageEngine] over `zarrs` arrays in a filesystem or in-memory store.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use zarrs::{
    array::{Array, ArrayBuilder, ArrayBytes, ArraySubset, DataType, FillValue, data_type},
    filesystem::FilesystemStore,
    storage::{
        ReadableWritableListableStorage, ReadableWritableListableStorageTraits, store::MemoryStore,
    },
};

use super::{ArrayHandle, Selection, StorageEngine, WriteFuture, completion_channel};
use crate::{
    axis,
    metadata::ZARR_JSON,
    plan::PixelType,
    spec::{ArraySpec, StoreLocation},
};

/// Array attribute holding the unit of each dimension.
pub const DIMENSION_UNITS: &str = "dimension_units";

/// Path of the array within its store.
const ROOT: &str = "/";

type SharedArray = Arc<RwLock<Array<dyn ReadableWritableListableStorageTraits>>>;

/// Opens arrays with `zarrs`.
///
/// Only memory and local filesystem locations are supported.
#[derive(Debug, Clone, Default)]
pub struct ZarrsEngine {}

impl ZarrsEngine {
    pub fn new() -> Self {
        Self {}
    }

    fn store(&self, spec: &ArraySpec) -> crate::Result<ReadableWritableListableStorage> {
        match &spec.location {
            StoreLocation::Memory => Ok(Arc::new(MemoryStore::new())),
            StoreLocation::File(path) => {
                if spec.delete_existing && path.exists() {
                    log::warn!("deleting existing data at {}", path.display());
                    std::fs::remove_dir_all(path)?;
                }
                std::fs::create_dir_all(path)?;
                Ok(Arc::new(FilesystemStore::new(path).map_err(crate::Error::wrap)?))
            }
            StoreLocation::Url(url) => Err(crate::Error::location(
                url.as_str(),
                "only memory and file locations can be opened with zarrs",
            )),
        }
    }

    fn exists(spec: &ArraySpec) -> bool {
        match &spec.location {
            StoreLocation::File(path) => path.join(ZARR_JSON).exists(),
            _ => false,
        }
    }
}

fn data_type(pixel_type: PixelType) -> (DataType, FillValue) {
    match pixel_type {
        PixelType::Uint8 => (data_type::uint8(), FillValue::from(0u8)),
        PixelType::Int8 => (data_type::int8(), FillValue::from(0i8)),
        PixelType::Uint16 => (data_type::uint16(), FillValue::from(0u16)),
        PixelType::Int16 => (data_type::int16(), FillValue::from(0i16)),
        PixelType::Uint32 => (data_type::uint32(), FillValue::from(0u32)),
        PixelType::Int32 => (data_type::int32(), FillValue::from(0i32)),
        PixelType::Uint64 => (data_type::uint64(), FillValue::from(0u64)),
        PixelType::Int64 => (data_type::int64(), FillValue::from(0i64)),
        PixelType::Float32 => (data_type::float32(), FillValue::from(0f32)),
        PixelType::Float64 => (data_type::float64(), FillValue::from(0f64)),
    }
}

impl StorageEngine for ZarrsEngine {
    type Array = ZarrsArray;

    fn open_or_create(&self, spec: &ArraySpec) -> crate::Result<ZarrsArray> {
        spec.validate()?;
        let exists = !spec.delete_existing && Self::exists(spec);
        if !exists && !spec.create {
            return Err(crate::Error::general(format!(
                "no array at {:?} and creation was not requested",
                spec.location
            )));
        }
        let store = self.store(spec)?;

        let array = if exists {
            let array = Array::open(store, ROOT).map_err(crate::Error::wrap)?;
            if array.shape().len() != spec.rank() {
                return Err(crate::Error::schema(format!(
                    "existing array has {} dimensions, expected {}",
                    array.shape().len(),
                    spec.rank()
                )));
            }
            log::info!("opened existing array at {:?}", spec.location);
            array
        } else {
            let chunk_shape: Vec<u64> = spec
                .chunk_shape
                .iter()
                .zip(spec.shape.iter())
                .map(|(c, &n)| c.resolve(n))
                .collect();
            let (dtype, fill_value) = data_type(spec.pixel_type);

            let mut attributes = serde_json::Map::new();
            attributes.insert(
                DIMENSION_UNITS.to_owned(),
                serde_json::to_value(&spec.units)?,
            );

            let mut builder = ArrayBuilder::new(spec.shape.clone(), chunk_shape, dtype, fill_value);
            builder
                .dimension_names(Some(spec.labels.iter().map(String::as_str)))
                .attributes(attributes);
            if let Some(codec) = spec.compression.to_bytes_to_bytes_codec()? {
                builder.bytes_to_bytes_codecs(vec![codec]);
            }
            let array = builder.build(store, ROOT).map_err(crate::Error::wrap)?;
            array.store_metadata().map_err(crate::Error::wrap)?;
            log::info!(
                "created {} array of shape {:?} at {:?}",
                spec.pixel_type,
                spec.shape,
                spec.location
            );
            array
        };

        Ok(ZarrsArray::new(array, spec))
    }
}

/// An open `zarrs` array; writes run on the rayon thread pool.
#[derive(Clone)]
pub struct ZarrsArray {
    array: SharedArray,
    pixel_type: PixelType,
    /// Held for the duration of each write when frames may share a chunk.
    serial: Option<Arc<Mutex<()>>>,
}

impl std::fmt::Debug for ZarrsArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZarrsArray")
            .field("shape", &self.shape())
            .field("pixel_type", &self.pixel_type)
            .field("serial", &self.serial.is_some())
            .finish()
    }
}

impl ZarrsArray {
    fn new(array: Array<dyn ReadableWritableListableStorageTraits>, spec: &ArraySpec) -> Self {
        // stores of partial chunks read, modify and write the whole chunk
        let origin = vec![0; array.shape().len()];
        let shares_chunks = match array.chunk_shape(&origin) {
            Ok(chunk) => spec
                .labels
                .iter()
                .zip(chunk.iter())
                .any(|(label, c)| !axis::is_planar(label) && c.get() > 1),
            Err(e) => {
                log::warn!("serializing writes, chunk grid unknown: {e}");
                true
            }
        };
        Self {
            array: Arc::new(RwLock::new(array)),
            pixel_type: spec.pixel_type,
            serial: shares_chunks.then(|| Arc::new(Mutex::new(()))),
        }
    }

    /// The underlying `zarrs` array.
    pub fn inner(&self) -> SharedArray {
        Arc::clone(&self.array)
    }

    fn subset(&self, index: &[Selection], frame_len: usize) -> crate::Result<ArraySubset> {
        let shape = self.shape();
        if index.len() != shape.len() {
            return Err(crate::Error::general(format!(
                "index has {} selections for an array of {} dimensions",
                index.len(),
                shape.len()
            )));
        }
        let ranges: Vec<_> = index
            .iter()
            .zip(shape.iter())
            .map(|(sel, &n)| sel.range(n))
            .collect();
        if let Some((i, r)) = ranges.iter().enumerate().find(|(i, r)| r.end > shape[*i]) {
            return Err(crate::Error::IndexOutOfBounds {
                axis: i.to_string(),
                index: r.start,
                size: shape[i],
            });
        }
        let n_elements: u64 = ranges.iter().map(|r| r.end - r.start).product();
        let expected = n_elements as usize * self.pixel_type.size_of();
        if frame_len != expected {
            return Err(crate::Error::general(format!(
                "frame of {frame_len} bytes does not fill a selection of {expected} bytes"
            )));
        }
        Ok(ArraySubset::new_with_ranges(&ranges))
    }
}

impl ArrayHandle for ZarrsArray {
    fn shape(&self) -> Vec<u64> {
        self.array.read().shape().to_vec()
    }

    fn write(&self, index: &[Selection], frame: Bytes) -> WriteFuture {
        let subset = match self.subset(index, frame.len()) {
            Ok(s) => s,
            Err(e) => return WriteFuture::ready(Err(e)),
        };
        let (completer, future) = completion_channel();
        let array = Arc::clone(&self.array);
        let serial = self.serial.clone();
        rayon::spawn(move || {
            let _guard = serial.as_ref().map(|m| m.lock());
            let result = array
                .read()
                .store_array_subset(&subset, ArrayBytes::new_flen(frame.to_vec()))
                .map_err(crate::Error::wrap);
            completer.complete(result);
        });
        future
    }

    fn resize(&self, shape: Vec<u64>) -> WriteFuture {
        let (completer, future) = completion_channel();
        let array = Arc::clone(&self.array);
        rayon::spawn(move || {
            let mut array = array.write();
            let result = match array.set_shape(shape) {
                Ok(_) => array.store_metadata().map_err(crate::Error::wrap),
                Err(e) => Err(crate::Error::wrap(e)),
            };
            completer.complete(result);
        });
        future
    }

    fn store_attributes(
        &self,
        attributes: serde_json::Map<String, serde_json::Value>,
    ) -> crate::Result<()> {
        let mut array = self.array.write();
        array.attributes_mut().extend(attributes);
        array.store_metadata().map_err(crate::Error::wrap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dimension::ChunkSize, options::Compression};

    fn spec(location: StoreLocation) -> ArraySpec {
        ArraySpec {
            location,
            labels: vec!["t".into(), "y".into(), "x".into()],
            shape: vec![2, 2, 3],
            chunk_shape: vec![
                ChunkSize::from(1_i64),
                ChunkSize::FullExtent,
                ChunkSize::FullExtent,
            ],
            units: vec![None, None, None],
            pixel_type: PixelType::Uint16,
            compression: Compression::Raw,
            create: true,
            delete_existing: false,
        }
    }

    fn frame(values: &[u16]) -> Bytes {
        values
            .iter()
            .flat_map(|v| v.to_ne_bytes())
            .collect::<Vec<u8>>()
            .into()
    }

    #[test]
    fn write_and_read_memory() {
        let array = ZarrsEngine::new()
            .open_or_create(&spec(StoreLocation::Memory))
            .unwrap();
        assert!(array.serial.is_none());
        let index = [Selection::Index(1), Selection::Full, Selection::Full];
        array
            .write(&index, frame(&[1, 2, 3, 4, 5, 6]))
            .wait()
            .unwrap();

        let inner = array.inner();
        let inner = inner.read();
        let data: Vec<u16> = inner.retrieve_array_subset(&inner.subset_all()).unwrap();
        assert_eq!(data, [0, 0, 0, 0, 0, 0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn bad_frame_length_fails_future() {
        let array = ZarrsEngine::new()
            .open_or_create(&spec(StoreLocation::Memory))
            .unwrap();
        let index = [Selection::Index(0), Selection::Full, Selection::Full];
        assert!(array.write(&index, frame(&[1, 2])).wait().is_err());
        let index = [Selection::Index(2), Selection::Full, Selection::Full];
        assert!(array.write(&index, frame(&[0; 6])).wait().is_err());
    }

    #[test]
    fn url_locations_unsupported() {
        let err = ZarrsEngine::new()
            .open_or_create(&spec(StoreLocation::Url("s3://bucket/a".into())))
            .unwrap_err();
        assert!(matches!(err, crate::Error::LocationResolution { .. }));
    }

    #[test]
    fn chunked_time_axis_serializes_writes() {
        let mut s = spec(StoreLocation::Memory);
        s.chunk_shape[0] = ChunkSize::FullExtent;
        let array = ZarrsEngine::new().open_or_create(&s).unwrap();
        assert!(array.serial.is_some());
    }

    #[test]
    fn reopen_and_resize_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let location = StoreLocation::File(tmp.path().join("0"));
        let engine = ZarrsEngine::new();
        let array = engine.open_or_create(&spec(location.clone())).unwrap();
        array.resize(vec![4, 2, 3]).wait().unwrap();
        drop(array);

        let reopened = engine.open_or_create(&spec(location.clone())).unwrap();
        assert_eq!(reopened.shape(), [4, 2, 3]);

        let mut fresh = spec(location);
        fresh.delete_existing = true;
        let recreated = engine.open_or_create(&fresh).unwrap();
        assert_eq!(recreated.shape(), [2, 2, 3]);
    }

    #[test]
    fn reopened_array_keeps_its_chunk_grid() {
        let tmp = tempfile::tempdir().unwrap();
        let location = StoreLocation::File(tmp.path().join("0"));
        let engine = ZarrsEngine::new();
        let mut coarse = spec(location.clone());
        coarse.chunk_shape[0] = ChunkSize::FullExtent;
        drop(engine.open_or_create(&coarse).unwrap());

        let reopened = engine.open_or_create(&spec(location)).unwrap();
        assert!(reopened.serial.is_some());
        let inner = reopened.inner();
        assert_eq!(inner.read().chunk_shape(&[0, 0, 0]).unwrap()[0].get(), 2);
    }
}
