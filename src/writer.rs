//! Streaming of acquisition frames into OME-Zarr arrays.
//!
//! A [StreamingWriter] moves through `Idle -> Prepared -> Writing -> Idle`:
//! [prepare_sequence](StreamingWriter::prepare_sequence) validates a plan and fixes
//! the dimensions of every array, [frame_ready](StreamingWriter::frame_ready)
//! dispatches writes without waiting on them, and [flush](StreamingWriter::flush)
//! drains every outstanding write before persisting the deferred frame metadata.

use std::{fmt, path::PathBuf};

use bytes::Bytes;
use futures::{StreamExt, stream::FuturesUnordered};
use serde::Serialize;

use crate::{
    WriteFailure,
    axis::{self, AxisIndex},
    dimension::{DimensionDescriptor, axis_unit, build_dimensions},
    metadata::GroupMetadata,
    options::WriterOptions,
    plan::{AcquisitionPlan, FrameEvent, FrameMetadata, ImageInfo, PixelType},
    sizes::position_sizes,
    spec::{ArraySpec, ResolvedLocation, resolve_location},
    storage::{ArrayHandle, Selection, StorageEngine, WriteFuture},
};

/// Path of the full-resolution array within its group.
pub const ARRAY_PATH: &str = "0";

/// Array attribute under which per-frame metadata is persisted.
pub const FRAME_METADATA_KEY: &str = "frame_meta";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriterState {
    /// No sequence prepared and nothing in flight.
    Idle,
    /// Dimensions fixed; no array opened yet.
    Prepared,
    /// At least one array open.
    Writing,
}

impl fmt::Display for WriterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WriterState::Idle => "idle",
            WriterState::Prepared => "prepared",
            WriterState::Writing => "writing",
        };
        f.write_str(s)
    }
}

/// A dispatched write which has not been drained yet.
#[derive(Debug)]
pub struct PendingWrite {
    pub position: usize,
    pub index: Vec<Selection>,
    future: WriteFuture,
}

/// Metadata of one frame, kept until the writes are flushed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameMetadataEntry {
    #[serde(skip)]
    pub position: usize,
    pub event: FrameEvent,
    pub metadata: FrameMetadata,
}

/// Everything needed to open the array of one stage position.
#[derive(Debug, Clone)]
struct ArrayLayout {
    dims: Vec<DimensionDescriptor>,
    location: ResolvedLocation,
}

/// Writes the frames of one acquisition at a time.
///
/// Owned by the thread driving the acquisition; concurrent acquisitions need
/// their own writer and their own destination.
pub struct StreamingWriter<E: StorageEngine> {
    engine: E,
    options: WriterOptions,
    state: WriterState,
    pixel_type: Option<PixelType>,
    /// Plain group written above the per-position groups, if any.
    root_group: Option<PathBuf>,
    root_initialized: bool,
    layouts: Vec<ArrayLayout>,
    arrays: Vec<Option<E::Array>>,
    pending: Vec<PendingWrite>,
    metadata: Vec<FrameMetadataEntry>,
    /// Failures of earlier flushes, reported again until reset.
    failed: Vec<WriteFailure>,
}

impl<E: StorageEngine> fmt::Debug for StreamingWriter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingWriter")
            .field("state", &self.state)
            .field("positions", &self.layouts.len())
            .field("pending", &self.pending.len())
            .field("metadata", &self.metadata.len())
            .field("failed", &self.failed.len())
            .finish()
    }
}

impl<E: StorageEngine> StreamingWriter<E> {
    pub fn new(engine: E, options: WriterOptions) -> crate::Result<Self> {
        options.validate()?;
        Ok(Self {
            engine,
            options,
            state: WriterState::Idle,
            pixel_type: None,
            root_group: None,
            root_initialized: false,
            layouts: Vec::new(),
            arrays: Vec::new(),
            pending: Vec::new(),
            metadata: Vec::new(),
            failed: Vec::new(),
        })
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Number of dispatched writes not yet drained.
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Deferred frame metadata, in arrival order.
    pub fn frame_metadata(&self) -> &[FrameMetadataEntry] {
        &self.metadata
    }

    /// Number of arrays the prepared sequence writes to.
    pub fn num_positions(&self) -> usize {
        self.layouts.len()
    }

    /// Ordered dimensions of one position's array.
    pub fn dimensions(&self, position: usize) -> Option<&[DimensionDescriptor]> {
        self.layouts.get(position).map(|l| l.dims.as_slice())
    }

    /// The array of one position, if it has been opened.
    pub fn array(&self, position: usize) -> Option<&E::Array> {
        self.arrays.get(position).and_then(Option::as_ref)
    }

    fn check_state(&self, operation: &'static str, allowed: &[WriterState]) -> crate::Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(crate::Error::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn check_position(&self, position: usize) -> crate::Result<()> {
        if position < self.layouts.len() {
            Ok(())
        } else {
            Err(crate::Error::IndexOutOfBounds {
                axis: axis::POSITION.to_owned(),
                index: position as u64,
                size: self.layouts.len() as u64,
            })
        }
    }

    /// Validate a plan and fix the dimensions of every array it will write.
    ///
    /// Nothing is created in storage; any schema violation leaves the writer idle.
    pub fn prepare_sequence(
        &mut self,
        plan: &AcquisitionPlan,
        image: &ImageInfo,
    ) -> crate::Result<()> {
        if !self.pending.is_empty() {
            return Err(self.stale("prepare a sequence"));
        }
        if !self.failed.is_empty() {
            let message = format!(
                "cannot prepare a sequence after {} failed write(s); reset or abandon first",
                self.failed.len()
            );
            log::error!("{message}");
            return Err(crate::Error::StaleState(message));
        }
        self.check_state("prepare a sequence", &[WriterState::Idle])?;

        let chunks = self.options.chunk_overrides();
        let dims = position_sizes(plan)
            .iter()
            .enumerate()
            .map(|(i, sizes)| {
                let physical = plan.effective_for(i);
                build_dimensions(sizes, |label| axis_unit(physical, label), chunks, image)
            })
            .collect::<crate::Result<Vec<_>>>()?;

        let root = resolve_location(self.options.path.as_deref(), ARRAY_PATH)?;
        let fan_out = plan.num_positions() > 1 || plan.has_sub_plans();
        let layouts: Vec<ArrayLayout> = dims
            .into_iter()
            .enumerate()
            .map(|(i, dims)| ArrayLayout {
                dims,
                location: if fan_out {
                    root.nested(&format!("{}{i}", axis::POSITION), ARRAY_PATH)
                } else {
                    root.clone()
                },
            })
            .collect();

        if let Some(first) = layouts.first() {
            log::info!(
                "prepared sequence of {} array(s) with dimensions [{}]",
                layouts.len(),
                first
                    .dims
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        self.root_group = if fan_out { root.group_dir } else { None };
        self.root_initialized = false;
        self.pixel_type = Some(image.pixel_type);
        self.arrays = layouts.iter().map(|_| None).collect();
        self.layouts = layouts;
        self.metadata.clear();
        self.state = WriterState::Prepared;
        Ok(())
    }

    /// Open (creating if necessary) the array of one position.
    ///
    /// Group metadata is written before the array itself.
    pub fn new_array(&mut self, position: usize) -> crate::Result<&E::Array> {
        self.ensure_array(position)?;
        self.array(position)
            .ok_or_else(|| crate::Error::general(format!("array {position} was not opened")))
    }

    fn ensure_array(&mut self, position: usize) -> crate::Result<()> {
        self.check_state(
            "open an array",
            &[WriterState::Prepared, WriterState::Writing],
        )?;
        self.check_position(position)?;
        if self.arrays[position].is_some() {
            return Ok(());
        }
        let pixel_type = self
            .pixel_type
            .ok_or_else(|| crate::Error::general("no pixel type prepared"))?;

        let layout = &self.layouts[position];
        let spec = ArraySpec::compile(
            &layout.dims,
            pixel_type,
            layout.location.array.clone(),
            self.options.delete_existing,
        )?
        .with_compression(self.options.compression);

        self.init_root()?;
        let layout = &self.layouts[position];
        if let Some(dir) = &layout.location.group_dir {
            GroupMetadata::multiscale(&layout.dims, ARRAY_PATH).write_to(dir)?;
        }
        let array = self.engine.open_or_create(&spec)?;
        log::debug!(
            "opened array for position {position} at {:?}",
            spec.location
        );
        self.arrays[position] = Some(array);
        self.state = WriterState::Writing;
        Ok(())
    }

    fn init_root(&mut self) -> crate::Result<()> {
        if self.root_initialized {
            return Ok(());
        }
        if let Some(dir) = &self.root_group {
            if self.options.delete_existing && dir.exists() {
                log::warn!("deleting existing data at {}", dir.display());
                std::fs::remove_dir_all(dir)?;
            }
            GroupMetadata::plain().write_to(dir)?;
        }
        self.root_initialized = true;
        Ok(())
    }

    /// Storage index of a frame: one offset per non-spatial dimension, planes in full.
    ///
    /// Axes absent from the event are taken at offset 0.
    fn storage_index(&self, position: usize, index: &AxisIndex) -> crate::Result<Vec<Selection>> {
        let dims = &self.layouts[position].dims;
        if let Some((label, _)) = index
            .iter()
            .find(|&(k, _)| k != axis::POSITION && !dims.iter().any(|d| d.label == k))
        {
            return Err(crate::Error::UnknownAxis {
                axis: label.to_owned(),
            });
        }
        dims.iter()
            .map(|d| {
                if axis::is_planar(&d.label) {
                    return Ok(Selection::Full);
                }
                let i = index.get(&d.label).copied().unwrap_or(0);
                if i >= d.size {
                    return Err(crate::Error::IndexOutOfBounds {
                        axis: d.label.clone(),
                        index: i,
                        size: d.size,
                    });
                }
                Ok(Selection::Index(i))
            })
            .collect()
    }

    /// Dispatch the write of one frame without waiting for it.
    ///
    /// Invalid events are rejected before anything is written; write failures
    /// are only reported by [flush](Self::flush).
    pub fn frame_ready(
        &mut self,
        frame: Bytes,
        event: &FrameEvent,
        metadata: FrameMetadata,
    ) -> crate::Result<()> {
        self.check_state(
            "write a frame",
            &[WriterState::Prepared, WriterState::Writing],
        )?;
        let position = event.position();
        self.check_position(position)?;
        let index = self.storage_index(position, &event.index)?;
        self.ensure_array(position)?;

        let array = self
            .array(position)
            .ok_or_else(|| crate::Error::general(format!("array {position} was not opened")))?;
        let future = array.write(&index, frame);
        log::trace!("dispatched write at position {position} [{index:?}]");
        self.pending.push(PendingWrite {
            position,
            index,
            future,
        });
        self.metadata.push(FrameMetadataEntry {
            position,
            event: event.clone(),
            metadata,
        });
        Ok(())
    }

    /// Wait for every outstanding write, then persist the deferred frame metadata.
    ///
    /// Every write is drained even if some fail; failures are reported together,
    /// and the metadata is then kept in memory rather than persisted.
    /// Failed writes are reported again by every later flush until
    /// [reset](Self::reset) or [abandon](Self::abandon).
    /// The writer is idle with no open array afterwards either way.
    pub fn flush(&mut self) -> crate::Result<()> {
        let pending = std::mem::take(&mut self.pending);
        let n_pending = pending.len();
        let mut futures: FuturesUnordered<_> = pending
            .into_iter()
            .map(|p| async move {
                p.future.await.map_err(|source| WriteFailure {
                    position: p.position,
                    index: p.index,
                    source,
                })
            })
            .collect();
        let drained = futures::executor::block_on(async {
            let mut failures = Vec::new();
            while let Some(result) = futures.next().await {
                if let Err(failure) = result {
                    failures.push(failure);
                }
            }
            failures
        });
        let arrays = std::mem::take(&mut self.arrays);
        if self.state != WriterState::Idle {
            log::debug!("{} -> {}", self.state, WriterState::Idle);
        }
        self.state = WriterState::Idle;

        if !drained.is_empty() {
            log::error!("{} of {n_pending} write(s) failed", drained.len());
        }
        let mut failures: Vec<WriteFailure> =
            self.failed.iter().map(WriteFailure::detached).collect();
        failures.extend(drained);
        if !failures.is_empty() {
            failures.sort_by_key(|f| f.position);
            self.failed = failures.iter().map(WriteFailure::detached).collect();
            return Err(crate::Error::WriteFailures(failures));
        }
        log::info!("drained {n_pending} write(s)");
        self.persist_metadata(&arrays)
    }

    fn persist_metadata(&mut self, arrays: &[Option<E::Array>]) -> crate::Result<()> {
        for (position, array) in arrays.iter().enumerate() {
            let Some(array) = array else {
                continue;
            };
            let entries: Vec<&FrameMetadataEntry> = self
                .metadata
                .iter()
                .filter(|m| m.position == position)
                .collect();
            if entries.is_empty() {
                continue;
            }
            let mut attributes = serde_json::Map::new();
            attributes.insert(
                FRAME_METADATA_KEY.to_owned(),
                serde_json::to_value(&entries)?,
            );
            array.store_attributes(attributes)?;
        }
        self.metadata.clear();
        Ok(())
    }

    fn stale(&self, operation: &str) -> crate::Error {
        let message = format!(
            "cannot {operation} with {} write(s) pending; flush or abandon them first",
            self.pending.len()
        );
        log::error!("{message}");
        crate::Error::StaleState(message)
    }

    /// Return to idle after a flush, discarding the prepared sequence and any
    /// write failures already reported.
    pub fn reset(&mut self) -> crate::Result<()> {
        if !self.pending.is_empty() {
            return Err(self.stale("reset"));
        }
        self.clear();
        Ok(())
    }

    /// Discard all state, including writes still in flight, whose outcome is lost.
    ///
    /// Returns the number of writes abandoned.
    pub fn abandon(&mut self) -> usize {
        let n = self.pending.len();
        if n > 0 {
            log::warn!("abandoning {n} pending write(s)");
        }
        self.pending.clear();
        self.clear();
        n
    }

    fn clear(&mut self) {
        log::debug!("{} -> {}", self.state, WriterState::Idle);
        self.layouts.clear();
        self.arrays.clear();
        self.metadata.clear();
        self.failed.clear();
        self.pixel_type = None;
        self.root_group = None;
        self.root_initialized = false;
        self.state = WriterState::Idle;
    }

    /// Change the shape of an open array and wait for it to take effect.
    pub fn resize(&mut self, position: usize, shape: Vec<u64>) -> crate::Result<()> {
        self.check_state("resize an array", &[WriterState::Writing])?;
        self.check_position(position)?;
        let n_dims = self.layouts[position].dims.len();
        if shape.len() != n_dims {
            return Err(crate::Error::schema(format!(
                "cannot resize {n_dims} dimensions to shape {shape:?}"
            )));
        }
        let array = self
            .array(position)
            .ok_or_else(|| crate::Error::general(format!("array {position} is not open")))?;
        array.resize(shape.clone()).wait()?;
        for (dim, size) in self.layouts[position].dims.iter_mut().zip(shape) {
            dim.size = size;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{plan::Position, storage::zarrs_engine::ZarrsEngine};

    fn writer() -> StreamingWriter<ZarrsEngine> {
        StreamingWriter::new(ZarrsEngine::new(), WriterOptions::default()).unwrap()
    }

    fn image() -> ImageInfo {
        ImageInfo::new((4, 4), PixelType::Uint8)
    }

    #[test]
    fn state_transitions() {
        let mut w = writer();
        assert_eq!(w.state(), WriterState::Idle);
        w.prepare_sequence(&AcquisitionPlan::new([("t", 2)]), &image())
            .unwrap();
        assert_eq!(w.state(), WriterState::Prepared);
        w.new_array(0).unwrap();
        assert_eq!(w.state(), WriterState::Writing);
        w.flush().unwrap();
        assert_eq!(w.state(), WriterState::Idle);
        assert!(w.array(0).is_none());
        w.reset().unwrap();
        assert_eq!(w.num_positions(), 0);
    }

    #[test]
    fn frame_before_prepare_rejected() {
        let mut w = writer();
        let err = w
            .frame_ready(
                Bytes::from_static(&[0; 16]),
                &FrameEvent::default(),
                Default::default(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::InvalidState {
                state: WriterState::Idle,
                ..
            }
        ));
    }

    #[test]
    fn storage_index_checks() {
        let mut w = writer();
        w.prepare_sequence(&AcquisitionPlan::new([("t", 2), ("c", 3)]), &image())
            .unwrap();
        let idx = w
            .storage_index(0, &AxisIndex::from([("c", 2), ("t", 1)]))
            .unwrap();
        assert_eq!(
            idx,
            [
                Selection::Index(1),
                Selection::Index(2),
                Selection::Full,
                Selection::Full
            ]
        );
        assert!(matches!(
            w.storage_index(0, &AxisIndex::from([("z", 0)])),
            Err(crate::Error::UnknownAxis { .. })
        ));
        assert!(matches!(
            w.storage_index(0, &AxisIndex::from([("t", 2)])),
            Err(crate::Error::IndexOutOfBounds { .. })
        ));
    }

    #[test]
    fn fan_out_per_position() {
        let mut w = writer();
        let plan = AcquisitionPlan::new([("t", 2), ("p", 2)]).with_positions([
            Position::default(),
            Position::with_sub_plan(AcquisitionPlan::new([("c", 3)])),
        ]);
        w.prepare_sequence(&plan, &image()).unwrap();
        assert_eq!(w.num_positions(), 2);
        let labels = |p| -> Vec<String> {
            w.dimensions(p)
                .unwrap()
                .iter()
                .map(|d| d.label.clone())
                .collect()
        };
        assert_eq!(labels(0), ["t", "y", "x"]);
        assert_eq!(labels(1), ["t", "c", "y", "x"]);
        assert!(matches!(
            w.new_array(2),
            Err(crate::Error::IndexOutOfBounds { .. })
        ));
    }
}
