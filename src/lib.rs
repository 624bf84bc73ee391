//! Stream multi-dimensional microscope acquisitions into OME-Zarr (OME-NGFF 0.5) stores.
//!
//! An [AcquisitionPlan](plan::AcquisitionPlan) is resolved into per-position
//! axis sizes ([sizes]), turned into an ordered OME-NGFF dimension list
//! ([dimension]), compiled into an engine-agnostic [ArraySpec](spec::ArraySpec)
//! and written frame by frame by a [StreamingWriter](writer::StreamingWriter)
//! through any [StorageEngine](storage::StorageEngine).
pub mod axis;
pub mod dimension;
mod error;
pub mod metadata;
pub mod options;
pub mod plan;
pub mod sizes;
pub mod spec;
pub mod storage;
pub mod writer;

pub use zarrs;

pub use error::{Error, Result, WriteFailure};
