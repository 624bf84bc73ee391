#![allow(dead_code)]

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use zarrs_mda::{
    plan::{FrameMetadata, PixelType},
    spec::ArraySpec,
    storage::{
        ArrayHandle, Selection, StorageEngine, WriteCompleter, WriteFuture, completion_channel,
    },
};

pub fn init_logging() {
    env_logger::try_init().ok();
}

/// Everything a [MockEngine] and its arrays have been asked to do.
#[derive(Debug, Default)]
pub struct Record {
    pub opened: Vec<ArraySpec>,
    pub writes: Vec<(usize, Vec<Selection>, Bytes)>,
    pub completers: Vec<WriteCompleter>,
    pub resizes: Vec<Vec<u64>>,
    pub attributes: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// Engine whose writes only complete when the test says so.
#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    pub record: Arc<Mutex<Record>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_completers(&self) -> Vec<WriteCompleter> {
        std::mem::take(&mut self.record.lock().completers)
    }

    pub fn n_opened(&self) -> usize {
        self.record.lock().opened.len()
    }
}

#[derive(Debug)]
pub struct MockArray {
    id: usize,
    shape: Mutex<Vec<u64>>,
    record: Arc<Mutex<Record>>,
}

impl StorageEngine for MockEngine {
    type Array = MockArray;

    fn open_or_create(&self, spec: &ArraySpec) -> zarrs_mda::Result<MockArray> {
        let mut record = self.record.lock();
        record.opened.push(spec.clone());
        Ok(MockArray {
            id: record.opened.len() - 1,
            shape: Mutex::new(spec.shape.clone()),
            record: Arc::clone(&self.record),
        })
    }
}

impl ArrayHandle for MockArray {
    fn shape(&self) -> Vec<u64> {
        self.shape.lock().clone()
    }

    fn write(&self, index: &[Selection], frame: Bytes) -> WriteFuture {
        let (completer, future) = completion_channel();
        let mut record = self.record.lock();
        record.writes.push((self.id, index.to_vec(), frame));
        record.completers.push(completer);
        future
    }

    fn resize(&self, shape: Vec<u64>) -> WriteFuture {
        self.record.lock().resizes.push(shape.clone());
        *self.shape.lock() = shape;
        WriteFuture::ready(Ok(()))
    }

    fn store_attributes(
        &self,
        attributes: serde_json::Map<String, serde_json::Value>,
    ) -> zarrs_mda::Result<()> {
        self.record.lock().attributes.push(attributes);
        Ok(())
    }
}

/// A frame of `n_pixels` pixels, all set to `value`.
pub fn frame(n_pixels: usize, pixel_type: PixelType, value: u8) -> Bytes {
    vec![value; n_pixels * pixel_type.size_of()].into()
}

pub fn meta(n: u64) -> FrameMetadata {
    let mut m = FrameMetadata::new();
    m.insert("n".to_owned(), n.into());
    m
}
