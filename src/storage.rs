//! The seam between the writer and whatever persists array data.
//!
//! Writes are dispatched without blocking and complete through a [WriteFuture],
//! which the writer collects and drains at flush.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::{FutureExt, channel::oneshot};

use crate::spec::ArraySpec;

pub mod zarrs_engine;

/// Selection along one axis of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selection {
    /// A single offset.
    Index(u64),
    /// The whole extent of the axis.
    Full,
}

impl Selection {
    /// Range of offsets covered in an axis of the given size.
    pub fn range(self, axis_size: u64) -> std::ops::Range<u64> {
        match self {
            Selection::Index(i) => i..i + 1,
            Selection::Full => 0..axis_size,
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Index(i) => write!(f, "{i}"),
            Selection::Full => f.write_str(":"),
        }
    }
}

/// Completion of one asynchronous write or resize.
#[must_use = "a write's outcome is only observed through its future"]
pub struct WriteFuture {
    inner: Inner,
}

enum Inner {
    Ready(Option<crate::Result<()>>),
    Pending(oneshot::Receiver<crate::Result<()>>),
}

impl WriteFuture {
    /// An already-completed write.
    pub fn ready(result: crate::Result<()>) -> Self {
        Self {
            inner: Inner::Ready(Some(result)),
        }
    }

    /// Block the current thread until the write completes.
    pub fn wait(self) -> crate::Result<()> {
        futures::executor::block_on(self)
    }
}

impl fmt::Debug for WriteFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.inner {
            Inner::Ready(Some(_)) => "ready",
            Inner::Ready(None) => "consumed",
            Inner::Pending(_) => "pending",
        };
        f.debug_struct("WriteFuture")
            .field("state", &state)
            .finish()
    }
}

impl Future for WriteFuture {
    type Output = crate::Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.inner {
            Inner::Ready(result) => Poll::Ready(result.take().unwrap_or_else(|| {
                Err(crate::Error::general(
                    "write future polled after completion",
                ))
            })),
            Inner::Pending(recv) => recv.poll_unpin(cx).map(|r| {
                r.unwrap_or_else(|canceled| {
                    Err(crate::Error::general(format!(
                        "write abandoned before completion: {canceled}"
                    )))
                })
            }),
        }
    }
}

/// Sending half of a [WriteFuture], held by whoever performs the write.
#[derive(Debug)]
pub struct WriteCompleter {
    send: oneshot::Sender<crate::Result<()>>,
}

impl WriteCompleter {
    pub fn complete(self, result: crate::Result<()>) {
        if self.send.send(result).is_err() {
            log::debug!("write completed after its future was dropped");
        }
    }
}

/// A linked completer and future.
pub fn completion_channel() -> (WriteCompleter, WriteFuture) {
    let (send, recv) = oneshot::channel();
    (
        WriteCompleter { send },
        WriteFuture {
            inner: Inner::Pending(recv),
        },
    )
}

/// An open array.
pub trait ArrayHandle {
    fn shape(&self) -> Vec<u64>;

    /// Dispatch a write of `frame` at `index`, one selection per dimension.
    ///
    /// Must return without waiting for the write; invalid requests may be reported
    /// through an already-completed future.
    fn write(&self, index: &[Selection], frame: Bytes) -> WriteFuture;

    /// Change the shape of the array, keeping existing data in place.
    fn resize(&self, shape: Vec<u64>) -> WriteFuture;

    /// Merge `attributes` into the array's user attributes and persist them.
    fn store_attributes(
        &self,
        attributes: serde_json::Map<String, serde_json::Value>,
    ) -> crate::Result<()>;
}

/// Opens arrays described by an [ArraySpec].
pub trait StorageEngine {
    type Array: ArrayHandle;

    fn open_or_create(&self, spec: &ArraySpec) -> crate::Result<Self::Array>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_across_threads() {
        let (completer, fut) = completion_channel();
        let handle = std::thread::spawn(move || completer.complete(Ok(())));
        fut.wait().unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn dropped_completer_is_an_error() {
        let (completer, fut) = completion_channel();
        drop(completer);
        assert!(fut.wait().is_err());
    }

    #[test]
    fn ready_future() {
        assert!(WriteFuture::ready(Ok(())).wait().is_ok());
        assert!(
            WriteFuture::ready(Err(crate::Error::general("nope")))
                .wait()
                .is_err()
        );
    }

    #[test]
    fn selection_display() {
        let sel = [Selection::Index(3), Selection::Full];
        let s: Vec<String> = sel.iter().map(ToString::to_string).collect();
        assert_eq!(s, ["3", ":"]);
        assert_eq!(Selection::Full.range(5), 0..5);
        assert_eq!(Selection::Index(2).range(5), 2..3);
    }
}
