// dbvault/src/pipe.rs
//! In-process pipe between a producer task and an `AsyncRead` consumer.
//!
//! Chunks travel over a bounded channel, so memory stays at `capacity`
//! chunks no matter how large the stream is. A producer failure is handed to
//! the consumer as a read error; a consumer that goes away makes the
//! producer's next send fail with `BrokenPipe`.

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::io;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::io::StreamReader;

pub type PipeReader = StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>;

pub struct PipeWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

impl PipeWriter {
    /// Waits for room in the channel. Fails with `BrokenPipe` once the reader is gone.
    pub async fn send(&self, chunk: Bytes) -> io::Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx
            .send(Ok(chunk))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader was dropped"))
    }

    /// Delivers `err` to the reader and closes the pipe.
    pub async fn fail(self, err: io::Error) {
        // Nothing to do if the reader already left.
        let _ = self.tx.send(Err(err)).await;
    }
}

/// Creates a pipe holding at most `capacity` chunks in flight.
pub fn bounded(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed();
    (PipeWriter { tx }, StreamReader::new(stream))
}

/// Aborts the wrapped task when dropped, so an abandoned operation never
/// leaves a pump running.
pub struct TaskGuard<T> {
    handle: Option<JoinHandle<T>>,
}

impl<T> TaskGuard<T> {
    pub fn spawn<F>(future: F) -> Self
    where
        F: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Self {
            handle: Some(tokio::spawn(future)),
        }
    }

    /// Waits for the task. A panicked or aborted task surfaces as an I/O error.
    pub async fn join(mut self) -> io::Result<T> {
        match self.handle.take() {
            Some(handle) => handle
                .await
                .map_err(|e| io::Error::other(format!("pump task did not finish: {}", e))),
            None => Err(io::Error::other("pump task already joined")),
        }
    }
}

impl<T> Drop for TaskGuard<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
