//! Synchronous in-memory byte pipes aimed at producer-consumer problems.
//!
//! Pipes are like byte-oriented channels that implement I/O traits for reading
//! and writing, except that a pipe holds no buffer of its own: a write does
//! not return until a reader has taken every byte straight out of the
//! writer's slice. The writer therefore runs exactly as fast as the reader
//! drains it.

use std::io;
use std::sync::Arc;

mod rendezvous;

use rendezvous::{Core, Status};

/// The pipe has been closed and no further bytes will ever be transferred.
///
/// Readers observe closure as a read of zero bytes, per the [`io::Read`]
/// contract. Writers receive this inside an [`io::Error`] of kind
/// [`io::ErrorKind::BrokenPipe`]; there is no separate "broken pipe" versus
/// "normal close" distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("end of stream")]
pub struct EndOfStream;

/// Creates a new synchronous pipe, returning its reader and writer halves.
///
/// The pipe starts open and stays open until [`PipeWriter::close`] is called
/// or one side is dropped. Construction cannot fail.
///
/// Both halves must live on separate threads to make progress, since every
/// transfer is a rendezvous between one blocked writer and one reader.
pub fn pipe() -> (PipeReader, PipeWriter) {
    let core = Arc::new(Core::new());

    (
        PipeReader {
            core: core.clone(),
        },
        PipeWriter {
            core,
        },
    )
}

/// The reading end of a synchronous pipe.
///
/// There is exactly one reader per pipe. Dropping it closes the pipe, which
/// unblocks and fails any writer still holding undelivered bytes.
pub struct PipeReader {
    core: Arc<Core>,
}

impl io::Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        // Zero-length writes complete a rendezvous without producing bytes.
        // Skip them so that `Ok(0)` keeps its end-of-stream meaning.
        loop {
            match self.core.read(buf) {
                (0, Status::Open) => continue,
                (n, _) => return Ok(n),
            }
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.core.close();
    }
}

/// The writing end of a synchronous pipe.
///
/// Writers may be cloned to share one pipe between several producer threads.
/// Each write call transfers its whole buffer as one contiguous unit; bytes
/// from two concurrent writers are never interleaved. The pipe closes when
/// [`close`](Self::close) is called or the last writer is dropped.
pub struct PipeWriter {
    core: Arc<Core>,
}

impl PipeWriter {
    /// Close the pipe, waking every blocked reader and writer.
    ///
    /// Idempotent: safe to call any number of times, from any number of
    /// threads. Only the first call has any effect.
    pub fn close(&self) {
        self.core.close();
    }

    /// Check whether the pipe has been closed.
    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

impl io::Write for PipeWriter {
    /// Hand the whole of `buf` to the reader, blocking until every byte has
    /// been consumed or the pipe closes.
    ///
    /// On success the returned count always equals `buf.len()`. If the pipe
    /// closes mid-transfer the bytes consumed so far are reported as a short
    /// write; a write that transfers nothing on a closed pipe returns a
    /// [`io::ErrorKind::BrokenPipe`] error carrying [`EndOfStream`].
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.core.write(buf) {
            (n, Status::Open) => Ok(n),
            (0, Status::Closed) => Err(io::Error::new(io::ErrorKind::BrokenPipe, EndOfStream)),
            (n, Status::Closed) => Ok(n),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        // Nothing is ever buffered.
        Ok(())
    }
}

impl Clone for PipeWriter {
    fn clone(&self) -> Self {
        self.core.writer_opened();
        Self {
            core: self.core.clone(),
        }
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.core.writer_dropped();
    }
}
