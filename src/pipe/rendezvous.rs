//! The synchronous rendezvous at the heart of a pipe.
//!
//! A writer publishes the slice it was handed and parks until a reader copies
//! some prefix of it directly into the reader's own buffer and reports how
//! many bytes it took. The writer then re-publishes whatever remains, so a
//! single write call may be drained by many reads. Nothing is ever staged in
//! an intermediate buffer; the only copy is writer memory to reader memory.
//!
//! Closing the pipe is a one-shot, one-way transition that wakes every parked
//! caller. There is no other cancellation mechanism.

use parking_lot::{Condvar, Mutex};
use std::slice;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

/// Whether the pipe was still open when an operation completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    Open,
    Closed,
}

/// A published slice awaiting a reader, stored as raw parts.
///
/// Raw parts rather than a borrowed slice, because the slot has to be visible
/// outside the lexical scope of the `write` call that posted it. The posting
/// call parks until the hand-off is either acknowledged or retracted, so the
/// pointer is never observable after the backing slice goes away.
struct Handoff {
    ptr: *const u8,
    len: usize,
}

// The pointer only crosses threads while the posting `write` call keeps the
// backing slice borrowed and is parked waiting for the acknowledgement.
unsafe impl Send for Handoff {}

#[derive(Default)]
struct Slot {
    /// The slice currently offered by a parked writer, if any.
    handoff: Option<Handoff>,

    /// Bytes consumed from the last hand-off, not yet collected by its writer.
    acked: Option<usize>,

    /// Set once by `close` and never cleared.
    closed: bool,
}

/// Shared state behind one reader/writer pair.
pub(crate) struct Core {
    slot: Mutex<Slot>,

    /// Signaled when a hand-off is posted or the pipe closes.
    readable: Condvar,

    /// Signaled when a hand-off is acknowledged or the pipe closes.
    acked: Condvar,

    /// Held for the full duration of one `write` call, so two writers never
    /// interleave bytes from their buffers.
    write_serial: Mutex<()>,

    /// Number of live writer handles sharing this core.
    writers: AtomicUsize,
}

impl Core {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            readable: Condvar::new(),
            acked: Condvar::new(),
            write_serial: Mutex::new(()),
            writers: AtomicUsize::new(1),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.slot.lock().closed
    }

    /// Block until a writer offers bytes or the pipe closes.
    ///
    /// Copies at most `buf.len()` bytes out of the pending hand-off and
    /// acknowledges exactly that count. Returns `(0, Closed)` once the pipe
    /// is closed and no hand-off is pending.
    pub(crate) fn read(&self, buf: &mut [u8]) -> (usize, Status) {
        let mut slot = self.slot.lock();

        loop {
            if let Some(pending) = slot.handoff.take() {
                // Safety: the writer that posted `pending` is parked inside
                // `write` until `acked` is set below, so the backing slice is
                // still borrowed and live.
                let src = unsafe { slice::from_raw_parts(pending.ptr, pending.len) };
                let n = buf.len().min(src.len());
                buf[..n].copy_from_slice(&src[..n]);

                slot.acked = Some(n);
                self.acked.notify_one();
                trace!(consumed = n, offered = src.len(), "hand-off consumed");
                return (n, Status::Open);
            }

            if slot.closed {
                return (0, Status::Closed);
            }

            self.readable.wait(&mut slot);
        }
    }

    /// Hand `buf` to one or more readers, blocking until every byte has been
    /// consumed or the pipe closes.
    ///
    /// Performs at least one rendezvous even for an empty buffer, so an empty
    /// write still blocks until a reader arrives or the pipe closes.
    pub(crate) fn write(&self, buf: &[u8]) -> (usize, Status) {
        if self.is_closed() {
            return (0, Status::Closed);
        }

        // Serializes whole calls, not individual hand-offs.
        let _serial = self.write_serial.lock();

        let mut remaining = buf;
        let mut written = 0;
        let mut first = true;

        while first || !remaining.is_empty() {
            first = false;

            let mut slot = self.slot.lock();
            if slot.closed {
                return (written, Status::Closed);
            }

            slot.handoff = Some(Handoff {
                ptr: remaining.as_ptr(),
                len: remaining.len(),
            });
            self.readable.notify_one();

            while slot.acked.is_none() && !slot.closed {
                self.acked.wait(&mut slot);
            }

            match slot.acked.take() {
                Some(n) => {
                    remaining = &remaining[n..];
                    written += n;
                }
                None => {
                    // Closed before any reader claimed the hand-off. Retract
                    // it so the posted pointer cannot outlive this call.
                    slot.handoff = None;
                    return (written, Status::Closed);
                }
            }
        }

        (written, Status::Open)
    }

    /// Fire the one-shot close signal, waking every parked reader and writer.
    ///
    /// Only the first call flips the state; later calls are no-ops, including
    /// concurrent ones. The flag is guarded by the slot lock, so the signal
    /// fires exactly once.
    pub(crate) fn close(&self) {
        let mut slot = self.slot.lock();
        if !slot.closed {
            slot.closed = true;
            trace!("pipe closed");
            self.readable.notify_all();
            self.acked.notify_all();
        }
    }

    /// Register one more writer handle sharing this core.
    pub(crate) fn writer_opened(&self) {
        self.writers.fetch_add(1, Ordering::Relaxed);
    }

    /// Unregister a writer handle, closing the pipe when the last one goes.
    pub(crate) fn writer_dropped(&self) {
        if self.writers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn chunked_reads_drain_one_write() {
        let core = Arc::new(Core::new());

        let writer = {
            let core = core.clone();
            thread::spawn(move || core.write(b"HELLO"))
        };

        let mut buf = [0; 2];
        assert_eq!(core.read(&mut buf), (2, Status::Open));
        assert_eq!(&buf, b"HE");
        assert_eq!(core.read(&mut buf), (2, Status::Open));
        assert_eq!(&buf, b"LL");
        assert_eq!(core.read(&mut buf), (1, Status::Open));
        assert_eq!(buf[0], b'O');

        assert_eq!(writer.join().unwrap(), (5, Status::Open));
    }

    #[test]
    fn read_after_close_returns_immediately() {
        let core = Core::new();
        core.close();

        let mut buf = [0; 8];
        assert_eq!(core.read(&mut buf), (0, Status::Closed));
    }

    #[test]
    fn write_after_close_returns_immediately() {
        let core = Core::new();
        core.close();

        assert_eq!(core.write(b"hi"), (0, Status::Closed));
    }

    #[test]
    fn close_is_idempotent_under_contention() {
        let core = Arc::new(Core::new());

        let closers: Vec<_> = (0..8)
            .map(|_| {
                let core = core.clone();
                thread::spawn(move || core.close())
            })
            .collect();

        for closer in closers {
            closer.join().unwrap();
        }

        assert!(core.is_closed());
    }

    #[test]
    fn close_unblocks_a_parked_reader() {
        let core = Arc::new(Core::new());

        let reader = {
            let core = core.clone();
            thread::spawn(move || {
                let mut buf = [0; 4];
                core.read(&mut buf)
            })
        };

        thread::sleep(Duration::from_millis(50));
        core.close();

        assert_eq!(reader.join().unwrap(), (0, Status::Closed));
    }

    #[test]
    fn close_unblocks_a_parked_writer() {
        let core = Arc::new(Core::new());

        let writer = {
            let core = core.clone();
            thread::spawn(move || core.write(b"stranded"))
        };

        thread::sleep(Duration::from_millis(50));
        core.close();

        assert_eq!(writer.join().unwrap(), (0, Status::Closed));
    }

    #[test]
    fn close_mid_transfer_reports_partial_count() {
        let core = Arc::new(Core::new());

        let writer = {
            let core = core.clone();
            thread::spawn(move || core.write(b"HELLO"))
        };

        let mut buf = [0; 2];
        assert_eq!(core.read(&mut buf), (2, Status::Open));
        core.close();

        assert_eq!(writer.join().unwrap(), (2, Status::Closed));
    }

    #[test]
    fn empty_write_still_performs_one_rendezvous() {
        let core = Arc::new(Core::new());

        let writer = {
            let core = core.clone();
            thread::spawn(move || core.write(b""))
        };

        let mut buf = [0; 4];
        assert_eq!(core.read(&mut buf), (0, Status::Open));
        assert_eq!(writer.join().unwrap(), (0, Status::Open));
    }
}
