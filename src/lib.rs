//! Zero-capacity synchronous pipes for moving bytes between threads.
//!
//! A pipe is a byte-oriented rendezvous channel: every write blocks until a
//! reader has copied the bytes straight out of the writer's slice into its own
//! buffer, so the pipe itself never buffers anything. This gives you exact
//! backpressure for free, at the cost of requiring the two ends to run on
//! separate threads.
//!
//! The two halves implement [`std::io::Read`] and [`std::io::Write`], so a
//! pipe drops into anything that already speaks the standard I/O traits,
//! including [`std::io::copy`].
//!
//! ```
//! use std::io::{Read, Write};
//! use std::thread;
//!
//! let (mut reader, mut writer) = weir::pipe();
//!
//! let producer = thread::spawn(move || {
//!     writer.write_all(b"hello world").unwrap();
//! });
//!
//! let mut message = String::new();
//! reader.read_to_string(&mut message).unwrap();
//! assert_eq!(message, "hello world");
//!
//! producer.join().unwrap();
//! ```

pub mod pipe;

pub use pipe::{pipe, EndOfStream, PipeReader, PipeWriter};
