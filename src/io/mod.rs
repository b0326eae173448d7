//! Stdio plumbing between callers and the attach stream.
//!
//! - [`demux`] splits the engine's framed output back into stdout and stderr
//! - [`null_reader`] and [`discard`] stand in for streams that were not supplied
//! - [`CaptureBuffer`] collects output for `output` and `combined_output`

mod capture;
mod demux;
mod null;

pub use capture::CaptureBuffer;
pub use demux::{demux, DemuxError, DemuxStats, StreamKind, StreamMode, HEADER_LEN};
pub use null::{discard, null_reader, BoxedReader, BoxedWriter};

/// Default chunk size for copying stream payloads.
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;
