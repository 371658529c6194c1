//! Moving encrypted bytes between the local disk and pre-signed object URLs.

pub mod counter;
pub mod download;
pub mod progress;
pub mod progress_stream;
pub mod upload;

pub use counter::{CountingReader, CountingWriter, TransferCounter};
pub use download::DownloadManager;
pub use progress::{format_bytes, Direction, ProgressReporter, TransferOutcome};
pub use upload::{ChunkPlan, MultipartUpload, SingleUpload, UploadMode, UploadSource, Uploader};
