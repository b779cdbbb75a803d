pub mod cache;
pub mod config;
pub mod decode;
pub mod job;
pub mod logging;
pub mod retry;
pub mod scheduler;
pub mod transport;
pub mod upload;
pub mod write;

pub use cache::{ImageCache, TieredCache};
pub use config::FetchConfig;
pub use decode::{DecodedImage, Dims};
pub use job::{ChannelCompletion, Completion, FailureReason, FetchJob, FetchOutcome};
pub use scheduler::{Consumer, Dispatch, Scheduler, SkipReason, Slot};
pub use transport::{CurlTransport, Transport};
