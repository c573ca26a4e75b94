pub mod auth;
pub mod config;
pub mod core;
pub mod errors;

// Re-export commonly used items for convenience
pub use config::{AudioFormat, ClientConfig};
pub use core::audio::{AudioSink, AudioSource, DeviceSink, DeviceSource, FileSink, FileSource};
pub use core::conversation::{
    BatchDriver, ConversationEvent, ConversationLoop, ConversationStream, Driver,
    GrpcConversation, InteractiveDriver, StreamError, Turn, TurnFactory, TurnSummary,
};
pub use core::progress::{LogReporter, ProgressObserver, ProgressReporter};
pub use errors::{ClientError, ClientResult};
