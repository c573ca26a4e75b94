pub mod audio;
pub mod conversation;
pub mod progress;
