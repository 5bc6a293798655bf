//! Seams to the systems this crate drives but does not implement: the raw
//! GPS provider, the story generator, audio playback, and key/value storage.
//! Each trait has a small in-process adapter used by the binary and tests.

pub mod location;
pub mod playback;
pub mod store;
pub mod story;

pub use location::{ChannelLocationSource, LocationSource};
pub use playback::{LoggingPlayback, PlaybackEvent, PlaybackSink, PlaybackState};
pub use store::{ConfigStore, MemoryStore};
pub use story::{Story, StoryGenerator, TemplateStoryGenerator};
