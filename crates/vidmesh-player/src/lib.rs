//! Streaming media assembly engine for the vidmesh client.
//!
//! Turns the mesh client's push channels (media chunks, catalog snapshots,
//! connectivity tokens) into a correctly-ordered, memory-bounded byte stream
//! feeding a single-writer playback sink, plus a merged catalog view for the
//! rendering layer.  See `engine::Engine` for the wiring.

pub mod catalog;
pub mod consumer;
pub mod engine;
pub mod gateway;
pub mod scheduler;
pub mod session;
pub mod sink;
pub mod subscription;

pub use engine::{Engine, EngineCommand, EngineEvent, EngineUpdate, PlaybackStatus};
pub use gateway::{Gateway, HttpGateway};
pub use scheduler::RetentionPolicy;
pub use sink::{MediaSink, SinkFactory};
