//! Cadenza Core - remote-controlled media playback
//!
//! This crate provides the player handle, its state machine and event
//! channel, and the engines a player can drive: an in-memory engine and a
//! symphonia-based decoding engine with pluggable output sinks.

pub mod arbiter;
pub mod channel;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod host;
pub mod player;
mod server;
pub mod source;
pub mod state;

pub use arbiter::{ ArbitrationPolicy, OutputArbiter, PlayerId };
pub use command::{ Command, CommandKind, ParseError, ScriptStep };
pub use config::{ PlayerConfig, VolumeRange };
pub use engine::{ Engine, EngineStatus, Pump, StreamInfo };
pub use error::{ ContractError, EngineError, PlayerError };
pub use event::{ EventKind, EventListener, PlayerEvent, TimeCode };
pub use host::EngineHost;
pub use player::Player;
pub use source::InputSource;
pub use state::PlayerState;
