//! The engine boundary.
//!
//! A player never decodes anything itself. It drives an [`Engine`] from its
//! server thread: opening inputs, starting and pausing, and pumping one unit
//! of work at a time while playing.

use std::time::Duration;

use serde::Serialize;

use crate::error::EngineError;
use crate::source::InputSource;

pub mod decode;
#[cfg( feature = "device" )]
pub mod device;
pub mod memory;
pub mod sink;

pub use decode::DecodeEngine;
#[cfg( feature = "device" )]
pub use device::DeviceSink;
pub use memory::{ MemoryControl, MemoryEngine };
pub use sink::{ NullSink, OutputSink };


/// What the engine learned about an input when opening it.
#[derive( Debug, Clone, PartialEq, Default, Serialize )]
pub struct StreamInfo {
    pub media_type: Option<String>,
    pub codec: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
    pub duration: Option<Duration>,
}


/// Where the engine is in the current input.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub struct EngineStatus {
    /// Media time of the last rendered unit.
    pub timestamp: Duration,
    /// Byte or frame offset into the input, in units of `range`.
    pub offset: u64,
    /// Total size of the input in the same units. Zero if unknown.
    pub range: u64,
}


/// Result of one [`Engine::pump`] call.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum Pump {
    /// Some media was rendered.
    Advanced,
    /// The output cannot take more right now; try again shortly.
    Backpressure,
    /// Waiting for input data, filled to `percent`.
    Buffering { percent: u8 },
    /// The input has no more media.
    EndOfStream,
}


/// The player's view of a media engine.
///
/// Calls are made from one thread only, in command order. Implementations
/// should not block for long in any call; `pump` in particular is called in a
/// loop between command checks.
pub trait Engine: Send + 'static {
    /// Opens an input, replacing any previous one.
    fn open( &mut self, source: &InputSource ) -> Result<StreamInfo, EngineError>;

    /// Starts or resumes rendering.
    fn start( &mut self ) -> Result<(), EngineError>;

    /// Suspends rendering, keeping the position.
    fn pause( &mut self ) -> Result<(), EngineError>;

    /// Suspends rendering and rewinds to the start.
    fn stop( &mut self ) -> Result<(), EngineError>;

    /// Applies a normalized, already clamped volume.
    fn set_volume( &mut self, level: f32 ) -> Result<(), EngineError>;

    fn seek_to_time( &mut self, time: Duration ) -> Result<(), EngineError>;

    /// Seeks to `offset / range` of the input.
    fn seek_to_position( &mut self, offset: u64, range: u64 ) -> Result<(), EngineError>;

    /// Performs one unit of work while playing.
    fn pump( &mut self ) -> Result<Pump, EngineError>;

    fn status( &self ) -> EngineStatus;

    /// Releases every resource. The engine is not used afterwards.
    fn dispose( &mut self );
}


impl<E: Engine + ?Sized> Engine for Box<E> {
    fn open( &mut self, source: &InputSource ) -> Result<StreamInfo, EngineError> {
        ( **self ).open( source )
    }

    fn start( &mut self ) -> Result<(), EngineError> {
        ( **self ).start()
    }

    fn pause( &mut self ) -> Result<(), EngineError> {
        ( **self ).pause()
    }

    fn stop( &mut self ) -> Result<(), EngineError> {
        ( **self ).stop()
    }

    fn set_volume( &mut self, level: f32 ) -> Result<(), EngineError> {
        ( **self ).set_volume( level )
    }

    fn seek_to_time( &mut self, time: Duration ) -> Result<(), EngineError> {
        ( **self ).seek_to_time( time )
    }

    fn seek_to_position( &mut self, offset: u64, range: u64 ) -> Result<(), EngineError> {
        ( **self ).seek_to_position( offset, range )
    }

    fn pump( &mut self ) -> Result<Pump, EngineError> {
        ( **self ).pump()
    }

    fn status( &self ) -> EngineStatus {
        ( **self ).status()
    }

    fn dispose( &mut self ) {
        ( **self ).dispose()
    }
}
