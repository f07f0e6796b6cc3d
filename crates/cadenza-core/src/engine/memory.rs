//! In-memory engine.
//!
//! Plays virtual clips of silence from a catalog of locations. Used for dry
//! runs and for driving players deterministically: a [`MemoryControl`] can
//! script what the next pumps return and records every call the player makes.

use std::collections::{ HashMap, VecDeque };
use std::sync::{ Arc, Mutex, MutexGuard };
use std::time::{ Duration, Instant };

use crate::engine::{ Engine, EngineStatus, Pump, StreamInfo };
use crate::error::EngineError;
use crate::source::InputSource;


/// A virtual input.
#[derive( Debug, Clone, PartialEq )]
pub struct MemoryClip {
    pub duration: Duration,
    /// Media time rendered per pump.
    pub packet: Duration,
    /// If set, inputs hinting a different type are unsupported.
    pub media_type: Option<String>,
}


impl MemoryClip {
    pub fn new( duration: Duration ) -> Self {
        Self { duration, packet: Duration::from_millis( 20 ), media_type: None }
    }


    pub fn with_media_type( mut self, media_type: impl Into<String> ) -> Self {
        self.media_type = Some( media_type.into() );
        self
    }
}


/// How the clock advances while playing.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum Pacing {
    /// Media time follows wall-clock time.
    #[default]
    Realtime,
    /// Media time only advances by [`MemoryControl::advance`] or scripted pumps.
    Manual,
}


/// A call the player made into the engine.
#[derive( Debug, Clone, PartialEq )]
pub enum EngineCall {
    Open( String ),
    Start,
    Pause,
    Stop,
    SetVolume( f32 ),
    SeekToTime( Duration ),
    SeekToPosition( u64, u64 ),
    Dispose,
}


#[derive( Debug, Default )]
struct Shared {
    clips: HashMap<String, MemoryClip>,
    fallback: Option<MemoryClip>,
    script: VecDeque<Result<Pump, String>>,
    credits: u64,
    calls: Vec<EngineCall>,
}


/// Test and scripting handle onto a [`MemoryEngine`].
#[derive( Debug, Clone, Default )]
pub struct MemoryControl {
    shared: Arc<Mutex<Shared>>,
}


impl MemoryControl {
    /// Makes `location` resolvable.
    pub fn add_clip( &self, location: impl Into<String>, clip: MemoryClip ) {
        self.lock().clips.insert( location.into(), clip );
    }


    /// Queues the outcome of a future pump.
    pub fn push_pump( &self, pump: Pump ) {
        self.lock().script.push_back( Ok( pump ) );
    }


    /// Makes a future pump fail with a decode error.
    pub fn push_failure( &self, reason: impl Into<String> ) {
        self.lock().script.push_back( Err( reason.into() ) );
    }


    /// Lets a manually paced engine render `packets` more packets.
    pub fn advance( &self, packets: u64 ) {
        self.lock().credits += packets;
    }


    /// Every call made so far, in order.
    pub fn calls( &self ) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }


    pub fn count( &self, call: &EngineCall ) -> usize {
        self.lock().calls.iter().filter( |c| *c == call ).count()
    }


    fn lock( &self ) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else( |poisoned| poisoned.into_inner() )
    }
}


/// An engine that renders nothing, on a virtual clock.
pub struct MemoryEngine {
    control: MemoryControl,
    pacing: Pacing,
    clip: Option<MemoryClip>,
    position: Duration,
    /// Wall-clock instant matching `position` while playing in real time.
    clock: Option<( Instant, Duration )>,
    volume: f32,
    disposed: bool,
}


impl MemoryEngine {
    pub fn new( pacing: Pacing ) -> Self {
        Self {
            control: MemoryControl::default(),
            pacing,
            clip: None,
            position: Duration::ZERO,
            clock: None,
            volume: 1.0,
            disposed: false,
        }
    }


    /// Resolves every location not in the catalog to `clip`.
    pub fn with_fallback( self, clip: MemoryClip ) -> Self {
        self.control.lock().fallback = Some( clip );
        self
    }


    pub fn with_clip( self, location: impl Into<String>, clip: MemoryClip ) -> Self {
        self.control.add_clip( location, clip );
        self
    }


    pub fn control( &self ) -> MemoryControl {
        self.control.clone()
    }


    pub fn volume( &self ) -> f32 {
        self.volume
    }


    fn record( &self, call: EngineCall ) {
        self.control.lock().calls.push( call );
    }


    fn clip( &self ) -> Result<&MemoryClip, EngineError> {
        self.clip.as_ref().ok_or( EngineError::NotOpen )
    }


    fn step( &mut self ) -> Result<Pump, EngineError> {
        let ( packet, duration ) = {
            let clip = self.clip()?;
            ( clip.packet, clip.duration )
        };
        if self.position >= duration {
            return Ok( Pump::EndOfStream );
        }
        self.position = ( self.position + packet ).min( duration );
        Ok( Pump::Advanced )
    }
}


impl Engine for MemoryEngine {
    fn open( &mut self, source: &InputSource ) -> Result<StreamInfo, EngineError> {
        self.record( EngineCall::Open( source.location().to_string() ) );

        let clip = {
            let shared = self.control.lock();
            shared.clips.get( source.location() ).or( shared.fallback.as_ref() ).cloned()
        };
        let clip = clip.ok_or_else( || EngineError::NotFound( source.location().to_string() ) )?;

        if let ( Some( expected ), Some( hint ) ) = ( clip.media_type.as_deref(), source.media_type() ) {
            if expected != hint {
                return Err( EngineError::UnsupportedFormat( hint.to_string() ) );
            }
        }

        let info = StreamInfo {
            media_type: clip.media_type.clone().or_else( || source.inferred_media_type().map( str::to_string ) ),
            codec: Some( "pcm_silence".into() ),
            sample_rate: Some( 48_000 ),
            channels: Some( 2 ),
            duration: Some( clip.duration ),
        };
        self.clip = Some( clip );
        self.position = Duration::ZERO;
        self.clock = None;
        Ok( info )
    }


    fn start( &mut self ) -> Result<(), EngineError> {
        self.record( EngineCall::Start );
        self.clip()?;
        self.clock = Some(( Instant::now(), self.position ));
        Ok(())
    }


    fn pause( &mut self ) -> Result<(), EngineError> {
        self.record( EngineCall::Pause );
        self.clock = None;
        Ok(())
    }


    fn stop( &mut self ) -> Result<(), EngineError> {
        self.record( EngineCall::Stop );
        self.clock = None;
        self.position = Duration::ZERO;
        Ok(())
    }


    fn set_volume( &mut self, level: f32 ) -> Result<(), EngineError> {
        self.record( EngineCall::SetVolume( level ) );
        self.volume = level;
        Ok(())
    }


    fn seek_to_time( &mut self, time: Duration ) -> Result<(), EngineError> {
        self.record( EngineCall::SeekToTime( time ) );
        let duration = self.clip()?.duration;
        self.position = time.min( duration );
        if self.clock.is_some() {
            self.clock = Some(( Instant::now(), self.position ));
        }
        Ok(())
    }


    fn seek_to_position( &mut self, offset: u64, range: u64 ) -> Result<(), EngineError> {
        self.record( EngineCall::SeekToPosition( offset, range ) );
        let duration = self.clip()?.duration;
        let fraction = offset as f64 / range.max( 1 ) as f64;
        self.position = duration.mul_f64( fraction.clamp( 0.0, 1.0 ) );
        if self.clock.is_some() {
            self.clock = Some(( Instant::now(), self.position ));
        }
        Ok(())
    }


    fn pump( &mut self ) -> Result<Pump, EngineError> {
        self.clip()?;

        let scripted = self.control.lock().script.pop_front();
        match scripted {
            Some( Ok( Pump::Advanced ) ) => return self.step(),
            Some( Ok( Pump::EndOfStream ) ) => {
                self.position = self.clip()?.duration;
                return Ok( Pump::EndOfStream );
            }
            Some( Ok( other ) ) => return Ok( other ),
            Some( Err( reason ) ) => return Err( EngineError::Decode( reason ) ),
            None => {}
        }

        match self.pacing {
            Pacing::Manual => {
                let mut shared = self.control.lock();
                if shared.credits == 0 {
                    return Ok( Pump::Backpressure );
                }
                shared.credits -= 1;
                drop( shared );
                self.step()
            }
            Pacing::Realtime => {
                let ( origin, base ) = match self.clock {
                    Some( clock ) => clock,
                    None => return Ok( Pump::Backpressure ),
                };
                if self.position >= self.clip()?.duration {
                    return Ok( Pump::EndOfStream );
                }
                if base + origin.elapsed() < self.position {
                    return Ok( Pump::Backpressure );
                }
                self.step()
            }
        }
    }


    fn status( &self ) -> EngineStatus {
        let range = self.clip.as_ref().map( |c| c.duration.as_millis() as u64 ).unwrap_or( 0 );
        EngineStatus {
            timestamp: self.position,
            offset: self.position.as_millis() as u64,
            range,
        }
    }


    fn dispose( &mut self ) {
        if self.disposed {
            return;
        }
        self.record( EngineCall::Dispose );
        self.disposed = true;
        self.clip = None;
        self.clock = None;
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn engine() -> ( MemoryEngine, MemoryControl ) {
        let engine = MemoryEngine::new( Pacing::Manual )
            .with_clip( "a.mp4", MemoryClip::new( Duration::from_millis( 60 ) ) );
        let control = engine.control();
        ( engine, control )
    }


    #[test]
    fn test_unknown_location_is_not_found() {
        let ( mut engine, _ ) = engine();
        let err = engine.open( &InputSource::new( "missing.mp4" ).unwrap() ).unwrap_err();
        assert!( err.is_resolution() );
    }


    #[test]
    fn test_mismatched_hint_is_unsupported() {
        let mut engine = MemoryEngine::new( Pacing::Manual )
            .with_clip( "a", MemoryClip::new( Duration::from_secs( 1 ) ).with_media_type( "audio/mp4" ) );
        let source = InputSource::new( "a" ).unwrap().with_media_type( "audio/flac" ).unwrap();
        assert!( matches!( engine.open( &source ), Err( EngineError::UnsupportedFormat( _ ) ) ) );
    }


    #[test]
    fn test_manual_pacing_advances_only_with_credits() {
        let ( mut engine, control ) = engine();
        engine.open( &InputSource::new( "a.mp4" ).unwrap() ).unwrap();
        engine.start().unwrap();

        assert_eq!( engine.pump().unwrap(), Pump::Backpressure );
        control.advance( 3 );
        for _ in 0..3 {
            assert_eq!( engine.pump().unwrap(), Pump::Advanced );
        }
        assert_eq!( engine.status().timestamp, Duration::from_millis( 60 ) );
        control.advance( 1 );
        assert_eq!( engine.pump().unwrap(), Pump::EndOfStream );
    }


    #[test]
    fn test_scripted_failure() {
        let ( mut engine, control ) = engine();
        engine.open( &InputSource::new( "a.mp4" ).unwrap() ).unwrap();
        control.push_failure( "corrupt packet" );
        assert!( matches!( engine.pump(), Err( EngineError::Decode( _ ) ) ) );
    }


    #[test]
    fn test_calls_are_recorded_in_order() {
        let ( mut engine, control ) = engine();
        engine.open( &InputSource::new( "a.mp4" ).unwrap() ).unwrap();
        engine.set_volume( 0.4 ).unwrap();
        engine.start().unwrap();
        engine.seek_to_position( 1, 2 ).unwrap();
        engine.pause().unwrap();

        assert_eq!( control.calls(), vec![
            EngineCall::Open( "a.mp4".into() ),
            EngineCall::SetVolume( 0.4 ),
            EngineCall::Start,
            EngineCall::SeekToPosition( 1, 2 ),
            EngineCall::Pause,
        ] );
        assert_eq!( engine.volume(), 0.4 );
        assert_eq!( engine.status().timestamp, Duration::from_millis( 30 ) );
    }


    #[test]
    fn test_dispose_is_recorded_once() {
        let ( mut engine, control ) = engine();
        engine.dispose();
        engine.dispose();
        assert_eq!( control.count( &EngineCall::Dispose ), 1 );
    }
}
