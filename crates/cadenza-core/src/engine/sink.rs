//! Destinations for decoded PCM.

use std::time::{ Duration, Instant };

use crate::error::EngineError;


/// Receives interleaved `f32` samples from a [`DecodeEngine`](super::DecodeEngine).
pub trait OutputSink: Send + 'static {
    /// Prepares for a stream with the given format. Called on every open.
    fn configure( &mut self, sample_rate: u32, channels: u16 ) -> Result<(), EngineError>;

    /// Queues samples. Returns how many were accepted; zero means full.
    fn write( &mut self, samples: &[f32] ) -> Result<usize, EngineError>;

    fn start( &mut self ) -> Result<(), EngineError>;

    fn pause( &mut self ) -> Result<(), EngineError>;

    /// Drops everything queued but not yet rendered.
    fn flush( &mut self );

    /// Called once the input has no more samples, so held-back data can be queued.
    fn finish( &mut self ) -> Result<(), EngineError> {
        Ok(())
    }

    fn set_volume( &mut self, level: f32 );

    /// True once everything written has been rendered.
    fn is_drained( &self ) -> bool;

    /// Frames accepted by `write` but not yet rendered, at the configured rate.
    fn backlog( &self ) -> u64;

    fn close( &mut self );
}


/// A sink that discards samples at the rate a device would consume them.
#[derive( Debug )]
pub struct NullSink {
    sample_rate: u32,
    channels: u16,
    /// How far ahead of the clock writes may run.
    lead: Duration,
    /// Frames accepted since the last flush.
    frames: u64,
    /// Render time accumulated before the current run.
    clock: Duration,
    started: Option<Instant>,
}


impl Default for NullSink {
    fn default() -> Self {
        Self::new( Duration::from_millis( 50 ) )
    }
}


impl NullSink {
    pub fn new( lead: Duration ) -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            lead,
            frames: 0,
            clock: Duration::ZERO,
            started: None,
        }
    }


    fn written( &self ) -> Duration {
        Duration::from_secs_f64( self.frames as f64 / self.sample_rate.max( 1 ) as f64 )
    }


    fn rendered( &self ) -> Duration {
        let running = self.started.map( |t| t.elapsed() ).unwrap_or( Duration::ZERO );
        ( self.clock + running ).min( self.written() )
    }
}


impl OutputSink for NullSink {
    fn configure( &mut self, sample_rate: u32, channels: u16 ) -> Result<(), EngineError> {
        if sample_rate == 0 || channels == 0 {
            return Err( EngineError::Output( format!( "Invalid format: {} Hz, {} channels", sample_rate, channels ) ) );
        }
        self.sample_rate = sample_rate;
        self.channels = channels;
        self.flush();
        Ok(())
    }


    fn write( &mut self, samples: &[f32] ) -> Result<usize, EngineError> {
        let budget = self.rendered() + self.lead;
        let queued = self.written();
        if queued >= budget {
            return Ok( 0 );
        }
        let room = ( ( budget - queued ).as_secs_f64() * self.sample_rate as f64 ).ceil() as usize;
        let channels = self.channels as usize;
        let frames = ( samples.len() / channels ).min( room.max( 1 ) );
        self.frames += frames as u64;
        Ok( frames * channels )
    }


    fn start( &mut self ) -> Result<(), EngineError> {
        if self.started.is_none() {
            self.started = Some( Instant::now() );
        }
        Ok(())
    }


    fn pause( &mut self ) -> Result<(), EngineError> {
        self.clock = self.rendered();
        self.started = None;
        Ok(())
    }


    fn flush( &mut self ) {
        self.frames = 0;
        self.clock = Duration::ZERO;
        if self.started.is_some() {
            self.started = Some( Instant::now() );
        }
    }


    fn set_volume( &mut self, _level: f32 ) {}


    fn is_drained( &self ) -> bool {
        self.rendered() >= self.written()
    }


    fn backlog( &self ) -> u64 {
        let rendered = ( self.rendered().as_secs_f64() * self.sample_rate as f64 ).round() as u64;
        self.frames.saturating_sub( rendered )
    }


    fn close( &mut self ) {
        self.frames = 0;
        self.clock = Duration::ZERO;
        self.started = None;
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_null_sink_accepts_only_the_lead_before_time_passes() {
        let mut sink = NullSink::new( Duration::from_millis( 10 ) );
        sink.configure( 1000, 1 ).unwrap();
        sink.start().unwrap();

        let samples = vec![ 0.0_f32; 1000 ];
        let accepted = sink.write( &samples ).unwrap();
        assert!( accepted >= 10 && accepted < 100, "accepted {accepted}" );
    }


    #[test]
    fn test_null_sink_drains() {
        let mut sink = NullSink::new( Duration::from_millis( 5 ) );
        sink.configure( 1000, 2 ).unwrap();
        sink.start().unwrap();
        sink.write( &[ 0.0; 4 ] ).unwrap();
        std::thread::sleep( Duration::from_millis( 10 ) );
        assert!( sink.is_drained() );
    }


    #[test]
    fn test_null_sink_backlog_shrinks_as_time_passes() {
        let mut sink = NullSink::new( Duration::from_millis( 100 ) );
        sink.configure( 1000, 1 ).unwrap();
        sink.start().unwrap();
        let accepted = sink.write( &[ 0.0; 50 ] ).unwrap() as u64;
        assert_eq!( accepted, 50 );
        assert!( sink.backlog() > 0 && sink.backlog() <= accepted );

        std::thread::sleep( Duration::from_millis( 80 ) );
        assert_eq!( sink.backlog(), 0 );
    }


    #[test]
    fn test_null_sink_rejects_bad_format() {
        let mut sink = NullSink::default();
        assert!( sink.configure( 0, 2 ).is_err() );
    }
}
