//! Output to the default system audio device via cpal.
//!
//! Decoded samples go through an optional rubato resampler into a shared
//! queue that the cpal callback drains.

use std::collections::VecDeque;
use std::sync::atomic::{ AtomicBool, AtomicU32, Ordering };
use std::sync::{ Arc, Mutex, MutexGuard };

use cpal::traits::{ DeviceTrait, HostTrait, StreamTrait };
use rubato::{ FastFixedOut, PolynomialDegree, Resampler };

use crate::engine::sink::OutputSink;
use crate::error::EngineError;


/// Samples shared between the decoding side and the audio callback.
///
/// Handles channel conversion between source and output.
struct SampleQueue {
    buffer: Mutex<VecDeque<f32>>,
    paused: AtomicBool,
    /// Volume stored as f32 bits
    volume: AtomicU32,
    source_channels: usize,
    output_channels: usize,
}


impl SampleQueue {
    fn new( capacity: usize, source_channels: u16, output_channels: u16 ) -> Self {
        Self {
            buffer: Mutex::new( VecDeque::with_capacity( capacity ) ),
            paused: AtomicBool::new( true ),
            volume: AtomicU32::new( 1.0_f32.to_bits() ),
            source_channels: source_channels.max( 1 ) as usize,
            output_channels: output_channels.max( 1 ) as usize,
        }
    }


    fn lock( &self ) -> MutexGuard<'_, VecDeque<f32>> {
        self.buffer.lock().unwrap_or_else( |poisoned| poisoned.into_inner() )
    }


    fn push( &self, samples: &[f32] ) {
        self.lock().extend( samples.iter().copied() );
    }


    /// Fills `output` with converted, volume-scaled frames; silence when
    /// paused or starved.
    fn pop( &self, output: &mut [f32] ) {
        output.fill( 0.0 );
        if self.paused.load( Ordering::Relaxed ) {
            return;
        }

        let volume = f32::from_bits( self.volume.load( Ordering::Relaxed ) );
        let src_ch = self.source_channels;
        let out_ch = self.output_channels;
        let mut buf = self.lock();

        let frames = ( output.len() / out_ch ).min( buf.len() / src_ch );
        let mut frame = vec![ 0.0_f32; src_ch ];
        for i in 0..frames {
            for sample in frame.iter_mut() {
                *sample = buf.pop_front().unwrap_or( 0.0 );
            }
            let out = &mut output[ i * out_ch..( i + 1 ) * out_ch ];
            if src_ch == 2 && out_ch == 1 {
                out[ 0 ] = ( frame[ 0 ] + frame[ 1 ] ) * 0.5;
            } else {
                // Extra output channels repeat the last source channel
                for ( ch, slot ) in out.iter_mut().enumerate() {
                    *slot = frame[ ch.min( src_ch - 1 ) ];
                }
            }
            for slot in out.iter_mut() {
                *slot *= volume;
            }
        }
    }


    fn len( &self ) -> usize {
        self.lock().len()
    }


    fn clear( &self ) {
        self.lock().clear();
    }
}


/// Owns the cpal stream.
struct StreamHandle( cpal::Stream );

// SAFETY: the stream is created, used and dropped on the player's server
// thread only. cpal's callback thread never touches this handle.
unsafe impl Send for StreamHandle {}


/// Sink that plays through the default output device.
pub struct DeviceSink {
    stream: Option<StreamHandle>,
    queue: Option<Arc<SampleQueue>>,
    resampler: Option<FastFixedOut<f32>>,
    /// Planar input waiting for a full resampler chunk.
    resample_input: Vec<Vec<f32>>,
    channels: usize,
    /// Output frames per source frame.
    rate_ratio: f64,
    /// Queue length above which writes are refused.
    high_water: usize,
    volume: f32,
}


impl Default for DeviceSink {
    fn default() -> Self {
        Self::new()
    }
}


impl DeviceSink {
    pub fn new() -> Self {
        Self {
            stream: None,
            queue: None,
            resampler: None,
            resample_input: Vec::new(),
            channels: 2,
            rate_ratio: 1.0,
            high_water: 0,
            volume: 1.0,
        }
    }


    fn queue( &self ) -> Result<&Arc<SampleQueue>, EngineError> {
        self.queue.as_ref().ok_or_else( || EngineError::Output( "device not configured".into() ) )
    }


    /// Runs complete chunks through the resampler.
    fn resample( &mut self, partial: bool ) -> Result<Vec<f32>, EngineError> {
        let Some( resampler ) = self.resampler.as_mut() else {
            return Ok( Vec::new() );
        };

        let mut interleaved = Vec::new();
        while self.resample_input[ 0 ].len() >= resampler.input_frames_next() {
            let needed = resampler.input_frames_next();
            let chunk: Vec<Vec<f32>> = self.resample_input
                .iter_mut()
                .map( |ch| ch.drain( ..needed ).collect() )
                .collect();
            let resampled = resampler.process( &chunk[ .. ], None )
                .map_err( |e| EngineError::Output( format!( "resample failed: {}", e ) ) )?;
            interleave_into( &resampled, &mut interleaved );
        }

        if partial && !self.resample_input[ 0 ].is_empty() {
            let resampled = resampler.process_partial( Some( self.resample_input.as_slice() ), None )
                .map_err( |e| EngineError::Output( format!( "resample failed: {}", e ) ) )?;
            interleave_into( &resampled, &mut interleaved );
            for ch in self.resample_input.iter_mut() {
                ch.clear();
            }
        }

        Ok( interleaved )
    }
}


/// Appends planar channels to `out` as interleaved samples.
fn interleave_into( channels: &[Vec<f32>], out: &mut Vec<f32> ) {
    let frames = channels.first().map( Vec::len ).unwrap_or( 0 );
    out.reserve( frames * channels.len() );
    for f in 0..frames {
        for ch in channels {
            out.push( ch[ f ] );
        }
    }
}


impl OutputSink for DeviceSink {
    fn configure( &mut self, sample_rate: u32, channels: u16 ) -> Result<(), EngineError> {
        self.close();

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else( || EngineError::Output( "no output device available".into() ) )?;

        tracing::info!( "Using output device: {:?}", device.name() );

        let supported: Vec<_> = device
            .supported_output_configs()
            .map_err( |e| EngineError::Output( e.to_string() ) )?
            .collect();

        // Priority: exact channel count, then any channel count, at the source rate
        let at_rate = |c: &&cpal::SupportedStreamConfigRange| {
            c.min_sample_rate().0 <= sample_rate && c.max_sample_rate().0 >= sample_rate
        };
        let config = supported.iter()
            .filter( at_rate )
            .find( |c| c.channels() == channels )
            .or_else( || supported.iter().find( at_rate ) )
            .map( |c| c.clone().with_sample_rate( cpal::SampleRate( sample_rate ) ).config() );

        let config = match config {
            Some( config ) => config,
            None => device
                .default_output_config()
                .map_err( |e| EngineError::Output( e.to_string() ) )?
                .config(),
        };

        tracing::info!(
            "Audio output config: {} Hz, {} channels (source {} Hz, {} channels)",
            config.sample_rate.0,
            config.channels,
            sample_rate,
            channels
        );

        // ~500ms of output
        let capacity = config.sample_rate.0 as usize * channels as usize / 2;
        let queue = Arc::new( SampleQueue::new( capacity, channels, config.channels ) );
        queue.volume.store( self.volume.to_bits(), Ordering::Relaxed );
        let callback_queue = Arc::clone( &queue );

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| callback_queue.pop( data ),
                |err| tracing::error!( "Audio output error: {}", err ),
                None,
            )
            .map_err( |e| EngineError::Output( e.to_string() ) )?;
        stream.play().map_err( |e| EngineError::Output( e.to_string() ) )?;

        self.resampler = if config.sample_rate.0 != sample_rate {
            tracing::info!( "Resampling: {} Hz -> {} Hz", sample_rate, config.sample_rate.0 );
            let resampler = FastFixedOut::<f32>::new(
                config.sample_rate.0 as f64 / sample_rate as f64,
                2.0,
                PolynomialDegree::Cubic,
                1024,
                channels as usize,
            ).map_err( |e| EngineError::Output( format!( "resampler: {}", e ) ) )?;
            Some( resampler )
        } else {
            None
        };

        self.channels = channels.max( 1 ) as usize;
        self.rate_ratio = config.sample_rate.0 as f64 / sample_rate.max( 1 ) as f64;
        self.resample_input = ( 0..self.channels ).map( |_| Vec::new() ).collect();
        self.high_water = capacity;
        self.queue = Some( queue );
        self.stream = Some( StreamHandle( stream ) );
        Ok(())
    }


    fn write( &mut self, samples: &[f32] ) -> Result<usize, EngineError> {
        if self.queue()?.len() >= self.high_water {
            return Ok( 0 );
        }

        if self.resampler.is_none() {
            self.queue()?.push( samples );
            return Ok( samples.len() );
        }

        let whole = samples.len() - samples.len() % self.channels;
        for frame in samples[ ..whole ].chunks( self.channels ) {
            for ( ch, sample ) in frame.iter().enumerate() {
                self.resample_input[ ch ].push( *sample );
            }
        }
        let resampled = self.resample( false )?;
        self.queue()?.push( &resampled );
        Ok( whole )
    }


    fn start( &mut self ) -> Result<(), EngineError> {
        self.queue()?.paused.store( false, Ordering::Relaxed );
        Ok(())
    }


    fn pause( &mut self ) -> Result<(), EngineError> {
        if let Some( queue ) = &self.queue {
            queue.paused.store( true, Ordering::Relaxed );
        }
        Ok(())
    }


    fn flush( &mut self ) {
        if let Some( queue ) = &self.queue {
            queue.clear();
        }
        for ch in self.resample_input.iter_mut() {
            ch.clear();
        }
        if let Some( resampler ) = self.resampler.as_mut() {
            resampler.reset();
        }
    }


    fn finish( &mut self ) -> Result<(), EngineError> {
        let tail = self.resample( true )?;
        if !tail.is_empty() {
            self.queue()?.push( &tail );
        }
        Ok(())
    }


    fn set_volume( &mut self, level: f32 ) {
        self.volume = level;
        if let Some( queue ) = &self.queue {
            queue.volume.store( level.to_bits(), Ordering::Relaxed );
        }
    }


    fn is_drained( &self ) -> bool {
        self.queue.as_ref().map( |q| q.len() == 0 ).unwrap_or( true )
    }


    fn backlog( &self ) -> u64 {
        let queued = self.queue.as_ref().map( |q| q.len() / self.channels ).unwrap_or( 0 );
        let held = self.resample_input.first().map( Vec::len ).unwrap_or( 0 );
        ( queued as f64 / self.rate_ratio ) as u64 + held as u64
    }


    fn close( &mut self ) {
        // Dropping the stream stops the callback
        self.stream = None;
        self.queue = None;
        self.resampler = None;
        self.resample_input.clear();
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_queue_is_silent_while_paused() {
        let queue = SampleQueue::new( 16, 2, 2 );
        queue.push( &[ 0.5; 8 ] );
        let mut out = [ 1.0_f32; 8 ];
        queue.pop( &mut out );
        assert_eq!( out, [ 0.0; 8 ] );
        assert_eq!( queue.len(), 8 );
    }


    #[test]
    fn test_queue_mono_to_stereo_with_volume() {
        let queue = SampleQueue::new( 16, 1, 2 );
        queue.paused.store( false, Ordering::Relaxed );
        queue.volume.store( 0.5_f32.to_bits(), Ordering::Relaxed );
        queue.push( &[ 1.0, -1.0 ] );

        let mut out = [ 9.0_f32; 6 ];
        queue.pop( &mut out );
        assert_eq!( out, [ 0.5, 0.5, -0.5, -0.5, 0.0, 0.0 ] );
    }


    #[test]
    fn test_queue_stereo_to_mono_mixes() {
        let queue = SampleQueue::new( 16, 2, 1 );
        queue.paused.store( false, Ordering::Relaxed );
        queue.push( &[ 1.0, 0.0, 0.5, 0.5 ] );

        let mut out = [ 0.0_f32; 2 ];
        queue.pop( &mut out );
        assert_eq!( out, [ 0.5, 0.5 ] );
    }


    #[test]
    fn test_interleave() {
        let mut out = Vec::new();
        interleave_into( &[ vec![ 1.0, 2.0 ], vec![ 3.0, 4.0 ] ], &mut out );
        assert_eq!( out, vec![ 1.0, 3.0, 2.0, 4.0 ] );
    }
}
