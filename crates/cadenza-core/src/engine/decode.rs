//! Engine backed by Symphonia.
//!
//! Demuxing and decoding are Symphonia's; this module only pumps packets from
//! the decoder into an [`OutputSink`] and keeps track of the position.

use std::fs::File;
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{ Decoder as SymphoniaDecoder, DecoderOptions, CODEC_TYPE_NULL };
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{ FormatOptions, FormatReader, SeekMode, SeekTo };
use symphonia::core::io::{ MediaSourceStream, MediaSourceStreamOptions };
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::engine::sink::{ NullSink, OutputSink };
use crate::engine::{ Engine, EngineStatus, Pump, StreamInfo };
use crate::error::EngineError;
use crate::source::InputSource;


/// An open input: format reader plus codec for its first audio track.
struct Decoder {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn SymphoniaDecoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    n_frames: Option<u64>,
    sample_buf: Option<SampleBuffer<f32>>,
}


impl Decoder {
    fn open( source: &InputSource ) -> Result<( Self, StreamInfo ), EngineError> {
        let path = source.path().ok_or_else( || {
            EngineError::UnsupportedFormat( format!( "unsupported scheme in {}", source.location() ) )
        })?;

        // Use larger buffer for network paths (SMB)
        let buffer_len = if path.starts_with( r"\\" ) {
            256 * 1024
        } else {
            64 * 1024
        };

        let file = File::open( &path ).map_err( |e| match e.kind() {
            std::io::ErrorKind::NotFound => EngineError::NotFound( path.display().to_string() ),
            _ => EngineError::Io( e ),
        })?;
        let mss = MediaSourceStream::new( Box::new( file ), MediaSourceStreamOptions { buffer_len } );

        let mut hint = Hint::new();
        if let Some( ext ) = source.extension() {
            hint.with_extension( &ext );
        }
        if let Some( mime ) = source.inferred_media_type() {
            hint.mime_type( mime );
        }

        let probed = symphonia::default::get_probe()
            .format( &hint, mss, &FormatOptions::default(), &MetadataOptions::default() )
            .map_err( |e| match e {
                // Running out of data while probing means no format matched
                SymphoniaError::IoError( io ) if io.kind() != std::io::ErrorKind::UnexpectedEof => {
                    EngineError::Io( io )
                }
                other => EngineError::UnsupportedFormat( other.to_string() ),
            })?;
        let format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find( |t| t.codec_params.codec != CODEC_TYPE_NULL )
            .ok_or_else( || EngineError::UnsupportedFormat( "no audio track".into() ) )?;

        let track_id = track.id;
        let params = &track.codec_params;
        let sample_rate = params.sample_rate.unwrap_or( 44_100 );
        let channels = params.channels.map( |c| c.count() ).unwrap_or( 2 );
        let n_frames = params.n_frames;

        let codec = symphonia::default::get_codecs()
            .get_codec( params.codec )
            .map( |descriptor| descriptor.short_name.to_string() );

        let decoder = symphonia::default::get_codecs()
            .make( params, &DecoderOptions::default() )
            .map_err( |e| EngineError::UnsupportedFormat( e.to_string() ) )?;

        let info = StreamInfo {
            media_type: source.inferred_media_type().map( str::to_string ),
            codec,
            sample_rate: Some( sample_rate ),
            channels: Some( channels as u32 ),
            duration: n_frames.map( |frames| Duration::from_secs_f64( frames as f64 / sample_rate as f64 ) ),
        };

        tracing::info!(
            "Opened {}: {} Hz, {} channels, duration: {:?}",
            source.location(),
            sample_rate,
            channels,
            info.duration
        );

        Ok((
            Self {
                format_reader,
                decoder,
                track_id,
                sample_rate,
                channels,
                n_frames,
                sample_buf: None,
            },
            info,
        ))
    }


    /// Decodes the next packet into interleaved samples. `None` at end of stream.
    fn decode_next( &mut self ) -> Result<Option<&[f32]>, EngineError> {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok( packet ) => packet,
                Err( SymphoniaError::IoError( ref e ) ) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok( None );
                }
                Err( SymphoniaError::ResetRequired ) => return Ok( None ),
                Err( e ) => return Err( EngineError::Decode( e.to_string() ) ),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode( &packet ) {
                Ok( decoded ) => decoded,
                // Corrupt packets are skipped
                Err( SymphoniaError::DecodeError( e ) ) => {
                    tracing::debug!( "Skipping undecodable packet: {}", e );
                    continue;
                }
                Err( e ) => return Err( EngineError::Decode( e.to_string() ) ),
            };

            let spec = *decoded.spec();
            let num_frames = decoded.capacity();
            let reuse = self.sample_buf.as_ref().is_some_and( |b| b.capacity() >= num_frames );
            if !reuse {
                self.sample_buf = Some( SampleBuffer::new( num_frames as u64, spec ) );
            }

            let sample_buf = self.sample_buf.as_mut().ok_or( EngineError::NotOpen )?;
            sample_buf.copy_interleaved_ref( decoded );
            return Ok( Some( sample_buf.samples() ) );
        }
    }


    /// Seeks and returns the frame the decoder actually landed on.
    fn seek( &mut self, time: Duration ) -> Result<u64, EngineError> {
        let seek_to = SeekTo::Time {
            time: Time::from( time.as_secs_f64() ),
            track_id: Some( self.track_id ),
        };

        let seeked = self.format_reader
            .seek( SeekMode::Accurate, seek_to )
            .map_err( |e| EngineError::Decode( format!( "seek failed: {}", e ) ) )?;

        self.decoder.reset();
        let time_base = self.format_reader
            .tracks()
            .iter()
            .find( |t| t.id == self.track_id )
            .and_then( |t| t.codec_params.time_base );

        Ok( match time_base {
            Some( tb ) => {
                let t = tb.calc_time( seeked.actual_ts );
                ( ( t.seconds as f64 + t.frac ) * self.sample_rate as f64 ) as u64
            }
            None => ( time.as_secs_f64() * self.sample_rate as f64 ) as u64,
        })
    }
}


/// Plays local files through an [`OutputSink`].
pub struct DecodeEngine<S: OutputSink = NullSink> {
    sink: S,
    decoder: Option<Decoder>,
    /// Decoded samples the sink has not accepted yet.
    pending: Vec<f32>,
    /// Frames handed to the sink since the start of the input.
    frames: u64,
    finished: bool,
}


impl DecodeEngine<NullSink> {
    /// An engine that decodes in real time without a device.
    pub fn silent() -> Self {
        Self::new( NullSink::default() )
    }
}


impl<S: OutputSink> DecodeEngine<S> {
    pub fn new( sink: S ) -> Self {
        Self {
            sink,
            decoder: None,
            pending: Vec::new(),
            frames: 0,
            finished: false,
        }
    }


    fn decoder( &mut self ) -> Result<&mut Decoder, EngineError> {
        self.decoder.as_mut().ok_or( EngineError::NotOpen )
    }


    fn reposition( &mut self, time: Duration ) -> Result<(), EngineError> {
        let frame = self.decoder()?.seek( time )?;
        self.pending.clear();
        self.sink.flush();
        self.frames = frame;
        self.finished = false;
        Ok(())
    }


    /// Hands pending samples to the sink. Returns false if the sink is full.
    fn drain_pending( &mut self ) -> Result<bool, EngineError> {
        if self.pending.is_empty() {
            return Ok( true );
        }
        let accepted = self.sink.write( &self.pending )?;
        let channels = self.decoder.as_ref().map( |d| d.channels ).unwrap_or( 1 ).max( 1 );
        self.frames += ( accepted / channels ) as u64;
        self.pending.drain( ..accepted );
        Ok( self.pending.is_empty() )
    }
}


impl<S: OutputSink> Engine for DecodeEngine<S> {
    fn open( &mut self, source: &InputSource ) -> Result<StreamInfo, EngineError> {
        self.decoder = None;
        self.pending.clear();
        self.frames = 0;
        self.finished = false;

        let ( decoder, info ) = Decoder::open( source )?;
        self.sink.configure( decoder.sample_rate, decoder.channels as u16 )?;
        self.decoder = Some( decoder );
        Ok( info )
    }


    fn start( &mut self ) -> Result<(), EngineError> {
        self.decoder()?;
        self.sink.start()
    }


    fn pause( &mut self ) -> Result<(), EngineError> {
        self.sink.pause()
    }


    fn stop( &mut self ) -> Result<(), EngineError> {
        self.sink.pause()?;
        if self.decoder.is_some() {
            self.reposition( Duration::ZERO )?;
        }
        Ok(())
    }


    fn set_volume( &mut self, level: f32 ) -> Result<(), EngineError> {
        self.sink.set_volume( level );
        Ok(())
    }


    fn seek_to_time( &mut self, time: Duration ) -> Result<(), EngineError> {
        self.reposition( time )
    }


    fn seek_to_position( &mut self, offset: u64, range: u64 ) -> Result<(), EngineError> {
        let decoder = self.decoder()?;
        let total = decoder.n_frames
            .ok_or_else( || EngineError::Decode( "input length unknown".into() ) )?;
        let fraction = ( offset as f64 / range.max( 1 ) as f64 ).clamp( 0.0, 1.0 );
        let time = Duration::from_secs_f64( total as f64 * fraction / decoder.sample_rate as f64 );
        self.reposition( time )
    }


    fn pump( &mut self ) -> Result<Pump, EngineError> {
        self.decoder()?;

        if !self.drain_pending()? {
            return Ok( Pump::Backpressure );
        }

        if !self.finished {
            let decoder = self.decoder()?;
            match decoder.decode_next()? {
                Some( samples ) => {
                    let samples = samples.to_vec();
                    self.pending = samples;
                    self.drain_pending()?;
                    return Ok( Pump::Advanced );
                }
                None => {
                    tracing::debug!( "Decoder reached end of input" );
                    self.finished = true;
                    self.sink.finish()?;
                }
            }
        }

        // Wait for the sink to play out what it has
        if self.sink.is_drained() {
            Ok( Pump::EndOfStream )
        } else {
            Ok( Pump::Backpressure )
        }
    }


    fn status( &self ) -> EngineStatus {
        match &self.decoder {
            Some( decoder ) => {
                // Frames still queued in the sink have not been heard yet
                let rendered = self.frames.saturating_sub( self.sink.backlog() );
                EngineStatus {
                    timestamp: Duration::from_secs_f64( rendered as f64 / decoder.sample_rate as f64 ),
                    offset: rendered,
                    range: decoder.n_frames.unwrap_or( 0 ),
                }
            }
            None => EngineStatus::default(),
        }
    }


    fn dispose( &mut self ) {
        self.decoder = None;
        self.pending.clear();
        self.sink.close();
    }
}


#[cfg( test )]
mod tests {
    use std::io::Write;

    use super::*;


    /// Writes a mono 16-bit PCM WAV of `frames` silent samples.
    fn write_wav( dir: &tempfile::TempDir, name: &str, sample_rate: u32, frames: u32 ) -> String {
        let data_len = frames * 2;
        let mut bytes = Vec::with_capacity( 44 + data_len as usize );
        bytes.extend_from_slice( b"RIFF" );
        bytes.extend_from_slice( &( 36 + data_len ).to_le_bytes() );
        bytes.extend_from_slice( b"WAVEfmt " );
        bytes.extend_from_slice( &16u32.to_le_bytes() );
        bytes.extend_from_slice( &1u16.to_le_bytes() );
        bytes.extend_from_slice( &1u16.to_le_bytes() );
        bytes.extend_from_slice( &sample_rate.to_le_bytes() );
        bytes.extend_from_slice( &( sample_rate * 2 ).to_le_bytes() );
        bytes.extend_from_slice( &2u16.to_le_bytes() );
        bytes.extend_from_slice( &16u16.to_le_bytes() );
        bytes.extend_from_slice( b"data" );
        bytes.extend_from_slice( &data_len.to_le_bytes() );
        bytes.resize( 44 + data_len as usize, 0 );

        let path = dir.path().join( name );
        let mut file = File::create( &path ).unwrap();
        file.write_all( &bytes ).unwrap();
        path.to_string_lossy().into_owned()
    }


    #[test]
    fn test_open_wav_reports_stream_info() {
        let dir = tempfile::tempdir().unwrap();
        let location = write_wav( &dir, "tone.wav", 8000, 8000 );

        let mut engine = DecodeEngine::silent();
        let info = engine.open( &InputSource::new( location ).unwrap() ).unwrap();
        assert_eq!( info.sample_rate, Some( 8000 ) );
        assert_eq!( info.channels, Some( 1 ) );
        assert_eq!( info.duration, Some( Duration::from_secs( 1 ) ) );
        assert_eq!( info.media_type.as_deref(), Some( "audio/wav" ) );
    }


    #[test]
    fn test_missing_file_is_a_resolution_error() {
        let mut engine = DecodeEngine::silent();
        let err = engine.open( &InputSource::new( "/definitely/not/here.wav" ).unwrap() ).unwrap_err();
        assert!( err.is_resolution(), "{err}" );
    }


    #[test]
    fn test_garbage_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "noise.bin" );
        std::fs::write( &path, vec![ 0x5a_u8; 4096 ] ).unwrap();

        let mut engine = DecodeEngine::silent();
        let err = engine.open( &InputSource::new( path.to_string_lossy() ).unwrap() ).unwrap_err();
        assert!( matches!( err, EngineError::UnsupportedFormat( _ ) ), "{err}" );
    }


    #[test]
    fn test_remote_scheme_is_unsupported() {
        let mut engine = DecodeEngine::silent();
        let err = engine.open( &InputSource::new( "https://example.com/a.mp3" ).unwrap() ).unwrap_err();
        assert!( err.is_resolution() );
    }


    #[test]
    fn test_pumps_short_file_to_end_of_stream() {
        let dir = tempfile::tempdir().unwrap();
        let location = write_wav( &dir, "short.wav", 8000, 400 );

        let mut engine = DecodeEngine::new( NullSink::new( Duration::from_millis( 100 ) ) );
        engine.open( &InputSource::new( location ).unwrap() ).unwrap();
        engine.start().unwrap();

        let mut ended = false;
        for _ in 0..1000 {
            match engine.pump().unwrap() {
                Pump::EndOfStream => {
                    ended = true;
                    break;
                }
                _ => std::thread::sleep( Duration::from_millis( 1 ) ),
            }
        }
        assert!( ended );
        assert_eq!( engine.status().offset, 400 );
        assert_eq!( engine.status().range, 400 );
    }


    #[test]
    fn test_status_lags_behind_queued_samples() {
        let dir = tempfile::tempdir().unwrap();
        let location = write_wav( &dir, "lead.wav", 8000, 8000 );

        let mut engine = DecodeEngine::new( NullSink::new( Duration::from_secs( 1 ) ) );
        engine.open( &InputSource::new( location ).unwrap() ).unwrap();
        engine.start().unwrap();
        assert_eq!( engine.pump().unwrap(), Pump::Advanced );

        assert!( engine.frames > 0 );
        assert!( engine.status().offset < engine.frames, "status ran ahead of the sink clock" );
    }


    #[test]
    fn test_stop_rewinds() {
        let dir = tempfile::tempdir().unwrap();
        let location = write_wav( &dir, "rewind.wav", 8000, 8000 );

        let mut engine = DecodeEngine::silent();
        engine.open( &InputSource::new( location ).unwrap() ).unwrap();
        engine.start().unwrap();
        engine.pump().unwrap();
        engine.stop().unwrap();
        assert_eq!( engine.status().offset, 0 );
    }
}
