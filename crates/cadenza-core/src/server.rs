//! The command server.
//!
//! One thread per player owns the engine and the state machine. It processes
//! commands strictly in the order they were issued, pumps the engine while
//! playing, and reports everything through the player's event channel.

use std::sync::mpsc::{ Receiver, RecvTimeoutError, TryRecvError };
use std::sync::{ Arc, RwLock };
use std::time::Duration;

use crate::arbiter::{ OutputArbiter, PlayerId };
use crate::channel::EventSender;
use crate::command::{ Command, CommandKind };
use crate::config::PlayerConfig;
use crate::engine::{ Engine, Pump };
use crate::error::{ EngineError, PlayerError };
use crate::event::{ PlayerEvent, TimeCode };
use crate::source::InputSource;
use crate::state::{ Admission, PlayerState };


/// Server-side values readable from the handle.
#[derive( Debug, Clone, Default )]
pub(crate) struct Snapshot {
    pub state: PlayerState,
    pub volume: f32,
    pub source: Option<InputSource>,
}


pub(crate) struct Server {
    id: PlayerId,
    engine: Box<dyn Engine>,
    config: PlayerConfig,
    arbiter: Arc<OutputArbiter>,
    events: EventSender,
    snapshot: Arc<RwLock<Snapshot>>,

    state: PlayerState,
    source: Option<InputSource>,
    volume: f32,
    disposed: bool,

    /// Last reported time code, in quanta.
    last_tick: Option<u64>,
    /// Last reported position, in `config.position_range` units.
    last_position: Option<u64>,
    last_buffering: Option<u8>,
}


impl Server {
    pub fn new(
        id: PlayerId,
        engine: Box<dyn Engine>,
        config: PlayerConfig,
        arbiter: Arc<OutputArbiter>,
        events: EventSender,
        snapshot: Arc<RwLock<Snapshot>>,
    ) -> Self {
        let volume = config.default_volume;
        let server = Self {
            id,
            engine,
            config,
            arbiter,
            events,
            snapshot,
            state: PlayerState::Idle,
            source: None,
            volume,
            disposed: false,
            last_tick: None,
            last_position: None,
            last_buffering: None,
        };
        server.publish();
        server
    }


    /// Runs until the command queue disconnects.
    pub fn run( mut self, commands: Receiver<Command> ) {
        tracing::debug!( "Player {}: server thread started", self.id );

        loop {
            if !self.state.is_active() {
                match commands.recv() {
                    Ok( command ) => self.handle( command ),
                    Err( _ ) => break,
                }
                continue;
            }

            // Commands always go first so a pause is never stuck behind pumps
            loop {
                match commands.try_recv() {
                    Ok( command ) => self.handle( command ),
                    Err( TryRecvError::Empty ) => break,
                    Err( TryRecvError::Disconnected ) => return self.shutdown(),
                }
            }
            if !self.state.is_active() {
                continue;
            }

            if self.pump() {
                match commands.recv_timeout( self.config.backpressure_wait ) {
                    Ok( command ) => self.handle( command ),
                    Err( RecvTimeoutError::Timeout ) => {}
                    Err( RecvTimeoutError::Disconnected ) => break,
                }
            }
        }

        self.shutdown();
    }


    fn shutdown( mut self ) {
        if self.state != PlayerState::Closed {
            tracing::debug!( "Player {}: handle dropped without close", self.id );
            self.close();
        }
        tracing::debug!( "Player {}: server thread exiting", self.id );
    }


    fn handle( &mut self, command: Command ) {
        let kind = command.kind();
        tracing::debug!( "Player {}: {} in state {}", self.id, kind, self.state );

        match self.state.admit( kind ) {
            Admission::Proceed => {}
            Admission::Noop if kind == CommandKind::Close => return,
            Admission::Noop => {
                self.emit( PlayerEvent::Noop { command: kind, state: self.state } );
                return;
            }
            Admission::Reject( error ) => {
                tracing::warn!( "Player {}: rejected {}: {}", self.id, kind, error );
                self.emit( PlayerEvent::Error { command: Some( kind ), error } );
                return;
            }
        }

        match command {
            Command::SetInput( source ) => self.set_input( source ),
            Command::Play => self.play(),
            Command::Pause => self.pause(),
            Command::Stop => self.stop(),
            Command::SetVolume( level ) => self.set_volume( level ),
            Command::SeekToTime( time ) => self.seek_to_time( time ),
            Command::SeekToPosition { offset, range } => self.seek_to_position( offset, range ),
            Command::Ping( cookie ) => self.emit( PlayerEvent::Pong { cookie } ),
            Command::Close => self.close(),
        }
    }


    fn set_input( &mut self, source: InputSource ) {
        if matches!(
            self.state,
            PlayerState::Ready | PlayerState::Buffering | PlayerState::Playing | PlayerState::Paused
        ) {
            if let Err( e ) = self.engine.stop() {
                tracing::warn!( "Player {}: stopping previous input failed: {}", self.id, e );
            }
            self.release();
            self.transition( PlayerState::Stopped );
        }

        tracing::info!( "Player {}: opening {}", self.id, source.location() );
        self.source = Some( source.clone() );
        self.transition( PlayerState::Opening );

        match self.engine.open( &source ) {
            Ok( info ) => {
                self.reset_progress();
                if let Err( e ) = self.engine.set_volume( self.volume ) {
                    tracing::warn!( "Player {}: could not apply volume: {}", self.id, e );
                }
                self.emit( PlayerEvent::InputOpened { source, info } );
                self.transition( PlayerState::Ready );
            }
            Err( e ) => {
                tracing::warn!( "Player {}: cannot open {}: {}", self.id, source.location(), e );
                let error = e.into_player_error( Some( source.location() ) );
                self.source = None;
                self.emit( PlayerEvent::Error { command: Some( CommandKind::SetInput ), error } );
                self.transition( PlayerState::Error );
            }
        }
    }


    fn play( &mut self ) {
        if let Err( holder ) = self.arbiter.acquire( self.id ) {
            tracing::warn!( "Player {}: output device held by {}", self.id, holder );
            self.emit( PlayerEvent::Error {
                command: Some( CommandKind::Play ),
                error: PlayerError::DeviceBusy { holder },
            } );
            return;
        }

        match self.engine.start() {
            Ok(()) => {
                self.last_buffering = None;
                self.transition( PlayerState::Playing );
            }
            Err( e ) => self.fail( Some( CommandKind::Play ), e ),
        }
    }


    fn pause( &mut self ) {
        match self.engine.pause() {
            Ok(()) => {
                self.release();
                self.transition( PlayerState::Paused );
            }
            Err( e ) => self.fail( Some( CommandKind::Pause ), e ),
        }
    }


    fn stop( &mut self ) {
        match self.engine.stop() {
            Ok(()) => {
                self.release();
                self.reset_progress();
                self.transition( PlayerState::Stopped );
            }
            Err( e ) => self.fail( Some( CommandKind::Stop ), e ),
        }
    }


    fn set_volume( &mut self, requested: f32 ) {
        let Some( effective ) = self.config.volume_range.clamp( requested ) else {
            self.emit( PlayerEvent::Error {
                command: Some( CommandKind::SetVolume ),
                error: PlayerError::ValidationFailure { reason: "volume is not a number".into() },
            } );
            return;
        };

        if let Err( e ) = self.engine.set_volume( effective ) {
            return self.fail( Some( CommandKind::SetVolume ), e );
        }
        if effective != requested {
            tracing::debug!( "Player {}: volume {} clamped to {}", self.id, requested, effective );
        }
        self.volume = effective;
        self.publish();
        self.emit( PlayerEvent::VolumeChanged { requested, effective } );
    }


    fn seek_to_time( &mut self, time: Duration ) {
        match self.engine.seek_to_time( time ) {
            Ok(()) => self.seeked(),
            Err( e ) => self.fail( Some( CommandKind::SeekToTime ), e ),
        }
    }


    fn seek_to_position( &mut self, offset: u64, range: u64 ) {
        if range == 0 || offset > range {
            self.emit( PlayerEvent::Error {
                command: Some( CommandKind::SeekToPosition ),
                error: PlayerError::ValidationFailure {
                    reason: format!( "position {}/{} is out of range", offset, range ),
                },
            } );
            return;
        }

        match self.engine.seek_to_position( offset, range ) {
            Ok(()) => self.seeked(),
            Err( e ) => self.fail( Some( CommandKind::SeekToPosition ), e ),
        }
    }


    fn seeked( &mut self ) {
        self.reset_progress();
        let timestamp = self.engine.status().timestamp;
        self.emit( PlayerEvent::Seeked { timestamp } );
    }


    fn close( &mut self ) {
        if !self.disposed {
            self.engine.dispose();
            self.disposed = true;
        }
        self.release();
        self.source = None;
        tracing::info!( "Player {}: closed", self.id );
        self.transition( PlayerState::Closed );
        self.emit( PlayerEvent::Closed );
    }


    /// Pumps the engine once. Returns true if the server should wait before
    /// pumping again.
    fn pump( &mut self ) -> bool {
        match self.engine.pump() {
            Ok( Pump::Advanced ) => {
                if self.state == PlayerState::Buffering {
                    self.last_buffering = None;
                    self.transition( PlayerState::Playing );
                }
                self.report_progress();
                false
            }
            Ok( Pump::Backpressure ) => true,
            Ok( Pump::Buffering { percent } ) => {
                if self.state == PlayerState::Playing {
                    self.transition( PlayerState::Buffering );
                }
                if self.last_buffering != Some( percent ) {
                    self.last_buffering = Some( percent );
                    self.emit( PlayerEvent::BufferingProgress { percent } );
                }
                true
            }
            Ok( Pump::EndOfStream ) => {
                self.report_progress();
                tracing::info!( "Player {}: end of stream", self.id );
                self.emit( PlayerEvent::EndOfStream );
                if let Err( e ) = self.engine.stop() {
                    tracing::warn!( "Player {}: rewind after end of stream failed: {}", self.id, e );
                }
                self.release();
                self.reset_progress();
                self.transition( PlayerState::Stopped );
                false
            }
            Err( e ) => {
                self.fail( None, e );
                false
            }
        }
    }


    /// Emits time code and position events when their quantized values change.
    fn report_progress( &mut self ) {
        let status = self.engine.status();

        let quantum = self.config.time_code_quantum;
        let ( tick, time ) = if quantum.is_zero() {
            ( status.timestamp.as_millis() as u64, status.timestamp )
        } else {
            let tick = ( status.timestamp.as_nanos() / quantum.as_nanos() ) as u64;
            ( tick, quantum.saturating_mul( u32::try_from( tick ).unwrap_or( u32::MAX ) ) )
        };
        if self.last_tick != Some( tick ) {
            self.last_tick = Some( tick );
            self.emit( PlayerEvent::TimeCode { time_code: TimeCode::from( time ) } );
        }

        let range = self.config.position_range;
        if range > 0 && status.range > 0 {
            let offset = status.offset.min( status.range ) as u128 * range as u128 / status.range as u128;
            let offset = offset as u64;
            if self.last_position != Some( offset ) {
                self.last_position = Some( offset );
                self.emit( PlayerEvent::Position { offset, range } );
            }
        }
    }


    fn reset_progress( &mut self ) {
        self.last_tick = None;
        self.last_position = None;
    }


    /// Reports an engine failure and parks the player in `Error`.
    fn fail( &mut self, command: Option<CommandKind>, error: EngineError ) {
        tracing::error!( "Player {}: engine failure: {}", self.id, error );
        self.release();
        self.source = None;
        self.emit( PlayerEvent::Error { command, error: error.into_player_error( None ) } );
        self.transition( PlayerState::Error );
    }


    fn release( &self ) {
        if self.arbiter.release( self.id ) {
            tracing::debug!( "Player {}: released output device", self.id );
        }
    }


    fn transition( &mut self, next: PlayerState ) {
        if next == self.state {
            return;
        }
        let previous = self.state;
        self.state = next;
        self.publish();
        self.emit( PlayerEvent::StateChanged { previous, current: next } );
    }


    fn emit( &self, event: PlayerEvent ) {
        self.events.emit( event );
    }


    fn publish( &self ) {
        let mut snapshot = self.snapshot.write().unwrap_or_else( |poisoned| poisoned.into_inner() );
        snapshot.state = self.state;
        snapshot.volume = self.volume;
        snapshot.source = self.source.clone();
    }
}
