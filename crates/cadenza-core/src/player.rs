//! The player handle.
//!
//! A [`Player`] is the caller's remote control. Every command returns
//! immediately; the outcome arrives later as events on the listener the
//! player was created with.

use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::mpsc::{ self, Sender };
use std::sync::{ Arc, RwLock };
use std::thread::{ self, JoinHandle };
use std::time::Duration;

use crate::arbiter::{ OutputArbiter, PlayerId };
use crate::channel::EventChannel;
use crate::command::Command;
use crate::config::PlayerConfig;
use crate::engine::Engine;
use crate::error::ContractError;
use crate::event::EventListener;
use crate::server::{ Server, Snapshot };
use crate::source::InputSource;
use crate::state::PlayerState;


/// Remote control for one playback session.
///
/// Commands are processed in the order they are issued, on the player's own
/// server thread. Dropping the handle closes the session and waits for the
/// remaining events to be delivered.
pub struct Player {
    id: PlayerId,
    commands: Option<Sender<Command>>,
    closed: AtomicBool,
    snapshot: Arc<RwLock<Snapshot>>,
    server: Option<JoinHandle<()>>,
    events: EventChannel,
}


impl Player {
    /// Creates a player with default settings and its own output arbiter.
    pub fn new( engine: impl Engine, listener: impl EventListener ) -> Result<Self, ContractError> {
        let config = PlayerConfig::default();
        let arbiter = Arc::new( OutputArbiter::new( config.arbitration ) );
        Self::spawn( Box::new( engine ), config, arbiter, Box::new( listener ) )
    }


    /// Creates a player sharing `arbiter` with other players.
    ///
    /// @param engine - Engine driven exclusively by this player
    /// @param config - Player settings; invalid values are replaced by defaults
    /// @param arbiter - Output device arbitration shared across players
    /// @param listener - Receives every event of this player
    pub fn spawn(
        engine: Box<dyn Engine>,
        config: PlayerConfig,
        arbiter: Arc<OutputArbiter>,
        listener: Box<dyn EventListener>,
    ) -> Result<Self, ContractError> {
        let id = PlayerId::next();
        let config = config.sanitized();
        let spawn_error = |e: std::io::Error| ContractError::Spawn( e.to_string() );

        let events = EventChannel::spawn_boxed( id, listener ).map_err( spawn_error )?;
        let sender = events.sender().ok_or_else( || ContractError::Spawn( "event channel closed".into() ) )?;

        let snapshot = Arc::new( RwLock::new( Snapshot::default() ) );
        let server = Server::new( id, engine, config, arbiter, sender, Arc::clone( &snapshot ) );

        let ( tx, rx ) = mpsc::channel();
        let server = thread::Builder::new()
            .name( format!( "cadenza-player-{}", id.get() ) )
            .spawn( move || server.run( rx ) )
            .map_err( spawn_error )?;

        tracing::info!( "Player {}: created", id );

        Ok( Self {
            id,
            commands: Some( tx ),
            closed: AtomicBool::new( false ),
            snapshot,
            server: Some( server ),
            events,
        } )
    }


    fn send( &self, command: Command ) -> &Self {
        if let Some( tx ) = &self.commands {
            if tx.send( command ).is_err() {
                tracing::warn!( "Player {}: server thread is gone", self.id );
            }
        }
        self
    }


    /// Replaces the current input.
    ///
    /// Fails synchronously only for a blank location or media type hint;
    /// everything else is reported through events.
    pub fn set_input( &self, location: &str, media_type: Option<&str> ) -> Result<&Self, ContractError> {
        let mut source = InputSource::new( location )?;
        if let Some( media_type ) = media_type {
            source = source.with_media_type( media_type )?;
        }
        Ok( self.set_source( source ) )
    }


    pub fn set_source( &self, source: InputSource ) -> &Self {
        self.send( Command::SetInput( source ) )
    }


    pub fn play( &self ) -> &Self {
        self.send( Command::Play )
    }


    pub fn pause( &self ) -> &Self {
        self.send( Command::Pause )
    }


    /// Stops playback and rewinds to the start of the input.
    pub fn stop( &self ) -> &Self {
        self.send( Command::Stop )
    }


    /// Requests a normalized volume; out-of-range levels are clamped.
    pub fn set_volume( &self, level: f32 ) -> &Self {
        self.send( Command::SetVolume( level ) )
    }


    pub fn seek_to_time( &self, time: Duration ) -> &Self {
        self.send( Command::SeekToTime( time ) )
    }


    pub fn seek_to_position( &self, offset: u64, range: u64 ) -> &Self {
        self.send( Command::SeekToPosition { offset, range } )
    }


    /// Answered with a `Pong` once every earlier command has been handled.
    pub fn ping( &self, cookie: u64 ) -> &Self {
        self.send( Command::Ping( cookie ) )
    }


    /// Ends the session. Calling it again does nothing.
    pub fn close( &self ) -> &Self {
        if self.closed.swap( true, Ordering::SeqCst ) {
            return self;
        }
        self.send( Command::Close )
    }


    /// Issues a parsed command.
    pub fn execute( &self, command: Command ) -> &Self {
        match command {
            Command::Close => self.close(),
            other => self.send( other ),
        }
    }


    pub fn id( &self ) -> PlayerId {
        self.id
    }


    pub fn state( &self ) -> PlayerState {
        self.read().state
    }


    pub fn volume( &self ) -> f32 {
        self.read().volume
    }


    pub fn source( &self ) -> Option<InputSource> {
        self.read().source.clone()
    }


    /// True once `close` has been called on this handle.
    pub fn is_closed( &self ) -> bool {
        self.closed.load( Ordering::SeqCst )
    }


    fn read( &self ) -> std::sync::RwLockReadGuard<'_, Snapshot> {
        self.snapshot.read().unwrap_or_else( |poisoned| poisoned.into_inner() )
    }
}


impl Drop for Player {
    fn drop( &mut self ) {
        self.close();
        // Disconnecting the queue ends the server loop
        self.commands = None;
        if let Some( server ) = self.server.take() {
            if server.join().is_err() {
                tracing::error!( "Player {}: server thread panicked", self.id );
            }
        }
        self.events.join();
        tracing::debug!( "Player {}: dropped", self.id );
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::sync::{ Condvar, Mutex };
    use std::time::Instant;

    use crate::arbiter::ArbitrationPolicy;
    use crate::command::CommandKind;
    use crate::engine::memory::{ EngineCall, MemoryClip, MemoryControl, MemoryEngine, Pacing };
    use crate::engine::Pump;
    use crate::error::PlayerError;
    use crate::event::{ PlayerEvent, TimeCode };


    const WAIT: Duration = Duration::from_secs( 5 );


    /// Collects events and lets a test wait for them.
    #[derive( Clone, Default )]
    struct Recorder {
        inner: Arc<( Mutex<Vec<PlayerEvent>>, Condvar )>,
    }


    impl Recorder {
        fn listener( &self ) -> impl FnMut( PlayerEvent ) + Send + 'static {
            let inner = Arc::clone( &self.inner );
            move |event| {
                let ( events, signal ) = &*inner;
                events.lock().unwrap().push( event );
                signal.notify_all();
            }
        }


        fn wait_until( &self, done: impl Fn( &[PlayerEvent] ) -> bool ) -> Vec<PlayerEvent> {
            let ( events, signal ) = &*self.inner;
            let deadline = Instant::now() + WAIT;
            let mut guard = events.lock().unwrap();
            while !done( guard.as_slice() ) {
                let now = Instant::now();
                assert!( now < deadline, "timed out; events so far: {:#?}", *guard );
                guard = signal.wait_timeout( guard, deadline - now ).unwrap().0;
            }
            guard.clone()
        }


        fn wait_for( &self, event: PlayerEvent ) -> Vec<PlayerEvent> {
            self.wait_until( |events| events.contains( &event ) )
        }


        /// Everything up to the matching pong.
        fn barrier( &self, player: &Player, cookie: u64 ) -> Vec<PlayerEvent> {
            player.ping( cookie );
            self.wait_for( PlayerEvent::Pong { cookie } )
        }


        fn clear( &self ) {
            self.inner.0.lock().unwrap().clear();
        }
    }


    fn transition( previous: PlayerState, current: PlayerState ) -> PlayerEvent {
        PlayerEvent::StateChanged { previous, current }
    }


    fn transitions( events: &[PlayerEvent] ) -> Vec<PlayerState> {
        events.iter().filter_map( PlayerEvent::transition_to ).collect()
    }


    fn manual_player( clip: Duration ) -> ( Player, MemoryControl, Recorder ) {
        manual_player_with( clip, PlayerConfig::default(), Arc::new( OutputArbiter::default() ) )
    }


    fn manual_player_with(
        clip: Duration,
        config: PlayerConfig,
        arbiter: Arc<OutputArbiter>,
    ) -> ( Player, MemoryControl, Recorder ) {
        let engine = MemoryEngine::new( Pacing::Manual ).with_clip( "a.mp4", MemoryClip::new( clip ) );
        let control = engine.control();
        let recorder = Recorder::default();
        let player = Player::spawn(
            Box::new( engine ),
            config,
            arbiter,
            Box::new( recorder.listener() ),
        ).unwrap();
        ( player, control, recorder )
    }


    fn opened( clip: Duration ) -> ( Player, MemoryControl, Recorder ) {
        let ( player, control, recorder ) = manual_player( clip );
        player.set_input( "a.mp4", None ).unwrap();
        recorder.barrier( &player, 0 );
        recorder.clear();
        ( player, control, recorder )
    }


    #[test]
    fn test_play_without_input_is_rejected_without_transition() {
        let ( player, _, recorder ) = manual_player( Duration::from_secs( 1 ) );
        player.play();
        let events = recorder.barrier( &player, 1 );

        assert_eq!( events, vec![
            PlayerEvent::Error {
                command: Some( CommandKind::Play ),
                error: PlayerError::InvalidState { command: CommandKind::Play, state: PlayerState::Idle },
            },
            PlayerEvent::Pong { cookie: 1 },
        ] );
        assert_eq!( player.state(), PlayerState::Idle );
    }


    #[test]
    fn test_volume_and_pause_without_input_are_rejected() {
        let ( player, _, recorder ) = manual_player( Duration::from_secs( 1 ) );
        player.set_volume( 0.5 ).pause().stop();
        let events = recorder.barrier( &player, 1 );

        let rejected: Vec<CommandKind> = events.iter().filter_map( |e| match e {
            PlayerEvent::Error { command, error: PlayerError::InvalidState { .. } } => *command,
            _ => None,
        } ).collect();
        assert_eq!( rejected, vec![ CommandKind::SetVolume, CommandKind::Pause, CommandKind::Stop ] );
        assert!( transitions( &events ).is_empty() );
    }


    #[test]
    fn test_open_then_play_emits_ordered_events() {
        let ( player, _, recorder ) = manual_player( Duration::from_secs( 1 ) );
        player.set_input( "a.mp4", Some( "audio/mp4" ) ).unwrap().play();
        let events = recorder.barrier( &player, 1 );

        assert_eq!( transitions( &events ), vec![
            PlayerState::Opening,
            PlayerState::Ready,
            PlayerState::Playing,
        ] );
        let opened = events.iter().position( |e| matches!( e, PlayerEvent::InputOpened { .. } ) ).unwrap();
        let ready = events.iter().position( |e| *e == transition( PlayerState::Opening, PlayerState::Ready ) ).unwrap();
        assert!( opened < ready );
        assert_eq!( player.state(), PlayerState::Playing );
        assert_eq!( player.source().unwrap().media_type(), Some( "audio/mp4" ) );
    }


    #[test]
    fn test_blank_location_is_a_contract_error() {
        let ( player, _, recorder ) = manual_player( Duration::from_secs( 1 ) );
        assert_eq!( player.set_input( "  ", None ).err(), Some( ContractError::EmptyLocation ) );
        let events = recorder.barrier( &player, 1 );
        assert_eq!( events, vec![ PlayerEvent::Pong { cookie: 1 } ] );
    }


    #[test]
    fn test_unresolvable_input_moves_to_error() {
        let ( player, _, recorder ) = manual_player( Duration::from_secs( 1 ) );
        player.set_input( "missing.mp4", None ).unwrap();
        let events = recorder.barrier( &player, 1 );

        assert!( events.iter().any( |e| matches!(
            e,
            PlayerEvent::Error {
                command: Some( CommandKind::SetInput ),
                error: PlayerError::ResolutionFailure { location, .. },
            } if location == "missing.mp4"
        ) ) );
        assert_eq!( transitions( &events ), vec![ PlayerState::Opening, PlayerState::Error ] );
        assert_eq!( player.source(), None );

        // Recoverable with a new input
        player.set_input( "a.mp4", None ).unwrap();
        recorder.barrier( &player, 2 );
        assert_eq!( player.state(), PlayerState::Ready );
    }


    #[test]
    fn test_volume_is_clamped() {
        let ( player, control, recorder ) = opened( Duration::from_secs( 1 ) );
        player.set_volume( 1.5 ).set_volume( -2.0 );
        let events = recorder.barrier( &player, 1 );

        assert_eq!( events, vec![
            PlayerEvent::VolumeChanged { requested: 1.5, effective: 1.0 },
            PlayerEvent::VolumeChanged { requested: -2.0, effective: 0.0 },
            PlayerEvent::Pong { cookie: 1 },
        ] );
        assert_eq!( player.volume(), 0.0 );
        assert_eq!( control.count( &EngineCall::SetVolume( 0.0 ) ), 1 );
    }


    #[test]
    fn test_loud_volume_while_playing_is_clamped_not_rejected() {
        let ( player, _, recorder ) = manual_player( Duration::from_secs( 1 ) );
        player.set_input( "a.mp4", None ).unwrap().play();
        recorder.wait_for( transition( PlayerState::Ready, PlayerState::Playing ) );

        player.set_volume( 1.5 );
        let events = recorder.barrier( &player, 1 );
        assert!( events.contains( &PlayerEvent::VolumeChanged { requested: 1.5, effective: 1.0 } ) );
        assert!( events.iter().all( |e| e.error().is_none() ) );
        assert_eq!( player.state(), PlayerState::Playing );
    }


    #[test]
    fn test_nan_volume_is_a_validation_failure() {
        let ( player, _, recorder ) = opened( Duration::from_secs( 1 ) );
        player.set_volume( f32::NAN );
        let events = recorder.barrier( &player, 1 );

        assert!( matches!(
            events[ 0 ],
            PlayerEvent::Error { error: PlayerError::ValidationFailure { .. }, .. }
        ) );
        assert_eq!( player.volume(), 1.0 );
    }


    #[test]
    fn test_configured_volume_range() {
        let config = PlayerConfig {
            volume_range: crate::config::VolumeRange { min: 0.0, max: 2.0 },
            ..PlayerConfig::default()
        };
        let ( player, _, recorder ) = manual_player_with(
            Duration::from_secs( 1 ),
            config,
            Arc::new( OutputArbiter::default() ),
        );
        player.set_input( "a.mp4", None ).unwrap().set_volume( 1.5 );
        let events = recorder.barrier( &player, 1 );
        assert!( events.contains( &PlayerEvent::VolumeChanged { requested: 1.5, effective: 1.5 } ) );
    }


    #[test]
    fn test_pause_when_paused_is_a_noop() {
        let ( player, _, recorder ) = opened( Duration::from_secs( 1 ) );
        player.play().pause().pause();
        let events = recorder.barrier( &player, 1 );

        assert_eq!( transitions( &events ), vec![ PlayerState::Playing, PlayerState::Paused ] );
        assert!( events.contains( &PlayerEvent::Noop { command: CommandKind::Pause, state: PlayerState::Paused } ) );
        assert!( events.iter().all( |e| e.error().is_none() ) );
    }


    #[test]
    fn test_play_when_playing_is_a_noop() {
        let ( player, _, recorder ) = opened( Duration::from_secs( 1 ) );
        player.play().play();
        let events = recorder.barrier( &player, 1 );
        assert_eq!( transitions( &events ), vec![ PlayerState::Playing ] );
        assert!( events.contains( &PlayerEvent::Noop { command: CommandKind::Play, state: PlayerState::Playing } ) );
    }


    #[test]
    fn test_set_input_while_playing_stops_first() {
        let ( player, control, recorder ) = opened( Duration::from_secs( 1 ) );
        control.add_clip( "b.mp4", MemoryClip::new( Duration::from_secs( 2 ) ) );
        player.play();
        player.set_input( "b.mp4", None ).unwrap();
        let events = recorder.barrier( &player, 1 );

        assert_eq!( transitions( &events ), vec![
            PlayerState::Playing,
            PlayerState::Stopped,
            PlayerState::Opening,
            PlayerState::Ready,
        ] );
        let stopped = events.iter()
            .position( |e| *e == transition( PlayerState::Playing, PlayerState::Stopped ) )
            .unwrap();
        let opened = events.iter().position( |e| matches!( e, PlayerEvent::InputOpened { .. } ) ).unwrap();
        assert!( stopped < opened );
        assert_eq!( player.source().unwrap().location(), "b.mp4" );
    }


    #[test]
    fn test_stop_rewinds_and_stop_again_is_a_noop() {
        let ( player, control, recorder ) = opened( Duration::from_secs( 1 ) );
        player.play().stop().stop();
        let events = recorder.barrier( &player, 1 );

        assert_eq!( transitions( &events ), vec![ PlayerState::Playing, PlayerState::Stopped ] );
        assert!( events.contains( &PlayerEvent::Noop { command: CommandKind::Stop, state: PlayerState::Stopped } ) );
        assert_eq!( control.count( &EngineCall::Stop ), 1 );

        // Stopped keeps the input
        player.play();
        recorder.barrier( &player, 2 );
        assert_eq!( player.state(), PlayerState::Playing );
    }


    #[test]
    fn test_close_twice_disposes_once() {
        let ( player, control, recorder ) = opened( Duration::from_secs( 1 ) );
        player.close().close();
        let events = recorder.wait_for( PlayerEvent::Closed );

        assert_eq!( events, vec![
            transition( PlayerState::Ready, PlayerState::Closed ),
            PlayerEvent::Closed,
        ] );
        assert_eq!( control.count( &EngineCall::Dispose ), 1 );
        assert!( player.is_closed() );
    }


    #[test]
    fn test_commands_after_close_report_handle_closed() {
        let ( player, _, recorder ) = opened( Duration::from_secs( 1 ) );
        player.close().play();
        player.set_input( "a.mp4", None ).unwrap();
        player.ping( 1 );

        let closed_errors = |events: &[PlayerEvent]| -> Vec<Option<CommandKind>> {
            events.iter().filter_map( |e| match e {
                PlayerEvent::Error { command, error: PlayerError::HandleClosed } => Some( *command ),
                _ => None,
            } ).collect()
        };
        let events = recorder.wait_until( |events| closed_errors( events ).len() == 3 );

        assert!( !events.contains( &PlayerEvent::Pong { cookie: 1 } ) );
        let closed_errors = closed_errors( &events );
        assert_eq!( closed_errors, vec![
            Some( CommandKind::Play ),
            Some( CommandKind::SetInput ),
            Some( CommandKind::Ping ),
        ] );
        assert_eq!( player.state(), PlayerState::Closed );
    }


    #[test]
    fn test_drop_closes_and_delivers_remaining_events() {
        let ( player, control, recorder ) = opened( Duration::from_secs( 1 ) );
        player.play();
        drop( player );

        let events = recorder.wait_for( PlayerEvent::Closed );
        assert_eq!( events.last(), Some( &PlayerEvent::Closed ) );
        assert_eq!( control.count( &EngineCall::Dispose ), 1 );
    }


    #[test]
    fn test_end_of_stream_stops_and_rewinds() {
        let ( player, control, recorder ) = opened( Duration::from_millis( 40 ) );
        player.play();
        control.advance( 3 );
        let events = recorder.wait_for( transition( PlayerState::Playing, PlayerState::Stopped ) );

        let end = events.iter().position( |e| *e == PlayerEvent::EndOfStream ).unwrap();
        let stopped = events.iter()
            .position( |e| *e == transition( PlayerState::Playing, PlayerState::Stopped ) )
            .unwrap();
        assert!( end < stopped );
        assert_eq!( control.count( &EngineCall::Stop ), 1 );
    }


    #[test]
    fn test_engine_failure_moves_to_error() {
        let ( player, control, recorder ) = opened( Duration::from_secs( 1 ) );
        control.push_failure( "corrupt packet" );
        player.play();
        let events = recorder.wait_for( transition( PlayerState::Playing, PlayerState::Error ) );

        assert!( events.iter().any( |e| matches!(
            e,
            PlayerEvent::Error { command: None, error: PlayerError::EngineFailure { .. } }
        ) ) );

        player.play();
        let events = recorder.barrier( &player, 1 );
        assert!( events.iter().any( |e| matches!(
            e,
            PlayerEvent::Error { error: PlayerError::InvalidState { state: PlayerState::Error, .. }, .. }
        ) ) );
    }


    #[test]
    fn test_buffering_round_trip() {
        let ( player, control, recorder ) = opened( Duration::from_secs( 1 ) );
        control.push_pump( Pump::Buffering { percent: 10 } );
        control.push_pump( Pump::Buffering { percent: 10 } );
        control.push_pump( Pump::Buffering { percent: 60 } );
        control.push_pump( Pump::Advanced );
        player.play();
        let events = recorder.wait_for( transition( PlayerState::Buffering, PlayerState::Playing ) );

        assert_eq!( transitions( &events ), vec![
            PlayerState::Playing,
            PlayerState::Buffering,
            PlayerState::Playing,
        ] );
        let progress: Vec<u8> = events.iter().filter_map( |e| match e {
            PlayerEvent::BufferingProgress { percent } => Some( *percent ),
            _ => None,
        } ).collect();
        assert_eq!( progress, vec![ 10, 60 ] );
    }


    #[test]
    fn test_pause_while_buffering() {
        let ( player, control, recorder ) = opened( Duration::from_secs( 1 ) );
        control.push_pump( Pump::Buffering { percent: 5 } );
        player.play();
        recorder.wait_for( transition( PlayerState::Playing, PlayerState::Buffering ) );
        player.pause();
        let events = recorder.barrier( &player, 1 );
        assert!( events.contains( &transition( PlayerState::Buffering, PlayerState::Paused ) ) );
    }


    #[test]
    fn test_time_code_and_position_are_quantized() {
        let ( player, control, recorder ) = opened( Duration::from_secs( 3 ) );
        player.play();
        control.advance( 151 );
        let events = recorder.wait_for( PlayerEvent::EndOfStream );

        let time_codes: Vec<TimeCode> = events.iter().filter_map( |e| match e {
            PlayerEvent::TimeCode { time_code } => Some( *time_code ),
            _ => None,
        } ).collect();
        assert_eq!( time_codes, ( 0..=3 ).map( |s| TimeCode { h: 0, m: 0, s, f: 0 } ).collect::<Vec<_>>() );

        let positions: Vec<u64> = events.iter().filter_map( |e| match e {
            PlayerEvent::Position { offset, range: 400 } => Some( *offset ),
            _ => None,
        } ).collect();
        assert!( positions.windows( 2 ).all( |w| w[ 0 ] < w[ 1 ] ) );
        assert_eq!( positions.last(), Some( &400 ) );
    }


    #[test]
    fn test_seek_validation_and_report() {
        let ( player, control, recorder ) = opened( Duration::from_secs( 10 ) );
        player
            .seek_to_position( 5, 0 )
            .seek_to_position( 11, 10 )
            .seek_to_position( 1, 4 )
            .seek_to_time( Duration::from_secs( 7 ) );
        let events = recorder.barrier( &player, 1 );

        let failures = events.iter()
            .filter( |e| matches!( e, PlayerEvent::Error { error: PlayerError::ValidationFailure { .. }, .. } ) )
            .count();
        assert_eq!( failures, 2 );
        assert!( events.contains( &PlayerEvent::Seeked { timestamp: Duration::from_millis( 2500 ) } ) );
        assert!( events.contains( &PlayerEvent::Seeked { timestamp: Duration::from_secs( 7 ) } ) );
        assert_eq!( control.count( &EngineCall::SeekToPosition( 1, 4 ) ), 1 );
    }


    #[test]
    fn test_exclusive_arbitration_rejects_second_player() {
        let arbiter = Arc::new( OutputArbiter::new( ArbitrationPolicy::Exclusive ) );
        let ( first, _, first_events ) = manual_player_with(
            Duration::from_secs( 1 ),
            PlayerConfig::default(),
            Arc::clone( &arbiter ),
        );
        let ( second, _, second_events ) = manual_player_with(
            Duration::from_secs( 1 ),
            PlayerConfig::default(),
            Arc::clone( &arbiter ),
        );

        first.set_input( "a.mp4", None ).unwrap().play();
        first_events.barrier( &first, 1 );
        second.set_input( "a.mp4", None ).unwrap().play();
        let events = second_events.barrier( &second, 1 );

        assert!( events.contains( &PlayerEvent::Error {
            command: Some( CommandKind::Play ),
            error: PlayerError::DeviceBusy { holder: first.id() },
        } ) );
        assert_eq!( second.state(), PlayerState::Ready );

        // Pausing the first player frees the device
        first.pause();
        first_events.barrier( &first, 2 );
        second.play();
        second_events.barrier( &second, 2 );
        assert_eq!( second.state(), PlayerState::Playing );
        assert!( arbiter.is_held_by( second.id() ) );
    }


    #[test]
    fn test_shared_arbitration_allows_concurrent_players() {
        let arbiter = Arc::new( OutputArbiter::new( ArbitrationPolicy::Shared ) );
        let players: Vec<_> = ( 0..3 )
            .map( |_| manual_player_with( Duration::from_secs( 1 ), PlayerConfig::default(), Arc::clone( &arbiter ) ) )
            .collect();
        for ( player, _, recorder ) in &players {
            player.set_input( "a.mp4", None ).unwrap().play();
            recorder.barrier( player, 1 );
            assert_eq!( player.state(), PlayerState::Playing );
        }
        assert_eq!( arbiter.holders().len(), 3 );
    }


    #[test]
    fn test_execute_routes_close_through_idempotent_path() {
        let ( player, control, recorder ) = opened( Duration::from_secs( 1 ) );
        player.execute( Command::Close ).execute( Command::Close ).close();
        recorder.wait_for( PlayerEvent::Closed );
        drop( player );
        assert_eq!( control.count( &EngineCall::Dispose ), 1 );
    }
}
