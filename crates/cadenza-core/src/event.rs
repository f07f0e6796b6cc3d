//! Events delivered to a player's listener.

use std::time::Duration;

use serde::Serialize;

use crate::command::CommandKind;
use crate::engine::StreamInfo;
use crate::error::PlayerError;
use crate::source::InputSource;
use crate::state::PlayerState;


/// Stream time split into hours, minutes, seconds and hundredths.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default, Serialize )]
pub struct TimeCode {
    pub h: u32,
    pub m: u8,
    pub s: u8,
    pub f: u8,
}


impl From<Duration> for TimeCode {
    fn from( time: Duration ) -> Self {
        let secs = time.as_secs();
        Self {
            h: ( secs / 3600 ) as u32,
            m: ( ( secs / 60 ) % 60 ) as u8,
            s: ( secs % 60 ) as u8,
            f: ( time.subsec_millis() / 10 ) as u8,
        }
    }
}


impl std::fmt::Display for TimeCode {
    fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
        write!( f, "{:02}:{:02}:{:02}.{:02}", self.h, self.m, self.s, self.f )
    }
}


/// Everything a player reports.
#[derive( Debug, Clone, PartialEq, Serialize )]
#[serde( tag = "event", rename_all = "snake_case" )]
pub enum PlayerEvent {
    /// Emitted once per state transition.
    StateChanged { previous: PlayerState, current: PlayerState },

    /// The engine accepted an input. Followed by the transition to `Ready`.
    InputOpened { source: InputSource, info: StreamInfo },

    /// Fill level reported while buffering.
    BufferingProgress { percent: u8 },

    /// Effective (clamped) volume.
    VolumeChanged { requested: f32, effective: f32 },

    /// A command was accepted but had nothing to do.
    Noop { command: CommandKind, state: PlayerState },

    Seeked { timestamp: Duration },

    TimeCode { time_code: TimeCode },

    /// Playback position scaled to `0..=range`.
    Position { offset: u64, range: u64 },

    Pong { cookie: u64 },

    /// A command was rejected, or the engine failed (`command` is `None`).
    Error { command: Option<CommandKind>, error: PlayerError },

    /// The input ran out. Followed by the transition to `Stopped`.
    EndOfStream,

    /// Last event produced by the session itself; later commands are
    /// answered with `HandleClosed` errors.
    Closed,
}


/// Coarse classification of events.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize )]
#[serde( rename_all = "kebab-case" )]
pub enum EventKind {
    Opening,
    InputOpened,
    BufferingStateChanged,
    PlaybackStarted,
    PlaybackPaused,
    PlaybackStopped,
    StateChanged,
    VolumeChanged,
    Noop,
    Seeked,
    Progress,
    Pong,
    Error,
    EndOfStream,
    Closed,
}


impl PlayerEvent {
    pub fn kind( &self ) -> EventKind {
        match self {
            PlayerEvent::StateChanged { previous, current } => match ( previous, current ) {
                ( _, PlayerState::Opening ) => EventKind::Opening,
                ( _, PlayerState::Buffering ) | ( PlayerState::Buffering, PlayerState::Playing ) => {
                    EventKind::BufferingStateChanged
                }
                ( _, PlayerState::Playing ) => EventKind::PlaybackStarted,
                ( _, PlayerState::Paused ) => EventKind::PlaybackPaused,
                ( _, PlayerState::Stopped ) => EventKind::PlaybackStopped,
                _ => EventKind::StateChanged,
            },
            PlayerEvent::InputOpened { .. } => EventKind::InputOpened,
            PlayerEvent::BufferingProgress { .. } => EventKind::BufferingStateChanged,
            PlayerEvent::VolumeChanged { .. } => EventKind::VolumeChanged,
            PlayerEvent::Noop { .. } => EventKind::Noop,
            PlayerEvent::Seeked { .. } => EventKind::Seeked,
            PlayerEvent::TimeCode { .. } | PlayerEvent::Position { .. } => EventKind::Progress,
            PlayerEvent::Pong { .. } => EventKind::Pong,
            PlayerEvent::Error { .. } => EventKind::Error,
            PlayerEvent::EndOfStream => EventKind::EndOfStream,
            PlayerEvent::Closed => EventKind::Closed,
        }
    }


    /// The new state, if this is a transition.
    pub fn transition_to( &self ) -> Option<PlayerState> {
        match self {
            PlayerEvent::StateChanged { current, .. } => Some( *current ),
            _ => None,
        }
    }


    pub fn error( &self ) -> Option<&PlayerError> {
        match self {
            PlayerEvent::Error { error, .. } => Some( error ),
            _ => None,
        }
    }
}


/// Receives a player's events on its dispatch thread.
///
/// Listeners should return quickly. A slow listener delays its own later
/// deliveries but never the engine.
pub trait EventListener: Send + 'static {
    fn on_event( &mut self, event: PlayerEvent );
}


impl<F> EventListener for F
where
    F: FnMut( PlayerEvent ) + Send + 'static,
{
    fn on_event( &mut self, event: PlayerEvent ) {
        self( event )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_time_code_from_duration() {
        let tc = TimeCode::from( Duration::from_millis( 3_723_450 ) );
        assert_eq!( tc, TimeCode { h: 1, m: 2, s: 3, f: 45 } );
        assert_eq!( tc.to_string(), "01:02:03.45" );
    }


    #[test]
    fn test_transition_kinds() {
        let started = PlayerEvent::StateChanged {
            previous: PlayerState::Ready,
            current: PlayerState::Playing,
        };
        assert_eq!( started.kind(), EventKind::PlaybackStarted );

        let resumed = PlayerEvent::StateChanged {
            previous: PlayerState::Buffering,
            current: PlayerState::Playing,
        };
        assert_eq!( resumed.kind(), EventKind::BufferingStateChanged );

        let stopped = PlayerEvent::StateChanged {
            previous: PlayerState::Playing,
            current: PlayerState::Stopped,
        };
        assert_eq!( stopped.kind(), EventKind::PlaybackStopped );
    }


    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value( PlayerEvent::VolumeChanged { requested: 1.5, effective: 1.0 } ).unwrap();
        assert_eq!( json[ "event" ], "volume_changed" );
        assert_eq!( json[ "effective" ], 1.0 );
    }
}
