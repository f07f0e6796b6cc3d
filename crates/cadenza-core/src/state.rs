//! Player lifecycle states and the command admission table.

use std::fmt;

use serde::Serialize;

use crate::command::CommandKind;
use crate::error::PlayerError;


/// Lifecycle state of a player session.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize )]
#[serde( rename_all = "snake_case" )]
pub enum PlayerState {
    /// No input set.
    #[default]
    Idle,
    /// Input accepted, engine resolving it.
    Opening,
    /// Input open, not yet started.
    Ready,
    /// Playing but starved for data.
    Buffering,
    Playing,
    Paused,
    /// Input open, positioned at the start.
    Stopped,
    /// Last operation failed. Only a new input or close is accepted.
    Error,
    /// Terminal.
    Closed,
}


/// Outcome of checking a command against the current state.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum Admission {
    /// Execute the command.
    Proceed,
    /// Accepted, but there is nothing to do. Confirmed with a no-op event.
    Noop,
    /// Rejected with the given error.
    Reject( PlayerError ),
}


impl PlayerState {
    /// True while an input is open and usable.
    pub fn has_input( self ) -> bool {
        matches!(
            self,
            PlayerState::Ready
                | PlayerState::Buffering
                | PlayerState::Playing
                | PlayerState::Paused
                | PlayerState::Stopped
        )
    }


    /// True while the engine is being pumped.
    pub fn is_active( self ) -> bool {
        matches!( self, PlayerState::Playing | PlayerState::Buffering )
    }


    /// Decides what a command does in this state.
    pub fn admit( self, command: CommandKind ) -> Admission {
        use PlayerState::*;

        if self == Closed {
            return match command {
                CommandKind::Close => Admission::Noop,
                _ => Admission::Reject( PlayerError::HandleClosed ),
            };
        }

        let invalid = || Admission::Reject( PlayerError::InvalidState { command, state: self } );

        match command {
            CommandKind::SetInput | CommandKind::Close | CommandKind::Ping => Admission::Proceed,

            CommandKind::Play => match self {
                Ready | Paused | Stopped => Admission::Proceed,
                Playing | Buffering => Admission::Noop,
                Idle | Opening | Error | Closed => invalid(),
            },

            CommandKind::Pause => match self {
                Playing | Buffering => Admission::Proceed,
                Paused => Admission::Noop,
                _ => invalid(),
            },

            CommandKind::Stop => match self {
                Ready | Buffering | Playing | Paused => Admission::Proceed,
                Stopped => Admission::Noop,
                _ => invalid(),
            },

            CommandKind::SetVolume | CommandKind::SeekToTime | CommandKind::SeekToPosition => {
                if self.has_input() {
                    Admission::Proceed
                } else {
                    invalid()
                }
            }
        }
    }
}


impl fmt::Display for PlayerState {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        let name = match self {
            PlayerState::Idle => "idle",
            PlayerState::Opening => "opening",
            PlayerState::Ready => "ready",
            PlayerState::Buffering => "buffering",
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
            PlayerState::Stopped => "stopped",
            PlayerState::Error => "error",
            PlayerState::Closed => "closed",
        };
        f.write_str( name )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_play_from_idle_is_invalid() {
        let admission = PlayerState::Idle.admit( CommandKind::Play );
        assert_eq!(
            admission,
            Admission::Reject( PlayerError::InvalidState {
                command: CommandKind::Play,
                state: PlayerState::Idle,
            })
        );
    }


    #[test]
    fn test_pause_when_paused_is_noop() {
        assert_eq!( PlayerState::Paused.admit( CommandKind::Pause ), Admission::Noop );
    }


    #[test]
    fn test_error_state_only_accepts_rearm_and_close() {
        for kind in [ CommandKind::Play, CommandKind::Pause, CommandKind::Stop, CommandKind::SetVolume ] {
            assert!( matches!( PlayerState::Error.admit( kind ), Admission::Reject( _ ) ), "{kind}" );
        }
        assert_eq!( PlayerState::Error.admit( CommandKind::SetInput ), Admission::Proceed );
        assert_eq!( PlayerState::Error.admit( CommandKind::Close ), Admission::Proceed );
    }


    #[test]
    fn test_closed_rejects_everything_but_close() {
        assert_eq!(
            PlayerState::Closed.admit( CommandKind::SetInput ),
            Admission::Reject( PlayerError::HandleClosed )
        );
        assert_eq!( PlayerState::Closed.admit( CommandKind::Close ), Admission::Noop );
    }


    #[test]
    fn test_volume_needs_input() {
        assert!( matches!( PlayerState::Idle.admit( CommandKind::SetVolume ), Admission::Reject( _ ) ) );
        assert_eq!( PlayerState::Stopped.admit( CommandKind::SetVolume ), Admission::Proceed );
    }
}
