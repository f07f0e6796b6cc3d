//! Error taxonomy for the remote-control layer.
//!
//! Only [`ContractError`] is ever returned synchronously from a command call.
//! Everything else travels as a [`PlayerError`] inside an error event.

use serde::Serialize;
use thiserror::Error;

use crate::arbiter::PlayerId;
use crate::command::CommandKind;
use crate::state::PlayerState;


/// Programming-contract violations reported at the call site.
#[derive( Debug, Clone, PartialEq, Eq, Error )]
pub enum ContractError {
    #[error( "Input location must not be empty" )]
    EmptyLocation,

    #[error( "Media type hint must not be empty" )]
    EmptyMediaType,

    #[error( "Failed to start player thread: {0}" )]
    Spawn( String ),
}


/// Failures reported asynchronously through the event channel.
#[derive( Debug, Clone, PartialEq, Eq, Error, Serialize )]
#[serde( tag = "kind", rename_all = "snake_case" )]
pub enum PlayerError {
    #[error( "{command} is not valid in state {state}" )]
    InvalidState { command: CommandKind, state: PlayerState },

    #[error( "Cannot resolve '{location}': {reason}" )]
    ResolutionFailure { location: String, reason: String },

    #[error( "Validation failed: {reason}" )]
    ValidationFailure { reason: String },

    #[error( "Player handle is closed" )]
    HandleClosed,

    #[error( "Engine failure: {reason}" )]
    EngineFailure { reason: String },

    #[error( "Output device is held by player {holder}" )]
    DeviceBusy { holder: PlayerId },
}


/// Errors raised by an [`Engine`](crate::engine::Engine) implementation.
#[derive( Debug, Error )]
pub enum EngineError {
    #[error( "Location not found: {0}" )]
    NotFound( String ),

    #[error( "Unsupported format: {0}" )]
    UnsupportedFormat( String ),

    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Decode error: {0}" )]
    Decode( String ),

    #[error( "Output error: {0}" )]
    Output( String ),

    #[error( "No input is open" )]
    NotOpen,
}


impl EngineError {
    /// True when the failure is about the input itself rather than the engine.
    pub fn is_resolution( &self ) -> bool {
        matches!( self, EngineError::NotFound( _ ) | EngineError::UnsupportedFormat( _ ) )
            || matches!( self, EngineError::Io( e ) if e.kind() == std::io::ErrorKind::NotFound )
    }


    /// Maps the engine error into the caller-facing taxonomy.
    pub fn into_player_error( self, location: Option<&str> ) -> PlayerError {
        match location {
            Some( location ) if self.is_resolution() => PlayerError::ResolutionFailure {
                location: location.to_string(),
                reason: self.to_string(),
            },
            _ => PlayerError::EngineFailure { reason: self.to_string() },
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_resolution_errors_map_to_resolution_failure() {
        let err = EngineError::NotFound( "a.mp4".into() ).into_player_error( Some( "a.mp4" ) );
        assert!( matches!( err, PlayerError::ResolutionFailure { ref location, .. } if location == "a.mp4" ) );
    }


    #[test]
    fn test_io_not_found_is_resolution() {
        let io = std::io::Error::new( std::io::ErrorKind::NotFound, "gone" );
        assert!( EngineError::Io( io ).is_resolution() );
    }


    #[test]
    fn test_other_errors_map_to_engine_failure() {
        let err = EngineError::Output( "device lost".into() ).into_player_error( Some( "a.mp4" ) );
        assert!( matches!( err, PlayerError::EngineFailure { .. } ) );
    }


    #[test]
    fn test_player_error_serializes_with_kind_tag() {
        let json = serde_json::to_value( PlayerError::HandleClosed ).unwrap();
        assert_eq!( json[ "kind" ], "handle_closed" );
    }
}
