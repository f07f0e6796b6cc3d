//! Player commands and their text form.
//!
//! Commands are what a [`Player`](crate::Player) queues for its server thread.
//! The text form is used by scripted and interactive front ends.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::source::InputSource;


/// Errors that can occur while parsing command text.
#[derive( Debug, Error, PartialEq )]
pub enum ParseError {
    #[error( "Unknown command: {0}" )]
    Unknown( String ),

    #[error( "Invalid argument: {0}" )]
    InvalidArgument( String ),

    #[error( "Missing argument: {0}" )]
    MissingArgument( String ),
}


/// A request queued against a player.
#[derive( Debug, Clone, PartialEq )]
pub enum Command {
    SetInput( InputSource ),
    Play,
    Pause,
    Stop,
    SetVolume( f32 ),
    SeekToTime( Duration ),
    SeekToPosition { offset: u64, range: u64 },
    Ping( u64 ),
    Close,
}


/// Operand-free discriminant of a [`Command`], carried by events.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize )]
#[serde( rename_all = "snake_case" )]
pub enum CommandKind {
    SetInput,
    Play,
    Pause,
    Stop,
    SetVolume,
    SeekToTime,
    SeekToPosition,
    Ping,
    Close,
}


impl Command {
    pub fn kind( &self ) -> CommandKind {
        match self {
            Command::SetInput( _ ) => CommandKind::SetInput,
            Command::Play => CommandKind::Play,
            Command::Pause => CommandKind::Pause,
            Command::Stop => CommandKind::Stop,
            Command::SetVolume( _ ) => CommandKind::SetVolume,
            Command::SeekToTime( _ ) => CommandKind::SeekToTime,
            Command::SeekToPosition { .. } => CommandKind::SeekToPosition,
            Command::Ping( _ ) => CommandKind::Ping,
            Command::Close => CommandKind::Close,
        }
    }


    /// Parses a command string such as `pause`, `vol 0.5` or `input a.mp4 audio/mp4`.
    ///
    /// @param input - The command string to parse
    ///
    /// @returns The parsed command or an error
    pub fn parse( input: &str ) -> Result<Self, ParseError> {
        let input = input.trim().trim_start_matches( '/' );
        let mut parts = input.splitn( 2, ' ' );
        let cmd = parts.next().unwrap_or( "" ).to_lowercase();
        let args = parts.next().map( |s| s.trim() ).filter( |s| !s.is_empty() );

        match cmd.as_str() {
            "input" | "open" | "in" => {
                let args = args
                    .ok_or_else( || ParseError::MissingArgument( "location".into() ) )?;
                // A trailing token containing '/' that is not a path is a media type hint
                let ( location, media_type ) = match args.rsplit_once( ' ' ) {
                    Some(( loc, hint )) if is_media_type( hint ) => ( loc.trim(), Some( hint ) ),
                    _ => ( args, None ),
                };
                let mut source = InputSource::new( location )
                    .map_err( |e| ParseError::InvalidArgument( e.to_string() ) )?;
                if let Some( hint ) = media_type {
                    source = source.with_media_type( hint )
                        .map_err( |e| ParseError::InvalidArgument( e.to_string() ) )?;
                }
                Ok( Command::SetInput( source ) )
            }
            "play" | "p" => Ok( Command::Play ),
            "pause" | "pa" => Ok( Command::Pause ),
            "stop" | "st" => Ok( Command::Stop ),
            "vol" | "volume" => {
                let level = args
                    .ok_or_else( || ParseError::MissingArgument( "volume level".into() ) )?;
                let level: f32 = level.parse()
                    .map_err( |_| ParseError::InvalidArgument( format!( "Invalid volume: {}", level ) ) )?;
                Ok( Command::SetVolume( level ) )
            }
            "seek" | "sk" => {
                let time_str = args
                    .ok_or_else( || ParseError::MissingArgument( "time position".into() ) )?;
                if let Some(( offset, range )) = time_str.split_once( '/' ) {
                    let offset = parse_u64( offset )?;
                    let range = parse_u64( range )?;
                    Ok( Command::SeekToPosition { offset, range } )
                } else {
                    Ok( Command::SeekToTime( parse_time( time_str )? ) )
                }
            }
            "ping" => {
                let cookie = args.map( parse_u64 ).transpose()?.unwrap_or( 0 );
                Ok( Command::Ping( cookie ) )
            }
            "close" | "quit" | "q" => Ok( Command::Close ),

            "" => Err( ParseError::Unknown( "empty command".into() ) ),
            other => Err( ParseError::Unknown( other.to_string() ) ),
        }
    }
}


impl FromStr for Command {
    type Err = ParseError;


    fn from_str( s: &str ) -> Result<Self, Self::Err> {
        Command::parse( s )
    }
}


impl CommandKind {
    pub fn name( self ) -> &'static str {
        match self {
            CommandKind::SetInput => "set_input",
            CommandKind::Play => "play",
            CommandKind::Pause => "pause",
            CommandKind::Stop => "stop",
            CommandKind::SetVolume => "set_volume",
            CommandKind::SeekToTime => "seek_to_time",
            CommandKind::SeekToPosition => "seek_to_position",
            CommandKind::Ping => "ping",
            CommandKind::Close => "close",
        }
    }
}


impl fmt::Display for CommandKind {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        f.write_str( self.name() )
    }
}


/// A command scheduled at an offset from the start of a session.
#[derive( Debug, Clone, PartialEq )]
pub struct ScriptStep {
    pub at: Duration,
    pub command: Command,
}


impl FromStr for ScriptStep {
    type Err = ParseError;


    /// Parses `<delay>:<command>`, e.g. `3000:pause` or `2.5s:vol 0.8`.
    fn from_str( s: &str ) -> Result<Self, Self::Err> {
        let ( delay, command ) = s
            .split_once( ':' )
            .ok_or_else( || ParseError::MissingArgument( "delay:command".into() ) )?;
        Ok( ScriptStep {
            at: parse_delay( delay )?,
            command: Command::parse( command )?,
        })
    }
}


/// Top-level types accepted as a trailing media type hint.
const MEDIA_TOP_LEVELS: &[&str] = &[ "audio", "video", "application" ];


/// True for `type/subtype` hints such as `audio/mp4` or `application/x-mpegurl`.
fn is_media_type( s: &str ) -> bool {
    match s.split_once( '/' ) {
        Some(( top, sub )) => {
            MEDIA_TOP_LEVELS.contains( &top.to_ascii_lowercase().as_str() )
                && !sub.is_empty()
                && sub.chars().all( |c| c.is_ascii_alphanumeric() || matches!( c, '-' | '+' ) )
        }
        None => false,
    }
}


fn parse_u64( s: &str ) -> Result<u64, ParseError> {
    s.trim().parse()
        .map_err( |_| ParseError::InvalidArgument( format!( "Invalid number: {}", s ) ) )
}


/// Parses a time string like "1:30" or "90" into a Duration.
///
/// @param s - Time string in format "MM:SS", "M:SS", or just seconds
///
/// @returns Duration or error
fn parse_time( s: &str ) -> Result<Duration, ParseError> {
    let s = s.trim();

    if let Some(( min, sec )) = s.split_once( ':' ) {
        let minutes: u64 = min.parse()
            .map_err( |_| ParseError::InvalidArgument( format!( "Invalid minutes: {}", min ) ) )?;
        let seconds: f64 = sec.parse()
            .map_err( |_| ParseError::InvalidArgument( format!( "Invalid seconds: {}", sec ) ) )?;
        let too_long = || ParseError::InvalidArgument( format!( "Time out of range: {}", s ) );
        let whole = minutes.checked_mul( 60 ).ok_or_else( too_long )?;
        Duration::from_secs( whole )
            .checked_add( secs_f64( seconds, sec )? )
            .ok_or_else( too_long )
    } else {
        let seconds: f64 = s.parse()
            .map_err( |_| ParseError::InvalidArgument( format!( "Invalid time: {}", s ) ) )?;
        secs_f64( seconds, s )
    }
}


/// Parses a script delay: bare milliseconds, or with an `ms`/`s` suffix.
fn parse_delay( s: &str ) -> Result<Duration, ParseError> {
    let s = s.trim();
    let invalid = || ParseError::InvalidArgument( format!( "Invalid delay: {}", s ) );

    if let Some( ms ) = s.strip_suffix( "ms" ) {
        ms.trim().parse().map( Duration::from_millis ).map_err( |_| invalid() )
    } else if let Some( secs ) = s.strip_suffix( 's' ) {
        let secs: f64 = secs.trim().parse().map_err( |_| invalid() )?;
        secs_f64( secs, s )
    } else {
        s.parse().map( Duration::from_millis ).map_err( |_| invalid() )
    }
}


fn secs_f64( secs: f64, raw: &str ) -> Result<Duration, ParseError> {
    Duration::try_from_secs_f64( secs )
        .map_err( |_| ParseError::InvalidArgument( format!( "Invalid time: {}", raw ) ) )
}


/// Returns help text listing all available commands.
pub fn help_text() -> &'static str {
    r#"Commands:
  input <location> [type]   Open an input (optional media type hint)
  play                      Start or resume playback
  pause                     Pause playback
  stop                      Stop and rewind
  vol <level>               Set volume (clamped to the configured range)
  seek <time>               Seek to a time (e.g. 1:30 or 90)
  seek <offset>/<range>     Seek to a fraction of the input
  ping [cookie]             Ask for a pong once prior commands are done
  close                     Close the player"#
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_input_with_hint() {
        let cmd = Command::parse( "input /music/a b.bin audio/mp4" ).unwrap();
        let expected = InputSource::new( "/music/a b.bin" ).unwrap()
            .with_media_type( "audio/mp4" ).unwrap();
        assert_eq!( cmd, Command::SetInput( expected ) );
    }


    #[test]
    fn test_parse_input_path_with_slashes_is_not_a_hint() {
        let cmd = Command::parse( "open /music/dir/a.flac" ).unwrap();
        assert_eq!( cmd, Command::SetInput( InputSource::new( "/music/dir/a.flac" ).unwrap() ) );
    }


    #[test]
    fn test_parse_input_with_spaced_directory() {
        let cmd = Command::parse( "input /music/My Songs/track.mp3" ).unwrap();
        assert_eq!( cmd, Command::SetInput( InputSource::new( "/music/My Songs/track.mp3" ).unwrap() ) );

        let cmd = Command::parse( "input /music/Live At/The Venue" ).unwrap();
        assert_eq!( cmd, Command::SetInput( InputSource::new( "/music/Live At/The Venue" ).unwrap() ) );
    }


    #[test]
    fn test_parse_input_with_vendor_hint() {
        let cmd = Command::parse( "in stream.m3u application/x-mpegurl" ).unwrap();
        let expected = InputSource::new( "stream.m3u" ).unwrap()
            .with_media_type( "application/x-mpegurl" ).unwrap();
        assert_eq!( cmd, Command::SetInput( expected ) );
    }


    #[test]
    fn test_parse_huge_seek_is_invalid_not_a_panic() {
        assert!( matches!(
            Command::parse( "seek 999999999999999999:00" ),
            Err( ParseError::InvalidArgument( _ ) )
        ) );
        assert!( matches!(
            Command::parse( "seek 307445734561825860:59" ),
            Err( ParseError::InvalidArgument( _ ) )
        ) );
    }


    #[test]
    fn test_parse_volume() {
        assert_eq!( Command::parse( "vol 1.5" ).unwrap(), Command::SetVolume( 1.5 ) );
    }


    #[test]
    fn test_parse_seek_minutes() {
        let cmd = Command::parse( "seek 1:30" ).unwrap();
        assert_eq!( cmd, Command::SeekToTime( Duration::from_secs( 90 ) ) );
    }


    #[test]
    fn test_parse_seek_position() {
        let cmd = Command::parse( "seek 25/100" ).unwrap();
        assert_eq!( cmd, Command::SeekToPosition { offset: 25, range: 100 } );
    }


    #[test]
    fn test_parse_negative_seek_is_invalid() {
        assert!( matches!( Command::parse( "seek -3" ), Err( ParseError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_unknown() {
        assert!( matches!( Command::parse( "rewind" ), Err( ParseError::Unknown( _ ) ) ) );
    }


    #[test]
    fn test_parse_missing_arg() {
        assert!( matches!( Command::parse( "vol" ), Err( ParseError::MissingArgument( _ ) ) ) );
    }


    #[test]
    fn test_script_step_with_seconds() {
        let step: ScriptStep = "2.5s:vol 0.8".parse().unwrap();
        assert_eq!( step.at, Duration::from_millis( 2500 ) );
        assert_eq!( step.command, Command::SetVolume( 0.8 ) );
    }


    #[test]
    fn test_script_step_keeps_colons_in_command() {
        let step: ScriptStep = "3000:seek 1:30".parse().unwrap();
        assert_eq!( step.at, Duration::from_secs( 3 ) );
        assert_eq!( step.command, Command::SeekToTime( Duration::from_secs( 90 ) ) );
    }
}
