//! Command-line argument parsing for Cadenza.

use clap::Parser;

use cadenza_core::ScriptStep;


/// Cadenza - drive a media player from the command line.
#[derive( Parser, Debug )]
#[command( name = "cadenza" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// File path or file:// URI to open.
    pub location: String,

    /// Media type hint passed to the engine (e.g. audio/mp4).
    #[arg( short = 't', long = "type", value_name = "MIME" )]
    pub media_type: Option<String>,

    /// Initial volume, clamped to the configured range.
    #[arg( short, long, value_name = "LEVEL" )]
    pub volume: Option<f32>,

    /// Issue a command after a delay, e.g. `3000:pause` or `2.5s:vol 0.5`.
    #[arg( long = "at", value_name = "DELAY:COMMAND" )]
    pub script: Vec<ScriptStep>,

    /// Read commands from stdin.
    #[arg( short, long )]
    pub interactive: bool,

    /// Print events as JSON lines.
    #[arg( long )]
    pub json: bool,

    /// Exit when the input ends.
    #[arg( short, long )]
    pub exit_on_end: bool,

    /// Use the in-memory engine instead of decoding.
    #[arg( long )]
    pub dry_run: bool,

    /// Refuse to share the output device with other players.
    #[arg( long )]
    pub exclusive: bool,

    /// Do not start playback after opening.
    #[arg( long )]
    pub paused: bool,
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::time::Duration;

    use cadenza_core::Command;


    #[test]
    fn test_parse_script_steps() {
        let args = Args::try_parse_from( [
            "cadenza", "song.mp3", "--at", "1500:pause", "--at", "2s:vol 0.5", "--json",
        ] ).unwrap();

        assert_eq!( args.location, "song.mp3" );
        assert!( args.json );
        assert_eq!( args.script.len(), 2 );
        assert_eq!( args.script[ 0 ].at, Duration::from_millis( 1500 ) );
        assert_eq!( args.script[ 0 ].command, Command::Pause );
        assert_eq!( args.script[ 1 ].command, Command::SetVolume( 0.5 ) );
    }


    #[test]
    fn test_bad_script_step_is_rejected() {
        assert!( Args::try_parse_from( [ "cadenza", "a.wav", "--at", "soon:play" ] ).is_err() );
    }


    #[test]
    fn test_type_hint() {
        let args = Args::try_parse_from( [ "cadenza", "a", "--type", "audio/mp4", "--dry-run" ] ).unwrap();
        assert_eq!( args.media_type.as_deref(), Some( "audio/mp4" ) );
        assert!( args.dry_run );
    }
}
