//! Cadenza - command-line remote control for a media player.

mod cli;
mod settings;

use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::io::{ AsyncBufReadExt, BufReader, Lines, Stdin };
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

use cadenza_core::command::help_text;
use cadenza_core::engine::memory::{ MemoryClip, MemoryEngine, Pacing };
use cadenza_core::engine::DecodeEngine;
use cadenza_core::{
    ArbitrationPolicy, Command, CommandKind, Engine, EngineHost, PlayerEvent, ScriptStep,
};

use cli::Args;


/// Length of the virtual input played by `--dry-run`.
const DRY_RUN_LENGTH: Duration = Duration::from_secs( 30 );


#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    settings::ensure_exists();
    let mut config = settings::load();
    if args.exclusive {
        config.arbitration = ArbitrationPolicy::Exclusive;
    }

    let dry_run = args.dry_run;
    let host = EngineHost::new( config, move || make_engine( dry_run ) );

    let ( tx, mut events ) = mpsc::unbounded_channel();
    let player = host.player( move |event: PlayerEvent| {
        let _ = tx.send( event );
    } )?;

    player.set_input( &args.location, args.media_type.as_deref() )?;
    if let Some( volume ) = args.volume {
        player.set_volume( volume );
    }
    if !args.paused {
        player.play();
    }

    let started = Instant::now();
    let mut script = args.script.clone();
    script.sort_by_key( |step| step.at );
    let mut script = script.into_iter().peekable();

    let mut stdin = args.interactive.then( || BufReader::new( tokio::io::stdin() ).lines() );
    if args.interactive {
        eprintln!( "{}", help_text() );
    }

    let mut open_failed = false;
    let mut stdout = std::io::stdout();

    loop {
        let next_step = match script.peek().map( |step: &ScriptStep| step_deadline( started, step.at ) ) {
            Some( None ) => {
                if let Some( step ) = script.next() {
                    tracing::warn!( "Skipping script step, delay {:?} is out of range", step.at );
                }
                continue;
            }
            Some( Some( deadline ) ) => Some( deadline ),
            None => None,
        };

        tokio::select! {
            event = events.recv() => {
                let Some( event ) = event else {
                    break;
                };
                if let Some( line ) = render_event( &event, args.json ) {
                    writeln!( stdout, "{}", line )?;
                    stdout.flush()?;
                }

                match &event {
                    PlayerEvent::Closed => break,
                    PlayerEvent::Error { command: Some( CommandKind::SetInput ), .. } if !args.interactive => {
                        open_failed = true;
                        player.close();
                    }
                    PlayerEvent::EndOfStream if args.exit_on_end => {
                        player.close();
                    }
                    _ => {}
                }
            }

            _ = tokio::time::sleep_until( next_step.unwrap_or( started ) ), if next_step.is_some() => {
                if let Some( step ) = script.next() {
                    tracing::debug!( "Script step at {:?}: {:?}", step.at, step.command );
                    player.execute( step.command );
                }
            }

            line = next_line( &mut stdin ) => {
                match line? {
                    Some( line ) => handle_line( &player, &line ),
                    None => {
                        tracing::info!( "stdin closed" );
                        stdin = None;
                        player.close();
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!( "Interrupted" );
                player.close();
            }
        }
    }

    let state = player.state();
    drop( player );

    if open_failed {
        anyhow::bail!( "could not open {}", args.location );
    }
    tracing::debug!( "Exiting in state {}", state );
    Ok(())
}


fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else( |_| EnvFilter::new( "cadenza=info,cadenza_core=info" ) );
    let _ = tracing_subscriber::fmt()
        .with_env_filter( filter )
        .with_writer( std::io::stderr )
        .try_init();
}


/// Builds the engine each player drives.
fn make_engine( dry_run: bool ) -> Box<dyn Engine> {
    if dry_run {
        return Box::new( MemoryEngine::new( Pacing::Realtime ).with_fallback( MemoryClip::new( DRY_RUN_LENGTH ) ) );
    }

    #[cfg( feature = "device" )]
    {
        Box::new( DecodeEngine::new( cadenza_core::engine::DeviceSink::new() ) )
    }
    #[cfg( not( feature = "device" ) )]
    {
        Box::new( DecodeEngine::silent() )
    }
}


/// When a script step delayed by `at` is due, or `None` if that is past the clock's range.
fn step_deadline( started: Instant, at: Duration ) -> Option<Instant> {
    started.checked_add( at )
}


async fn next_line( lines: &mut Option<Lines<BufReader<Stdin>>> ) -> std::io::Result<Option<String>> {
    match lines {
        Some( lines ) => lines.next_line().await,
        None => std::future::pending().await,
    }
}


/// Parses and issues one interactive command.
fn handle_line( player: &cadenza_core::Player, line: &str ) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    if line == "help" || line == "?" {
        eprintln!( "{}", help_text() );
        return;
    }

    match Command::parse( line ) {
        Ok( command ) => {
            player.execute( command );
        }
        Err( e ) => eprintln!( "{}", e ),
    }
}


/// Formats an event for output. Returns `None` for events not shown in text mode.
fn render_event( event: &PlayerEvent, json: bool ) -> Option<String> {
    if json {
        return match serde_json::to_string( event ) {
            Ok( line ) => Some( line ),
            Err( e ) => {
                tracing::warn!( "Failed to serialize event: {}", e );
                None
            }
        };
    }

    let line = match event {
        PlayerEvent::StateChanged { previous, current } => format!( "[state] {} -> {}", previous, current ),
        PlayerEvent::InputOpened { source, info } => {
            let mut line = format!( "[input] {}", source.location() );
            if let Some( codec ) = &info.codec {
                line.push_str( &format!( " ({}", codec ) );
                if let ( Some( rate ), Some( channels ) ) = ( info.sample_rate, info.channels ) {
                    line.push_str( &format!( ", {} Hz, {} ch", rate, channels ) );
                }
                line.push( ')' );
            }
            line
        }
        PlayerEvent::BufferingProgress { percent } => format!( "[buffering] {}%", percent ),
        PlayerEvent::VolumeChanged { requested, effective } if requested != effective => {
            format!( "[volume] {:.2} (requested {:.2})", effective, requested )
        }
        PlayerEvent::VolumeChanged { effective, .. } => format!( "[volume] {:.2}", effective ),
        PlayerEvent::Noop { command, state } => format!( "[noop] {} while {}", command, state ),
        PlayerEvent::Seeked { timestamp } => format!( "[seek] {}", cadenza_core::TimeCode::from( *timestamp ) ),
        PlayerEvent::TimeCode { time_code } => format!( "[time] {}", time_code ),
        PlayerEvent::Position { .. } => return None,
        PlayerEvent::Pong { cookie } => format!( "[pong] {}", cookie ),
        PlayerEvent::Error { command: Some( command ), error } => format!( "[error] {}: {}", command, error ),
        PlayerEvent::Error { command: None, error } => format!( "[error] {}", error ),
        PlayerEvent::EndOfStream => "[end]".to_string(),
        PlayerEvent::Closed => "[closed]".to_string(),
    };
    Some( line )
}


#[cfg( test )]
mod tests {
    use super::*;
    use cadenza_core::{ PlayerError, PlayerState };


    #[test]
    fn test_step_deadline_out_of_range() {
        let now = Instant::now();
        assert_eq!( step_deadline( now, Duration::from_millis( 250 ) ), Some( now + Duration::from_millis( 250 ) ) );
        assert_eq!( step_deadline( now, Duration::MAX ), None );

        let step: ScriptStep = "1e19s:pause".parse().unwrap();
        assert_eq!( step_deadline( now, step.at ), None );
    }


    #[test]
    fn test_render_transition() {
        let event = PlayerEvent::StateChanged { previous: PlayerState::Ready, current: PlayerState::Playing };
        assert_eq!( render_event( &event, false ).unwrap(), "[state] ready -> playing" );
    }


    #[test]
    fn test_render_clamped_volume() {
        let event = PlayerEvent::VolumeChanged { requested: 1.5, effective: 1.0 };
        assert_eq!( render_event( &event, false ).unwrap(), "[volume] 1.00 (requested 1.50)" );
    }


    #[test]
    fn test_positions_hidden_in_text_mode() {
        let event = PlayerEvent::Position { offset: 10, range: 400 };
        assert!( render_event( &event, false ).is_none() );
        assert!( render_event( &event, true ).is_some() );
    }


    #[test]
    fn test_render_json_error() {
        let event = PlayerEvent::Error { command: Some( CommandKind::Play ), error: PlayerError::HandleClosed };
        let line = render_event( &event, true ).unwrap();
        let value: serde_json::Value = serde_json::from_str( &line ).unwrap();
        assert_eq!( value[ "event" ], "error" );
        assert_eq!( value[ "command" ], "play" );
        assert_eq!( value[ "error" ][ "kind" ], "handle_closed" );
    }
}
