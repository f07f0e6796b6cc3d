//! Persistent player settings.
//!
//! Stored as JSON in the user's config directory. Command-line flags
//! override what is loaded here.

use std::fs;
use std::path::{ Path, PathBuf };

use cadenza_core::PlayerConfig;


/// Returns the path to the settings file.
pub fn settings_path() -> Option<PathBuf> {
    dirs::config_dir().map( |p| p.join( "cadenza" ).join( "settings.json" ) )
}


/// Loads settings from disk, or returns defaults if not found.
pub fn load() -> PlayerConfig {
    match settings_path() {
        Some( path ) => load_from( &path ),
        None => PlayerConfig::default(),
    }
}


pub fn load_from( path: &Path ) -> PlayerConfig {
    if !path.exists() {
        return PlayerConfig::default();
    }

    match fs::read_to_string( path ) {
        Ok( contents ) => match serde_json::from_str::<PlayerConfig>( &contents ) {
            Ok( config ) => config.sanitized(),
            Err( e ) => {
                tracing::warn!( "Ignoring malformed settings in {}: {}", path.display(), e );
                PlayerConfig::default()
            }
        },
        Err( e ) => {
            tracing::warn!( "Failed to read settings: {}", e );
            PlayerConfig::default()
        }
    }
}


/// Writes the defaults if no settings file exists yet, so users have something to edit.
pub fn ensure_exists() {
    let Some( path ) = settings_path() else {
        return;
    };
    if !path.exists() {
        if let Err( e ) = save_to( &PlayerConfig::default(), &path ) {
            tracing::warn!( "Failed to save settings: {}", e );
        }
    }
}


pub fn save_to( config: &PlayerConfig, path: &Path ) -> anyhow::Result<()> {
    if let Some( parent ) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all( parent )?;
        }
    }
    fs::write( path, serde_json::to_string_pretty( config )? )?;
    tracing::debug!( "Saved settings to {}", path.display() );
    Ok(())
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::time::Duration;

    use cadenza_core::ArbitrationPolicy;


    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!( load_from( &dir.path().join( "nope.json" ) ), PlayerConfig::default() );
    }


    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "cadenza" ).join( "settings.json" );
        let config = PlayerConfig {
            default_volume: 0.25,
            time_code_quantum: Duration::from_millis( 500 ),
            arbitration: ArbitrationPolicy::Exclusive,
            ..PlayerConfig::default()
        };

        save_to( &config, &path ).unwrap();
        assert_eq!( load_from( &path ), config );
    }


    #[test]
    fn test_partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, r#"{ "position_range": 1000 }"# ).unwrap();

        let config = load_from( &path );
        assert_eq!( config.position_range, 1000 );
        assert_eq!( config.default_volume, 1.0 );
    }


    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, "{ not json" ).unwrap();
        assert_eq!( load_from( &path ), PlayerConfig::default() );
    }
}
