//! Input source descriptors.
//!
//! A location is opaque to the player; engines decide how to resolve it.
//! The helpers here cover the common cases of local paths and `file://` URIs.

use std::path::{ Path, PathBuf };

use serde::Serialize;

use crate::error::ContractError;


/// Well-known extensions and their media types.
const MEDIA_TYPES: &[( &str, &str )] = &[
    ( "mp3", "audio/mpeg" ),
    ( "flac", "audio/flac" ),
    ( "ogg", "audio/ogg" ),
    ( "oga", "audio/ogg" ),
    ( "opus", "audio/opus" ),
    ( "wav", "audio/wav" ),
    ( "aif", "audio/aiff" ),
    ( "aiff", "audio/aiff" ),
    ( "m4a", "audio/mp4" ),
    ( "mp4", "audio/mp4" ),
    ( "aac", "audio/aac" ),
    ( "mka", "audio/x-matroska" ),
    ( "mkv", "video/x-matroska" ),
    ( "webm", "audio/webm" ),
    ( "caf", "audio/x-caf" ),
];


/// What to play: a location plus an optional media type hint.
#[derive( Debug, Clone, PartialEq, Eq, Serialize )]
pub struct InputSource {
    location: String,
    media_type: Option<String>,
}


impl InputSource {
    /// Creates a source from a location with no media type hint.
    pub fn new( location: impl Into<String> ) -> Result<Self, ContractError> {
        let location = location.into();
        if location.trim().is_empty() {
            return Err( ContractError::EmptyLocation );
        }
        Ok( Self { location, media_type: None } )
    }


    /// Attaches an explicit media type hint.
    pub fn with_media_type( mut self, media_type: impl Into<String> ) -> Result<Self, ContractError> {
        let media_type = media_type.into();
        if media_type.trim().is_empty() {
            return Err( ContractError::EmptyMediaType );
        }
        self.media_type = Some( media_type );
        Ok( self )
    }


    pub fn location( &self ) -> &str {
        &self.location
    }


    /// The explicit hint, if one was given.
    pub fn media_type( &self ) -> Option<&str> {
        self.media_type.as_deref()
    }


    /// Returns the URI scheme, if the location has one.
    ///
    /// Single-letter schemes are treated as Windows drive letters.
    pub fn scheme( &self ) -> Option<&str> {
        let ( scheme, _ ) = self.location.split_once( "://" )?;
        let valid = scheme.len() > 1
            && scheme.chars().all( |c| c.is_ascii_alphanumeric() || matches!( c, '+' | '-' | '.' ) );
        valid.then_some( scheme )
    }


    /// Resolves the location to a filesystem path, if it names one.
    pub fn path( &self ) -> Option<PathBuf> {
        match self.scheme() {
            None => Some( PathBuf::from( &self.location ) ),
            Some( scheme ) if scheme.eq_ignore_ascii_case( "file" ) => {
                let rest = &self.location[ scheme.len() + 3.. ];
                Some( PathBuf::from( percent_decode( rest ) ) )
            }
            Some( _ ) => None,
        }
    }


    /// Lower-cased extension of the location, ignoring any query string.
    pub fn extension( &self ) -> Option<String> {
        let trimmed = self.location.split( |c: char| c == '?' || c == '#' ).next().unwrap_or( &self.location );
        Path::new( trimmed )
            .extension()
            .and_then( |e| e.to_str() )
            .map( |e| e.to_ascii_lowercase() )
    }


    /// The explicit hint, or a media type inferred from the extension.
    pub fn inferred_media_type( &self ) -> Option<&str> {
        if let Some( hint ) = self.media_type() {
            return Some( hint );
        }
        let ext = self.extension()?;
        MEDIA_TYPES
            .iter()
            .find( |( e, _ )| *e == ext )
            .map( |( _, mime )| *mime )
    }
}


/// Decodes `%XX` escapes. Invalid escapes are kept verbatim.
fn percent_decode( s: &str ) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity( bytes.len() );
    let mut i = 0;
    while i < bytes.len() {
        if bytes[ i ] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8( &bytes[ i + 1..i + 3 ] ).ok()
                .filter( |h| h.chars().all( |c| c.is_ascii_hexdigit() ) )
                .and_then( |h| u8::from_str_radix( h, 16 ).ok() );
            if let Some( byte ) = hex {
                out.push( byte );
                i += 3;
                continue;
            }
        }
        out.push( bytes[ i ] );
        i += 1;
    }
    String::from_utf8_lossy( &out ).into_owned()
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_empty_location_is_rejected() {
        assert_eq!( InputSource::new( "" ), Err( ContractError::EmptyLocation ) );
        assert_eq!( InputSource::new( "   " ), Err( ContractError::EmptyLocation ) );
    }


    #[test]
    fn test_inferred_media_type_from_extension() {
        let source = InputSource::new( "/music/a.MP4" ).unwrap();
        assert_eq!( source.inferred_media_type(), Some( "audio/mp4" ) );
    }


    #[test]
    fn test_hint_wins_over_extension() {
        let source = InputSource::new( "stream.bin" ).unwrap()
            .with_media_type( "audio/flac" ).unwrap();
        assert_eq!( source.inferred_media_type(), Some( "audio/flac" ) );
    }


    #[test]
    fn test_file_uri_resolves_to_path() {
        let source = InputSource::new( "file:///tmp/my%20song.flac" ).unwrap();
        assert_eq!( source.scheme(), Some( "file" ) );
        assert_eq!( source.path(), Some( PathBuf::from( "/tmp/my song.flac" ) ) );
    }


    #[test]
    fn test_remote_uri_has_no_path() {
        let source = InputSource::new( "http://example.com/a.mp3?x=1" ).unwrap();
        assert_eq!( source.path(), None );
        assert_eq!( source.extension().as_deref(), Some( "mp3" ) );
    }


    #[test]
    fn test_drive_letter_is_not_a_scheme() {
        let source = InputSource::new( "C://music/a.wav" ).unwrap();
        assert_eq!( source.scheme(), None );
    }
}
