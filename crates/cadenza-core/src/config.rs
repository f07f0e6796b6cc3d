//! Player configuration.

use std::time::Duration;

use serde::{ Deserialize, Serialize };

use crate::arbiter::ArbitrationPolicy;


/// Default granularity of time code notifications.
pub const DEFAULT_TIME_CODE_QUANTUM: Duration = Duration::from_millis( 1000 );

/// Default scale of position notifications.
pub const DEFAULT_POSITION_RANGE: u64 = 400;


/// Inclusive range that volume levels are clamped into.
#[derive( Debug, Clone, Copy, PartialEq, Serialize, Deserialize )]
pub struct VolumeRange {
    pub min: f32,
    pub max: f32,
}


impl Default for VolumeRange {
    fn default() -> Self {
        Self { min: 0.0, max: 1.0 }
    }
}


impl VolumeRange {
    /// Clamps a level into the range. NaN has no nearest boundary and yields `None`.
    pub fn clamp( &self, level: f32 ) -> Option<f32> {
        if level.is_nan() {
            return None;
        }
        Some( level.clamp( self.min, self.max ) )
    }


    /// True if `min <= max` and both bounds are finite and non-negative.
    pub fn is_valid( &self ) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min >= 0.0 && self.min <= self.max
    }
}


/// Settings shared by every player created from the same host.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct PlayerConfig {
    /// Valid volume range; requests outside it are clamped.
    pub volume_range: VolumeRange,

    /// Volume applied to each newly opened input before any `set_volume`.
    pub default_volume: f32,

    /// Time code events fire when the stream time crosses a multiple of this.
    /// Zero reports every change.
    #[serde( with = "millis" )]
    pub time_code_quantum: Duration,

    /// Position events report `offset/range`. Zero disables them.
    pub position_range: u64,

    /// How long the server waits for commands when the engine pushes back.
    #[serde( with = "millis" )]
    pub backpressure_wait: Duration,

    /// Output device sharing between players.
    pub arbitration: ArbitrationPolicy,
}


impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            volume_range: VolumeRange::default(),
            default_volume: 1.0,
            time_code_quantum: DEFAULT_TIME_CODE_QUANTUM,
            position_range: DEFAULT_POSITION_RANGE,
            backpressure_wait: Duration::from_millis( 5 ),
            arbitration: ArbitrationPolicy::Shared,
        }
    }
}


impl PlayerConfig {
    /// Returns a copy with out-of-range values replaced by defaults.
    pub fn sanitized( mut self ) -> Self {
        let defaults = Self::default();
        if !self.volume_range.is_valid() {
            tracing::warn!( "Invalid volume range {:?}, using default", self.volume_range );
            self.volume_range = defaults.volume_range;
        }
        self.default_volume = self.volume_range
            .clamp( self.default_volume )
            .unwrap_or( self.volume_range.max );
        self
    }
}


/// Serializes durations as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{ Deserialize, Deserializer, Serializer };


    pub fn serialize<S: Serializer>( value: &Duration, serializer: S ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64( value.as_millis() as u64 )
    }


    pub fn deserialize<'de, D: Deserializer<'de>>( deserializer: D ) -> Result<Duration, D::Error> {
        u64::deserialize( deserializer ).map( Duration::from_millis )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_clamp_to_nearest_boundary() {
        let range = VolumeRange::default();
        assert_eq!( range.clamp( 1.5 ), Some( 1.0 ) );
        assert_eq!( range.clamp( -0.2 ), Some( 0.0 ) );
        assert_eq!( range.clamp( 0.4 ), Some( 0.4 ) );
        assert_eq!( range.clamp( f32::INFINITY ), Some( 1.0 ) );
        assert_eq!( range.clamp( f32::NAN ), None );
    }


    #[test]
    fn test_sanitized_fixes_bad_range_and_default_volume() {
        let config = PlayerConfig {
            volume_range: VolumeRange { min: 2.0, max: 1.0 },
            default_volume: 7.0,
            ..PlayerConfig::default()
        }.sanitized();
        assert_eq!( config.volume_range, VolumeRange::default() );
        assert_eq!( config.default_volume, 1.0 );
    }


    #[test]
    fn test_deserialize_partial_json_uses_defaults() {
        let config: PlayerConfig = serde_json::from_str(
            r#"{ "time_code_quantum": 250, "arbitration": "exclusive" }"#
        ).unwrap();
        assert_eq!( config.time_code_quantum, Duration::from_millis( 250 ) );
        assert_eq!( config.arbitration, ArbitrationPolicy::Exclusive );
        assert_eq!( config.position_range, DEFAULT_POSITION_RANGE );
    }
}
