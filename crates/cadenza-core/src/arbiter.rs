//! Output device arbitration between players of one process.
//!
//! Every player holds an `Arc<OutputArbiter>`. A player acquires a lease when
//! it starts playing and releases it whenever it stops producing audio.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{ AtomicU64, Ordering };

use serde::{ Deserialize, Serialize };


static NEXT_PLAYER_ID: AtomicU64 = AtomicU64::new( 1 );


/// Process-unique player identifier.
#[derive( Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize )]
pub struct PlayerId( u64 );


impl PlayerId {
    pub fn next() -> Self {
        Self( NEXT_PLAYER_ID.fetch_add( 1, Ordering::Relaxed ) )
    }


    pub fn get( self ) -> u64 {
        self.0
    }
}


impl fmt::Display for PlayerId {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        write!( f, "#{}", self.0 )
    }
}


/// How players share the output device.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize )]
#[serde( rename_all = "snake_case" )]
pub enum ArbitrationPolicy {
    /// Any number of players may output at once.
    #[default]
    Shared,
    /// One player at a time; others are refused until it releases.
    Exclusive,
}


/// Tracks which players currently hold the output device.
#[derive( Debug, Default )]
pub struct OutputArbiter {
    policy: ArbitrationPolicy,
    holders: Mutex<BTreeSet<PlayerId>>,
}


impl OutputArbiter {
    pub fn new( policy: ArbitrationPolicy ) -> Self {
        Self { policy, holders: Mutex::new( BTreeSet::new() ) }
    }


    pub fn policy( &self ) -> ArbitrationPolicy {
        self.policy
    }


    /// Grants the device to `player`.
    ///
    /// Re-acquiring an existing lease succeeds. Under `Exclusive`, returns the
    /// current holder when someone else owns the device.
    pub fn acquire( &self, player: PlayerId ) -> Result<(), PlayerId> {
        let mut holders = self.lock();
        if self.policy == ArbitrationPolicy::Exclusive {
            if let Some( &holder ) = holders.iter().find( |&&h| h != player ) {
                return Err( holder );
            }
        }
        if holders.insert( player ) {
            tracing::debug!( "Output lease granted to player {}", player );
        }
        Ok(())
    }


    /// Releases the lease held by `player`, if any. Returns whether one was held.
    pub fn release( &self, player: PlayerId ) -> bool {
        let released = self.lock().remove( &player );
        if released {
            tracing::debug!( "Output lease released by player {}", player );
        }
        released
    }


    pub fn is_held_by( &self, player: PlayerId ) -> bool {
        self.lock().contains( &player )
    }


    pub fn holders( &self ) -> Vec<PlayerId> {
        self.lock().iter().copied().collect()
    }


    fn lock( &self ) -> std::sync::MutexGuard<'_, BTreeSet<PlayerId>> {
        // The set stays consistent even if a holder panicked mid-update
        self.holders.lock().unwrap_or_else( |poisoned| poisoned.into_inner() )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_shared_allows_many_holders() {
        let arbiter = OutputArbiter::new( ArbitrationPolicy::Shared );
        let ( a, b ) = ( PlayerId::next(), PlayerId::next() );
        assert!( arbiter.acquire( a ).is_ok() );
        assert!( arbiter.acquire( b ).is_ok() );
        assert_eq!( arbiter.holders().len(), 2 );
    }


    #[test]
    fn test_default_policy_is_shared() {
        assert_eq!( OutputArbiter::default().policy(), ArbitrationPolicy::Shared );
        assert_eq!( OutputArbiter::new( ArbitrationPolicy::Exclusive ).policy(), ArbitrationPolicy::Exclusive );
    }


    #[test]
    fn test_exclusive_refuses_second_holder() {
        let arbiter = OutputArbiter::new( ArbitrationPolicy::Exclusive );
        let ( a, b ) = ( PlayerId::next(), PlayerId::next() );
        assert!( arbiter.acquire( a ).is_ok() );
        assert!( arbiter.acquire( a ).is_ok() );
        assert_eq!( arbiter.acquire( b ), Err( a ) );

        assert!( arbiter.release( a ) );
        assert!( !arbiter.release( a ) );
        assert!( arbiter.acquire( b ).is_ok() );
        assert!( arbiter.is_held_by( b ) );
    }
}
