//! Player factory sharing configuration and output arbitration.

use std::sync::Arc;

use crate::arbiter::OutputArbiter;
use crate::config::PlayerConfig;
use crate::engine::Engine;
use crate::error::ContractError;
use crate::event::EventListener;
use crate::player::Player;


type EngineFactory = Box<dyn Fn() -> Box<dyn Engine> + Send + Sync>;


/// Creates players that share one configuration and one output arbiter.
pub struct EngineHost {
    config: PlayerConfig,
    arbiter: Arc<OutputArbiter>,
    factory: EngineFactory,
}


impl EngineHost {
    /// @param config - Settings for every player; the arbitration policy is taken from here
    /// @param factory - Builds a fresh engine for each new player
    pub fn new<E, F>( config: PlayerConfig, factory: F ) -> Self
    where
        E: Engine,
        F: Fn() -> E + Send + Sync + 'static,
    {
        let config = config.sanitized();
        let arbiter = Arc::new( OutputArbiter::new( config.arbitration ) );
        tracing::debug!( "Engine host created with {:?} arbitration", arbiter.policy() );
        Self {
            config,
            arbiter,
            factory: Box::new( move || Box::new( factory() ) as Box<dyn Engine> ),
        }
    }


    pub fn config( &self ) -> &PlayerConfig {
        &self.config
    }


    pub fn arbiter( &self ) -> &Arc<OutputArbiter> {
        &self.arbiter
    }


    /// Creates a new player session with its own engine.
    pub fn player( &self, listener: impl EventListener ) -> Result<Player, ContractError> {
        Player::spawn(
            ( self.factory )(),
            self.config.clone(),
            Arc::clone( &self.arbiter ),
            Box::new( listener ),
        )
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    use crate::arbiter::ArbitrationPolicy;
    use crate::engine::memory::{ MemoryClip, MemoryEngine, Pacing };
    use crate::event::PlayerEvent;
    use crate::state::PlayerState;


    #[test]
    fn test_players_share_the_arbiter() {
        let config = PlayerConfig { arbitration: ArbitrationPolicy::Exclusive, ..PlayerConfig::default() };
        let host = EngineHost::new( config, || {
            MemoryEngine::new( Pacing::Manual ).with_fallback( MemoryClip::new( Duration::from_secs( 5 ) ) )
        } );

        let ( tx, rx ) = mpsc::channel();
        let first = host.player( move |event: PlayerEvent| { let _ = tx.send( event ); } ).unwrap();
        first.set_input( "one", None ).unwrap().play().ping( 1 );
        while rx.recv_timeout( Duration::from_secs( 5 ) ).unwrap() != ( PlayerEvent::Pong { cookie: 1 } ) {}

        assert_eq!( host.arbiter().policy(), ArbitrationPolicy::Exclusive );
        assert_eq!( first.state(), PlayerState::Playing );
        assert_eq!( host.arbiter().holders(), vec![ first.id() ] );

        drop( first );
        assert!( host.arbiter().holders().is_empty() );
    }
}
