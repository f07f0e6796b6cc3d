//! Event dispatch.
//!
//! Each player owns one [`EventChannel`]: an unbounded queue drained by a
//! dedicated thread that hands events to the registered listener in order.

use std::panic::{ self, AssertUnwindSafe };
use std::sync::mpsc::{ self, Receiver, Sender };
use std::thread::{ self, JoinHandle };

use crate::arbiter::PlayerId;
use crate::event::{ EventListener, PlayerEvent };


/// Posting side of an [`EventChannel`].
#[derive( Debug, Clone )]
pub struct EventSender {
    player: PlayerId,
    tx: Sender<PlayerEvent>,
}


impl EventSender {
    /// Queues an event for delivery. Never blocks.
    pub fn emit( &self, event: PlayerEvent ) {
        tracing::trace!( "Player {}: emit {:?}", self.player, event.kind() );
        if let Err( mpsc::SendError( event ) ) = self.tx.send( event ) {
            tracing::warn!( "Player {}: listener gone, dropped {:?}", self.player, event.kind() );
        }
    }
}


/// The dispatch thread and its queue.
pub struct EventChannel {
    sender: Option<EventSender>,
    thread: Option<JoinHandle<()>>,
}


impl EventChannel {
    /// Starts the dispatch thread for `listener`.
    pub fn spawn( player: PlayerId, listener: impl EventListener ) -> std::io::Result<Self> {
        Self::spawn_boxed( player, Box::new( listener ) )
    }


    pub fn spawn_boxed( player: PlayerId, listener: Box<dyn EventListener> ) -> std::io::Result<Self> {
        let ( tx, rx ) = mpsc::channel();
        let thread = thread::Builder::new()
            .name( format!( "cadenza-events-{}", player.get() ) )
            .spawn( move || dispatch_loop( player, rx, listener ) )?;

        Ok( Self {
            sender: Some( EventSender { player, tx } ),
            thread: Some( thread ),
        } )
    }


    /// A new posting handle. The thread runs until every handle is dropped.
    pub fn sender( &self ) -> Option<EventSender> {
        self.sender.clone()
    }


    /// Drops this channel's own sender and waits for pending deliveries.
    ///
    /// Returns once every other [`EventSender`] has been dropped too.
    pub fn join( &mut self ) {
        self.sender = None;
        if let Some( thread ) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!( "Event dispatch thread panicked" );
            }
        }
    }
}


impl Drop for EventChannel {
    fn drop( &mut self ) {
        self.join();
    }
}


fn dispatch_loop( player: PlayerId, rx: Receiver<PlayerEvent>, mut listener: Box<dyn EventListener> ) {
    tracing::debug!( "Player {}: dispatch thread started", player );

    while let Ok( event ) = rx.recv() {
        let delivered = panic::catch_unwind( AssertUnwindSafe( || listener.on_event( event ) ) );
        if delivered.is_err() {
            tracing::error!( "Player {}: listener panicked, delivery stopped", player );
            break;
        }
    }

    // Anything still queued is lost; later sends fail and are logged by the sender
    let lost = rx.try_iter().count();
    if lost > 0 {
        tracing::warn!( "Player {}: {} queued events were not delivered", player, lost );
    }
    tracing::debug!( "Player {}: dispatch thread exiting", player );
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::sync::{ Arc, Mutex };


    #[test]
    fn test_events_are_delivered_in_order() {
        let seen = Arc::new( Mutex::new( Vec::new() ) );
        let sink = Arc::clone( &seen );
        let mut channel = EventChannel::spawn( PlayerId::next(), move |event: PlayerEvent| {
            sink.lock().unwrap().push( event );
        } ).unwrap();

        let sender = channel.sender().unwrap();
        for cookie in 0..50 {
            sender.emit( PlayerEvent::Pong { cookie } );
        }
        drop( sender );
        channel.join();

        let seen = seen.lock().unwrap();
        let cookies: Vec<u64> = seen.iter().map( |e| match e {
            PlayerEvent::Pong { cookie } => *cookie,
            other => panic!( "unexpected {other:?}" ),
        } ).collect();
        assert_eq!( cookies, ( 0..50 ).collect::<Vec<_>>() );
    }


    #[test]
    fn test_panicking_listener_stops_delivery_without_poisoning_sender() {
        let calls = Arc::new( Mutex::new( 0 ) );
        let counter = Arc::clone( &calls );
        let mut channel = EventChannel::spawn( PlayerId::next(), move |_event: PlayerEvent| {
            *counter.lock().unwrap() += 1;
            panic!( "listener bug" );
        } ).unwrap();

        let sender = channel.sender().unwrap();
        sender.emit( PlayerEvent::Closed );
        sender.emit( PlayerEvent::Closed );
        drop( sender );
        channel.join();

        assert_eq!( *calls.lock().unwrap(), 1 );
    }
}
