//! The thread that delivers [events](crate::events) to their handlers.
//!
//! Components publish events into an `mpsc` channel. The event bus thread drains it and invokes the
//! handlers registered for each kind of event: the [loggers](crate::logging) when event logging is
//! enabled, plus any handler the user added to [`EventHandlers`].

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

#[derive(Default)]
pub struct EventHandlers {
    pub(crate) import_block_handlers: Vec<HandlerPtr<ImportBlockEvent>>,
    pub(crate) propose_block_handlers: Vec<HandlerPtr<ProposeBlockEvent>>,
    pub(crate) finalize_block_handlers: Vec<HandlerPtr<FinalizeBlockEvent>>,
    pub(crate) cancel_task_handlers: Vec<HandlerPtr<CancelTaskEvent>>,
    pub(crate) start_sync_handlers: Vec<HandlerPtr<StartSyncEvent>>,
    pub(crate) end_sync_handlers: Vec<HandlerPtr<EndSyncEvent>>,
    pub(crate) receive_sync_request_handlers: Vec<HandlerPtr<ReceiveSyncRequestEvent>>,
    pub(crate) send_sync_response_handlers: Vec<HandlerPtr<SendSyncResponseEvent>>,
    pub(crate) peer_timeout_handlers: Vec<HandlerPtr<PeerTimeoutEvent>>,
}

impl EventHandlers {
    /// Create a set of handlers that contains the default loggers iff `log_events`.
    pub fn new(log_events: bool) -> EventHandlers {
        let mut handlers = EventHandlers::default();
        if log_events {
            handlers.add_loggers();
        }
        handlers
    }

    pub(crate) fn add_loggers(&mut self) {
        self.import_block_handlers.push(ImportBlockEvent::get_logger());
        self.propose_block_handlers.push(ProposeBlockEvent::get_logger());
        self.finalize_block_handlers.push(FinalizeBlockEvent::get_logger());
        self.cancel_task_handlers.push(CancelTaskEvent::get_logger());
        self.start_sync_handlers.push(StartSyncEvent::get_logger());
        self.end_sync_handlers.push(EndSyncEvent::get_logger());
        self.receive_sync_request_handlers
            .push(ReceiveSyncRequestEvent::get_logger());
        self.send_sync_response_handlers
            .push(SendSyncResponseEvent::get_logger());
        self.peer_timeout_handlers.push(PeerTimeoutEvent::get_logger());
    }

    pub fn on_import_block(mut self, handler: impl Fn(&ImportBlockEvent) + Send + 'static) -> Self {
        self.import_block_handlers.push(Box::new(handler));
        self
    }

    pub fn on_propose_block(mut self, handler: impl Fn(&ProposeBlockEvent) + Send + 'static) -> Self {
        self.propose_block_handlers.push(Box::new(handler));
        self
    }

    pub fn on_finalize_block(
        mut self,
        handler: impl Fn(&FinalizeBlockEvent) + Send + 'static,
    ) -> Self {
        self.finalize_block_handlers.push(Box::new(handler));
        self
    }

    pub fn on_cancel_task(mut self, handler: impl Fn(&CancelTaskEvent) + Send + 'static) -> Self {
        self.cancel_task_handlers.push(Box::new(handler));
        self
    }

    pub fn on_start_sync(mut self, handler: impl Fn(&StartSyncEvent) + Send + 'static) -> Self {
        self.start_sync_handlers.push(Box::new(handler));
        self
    }

    pub fn on_end_sync(mut self, handler: impl Fn(&EndSyncEvent) + Send + 'static) -> Self {
        self.end_sync_handlers.push(Box::new(handler));
        self
    }

    pub fn on_receive_sync_request(
        mut self,
        handler: impl Fn(&ReceiveSyncRequestEvent) + Send + 'static,
    ) -> Self {
        self.receive_sync_request_handlers.push(Box::new(handler));
        self
    }

    pub fn on_send_sync_response(
        mut self,
        handler: impl Fn(&SendSyncResponseEvent) + Send + 'static,
    ) -> Self {
        self.send_sync_response_handlers.push(Box::new(handler));
        self
    }

    pub fn on_peer_timeout(mut self, handler: impl Fn(&PeerTimeoutEvent) + Send + 'static) -> Self {
        self.peer_timeout_handlers.push(Box::new(handler));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.import_block_handlers.is_empty()
            && self.propose_block_handlers.is_empty()
            && self.finalize_block_handlers.is_empty()
            && self.cancel_task_handlers.is_empty()
            && self.start_sync_handlers.is_empty()
            && self.end_sync_handlers.is_empty()
            && self.receive_sync_request_handlers.is_empty()
            && self.send_sync_response_handlers.is_empty()
            && self.peer_timeout_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::ImportBlock(import_block_event) => self
                .import_block_handlers
                .iter()
                .for_each(|handler| handler(&import_block_event)),

            Event::ProposeBlock(propose_block_event) => self
                .propose_block_handlers
                .iter()
                .for_each(|handler| handler(&propose_block_event)),

            Event::FinalizeBlock(finalize_block_event) => self
                .finalize_block_handlers
                .iter()
                .for_each(|handler| handler(&finalize_block_event)),

            Event::CancelTask(cancel_task_event) => self
                .cancel_task_handlers
                .iter()
                .for_each(|handler| handler(&cancel_task_event)),

            Event::StartSync(start_sync_event) => self
                .start_sync_handlers
                .iter()
                .for_each(|handler| handler(&start_sync_event)),

            Event::EndSync(end_sync_event) => self
                .end_sync_handlers
                .iter()
                .for_each(|handler| handler(&end_sync_event)),

            Event::ReceiveSyncRequest(receive_sync_request_event) => self
                .receive_sync_request_handlers
                .iter()
                .for_each(|handler| handler(&receive_sync_request_event)),

            Event::SendSyncResponse(send_sync_response_event) => self
                .send_sync_response_handlers
                .iter()
                .for_each(|handler| handler(&send_sync_response_event)),

            Event::PeerTimeout(peer_timeout_event) => self
                .peer_timeout_handlers
                .iter()
                .for_each(|handler| handler(&peer_timeout_event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(Duration::from_millis(10)) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}

/// An event bus thread together with the means to publish to it and stop it. Dropping it stops the
/// thread; events it has not delivered yet are discarded.
pub(crate) struct EventBus {
    publisher: Sender<Event>,
    shutdown: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl EventBus {
    /// Start an event bus for `handlers`, or return `None` if there are no handlers to deliver to.
    pub(crate) fn start(handlers: EventHandlers) -> Option<EventBus> {
        if handlers.is_empty() {
            return None;
        }
        let (publisher, subscriber) = mpsc::channel();
        let (shutdown, shutdown_signal) = mpsc::channel();
        let thread = start_event_bus(handlers, subscriber, shutdown_signal);
        Some(EventBus {
            publisher,
            shutdown,
            thread: Some(thread),
        })
    }

    pub(crate) fn publisher(&self) -> Sender<Event> {
        self.publisher.clone()
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::SystemTime;

    use super::*;
    use crate::types::data_types::{BlockHeight, CryptoHash};

    #[test]
    fn delivers_events_to_user_handlers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_by_handler = seen.clone();
        let handlers = EventHandlers::new(false)
            .on_finalize_block(move |event| seen_by_handler.lock().unwrap().push(event.height));
        let bus = EventBus::start(handlers).unwrap();

        Event::publish(
            &Some(bus.publisher()),
            Event::FinalizeBlock(FinalizeBlockEvent {
                timestamp: SystemTime::now(),
                block: CryptoHash::new([1; 32]),
                height: BlockHeight::new(3),
            }),
        );
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while seen.lock().unwrap().is_empty() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        drop(bus);
        assert_eq!(*seen.lock().unwrap(), vec![BlockHeight::new(3)]);
    }

    #[test]
    fn no_handlers_no_bus() {
        assert!(EventBus::start(EventHandlers::new(false)).is_none());
        assert!(EventBus::start(EventHandlers::new(true)).is_some());
    }
}
