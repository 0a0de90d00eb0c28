//! Continuous reading on a worker thread with listener delivery
//!
//! The worker owns a clone of the shared reader core and runs one read burst at a
//! time. Batches go to a dispatcher thread so slow listeners never hold the core lock.

use log::{debug, error, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{ReaderError, Result};
use crate::reader::ReaderCore;
use crate::transport::RfidTransport;
use crate::types::TagReadRecord;

pub type ReadListener = Box<dyn Fn(&TagReadRecord) + Send + Sync>;
pub type ExceptionListener = Box<dyn Fn(&ReaderError) + Send + Sync>;

type SharedRead = Arc<dyn Fn(&TagReadRecord) + Send + Sync>;
type SharedException = Arc<dyn Fn(&ReaderError) + Send + Sync>;

/// Handle for removing a listener again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(usize);

/// Registered callbacks. Listeners run on the dispatcher thread against a
/// snapshot of the list, so they may add or remove listeners; changes apply
/// from the next notification.
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: AtomicUsize,
    read: Mutex<Vec<(ListenerId, SharedRead)>>,
    exception: Mutex<Vec<(ListenerId, SharedException)>>,
}

impl Listeners {
    fn next(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn add_read(&self, listener: ReadListener) -> ListenerId {
        let id = self.next();
        self.read.lock().push((id, Arc::from(listener)));
        id
    }

    pub(crate) fn add_exception(&self, listener: ExceptionListener) -> ListenerId {
        let id = self.next();
        self.exception.lock().push((id, Arc::from(listener)));
        id
    }

    /// Remove from whichever list holds `id`. False if it was not registered.
    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut read = self.read.lock();
        let before = read.len();
        read.retain(|(i, _)| *i != id);
        if read.len() != before {
            return true;
        }
        drop(read);

        let mut exception = self.exception.lock();
        let before = exception.len();
        exception.retain(|(i, _)| *i != id);
        exception.len() != before
    }

    fn read_snapshot(&self) -> Vec<SharedRead> {
        self.read.lock().iter().map(|(_, l)| l.clone()).collect()
    }

    fn notify_read(&self, record: &TagReadRecord) {
        for listener in self.read_snapshot() {
            listener(record);
        }
    }

    fn notify_exception(&self, err: &ReaderError) {
        let listeners: Vec<SharedException> =
            self.exception.lock().iter().map(|(_, l)| l.clone()).collect();
        if listeners.is_empty() {
            warn!("Background read failed with no exception listener: {}", err);
        }
        for listener in listeners {
            listener(err);
        }
    }
}

enum Command {
    Start,
    /// Acknowledged once the current burst has been delivered
    Stop(Sender<()>),
    Shutdown,
}

enum Event {
    Reads(Vec<TagReadRecord>),
    Fault(ReaderError),
    Flush(Sender<()>),
}

/// Worker and dispatcher threads for one reader
pub(crate) struct BackgroundReader {
    commands: Sender<Command>,
    worker: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl BackgroundReader {
    pub(crate) fn spawn<T>(core: Arc<Mutex<ReaderCore<T>>>, listeners: Arc<Listeners>) -> Result<Self>
    where
        T: RfidTransport + Send + 'static,
    {
        let (commands, command_rx) = mpsc::channel();
        let (events, event_rx) = mpsc::channel();

        let dispatcher = thread::Builder::new()
            .name("rfid-dispatch".into())
            .spawn(move || dispatch(event_rx, listeners))
            .map_err(|e| ReaderError::NotReady(format!("cannot spawn dispatcher: {}", e)))?;

        let worker = thread::Builder::new()
            .name("rfid-reader".into())
            .spawn(move || work(core, command_rx, events))
            .map_err(|e| ReaderError::NotReady(format!("cannot spawn reader worker: {}", e)))?;

        Ok(Self {
            commands,
            worker: Some(worker),
            dispatcher: Some(dispatcher),
        })
    }

    pub(crate) fn start(&self) -> Result<()> {
        self.commands
            .send(Command::Start)
            .map_err(|_| ReaderError::NotReady("reader worker has exited".into()))
    }

    /// Returns once the burst in progress, if any, has reached the listeners.
    pub(crate) fn stop(&self) -> Result<()> {
        let (ack, done) = mpsc::channel();
        self.commands
            .send(Command::Stop(ack))
            .map_err(|_| ReaderError::NotReady("reader worker has exited".into()))?;
        done.recv()
            .map_err(|_| ReaderError::NotReady("reader worker has exited".into()))
    }

    /// Stop the worker, then let the dispatcher drain what is queued.
    pub(crate) fn shutdown(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Reader worker panicked");
            }
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.join().is_err() {
                error!("Listener dispatcher panicked");
            }
        }
    }
}

impl Drop for BackgroundReader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn work<T: RfidTransport>(core: Arc<Mutex<ReaderCore<T>>>, commands: Receiver<Command>, events: Sender<Event>) {
    let mut running = false;
    let mut off_time = Duration::ZERO;

    loop {
        let command = if running {
            match commands.recv_timeout(off_time) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => Some(Command::Shutdown),
            }
        } else {
            Some(commands.recv().unwrap_or(Command::Shutdown))
        };

        match command {
            Some(Command::Start) => {
                debug!("Background reading started");
                running = true;
            }
            Some(Command::Stop(ack)) => {
                debug!("Background reading stopped");
                running = false;
                if events.send(Event::Flush(ack)).is_err() {
                    break;
                }
                continue;
            }
            Some(Command::Shutdown) => break,
            None => {}
        }
        if !running {
            continue;
        }

        let result = {
            let mut core = core.lock();
            let (on, off) = core.device.async_times();
            off_time = Duration::from_millis(u64::from(off));
            core.read(on)
        };
        let event = match result {
            Ok(records) => Event::Reads(records),
            Err(e) => {
                error!("Background read failed: {}", e);
                running = false;
                Event::Fault(e)
            }
        };
        if events.send(event).is_err() {
            break;
        }
    }
    debug!("Reader worker exiting");
}

fn dispatch(events: Receiver<Event>, listeners: Arc<Listeners>) {
    for event in events {
        match event {
            Event::Reads(records) => {
                for record in &records {
                    listeners.notify_read(record);
                }
            }
            Event::Fault(err) => listeners.notify_exception(&err),
            Event::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_removal_by_id() {
        let listeners = Listeners::default();
        let a = listeners.add_read(Box::new(|_| {}));
        let b = listeners.add_exception(Box::new(|_| {}));
        assert_ne!(a, b);
        assert!(listeners.remove(b));
        assert!(!listeners.remove(b));
        assert!(listeners.remove(a));
    }

    #[test]
    fn listener_may_change_registrations_while_notified() {
        let listeners = Arc::new(Listeners::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let own_id: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let id = listeners.add_read(Box::new({
            let registry = Arc::downgrade(&listeners);
            let calls = calls.clone();
            let own_id = own_id.clone();
            move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(registry) = registry.upgrade() {
                    if let Some(id) = own_id.lock().take() {
                        registry.remove(id);
                    }
                    let calls = calls.clone();
                    registry.add_read(Box::new(move |_| {
                        calls.fetch_add(10, Ordering::SeqCst);
                    }));
                }
            }
        }));
        *own_id.lock() = Some(id);

        let record = TagReadRecord::new(crate::types::TagData::new(
            crate::types::TagProtocol::Gen2,
            vec![0x01],
        ));
        listeners.notify_read(&record);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!listeners.remove(id));

        // only the listener added during the first round remains
        listeners.notify_read(&record);
        assert_eq!(calls.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn dispatcher_delivers_before_flush_ack() {
        let listeners = Arc::new(Listeners::default());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        listeners.add_read(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let (events, event_rx) = mpsc::channel();
        let handle = thread::spawn({
            let listeners = listeners.clone();
            move || dispatch(event_rx, listeners)
        });

        let record = TagReadRecord::new(crate::types::TagData::new(
            crate::types::TagProtocol::Gen2,
            vec![0x01],
        ));
        events.send(Event::Reads(vec![record.clone(), record])).unwrap();
        let (ack, done) = mpsc::channel();
        events.send(Event::Flush(ack)).unwrap();
        done.recv().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        drop(events);
        handle.join().unwrap();
    }
}
