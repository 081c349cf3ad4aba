//! Test helpers for the transport module.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
    mpsc::{self, Receiver, Sender},
};

use super::{ConnectionHandler, ConnectionStream};

pub(crate) struct CountingHandler {
    count: Arc<AtomicUsize>,
}

impl CountingHandler {
    pub(crate) fn new() -> (Arc<AtomicUsize>, Arc<Self>) {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(Self {
            count: Arc::clone(&count),
        });
        (count, handler)
    }
}

impl ConnectionHandler for CountingHandler {
    fn handle(&self, _stream: ConnectionStream) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Holds each connection open until the test sends a release token.
pub(crate) struct BlockingHandler {
    release: Mutex<Receiver<()>>,
    finished: Arc<AtomicUsize>,
}

impl BlockingHandler {
    pub(crate) fn new() -> (Sender<()>, Arc<AtomicUsize>, Arc<Self>) {
        let (sender, receiver) = mpsc::channel();
        let finished = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(Self {
            release: Mutex::new(receiver),
            finished: Arc::clone(&finished),
        });
        (sender, finished, handler)
    }
}

impl ConnectionHandler for BlockingHandler {
    fn handle(&self, _stream: ConnectionStream) {
        let release = self.release.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = release.recv();
        drop(release);
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}
