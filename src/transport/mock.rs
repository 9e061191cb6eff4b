//! Mock transport socket for testing.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock};

use super::{MsgSocket, Result, TransportError};
use crate::proto::MsgRecord;

/// In-memory socket fed by the test.
///
/// `recv` waits until a record or error is pushed. Counters track opens,
/// closes, completed receives and the peak number of concurrent receives.
pub struct MockSocket {
    sender: mpsc::UnboundedSender<Result<MsgRecord>>,
    inbox: Mutex<mpsc::UnboundedReceiver<Result<MsgRecord>>>,
    fail_on_open: RwLock<bool>,
    fail_on_close: RwLock<bool>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    receives: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Default for MockSocket {
    fn default() -> Self {
        let (sender, inbox) = mpsc::unbounded_channel();
        Self {
            sender,
            inbox: Mutex::new(inbox),
            fail_on_open: RwLock::new(false),
            fail_on_close: RwLock::new(false),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            receives: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }
}

impl MockSocket {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_open(&self, fail: bool) {
        *self.fail_on_open.write().await = fail;
    }

    pub async fn set_fail_on_close(&self, fail: bool) {
        *self.fail_on_close.write().await = fail;
    }

    /// Queue a record for the next `recv`.
    pub fn push(&self, record: MsgRecord) {
        // The receiver lives as long as self.
        let _ = self.sender.send(Ok(record));
    }

    /// Queue a receive failure.
    pub fn push_error(&self, error: TransportError) {
        let _ = self.sender.send(Err(error));
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Number of `recv` calls that have returned.
    pub fn receive_count(&self) -> usize {
        self.receives.load(Ordering::SeqCst)
    }

    /// Number of `recv` calls currently waiting.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent `recv` calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight count when a `recv` returns or is cancelled.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MsgSocket for MockSocket {
    async fn open(&self) -> Result<()> {
        if *self.fail_on_open.read().await {
            return Err(TransportError::Connect("Mock open failure".to_string()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn recv(&self) -> Result<MsgRecord> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        let _pending = InFlight(&self.in_flight);

        let item = self.inbox.lock().await.recv().await;

        self.receives.fetch_add(1, Ordering::SeqCst);
        item.unwrap_or(Err(TransportError::Closed))
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if *self.fail_on_close.read().await {
            return Err(TransportError::Io(std::io::Error::other(
                "Mock close failure",
            )));
        }
        Ok(())
    }
}
