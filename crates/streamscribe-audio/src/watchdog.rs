use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Fires when the capture callback stops feeding for longer than the
/// timeout, signalling the capture thread to restart the stream.
#[derive(Clone)]
pub struct WatchdogTimer {
    timeout: Duration,
    last_feed: Arc<RwLock<Option<Instant>>>,
    triggered: Arc<AtomicBool>,
    handle: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl WatchdogTimer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_feed: Arc::new(RwLock::new(None)),
            triggered: Arc::new(AtomicBool::new(false)),
            handle: Arc::new(RwLock::new(None)),
        }
    }

    pub fn start(&mut self, running: Arc<AtomicBool>) {
        let timeout = self.timeout;
        let last_feed = Arc::clone(&self.last_feed);
        let triggered = Arc::clone(&self.triggered);

        *last_feed.write() = Some(Instant::now());

        let handle = thread::Builder::new()
            .name("capture-watchdog".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(500));

                    let elapsed = {
                        let guard = last_feed.read();
                        guard.map(|t| t.elapsed())
                    };
                    if let Some(elapsed) = elapsed {
                        if elapsed > timeout && !triggered.load(Ordering::SeqCst) {
                            tracing::error!("Watchdog timeout! No audio data for {:?}", elapsed);
                            triggered.store(true, Ordering::SeqCst);
                        }
                    }
                }
            })
            .expect("failed to spawn watchdog thread");

        *self.handle.write() = Some(handle);
    }

    pub fn feed(&self) {
        *self.last_feed.write() = Some(Instant::now());
        self.triggered.store(false, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.write().take() {
            let _ = handle.join();
        }
        self.triggered.store(false, Ordering::SeqCst);
        *self.last_feed.write() = None;
    }
}
