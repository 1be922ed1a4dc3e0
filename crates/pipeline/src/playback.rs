//! Playback feed
//!
//! FIFO of synthesized sentences drained into a playback sink one
//! segment at a time. An interrupt drops everything not yet spoken and
//! stops the segment in flight.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error};

use parley_config::SynthesisConfig;
use parley_core::{AudioSegment, Result};

/// Text-to-speech seam
#[async_trait::async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &SynthesisConfig) -> Result<AudioSegment>;
}

/// Audio output seam. `play` resolves when the segment has finished or
/// was stopped.
#[async_trait::async_trait]
pub trait PlaybackSink: Send + Sync {
    async fn play(&self, segment: AudioSegment) -> Result<()>;

    /// Abort the segment currently playing, if any
    async fn stop(&self);
}

/// Ordered queue of segments awaiting playback
pub struct PlaybackFeed {
    queue: Mutex<VecDeque<AudioSegment>>,
    speaking: AtomicBool,
    closed: AtomicBool,
    wake: Notify,
    sink: Arc<dyn PlaybackSink>,
}

impl PlaybackFeed {
    pub fn new(sink: Arc<dyn PlaybackSink>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            speaking: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            wake: Notify::new(),
            sink,
        }
    }

    pub fn push(&self, segment: AudioSegment) {
        self.queue.lock().push_back(segment);
        self.wake.notify_one();
    }

    /// Drain the queue into the sink until [`close`](Self::close)
    pub async fn run(self: Arc<Self>) {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return;
            }
            let next = self.queue.lock().pop_front();
            match next {
                Some(segment) => {
                    self.speaking.store(true, Ordering::Release);
                    debug!(text = segment.text.as_str(), "playing segment");
                    if let Err(err) = self.sink.play(segment).await {
                        error!(%err, "playback failed");
                    }
                    self.speaking.store(false, Ordering::Release);
                }
                None => self.wake.notified().await,
            }
        }
    }

    /// Drop all unspoken segments, stop the one in flight, and return how
    /// many sentences were cut off (queued plus the one playing).
    pub async fn interrupt(&self) -> usize {
        let dropped = {
            let mut queue = self.queue.lock();
            let n = queue.len();
            queue.clear();
            n
        };
        if self.speaking.load(Ordering::Acquire) {
            self.sink.stop().await;
            dropped + 1
        } else {
            dropped
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Acquire)
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Unspoken sentences including the one in flight
    pub fn pending_sentences(&self) -> usize {
        self.queued() + usize::from(self.is_speaking())
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.wake.notify_one();
    }
}
