//! Streaming delivery of generated fragments.

use tokio::sync::mpsc;

/// Receiver of generated text, called on the generating thread.
///
/// Delivery is blocking and in order: the next token is not decoded until
/// `on_token` returns. An `Err` is logged by the session and generation
/// carries on; fragments are never re-sent.
pub trait TokenSink {
    fn on_token(&mut self, fragment: &str) -> Result<(), SinkClosed>;
}

/// The receiving side is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("token receiver closed")]
pub struct SinkClosed;

impl<F> TokenSink for F
where
    F: FnMut(&str),
{
    fn on_token(&mut self, fragment: &str) -> Result<(), SinkClosed> {
        self(fragment);
        Ok(())
    }
}

/// Discards every fragment.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl TokenSink for NullSink {
    fn on_token(&mut self, _fragment: &str) -> Result<(), SinkClosed> {
        Ok(())
    }
}

/// Forwards fragments over a bounded channel, blocking while it is full.
///
/// Must not be used from inside an async task; run the generation with
/// `tokio::task::spawn_blocking` and consume the receiver from async code.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<String>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    /// A sink plus the receiver that consumes it.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl TokenSink for ChannelSink {
    fn on_token(&mut self, fragment: &str) -> Result<(), SinkClosed> {
        self.tx
            .blocking_send(fragment.to_owned())
            .map_err(|_| SinkClosed)
    }
}
