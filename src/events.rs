//! Notifications raised by the frame reader and the frame transformer.
//!
//! Each subscriber gets its own unbounded tokio channel, so a slow subscriber
//! never causes another one to miss an event and nothing is dropped while the
//! receiver is alive. Senders whose receiver has been dropped are pruned on the
//! next emit.
//!
//! Channels work without a running runtime: tests and synchronous callers can
//! drain them with `try_recv`.

use crate::parsing::frame::Frame;
use crate::scripting::transformer::ParseResult;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Registry of subscribers for events of type `E`.
pub struct Listeners<E> {
    senders: Arc<Mutex<Vec<mpsc::UnboundedSender<E>>>>,
}

impl<E: Clone> Listeners<E> {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            senders: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber.
    pub fn emit(&self, event: E) {
        let mut senders = self.senders.lock().unwrap_or_else(|p| p.into_inner());
        senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Drop every subscriber. Their receivers observe a closed channel.
    pub fn clear(&self) {
        self.senders
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        self.senders.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// True when nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: Clone> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

// Clones share the same subscriber list.
impl<E> Clone for Listeners<E> {
    fn clone(&self) -> Self {
        Self {
            senders: Arc::clone(&self.senders),
        }
    }
}

impl<E> fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.senders.lock().map(|s| s.len()).unwrap_or(0);
        f.debug_struct("Listeners").field("subscribers", &count).finish()
    }
}

/// Events raised by `FrameReader`.
#[derive(Debug, Clone, PartialEq)]
pub enum ReaderEvent {
    /// A frame passed all checks and was queued
    FrameExtracted(Frame),
    /// An extraction pass finished
    ReadyRead,
}

/// Severity of a console call made from a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    /// `console::log` and `print`
    Log,
    /// `console::info`
    Info,
    /// `console::warn`
    Warn,
    /// `console::error`
    Error,
    /// `debug`
    Debug,
}

/// Events raised by `FrameTransformer`.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformerEvent {
    /// Output from the in-script console shim
    Console {
        /// Which console function was called
        level: ConsoleLevel,
        /// The logged value as text
        message: String,
    },
    /// A parse call succeeded
    Parsed(ParseResult),
    /// A load or parse call failed
    Error(String),
    /// A script was rejected for a recoverable reason
    Warning(String),
    /// A new script became active
    ScriptLoaded,
}
