// src/notify/mod.rs

//! Fan-out of artifacts and text messages to registered subscribers.
//!
//! The [`Dispatcher`] owns the subscriber registry (persisted through the
//! state store) and wraps an opaque, unreliable [`NotificationTransport`].

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use crate::errors::Result;
use crate::types::SubscriberTarget;

pub mod dispatcher;
pub mod transport;

pub use dispatcher::{
    delivery_failed, Dispatcher, NotificationErrorKind, NotificationOutcome, RunCounters,
};
pub use transport::{LogTransport, OneBotTransport};

/// What gets delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Image {
        path: PathBuf,
        caption: Option<String>,
    },
    Text(String),
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Image { path, .. } => write!(f, "image {}", path.display()),
            Payload::Text(text) => write!(f, "text ({} chars)", text.chars().count()),
        }
    }
}

/// Boxed future returned by [`NotificationTransport::send`].
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Message-sending collaborator (the host bot runtime).
pub trait NotificationTransport: Send + Sync {
    fn send<'a>(&'a self, target: &'a SubscriberTarget, payload: &'a Payload) -> SendFuture<'a>;
}
