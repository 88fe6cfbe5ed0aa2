//! Renewable one-shot change notification
//!
//! A [`ChangeNotifier`] owns the *current generation* of a single-fire
//! signal. `raise()` installs a fresh generation first and only then fires
//! the previous one, so a reader that subscribes during a notification
//! callback can miss at most the notification just delivered, never a later
//! one. Each [`ChangeToken`] observes exactly one transition; observing the
//! next change requires subscribing again.

use std::sync::RwLock;

use tokio::sync::watch;

use super::{safe_read, safe_write};

/// Producer side. One per resource store / config snapshot owner.
#[derive(Debug)]
pub struct ChangeNotifier {
    current: RwLock<watch::Sender<bool>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            current: RwLock::new(tx),
        }
    }

    /// Subscribe to the current generation.
    pub fn token(&self) -> ChangeToken {
        ChangeToken {
            rx: safe_read(&self.current).subscribe(),
        }
    }

    /// Advance the generation and fire the superseded one exactly once.
    pub fn raise(&self) {
        let (next, _rx) = watch::channel(false);
        let previous = {
            let mut current = safe_write(&self.current);
            std::mem::replace(&mut *current, next)
        };
        // Fired after the swap: anyone subscribing from here on gets the new
        // generation and will only see the *next* raise.
        let _ = previous.send(true);
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot subscription to a single generation.
#[derive(Debug, Clone)]
pub struct ChangeToken {
    rx: watch::Receiver<bool>,
}

impl ChangeToken {
    /// Wrap the receiver half of an externally owned generation (used by
    /// config snapshots, which fire their token on supersession).
    pub(crate) fn from_receiver(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// Whether this generation has already fired.
    pub fn has_fired(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the generation fires. Consumes the token: re-observing
    /// requires a fresh subscription. Also resolves if the notifier is
    /// dropped (shutdown disposes outstanding tokens).
    pub async fn changed(mut self) {
        let _ = self.rx.wait_for(|fired| *fired).await;
    }
}
