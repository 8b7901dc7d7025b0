//! Events emitted by the serial core for whoever is displaying them.
//!
//! The core never renders anything itself. It pushes [`Notification`]s into
//! a channel; a UI, a CLI, or a test subscribes on the receiving end.
//! Delivery is best-effort: a dropped receiver silently discards events.

use log::{debug, info};
use strum_macros::{AsRefStr, EnumDiscriminants};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Clone, Debug, PartialEq, Eq, AsRefStr, EnumDiscriminants)]
#[strum_discriminants(name(NotificationKind))]
pub enum Notification {
    /// Raw line received from the instrument
    #[strum(serialize = "gpib")]
    Chat(String),
    /// Status or error from the service itself
    #[strum(serialize = "system")]
    System(String),
}
impl Notification {
    /// Sender tag as shown to the user (`gpib` or `system`)
    pub fn source(&self) -> &str {
        self.as_ref()
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Chat(text) | Self::System(text) => text,
        }
    }

    pub fn kind(&self) -> NotificationKind {
        self.into()
    }
}

/// Cheap, cloneable handle used by every background task to publish events.
#[derive(Clone, Debug, Default)]
pub struct Notifier {
    tx: Option<UnboundedSender<Notification>>,
}
impl Notifier {
    pub fn channel() -> (Self, UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Notifier that only logs
    pub fn silent() -> Self {
        Self { tx: None }
    }

    pub fn chat(&self, text: impl Into<String>) {
        let text = text.into();
        debug!(source = "gpib"; "{text}");
        self.publish(Notification::Chat(text));
    }

    pub fn system(&self, text: impl Into<String>) {
        let text = text.into();
        info!(source = "system"; "{text}");
        self.publish(Notification::System(text));
    }

    fn publish(&self, note: Notification) {
        if let Some(tx) = &self.tx {
            /* Nobody listening is not an error */
            let _ = tx.send(note);
        }
    }
}
