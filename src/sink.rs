use log::debug;
use tokio::sync::mpsc;

/// Line-oriented channel into whatever hosts the engine. Cloneable, never
/// blocks, and safe to use from the background session task.
#[derive(Debug, Clone)]
pub struct AlertSink {
    tx: mpsc::UnboundedSender<String>,
}

impl AlertSink {
    /// Create a sink together with the receiving end the collaborator
    /// consumes one line at a time.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn line(&self, text: impl Into<String>) {
        if self.tx.send(text.into()).is_err() {
            debug!("alert sink receiver dropped; line discarded");
        }
    }
}
