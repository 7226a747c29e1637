use tokio::sync::mpsc;

/// One step of a long-running workflow operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
    pub label: String,
}

/// Optional sink for [`Progress`] events.
///
/// Sending never blocks and a dropped receiver is ignored.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<Progress>>,
}

impl ProgressReporter {
    pub fn new(tx: mpsc::UnboundedSender<Progress>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Reporter plus the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Progress>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn report(&self, done: usize, total: usize, label: impl Into<String>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Progress {
                done,
                total,
                label: label.into(),
            });
        }
    }
}
