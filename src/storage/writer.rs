use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::errors::{ClipError, Result};
use super::HistoryPersistence;
use super::models::Item;

pub type Snapshot = Arc<[Item]>;

enum WriteCommand {
    Save(Snapshot),
    Flush(Sender<()>),
}

pub struct PersistenceWriter {
    tx: Option<Sender<WriteCommand>>,
    handle: Option<JoinHandle<()>>,
}

impl PersistenceWriter {
    pub fn spawn(persistence: Arc<dyn HistoryPersistence>) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("clipstack-persist".into())
            .spawn(move || write_loop(persistence.as_ref(), rx))
            .map_err(|e| ClipError::Worker(format!("failed to start persistence thread: {e}")))?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    pub fn submit(&self, snapshot: Snapshot) {
        let sent = self
            .tx
            .as_ref()
            .map(|tx| tx.send(WriteCommand::Save(snapshot)).is_ok())
            .unwrap_or(false);
        if !sent {
            warn!("persistence thread is gone, history change not saved");
        }
    }

    /// Block until every snapshot submitted so far has been handled.
    pub fn flush(&self) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        let (ack_tx, ack_rx) = mpsc::channel();
        if tx.send(WriteCommand::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }
}

impl Drop for PersistenceWriter {
    fn drop(&mut self) {
        // Closing the channel lets the thread drain and exit.
        self.tx.take();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("persistence thread panicked");
        }
    }
}

fn write_loop(persistence: &dyn HistoryPersistence, rx: Receiver<WriteCommand>) {
    let mut pending: Option<Snapshot> = None;
    let mut acks: Vec<Sender<()>> = Vec::new();

    while let Ok(first) = rx.recv() {
        let mut command = Some(first);
        // Coalesce a burst down to its newest snapshot.
        while let Some(cmd) = command.take() {
            match cmd {
                WriteCommand::Save(snapshot) => pending = Some(snapshot),
                WriteCommand::Flush(ack) => acks.push(ack),
            }
            command = rx.try_recv().ok();
        }

        if let Some(snapshot) = pending.take() {
            match persistence.save(&snapshot) {
                Ok(()) => debug!(items = snapshot.len(), "history saved"),
                Err(e) => warn!(error = %e, "failed to save history"),
            }
        }
        for ack in acks.drain(..) {
            let _ = ack.send(());
        }
    }
}
