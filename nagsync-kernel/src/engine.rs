/**
 * ENGINE - Single consumer of everything the bus delivers
 *
 * Event frames and snapshot replies share one bounded inbox, drained by one
 * task. Frames are therefore applied strictly in arrival order and the
 * replica has exactly one writer; readers (REST, sockets) only take the
 * store's read locks.
 */

use crate::importer::Importer;
use crate::processor::EventProcessor;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Frame from the event source: header (`"<type> <metadata>"`) plus JSON body.
    Event { header: String, payload: Vec<u8> },
    /// Raw reply on the snapshot response topic.
    Snapshot(Vec<u8>),
}

pub fn inbox(capacity: usize) -> (mpsc::Sender<Inbound>, mpsc::Receiver<Inbound>) {
    mpsc::channel(capacity.max(1))
}

pub struct Engine {
    processor: EventProcessor,
    importer: Importer,
}

impl Engine {
    pub fn new(processor: EventProcessor, importer: Importer) -> Self {
        Self { processor, importer }
    }

    pub fn handle(&self, msg: Inbound) {
        match msg {
            Inbound::Event { header, payload } => {
                let disposition = self.processor.handle_frame(&header, &payload);
                debug!(header = %header, ?disposition, "frame handled");
            }
            Inbound::Snapshot(payload) => {
                self.importer.handle_response(&payload);
            }
        }
    }

    /// Runs until every sender is gone.
    pub fn spawn(self, mut rx: mpsc::Receiver<Inbound>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                self.handle(msg);
            }
            info!("engine inbox closed");
        })
    }
}
