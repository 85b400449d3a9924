use std::collections::HashMap;

use async_trait::async_trait;
use futures::future::join_all;
use std::time::Duration;
use tokio::{
    runtime,
    sync::{mpsc, Mutex},
    task::JoinHandle,
};

use crate::logs::LogBatch;

/// Where finished batches go. Polls for different targets run concurrently, so `consume`
/// can be called from several tasks at once. An error only fails the poll that produced
/// the batch - it isn't retried.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn consume(&self, batch: LogBatch) -> Result<(), anyhow::Error>;
}

/// A sink that pushes batches down a bounded channel, for callers that would rather just
/// hold a receiver
pub struct ChannelSink {
    sender: mpsc::Sender<LogBatch>,
}

impl ChannelSink {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<LogBatch>) {
        let (sender, recv) = mpsc::channel(buffer);
        (ChannelSink { sender }, recv)
    }
}

#[async_trait]
impl Sink for ChannelSink {
    async fn consume(&self, batch: LogBatch) -> Result<(), anyhow::Error> {
        self.sender
            .send(batch)
            .await
            .map_err(|_| anyhow::anyhow!("Batch receiver dropped"))
    }
}

/// A thing that knows how to construct an output writer given a batch, and how to pick a
/// writer ID for a batch. Used with [ConsumerPool], which caches the writers, so only one
/// writer is created per ID
pub trait WriterSet: Send + Sync {
    /// Construct an output actor, and spawn it on the given runtime, then return
    fn construct_output(&self, batch: &LogBatch, runtime: &runtime::Handle) -> Writer;
    /// Given a batch, return a writer ID. This should be infallible, so implementers are
    /// expected to provide a sensible default.
    fn get_writer_id(&self, batch: &LogBatch) -> String;
}

/// An "actor" that consumes batches, and exits when the other side of the channel
/// returns None
pub struct Writer {
    id: String,
    handle: JoinHandle<()>,
    sender: mpsc::Sender<WriterMessage>,
}

pub enum WriterMessage {
    New(LogBatch),
}

/// A sink that dispatches each batch to the writer for its ID, starting writers as new
/// IDs show up
pub struct ConsumerPool {
    writers: Mutex<HashMap<String, Writer>>,
    writer_set: Box<dyn WriterSet>,
}

impl ConsumerPool {
    pub fn new(writer_set: Box<dyn WriterSet>) -> Self {
        ConsumerPool {
            writers: Mutex::new(HashMap::new()),
            writer_set,
        }
    }

    /// Drop all writer channels and join all writers, waiting at most `wait` for them
    /// to finish
    pub async fn finish(&self, wait: Duration) {
        let writers: Vec<Writer> = self.writers.lock().await.drain().map(|(_, w)| w).collect();
        join_all(writers.into_iter().map(|w| w.finish(wait))).await;
    }
}

#[async_trait]
impl Sink for ConsumerPool {
    #[tracing::instrument(level = "trace", skip_all)]
    async fn consume(&self, batch: LogBatch) -> Result<(), anyhow::Error> {
        let id = self.writer_set.get_writer_id(&batch);

        let mut writers = self.writers.lock().await;
        let writer = writers.entry(id.clone()).or_insert_with(|| {
            self.writer_set
                .construct_output(&batch, &runtime::Handle::current())
        });

        let sent = writer.send(WriterMessage::New(batch)).await;
        if sent.is_err() {
            // Dead writer, the next batch for this id starts a fresh one
            writers.remove(&id);
        }
        sent
    }
}

impl Writer {
    pub fn new(id: String, handle: JoinHandle<()>, sender: mpsc::Sender<WriterMessage>) -> Self {
        Writer { id, handle, sender }
    }

    pub async fn send(&self, msg: WriterMessage) -> Result<(), anyhow::Error> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| anyhow::anyhow!("Writer {} has stopped", self.id))
    }

    pub async fn finish(self, wait: Duration) {
        drop(self.sender);
        let _ = tokio::time::timeout(wait, self.handle).await;
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}
