use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::digest::Digest;

/// Destination for payloads of a subscribed topic.
///
/// Sinks are compared by identity (`Arc::ptr_eq`) for unsubscription, so
/// the same channel subscribed twice counts as two distinct deliveries
/// only if two distinct `Arc`s were registered.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, payload: &[u8]) -> Result<()>;
}

#[async_trait]
impl EventSink for mpsc::UnboundedSender<Vec<u8>> {
    async fn deliver(&self, payload: &[u8]) -> Result<()> {
        self.send(payload.to_vec())
            .map_err(|err| anyhow!("subscriber channel closed: {err}"))
    }
}

/// Topic subscriptions: digest -> sinks and digest -> original topic
/// bytes. The two maps always carry identical key sets; every mutation
/// touches both under the caller's lock.
#[derive(Default)]
pub struct SubscriptionTable {
    sinks: HashMap<Digest, Vec<Arc<dyn EventSink>>>,
    topics: HashMap<Digest, Vec<u8>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, topic: &[u8], sink: Arc<dyn EventSink>) -> Digest {
        let digest = Digest::of(topic);
        match self.sinks.entry(digest) {
            Entry::Occupied(mut existing) => existing.get_mut().push(sink),
            Entry::Vacant(vacant) => {
                vacant.insert(vec![sink]);
                self.topics.insert(digest, topic.to_vec());
            }
        }
        digest
    }

    /// Remove one sink (first identity match) or, with `None`, every sink
    /// for the topic. Both maps drop the digest once no sink remains.
    pub fn unsubscribe(&mut self, topic: &[u8], sink: Option<&Arc<dyn EventSink>>) {
        let digest = Digest::of(topic);
        let Some(registered) = self.sinks.get_mut(&digest) else {
            return;
        };

        match sink {
            Some(sink) => {
                if let Some(pos) = registered.iter().position(|s| Arc::ptr_eq(s, sink)) {
                    registered.remove(pos);
                }
                if registered.is_empty() {
                    self.sinks.remove(&digest);
                    self.topics.remove(&digest);
                }
            }
            None => {
                self.sinks.remove(&digest);
                self.topics.remove(&digest);
            }
        }
    }

    pub fn sinks_for(&self, digest: &Digest) -> Option<&Vec<Arc<dyn EventSink>>> {
        self.sinks.get(digest)
    }

    pub fn subscribers(&self, topic: &[u8]) -> Vec<Arc<dyn EventSink>> {
        self.sinks
            .get(&Digest::of(topic))
            .cloned()
            .unwrap_or_default()
    }

    pub fn digests(&self) -> impl Iterator<Item = &Digest> {
        self.sinks.keys()
    }

    pub fn topics(&self) -> Vec<Vec<u8>> {
        self.topics.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn key_sets_match(&self) -> bool {
        self.sinks.len() == self.topics.len()
            && self.sinks.keys().all(|digest| self.topics.contains_key(digest))
    }
}
