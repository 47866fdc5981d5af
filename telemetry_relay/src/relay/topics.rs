// src/relay/topics.rs
//! Mission-keyed pub/sub. Any number of listeners publish, any number of
//! observer connections subscribe; publishers never see who is listening.
use dashmap::DashMap;
use station_protocol::NewTap;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct MissionTopics {
    capacity: usize,
    topics: Arc<DashMap<String, broadcast::Sender<NewTap>>>,
}

impl MissionTopics {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), topics: Arc::new(DashMap::new()) }
    }

    pub fn subscribe(&self, mid: &str) -> broadcast::Receiver<NewTap> {
        self.topics
            .entry(mid.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Returns how many subscribers the notification reached.
    pub fn publish(&self, mid: &str, note: NewTap) -> usize {
        let reached = match self.topics.get(mid) {
            Some(tx) => tx.send(note).unwrap_or(0),
            None => return 0,
        };
        if reached == 0 {
            // last observer left; drop the topic (ref above is released)
            self.topics.remove_if(mid, |_, tx| tx.receiver_count() == 0);
        }
        reached
    }

    /// Drop the topic once its last receiver is gone. Call after the
    /// receiver itself has been dropped.
    pub fn release(&self, mid: &str) {
        self.topics.remove_if(mid, |_, tx| tx.receiver_count() == 0);
    }

    pub fn subscriber_count(&self, mid: &str) -> usize {
        self.topics.get(mid).map(|tx| tx.receiver_count()).unwrap_or(0)
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}
