// src/relay/observer.rs
//! Web-observer namespace: read-only subscribers of mission topics.
use super::topics::MissionTopics;
use crate::net::link::Link;
use serde_json::Value;
use station_protocol::{NewTap, events};
use std::collections::HashSet;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub async fn run<T>(io: T, peer: String, topics: MissionTopics)
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let (link, mut inbound) = Link::spawn(io, peer.clone());
    let mut joined: HashSet<String> = HashSet::new();
    // dropping the set aborts the forwarders along with the connection
    let mut forwarders = JoinSet::new();

    while let Some(ev) = inbound.recv().await {
        if ev.event != events::JOIN_MID {
            debug!(%peer, event = %ev.event, "unhandled observer event");
            continue;
        }
        let Some(mid) = ev.data.as_str().filter(|m| !m.is_empty()) else {
            debug!(%peer, "join-mid without a mission id");
            continue;
        };
        if joined.insert(mid.to_string()) {
            info!(%peer, %mid, "observer joined mission");
            forwarders.spawn(forward(topics.subscribe(mid), link.clone(), mid.to_string()));
        }
        // ack once subscribed
        if let Some(id) = ev.id {
            let _ = link.reply(id, Value::Bool(true)).await;
        }
    }

    debug!(%peer, missions = joined.len(), "observer disconnected");
    forwarders.shutdown().await;
    for mid in &joined {
        topics.release(mid);
    }
}

async fn forward(mut rx: broadcast::Receiver<NewTap>, link: Link, mid: String) {
    loop {
        match rx.recv().await {
            Ok(note) => {
                let body = serde_json::to_value(&note).unwrap_or_default();
                if link.emit(events::NEW_TAP, body).await.is_err() {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(peer = %link.peer(), %mid, skipped, "observer lagging; notifications skipped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::duplex;

    async fn until_subscribed(topics: &MissionTopics, mid: &str, n: usize) {
        for _ in 0..200 {
            if topics.subscriber_count(mid) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("observer never subscribed to {mid}");
    }

    #[tokio::test]
    async fn joined_observer_receives_new_tap() {
        let topics = MissionTopics::new(16);
        let (a, b) = duplex(64 * 1024);
        tokio::spawn(run(a, "web-1".into(), topics.clone()));
        let (client, mut rx) = Link::spawn(b, "browser".into());

        let ack = client.request(events::JOIN_MID, json!("M1")).await.unwrap();
        assert_eq!(ack, json!(true));
        until_subscribed(&topics, "M1", 1).await;

        topics.publish("M1", NewTap { id: "r1".into(), t: "X".into(), mid: "M1".into() });
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.event, events::NEW_TAP);
        assert_eq!(ev.data["id"], "r1");
    }

    #[tokio::test]
    async fn repeated_join_subscribes_once() {
        let topics = MissionTopics::new(16);
        let (a, b) = duplex(64 * 1024);
        tokio::spawn(run(a, "web-2".into(), topics.clone()));
        let (client, _rx) = Link::spawn(b, "browser".into());

        client.request(events::JOIN_MID, json!("M1")).await.unwrap();
        client.request(events::JOIN_MID, json!("M1")).await.unwrap();
        until_subscribed(&topics, "M1", 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(topics.subscriber_count("M1"), 1);
    }

    #[tokio::test]
    async fn invalid_join_is_ignored() {
        let topics = MissionTopics::new(16);
        let (a, b) = duplex(64 * 1024);
        tokio::spawn(run(a, "web-3".into(), topics.clone()));
        let (client, _rx) = Link::spawn(b, "browser".into());

        client.emit(events::JOIN_MID, json!(7)).await.unwrap();
        client.emit(events::JOIN_MID, json!("")).await.unwrap();
        client.request(events::JOIN_MID, json!("M2")).await.unwrap();
        until_subscribed(&topics, "M2", 1).await;
        assert_eq!(topics.subscriber_count(""), 0);
    }

    #[tokio::test]
    async fn disconnect_releases_joined_topics() {
        let topics = MissionTopics::new(16);
        let (a, b) = duplex(64 * 1024);
        let observer = tokio::spawn(run(a, "web-4".into(), topics.clone()));
        let (client, rx) = Link::spawn(b, "browser".into());

        for mid in ["M1", "M2", "M3"] {
            client.request(events::JOIN_MID, json!(mid)).await.unwrap();
        }
        until_subscribed(&topics, "M3", 1).await;
        assert_eq!(topics.topic_count(), 3);

        drop(client);
        drop(rx);
        observer.await.unwrap();
        assert_eq!(topics.topic_count(), 0);
    }
}
