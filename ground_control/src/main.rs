// src/main.rs
//! Minimal ground-station client: authenticate against the relay, optionally
//! fetch descriptors, submit telemetry and print whatever comes back.
use anyhow::{Context, Result, bail};
use bytes::Bytes;
use clap::Parser;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use station_protocol::{Challenge, DEFAULT_STATION_PORT, Frame, events};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Clone)]
#[command(name = "ground_control", about = "Ground-station client for the telemetry relay")]
struct Cli {
    #[arg(long, default_value_t = format!("127.0.0.1:{DEFAULT_STATION_PORT}"))]
    relay_addr: String,
    #[arg(long)]
    station_id: String,
    /// Shared secret used to answer the challenge
    #[arg(long)]
    key: String,
    /// Telemetry packet as JSON; repeatable
    #[arg(long = "tap")]
    taps: Vec<String>,
    /// Type tag to fetch descriptors for before submitting
    #[arg(long)]
    descriptors: Option<String>,
    /// How long to keep listening for confirmations and CAPs
    #[arg(long, default_value_t = 500)]
    linger_ms: u64,
}

struct Client<T> {
    framed: Framed<T, LengthDelimitedCodec>,
    next_id: u64,
}

impl<T: AsyncRead + AsyncWrite + Unpin> Client<T> {
    fn new(io: T) -> Self {
        Self { framed: Framed::new(io, station_protocol::frame_codec()), next_id: 1 }
    }

    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.framed.send(Bytes::from(frame.to_bytes()?)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Frame>> {
        match self.framed.next().await {
            Some(body) => Ok(Some(Frame::from_slice(&body?)?)),
            None => Ok(None),
        }
    }

    /// Answer the relay's challenge; errors on `auth-fail` or disconnect.
    async fn authenticate(&mut self, station: &str, key: &str) -> Result<()> {
        self.send(Frame::event(events::AUTH_INITIATE, Value::String(station.into()))).await?;
        loop {
            match self.recv().await? {
                Some(Frame::Event { event, id, data }) if event == events::AUTH_CHALLENGE => {
                    let challenge: Challenge = serde_json::from_value(data).context("bad challenge")?;
                    let Some(id) = id else { bail!("challenge without ack id") };
                    debug!(bytes = challenge.data.len() / 2, "challenge received");
                    let answer = challenge.answer(key.as_bytes());
                    self.send(Frame::ack(id, Value::String(answer))).await?;
                }
                Some(Frame::Event { event, .. }) if event == events::AUTH_PASS => return Ok(()),
                Some(Frame::Event { event, .. }) if event == events::AUTH_FAIL => {
                    bail!("relay denied station {station}")
                }
                Some(other) => debug!(?other, "ignored during handshake"),
                None => bail!("relay closed the connection during handshake"),
            }
        }
    }

    async fn descriptors(&mut self, type_tag: &str) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;
        self.send(Frame::request(events::DESCRIPTOR_REQUEST, id, Value::String(type_tag.into())))
            .await?;
        loop {
            match self.recv().await? {
                Some(Frame::Ack { ack, data }) if ack == id => return Ok(data),
                Some(other) => debug!(?other, "waiting for descriptors"),
                None => bail!("relay closed the connection"),
            }
        }
    }

    async fn tap(&mut self, packet: Value) -> Result<()> {
        self.send(Frame::event(events::TAP, packet)).await
    }

    /// Log relay events until `linger` passes without one.
    async fn drain(&mut self, linger: Duration) -> Result<()> {
        while let Ok(next) = tokio::time::timeout(linger, self.recv()).await {
            match next? {
                Some(Frame::Event { event, data, .. }) if event == events::INFO => {
                    info!(confirmation = %data.as_str().unwrap_or_default(), "info");
                }
                Some(Frame::Event { event, data, .. }) if event == events::CAP => {
                    info!(cap = %data, "command received");
                }
                Some(other) => debug!(?other, "unhandled"),
                None => {
                    warn!("relay closed the connection");
                    break;
                }
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ground_control=info")),
        )
        .compact()
        .init();

    let cli = Cli::parse();
    let packets = cli
        .taps
        .iter()
        .map(|t| serde_json::from_str::<Value>(t).with_context(|| format!("--tap is not JSON: {t}")))
        .collect::<Result<Vec<_>>>()?;

    let sock = TcpStream::connect(&cli.relay_addr)
        .await
        .with_context(|| format!("connecting to {}", cli.relay_addr))?;
    let mut client = Client::new(sock);

    client.authenticate(&cli.station_id, &cli.key).await?;
    info!(station = %cli.station_id, "authenticated");

    if let Some(tag) = &cli.descriptors {
        let list = client.descriptors(tag).await?;
        info!(type_tag = %tag, descriptors = %list, "descriptors");
    }
    for p in packets {
        client.tap(p).await?;
    }
    client.drain(Duration::from_millis(cli.linger_ms)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::duplex;

    #[tokio::test]
    async fn answers_challenge_with_keyed_digest() {
        let (a, b) = duplex(64 * 1024);
        let mut relay = Client::new(a);
        let station = tokio::spawn(async move {
            let mut c = Client::new(b);
            c.authenticate("S1", "k1").await
        });

        let Some(Frame::Event { event, data, .. }) = relay.recv().await.unwrap() else {
            panic!("expected auth-initiate");
        };
        assert_eq!(event, events::AUTH_INITIATE);
        assert_eq!(data, json!("S1"));

        let challenge = Challenge::with_len(32);
        relay
            .send(Frame::request(events::AUTH_CHALLENGE, 1, serde_json::to_value(&challenge).unwrap()))
            .await
            .unwrap();
        let Some(Frame::Ack { ack: 1, data }) = relay.recv().await.unwrap() else {
            panic!("expected ack");
        };
        assert!(challenge.verify(b"k1", data.as_str().unwrap()));

        relay.send(Frame::event(events::AUTH_PASS, Value::Null)).await.unwrap();
        station.await.unwrap().unwrap();
    }

    #[test]
    fn relay_address_defaults_to_station_port() {
        let cli = Cli::try_parse_from(["ground_control", "--station-id", "S1", "--key", "k1"]).unwrap();
        assert_eq!(cli.relay_addr, "127.0.0.1:7891");
        assert!(cli.taps.is_empty());
    }

    #[tokio::test]
    async fn denial_is_an_error() {
        let (a, b) = duplex(64 * 1024);
        let mut relay = Client::new(a);
        let station = tokio::spawn(async move { Client::new(b).authenticate("S404", "k").await });

        relay.recv().await.unwrap();
        relay.send(Frame::event(events::AUTH_FAIL, Value::Null)).await.unwrap();
        assert!(station.await.unwrap().is_err());
    }
}
