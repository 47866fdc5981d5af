// src/auth/handshake.rs
use super::Session;
use crate::errors::{DenyReason, LinkError, StoreError};
use crate::logging;
use crate::net::link::Link;
use crate::state::AppState;
use crate::store::{AccessAttempt, AccessLogEntry, StationCredential};
use chrono::Utc;
use serde_json::Value;
use station_protocol::{Challenge, events, valid_tag};
use tokio::task::JoinError;
use tracing::{debug, info, warn};

/// Idle → AwaitingLookup → ChallengeIssued → {Authenticated | Denied} → Closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    AwaitingLookup,
    ChallengeIssued,
    Authenticated,
    Denied,
    Closed,
}

/// Per-connection handshake driver.
pub struct Authenticator<'a> {
    state: &'a AppState,
    link: &'a Link,
    phase: AuthState,
}

impl<'a> Authenticator<'a> {
    pub fn new(state: &'a AppState, link: &'a Link) -> Self {
        Self { state, link, phase: AuthState::Idle }
    }

    pub fn phase(&self) -> AuthState {
        self.phase
    }

    /// Run the handshake for an `auth-initiate` payload and emit the outcome
    /// signal. `None` means the connection must be closed.
    pub async fn run(&mut self, initiate: &Value) -> Option<Session> {
        let station = initiate.as_str().unwrap_or("<malformed>").to_string();
        match self.authenticate(initiate).await {
            Ok(session) => {
                if self.link.emit(events::AUTH_PASS, Value::Null).await.is_err() {
                    self.phase = AuthState::Closed;
                    return None;
                }
                info!(station = %session.station_id(), peer = %self.link.peer(), "station authenticated");
                logging::csv::log_access(&station, self.link.peer(), "pass", "").await;
                Some(session)
            }
            Err(DenyReason::Disconnected) => {
                self.phase = AuthState::Closed;
                debug!(%station, peer = %self.link.peer(), "peer left mid-handshake");
                logging::csv::log_access(&station, self.link.peer(), "closed", "disconnected").await;
                None
            }
            Err(reason) => {
                self.phase = AuthState::Denied;
                warn!(%station, peer = %self.link.peer(), %reason, "handshake denied");
                let _ = self.link.emit(events::AUTH_FAIL, Value::Null).await;
                logging::csv::log_access(&station, self.link.peer(), "fail", &reason.to_string()).await;
                None
            }
        }
    }

    /// The handshake proper, without the outcome signal.
    pub async fn authenticate(&mut self, initiate: &Value) -> Result<Session, DenyReason> {
        let id = match initiate.as_str() {
            Some(id) if valid_tag(id) => id.to_string(),
            _ => return Err(DenyReason::MalformedId),
        };

        self.phase = AuthState::AwaitingLookup;
        let (cred, entry, challenge) = self.gather(&id).await?;

        self.phase = AuthState::ChallengeIssued;
        let expected = self.state.crypto.expected_answer(&cred, &challenge);
        let payload = serde_json::to_value(&challenge)
            .map_err(|e| DenyReason::ProtocolViolation(e.to_string()))?;
        // single use: the challenge goes out of scope with this function
        let answer = self
            .link
            .request(events::AUTH_CHALLENGE, payload)
            .await
            .map_err(|e| match e {
                LinkError::Closed => DenyReason::Disconnected,
                LinkError::Protocol(e) => DenyReason::ProtocolViolation(e.to_string()),
            })?;

        let matched = answer.as_str().map(|a| expected.matches(a)).unwrap_or(false);
        if !matched {
            return Err(DenyReason::ResponseMismatch);
        }

        self.state
            .ledger
            .mark_authenticated(entry.id)
            .await
            .map_err(DenyReason::LedgerFailed)?;

        self.phase = AuthState::Authenticated;
        Ok(Session {
            station: cred,
            entry: entry.id,
            peer: self.link.peer().to_string(),
            since: Utc::now(),
        })
    }

    /// Credential lookup, ledger write and challenge generation, issued
    /// together. The first failure wins; spawned store calls still run to
    /// completion in the background and their results are discarded.
    async fn gather(&self, id: &str) -> Result<(StationCredential, AccessLogEntry, Challenge), DenyReason> {
        let lookup = {
            let secrets = self.state.secrets.clone();
            let id = id.to_string();
            tokio::spawn(async move { secrets.lookup(&id).await })
        };
        let record = {
            let ledger = self.state.ledger.clone();
            let attempt = AccessAttempt { station: id.to_string(), peer: self.link.peer().to_string() };
            tokio::spawn(async move { ledger.record(attempt).await })
        };
        let crypto = self.state.crypto.clone();

        tokio::try_join!(
            async {
                match lookup.await {
                    Ok(Ok(Some(cred))) if cred.active => Ok(cred),
                    Ok(Ok(Some(_))) => Err(DenyReason::InactiveStation),
                    Ok(Ok(None)) => Err(DenyReason::UnknownStation),
                    Ok(Err(e)) => Err(DenyReason::LookupFailed(e)),
                    Err(e) => Err(DenyReason::LookupFailed(join_failure(e))),
                }
            },
            async {
                match record.await {
                    Ok(Ok(entry)) => Ok(entry),
                    Ok(Err(e)) => Err(DenyReason::LedgerFailed(e)),
                    Err(e) => Err(DenyReason::LedgerFailed(join_failure(e))),
                }
            },
            async { Ok::<_, DenyReason>(crypto.new_challenge()) },
        )
    }
}

fn join_failure(e: JoinError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::seed::MemoryStores;
    use crate::store::{MockAccessLedger, MockSecretStore};
    use serde_json::json;
    use std::sync::Arc;
    use crate::net::link::Inbound;
    use tokio::io::duplex;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;
    use uuid::Uuid;

    fn state_with(stores: &MemoryStores) -> AppState {
        AppState::new(&Config { challenge_bytes: 32, ..Config::default() }, stores)
    }

    fn seeded() -> MemoryStores {
        let stores = MemoryStores::default();
        stores.secrets.insert(StationCredential { id: "S1".into(), key: "k1".into(), active: true });
        stores.secrets.insert(StationCredential { id: "S9".into(), key: "k9".into(), active: false });
        stores
    }

    /// Station side: answer the challenge with `key`, report what came back.
    fn answer_with(key: &'static str) -> (Link, mpsc::Receiver<Inbound>, JoinHandle<Option<String>>) {
        let (a, b) = duplex(64 * 1024);
        let (server, server_rx) = Link::spawn(a, "127.0.0.1:5000".into());
        let (client, mut client_rx) = Link::spawn(b, "station".into());
        let task = tokio::spawn(async move {
            let mut last = None;
            while let Some(ev) = client_rx.recv().await {
                if ev.event == events::AUTH_CHALLENGE {
                    let ch: Challenge = serde_json::from_value(ev.data).unwrap();
                    client.reply(ev.id.unwrap(), json!(ch.answer(key.as_bytes()))).await.unwrap();
                } else {
                    last = Some(ev.event);
                    break;
                }
            }
            last
        });
        (server, server_rx, task)
    }

    #[tokio::test]
    async fn correct_answer_authenticates_and_marks_ledger() {
        let stores = seeded();
        let state = state_with(&stores);
        let (link, _inbound, station) = answer_with("k1");

        let mut auth = Authenticator::new(&state, &link);
        let session = auth.run(&json!("S1")).await.expect("session");
        assert_eq!(auth.phase(), AuthState::Authenticated);
        assert_eq!(session.station_id(), "S1");
        assert!(stores.ledger.get(&session.entry).unwrap().authenticated);

        assert_eq!(station.await.unwrap().as_deref(), Some(events::AUTH_PASS));
    }

    #[tokio::test]
    async fn wrong_answer_denies_and_leaves_ledger_unauthenticated() {
        let stores = seeded();
        let state = state_with(&stores);
        let (link, _inbound, station) = answer_with("not-k1");

        let mut auth = Authenticator::new(&state, &link);
        assert!(auth.run(&json!("S1")).await.is_none());
        assert_eq!(auth.phase(), AuthState::Denied);

        let entries = stores.ledger.entries();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].authenticated);
        assert_eq!(station.await.unwrap().as_deref(), Some(events::AUTH_FAIL));
    }

    #[tokio::test]
    async fn unknown_station_never_sees_a_challenge() {
        let stores = seeded();
        let state = state_with(&stores);
        let (link, _inbound, station) = answer_with("k1");

        let mut auth = Authenticator::new(&state, &link);
        assert_eq!(auth.authenticate(&json!("nobody")).await.unwrap_err(), DenyReason::UnknownStation);
        assert!(auth.run(&json!("nobody")).await.is_none());
        // first event the station sees is the failure, not a challenge
        assert_eq!(station.await.unwrap().as_deref(), Some(events::AUTH_FAIL));
    }

    #[tokio::test]
    async fn inactive_station_is_denied() {
        let stores = seeded();
        let state = state_with(&stores);
        let (link, _inbound, _station) = answer_with("k9");
        let mut auth = Authenticator::new(&state, &link);
        assert_eq!(auth.authenticate(&json!("S9")).await.unwrap_err(), DenyReason::InactiveStation);
    }

    #[tokio::test]
    async fn malformed_ids_skip_lookup() {
        let mut secrets = MockSecretStore::new();
        secrets.expect_lookup().never();
        let mut ledger = MockAccessLedger::new();
        ledger.expect_record().never();

        let mut state = state_with(&MemoryStores::default());
        state.secrets = Arc::new(secrets);
        state.ledger = Arc::new(ledger);
        let (link, _inbound, _station) = answer_with("k1");

        let mut auth = Authenticator::new(&state, &link);
        for bad in [json!(null), json!(""), json!(42), json!({"id": "S1"}), json!("has space")] {
            assert_eq!(auth.authenticate(&bad).await.unwrap_err(), DenyReason::MalformedId);
        }
    }

    #[tokio::test]
    async fn ledger_failure_denies_on_its_own() {
        let stores = seeded();
        let mut ledger = MockAccessLedger::new();
        ledger
            .expect_record()
            .returning(|_| Err(StoreError::Unavailable("ledger down".into())));
        let mut state = state_with(&stores);
        state.ledger = Arc::new(ledger);
        let (link, _inbound, station) = answer_with("k1");

        let mut auth = Authenticator::new(&state, &link);
        let err = auth.authenticate(&json!("S1")).await.unwrap_err();
        assert!(matches!(err, DenyReason::LedgerFailed(_)));
        assert!(err.to_string().contains("ledger down"));

        assert!(auth.run(&json!("S1")).await.is_none());
        assert_eq!(station.await.unwrap().as_deref(), Some(events::AUTH_FAIL));
    }

    #[tokio::test]
    async fn lookup_failure_denies() {
        let mut secrets = MockSecretStore::new();
        secrets
            .expect_lookup()
            .returning(|_| Err(StoreError::Unavailable("secrets down".into())));
        let mut state = state_with(&MemoryStores::default());
        state.secrets = Arc::new(secrets);
        let (link, _inbound, _station) = answer_with("k1");

        let mut auth = Authenticator::new(&state, &link);
        assert!(matches!(
            auth.authenticate(&json!("S1")).await,
            Err(DenyReason::LookupFailed(_))
        ));
    }

    #[tokio::test]
    async fn failed_authenticated_mark_denies() {
        let stores = seeded();
        let mut ledger = MockAccessLedger::new();
        ledger.expect_record().returning(|a| Ok(AccessLogEntry::new(a)));
        ledger
            .expect_mark_authenticated()
            .times(1)
            .returning(|_: Uuid| Err(StoreError::Unavailable("write refused".into())));
        let mut state = state_with(&stores);
        state.ledger = Arc::new(ledger);
        let (link, _inbound, _station) = answer_with("k1");

        let mut auth = Authenticator::new(&state, &link);
        assert!(matches!(
            auth.authenticate(&json!("S1")).await,
            Err(DenyReason::LedgerFailed(_))
        ));
    }

    #[tokio::test]
    async fn unsendable_challenge_is_denied_with_fail_signal() {
        let stores = seeded();
        let cfg = Config { challenge_bytes: station_protocol::MAX_FRAME_SIZE, ..Config::default() };
        let state = AppState::new(&cfg, &stores);
        let (link, _inbound, station) = answer_with("k1");

        let mut auth = Authenticator::new(&state, &link);
        assert!(auth.run(&json!("S1")).await.is_none());
        assert_eq!(auth.phase(), AuthState::Denied);
        assert_eq!(station.await.unwrap().as_deref(), Some(events::AUTH_FAIL));
    }

    #[tokio::test]
    async fn peer_leaving_mid_handshake_closes() {
        let stores = seeded();
        let state = state_with(&stores);
        let (a, b) = duplex(64 * 1024);
        let (link, _rx) = Link::spawn(a, "127.0.0.1:5001".into());
        let (client, mut client_rx) = Link::spawn(b, "station".into());
        tokio::spawn(async move {
            let _ = client_rx.recv().await; // the challenge; never answered
            drop(client_rx);
            drop(client);
        });

        let mut auth = Authenticator::new(&state, &link);
        assert!(auth.run(&json!("S1")).await.is_none());
        assert_eq!(auth.phase(), AuthState::Closed);
    }
}
