// src/relay/mod.rs
//! Authenticated-session packet handling: telemetry ingestion with dedup,
//! confirmations, observer broadcast, and CAP correlation/delivery.
pub mod observer;
pub mod topics;

use crate::auth::{AuthState, Session};
use crate::errors::LinkError;
use crate::logging;
use crate::net::link::{Inbound, Link};
use crate::state::AppState;
use crate::store::{InsertOutcome, MarkOutcome, TelemetryRecord};
use chrono::Utc;
use serde_json::Value;
use station_protocol::{
    ConfirmStatus, Confirmation, Descriptor, NewTap, TelemetryPacket, events, valid_tag,
};
use tracing::{debug, info, warn};

/// Owns the connection from `Authenticated` until `Closed`.
pub struct PacketRelay {
    state: AppState,
    session: Session,
    link: Link,
    phase: AuthState,
}

impl PacketRelay {
    pub fn new(state: AppState, session: Session, link: Link) -> Self {
        Self { state, session, link, phase: AuthState::Authenticated }
    }

    pub fn phase(&self) -> AuthState {
        self.phase
    }

    /// Dispatch one inbound event. Errors only when the link is gone.
    pub async fn handle(&self, ev: Inbound) -> Result<(), LinkError> {
        match ev.event.as_str() {
            events::TAP => {
                self.submit_telemetry(&ev.data).await?;
            }
            events::DESCRIPTOR_REQUEST => {
                let list = self.request_descriptors(&ev.data).await;
                match ev.id {
                    Some(id) => self.link.reply(id, serde_json::to_value(list).unwrap_or_default()).await?,
                    None => debug!(station = %self.session.station_id(), "descriptor-request without ack id"),
                }
            }
            events::AUTH_INITIATE => {
                warn!(station = %self.session.station_id(), "auth-initiate on an authenticated session ignored");
            }
            other => {
                debug!(station = %self.session.station_id(), event = other, "unhandled station event");
            }
        }
        Ok(())
    }

    /// Descriptor catalog for a type tag, `{h, p}` only. Anything but a
    /// valid tag yields an empty list without touching the catalog.
    pub async fn request_descriptors(&self, type_tag: &Value) -> Vec<Descriptor> {
        let Some(tag) = type_tag.as_str().filter(|t| valid_tag(t)) else {
            return Vec::new();
        };
        match self.state.descriptors.find(tag).await {
            Ok(found) => found.into_iter().map(|d| d.strip()).collect(),
            Err(e) => {
                warn!(station = %self.session.station_id(), type_tag = tag, %e, "descriptor lookup failed");
                Vec::new()
            }
        }
    }

    /// Ingest one `tap`. The submitter always gets exactly one confirmation.
    pub async fn submit_telemetry(&self, raw: &Value) -> Result<Confirmation, LinkError> {
        let station = self.session.station_id();

        let packet = match TelemetryPacket::from_value(raw) {
            Ok(p) => p,
            Err(e) => {
                debug!(%station, %e, "rejected tap");
                return self.confirm(raw, None, ConfirmStatus::Rejected).await;
            }
        };

        let Some(collection) = self.state.packets.resolve_collection(&packet.h.t).await else {
            return self.confirm(raw, Some(&packet), ConfirmStatus::TypeUnknown).await;
        };

        match collection.insert_unique(&packet).await {
            Ok(InsertOutcome::Duplicate) => {
                self.confirm(raw, Some(&packet), ConfirmStatus::AlreadyLogged).await
            }
            Err(e) => {
                warn!(%station, collection = collection.name(), mid = %packet.h.mid, %e, "telemetry not saved");
                self.confirm(raw, Some(&packet), ConfirmStatus::NotSaved).await
            }
            Ok(InsertOutcome::Stored(record)) => {
                let status = ConfirmStatus::Logged { id: record.id.to_string() };
                let conf = self.confirm(raw, Some(&packet), status).await?;

                let note = NewTap {
                    id: record.id.to_string(),
                    t: packet.h.t.clone(),
                    mid: packet.h.mid.clone(),
                };
                let reached = self.state.topics.publish(&packet.h.mid, note);
                debug!(%station, mid = %packet.h.mid, reached, "new-tap published");

                self.correlate_commands(&record).await?;
                Ok(conf)
            }
        }
    }

    /// Deliver every undelivered CAP for the record's mission. A CAP is only
    /// sent after its delivery mark has been persisted by this relay.
    pub async fn correlate_commands(&self, record: &TelemetryRecord) -> Result<usize, LinkError> {
        let station = self.session.station_id();
        let mid = record.mid();

        let pending = match self.state.commands.find_undelivered(mid).await {
            Ok(p) => p,
            Err(e) => {
                warn!(%station, %mid, %e, "command search failed");
                return Ok(0);
            }
        };

        let mut delivered = 0;
        for cmd in pending {
            match self.state.commands.mark_delivered(cmd.id, Utc::now()).await {
                Ok(MarkOutcome::Marked(marked)) => {
                    let body = serde_json::to_value(marked.descriptor()).unwrap_or_default();
                    self.link.emit(events::CAP, body).await?;
                    delivered += 1;
                    info!(%station, %mid, cmd = %marked.id, tap = %record.id, "command delivered");
                    logging::csv::log_delivery(station, mid, &marked.id.to_string()).await;
                }
                Ok(MarkOutcome::AlreadyDelivered) => {
                    debug!(%station, %mid, cmd = %cmd.id, "command claimed elsewhere");
                }
                Err(e) => {
                    warn!(%station, %mid, cmd = %cmd.id, %e, "delivery mark failed; command withheld");
                }
            }
        }
        Ok(delivered)
    }

    pub fn teardown(&mut self) {
        self.phase = AuthState::Closed;
        info!(
            station = %self.session.station_id(),
            peer = %self.session.peer,
            since = %self.session.since.to_rfc3339(),
            "station disconnected"
        );
    }

    async fn confirm(
        &self,
        raw: &Value,
        packet: Option<&TelemetryPacket>,
        status: ConfirmStatus,
    ) -> Result<Confirmation, LinkError> {
        let conf = Confirmation::new(raw, status);
        let (t, mid) = packet.map(|p| (p.h.t.as_str(), p.h.mid.as_str())).unwrap_or(("", ""));
        logging::csv::log_submission(
            self.session.station_id(),
            t,
            mid,
            &conf.fingerprint,
            &conf.status.to_string(),
        )
        .await;
        self.link.emit(events::INFO, Value::String(conf.to_string())).await?;
        Ok(conf)
    }
}
