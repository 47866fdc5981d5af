// src/station.rs
//! Lifetime of one ground-station connection: wait for `auth-initiate`,
//! handshake, then relay packets in arrival order until disconnect.
use crate::auth::Authenticator;
use crate::net::link::Link;
use crate::relay::PacketRelay;
use crate::state::AppState;
use station_protocol::events;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

pub async fn run<T>(io: T, peer: String, state: AppState)
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let (link, mut inbound) = Link::spawn(io, peer.clone());

    let session = loop {
        let Some(ev) = inbound.recv().await else {
            debug!(%peer, "closed before handshake");
            return;
        };
        if ev.event != events::AUTH_INITIATE {
            debug!(%peer, event = %ev.event, "ignored before authentication");
            continue;
        }
        let mut auth = Authenticator::new(&state, &link);
        match auth.run(&ev.data).await {
            Some(session) => break session,
            // denied or gone: dropping the link closes the connection
            None => {
                debug!(%peer, phase = ?auth.phase(), "handshake ended without session");
                return;
            }
        }
    };

    let mut relay = PacketRelay::new(state, session, link);
    while let Some(ev) = inbound.recv().await {
        if let Err(e) = relay.handle(ev).await {
            debug!(%peer, %e, "link lost while relaying");
            break;
        }
    }
    relay.teardown();
}
