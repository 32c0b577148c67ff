//! The event loop: one task owns both UDP sockets, dispatches every
//! datagram to the matching handler, and drives a periodic maintenance
//! pass over transactions and dialogs.

use std::sync::Arc;
use std::time::Duration;

use leelen_core::wire::LeelenCode;
use sip_proto::parser::parse_message;
use tokio::time::interval;
use tracing::{debug, warn};

use crate::bridge::Bridge;
use crate::{uac, uas};

/// The reactor polls at 100 ms; every 8th tick (~800 ms) it runs the
/// slower maintenance pass instead of just listening.
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const MAINTENANCE_EVERY_N_TICKS: u32 = 8;

const MAX_DATAGRAM: usize = 2048;

/// Run until `shutdown` resolves. Both sockets are read concurrently;
/// a `tokio::select!` with a ticking interval stands in for the reference
/// implementation's single `poll(100ms)` call.
pub async fn run(bridge: Arc<Bridge>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut ticks = interval(POLL_INTERVAL);
    let mut tick_count: u32 = 0;

    let mut leelen_buf = vec![0u8; MAX_DATAGRAM];
    let mut sip_buf = vec![0u8; MAX_DATAGRAM];

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("reactor shutting down");
                    return;
                }
            }
            res = bridge.leelen_socket.recv_from(&mut leelen_buf) => {
                match res {
                    Ok((n, src)) => uac::receive_leelen(&bridge, &leelen_buf[..n], src).await,
                    Err(e) => warn!(error = %e, "LEELEN socket recv failed"),
                }
            }
            res = bridge.sip_socket.recv_from(&mut sip_buf) => {
                match res {
                    Ok((n, src)) => dispatch_sip(&bridge, &sip_buf[..n], src).await,
                    Err(e) => warn!(error = %e, "SIP socket recv failed"),
                }
            }
            _ = ticks.tick() => {
                tick_count = tick_count.wrapping_add(1);
                if tick_count % MAINTENANCE_EVERY_N_TICKS == 0 {
                    run_maintenance(&bridge).await;
                }
            }
        }
    }
}

async fn dispatch_sip(bridge: &Arc<Bridge>, buf: &[u8], src: std::net::SocketAddr) {
    let text = String::from_utf8_lossy(buf);
    let message = match parse_message(&text) {
        Ok((_, m)) => m,
        Err(e) => {
            warn!(%src, error = ?e, "dropping malformed SIP datagram");
            return;
        }
    };

    if message.is_request() {
        match message.method() {
            Some(sip_proto::SipMethod::Register) => uas::handle_register(bridge, &message, src).await,
            Some(sip_proto::SipMethod::Options) => uas::handle_options(bridge, &message, src).await,
            Some(sip_proto::SipMethod::Invite) => uas::handle_invite(bridge, &message, src).await,
            Some(sip_proto::SipMethod::Bye) | Some(sip_proto::SipMethod::Cancel) => {
                uas::handle_bye_or_cancel(bridge, &message, src).await
            }
            Some(sip_proto::SipMethod::Ack) | None => {}
        }
    } else {
        uac::handle_sip_response(bridge, &message, src).await;
    }
}

/// The ~800 ms sweep: reap expired SIP transactions, and walk every active
/// session to time out stale dialogs in either direction.
async fn run_maintenance(bridge: &Arc<Bridge>) {
    bridge.transactions.lock().reap_expired(|key, _data| {
        debug!(key = %key.0, "reaped expired SIP transaction");
    });

    for session in bridge.sessions.snapshot() {
        let (state, timed_out) = {
            let dialog = session.dialog.lock();
            (dialog.state(), dialog.check_timeout())
        };
        match state {
            leelen_core::dialog::LeelenDialogState::Connecting if timed_out => {
                warn!(dialog = session.dialog_id(), "pending call never acked, timing out");
                session.dialog.lock().nak();
                let call_id = session.sip.lock().call_id.clone();
                if let Some(call_id) = call_id {
                    let key = sip_proto::TransactionKey::new(&call_id, 1, sip_proto::SipMethod::Invite.as_str());
                    let original_request = {
                        let txs = bridge.transactions.lock();
                        txs.get(&key).map(|t| t.last_request.clone())
                    };
                    if let Some(original_request) = original_request {
                        let mut resp = sip_proto::SipMessage::new_response(404, "Not Found");
                        for name in ["Via", "From", "To", "Call-ID", "CSeq"] {
                            if let Some(v) = original_request.header(name) {
                                resp = resp.with_header(name, v.to_string());
                            }
                        }
                        if let Some(dest) = *session.sip_peer_addr.lock() {
                            let _ = bridge.send_sip(&resp.to_bytes(), dest).await;
                        }
                    }
                    bridge.transactions.lock().kill(&key);
                }
                session.stop_forward();
                bridge.sessions.remove(session.dialog_id());
            }
            leelen_core::dialog::LeelenDialogState::Connected if timed_out => {
                warn!(dialog = session.dialog_id(), "established session idle past dialog timeout, tearing down");
                session.dialog.lock().send(LeelenCode::Bye).ok();
                if let Some(peer_addr) = *session.peer_addr.lock() {
                    let bye = leelen_core::wire::LeelenMessage::new(LeelenCode::Bye, session.dialog_id());
                    let dest = std::net::SocketAddr::new(peer_addr, bridge.config.voip_port);
                    let _ = bridge.send_leelen(&bye.to_bytes(), dest).await;
                }
                let call_id = session.sip.lock().call_id.clone();
                if let Some(call_id) = call_id {
                    uac::send_established_bye(bridge, &session, call_id).await;
                }
                session.stop_forward();
                bridge.sessions.remove(session.dialog_id());
            }
            leelen_core::dialog::LeelenDialogState::Disconnecting => {
                let idle = session.dialog.lock().idle_for();
                if idle > bridge.config.voip_timeout * 2 {
                    warn!(dialog = session.dialog_id(), "no BYE ack within grace period, forcing session closed");
                    session.stop_forward();
                    bridge.sessions.remove(session.dialog_id());
                }
            }
            _ => {}
        }
    }
}
