//! The SIP-facing server side: handling REGISTER, OPTIONS, INVITE/re-INVITE,
//! CANCEL and BYE from a SIP peer and driving the matching LEELEN dialog.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use leelen_core::number::LeelenNumber;
use leelen_core::wire::{LeelenCode, LeelenMessage};
use sip_proto::{SessionDescription, SipMessage, SipMethod, SipUri, TransactionKey, TransactionKind};
use tracing::{info, warn};

use crate::bridge::Bridge;
use crate::transaction_data::TransactionData;

const DISCOVERY_TIMEOUT: Duration = Duration::from_millis(200);

fn reply(request: &SipMessage, status: u16, reason: &str) -> SipMessage {
    let mut response = SipMessage::new_response(status, reason);
    for name in ["Via", "From", "To", "Call-ID", "CSeq"] {
        if let Some(value) = request.header(name) {
            response = response.with_header(name, value.to_string());
        }
    }
    response
}

pub async fn handle_register(bridge: &Arc<Bridge>, request: &SipMessage, src: SocketAddr) {
    if let Some(contact) = request.header("Contact").and_then(SipUri::parse) {
        info!(%src, %contact, "REGISTER: saving client contact");
        bridge.set_registered_client(Some(crate::bridge::RegisteredClient { contact, addr: src }));
    }
    let response = reply(request, 200, "OK")
        .with_header("Allow", "INVITE, ACK, CANCEL, BYE, OPTIONS, REGISTER")
        .with_header("Expires", "3600");
    let _ = bridge.send_sip(&response.to_bytes(), src).await;
}

pub async fn handle_options(bridge: &Arc<Bridge>, request: &SipMessage, src: SocketAddr) {
    let response = reply(request, 200, "OK")
        .with_header("Accept", "application/sdp")
        .with_header("Allow", "INVITE, ACK, CANCEL, BYE, OPTIONS, REGISTER");
    let _ = bridge.send_sip(&response.to_bytes(), src).await;
}

/// Pull the phone number out of a request-URI's userinfo, falling back to
/// this device's own number to resolve a room-only (`203`) form.
fn number_from_request_uri(bridge: &Bridge, request_uri: &str) -> Option<LeelenNumber> {
    let uri = SipUri::parse(request_uri)?;
    let user = uri.user?;
    LeelenNumber::parse(&user, Some(&bridge.config.number)).ok()
}

pub async fn handle_invite(bridge: &Arc<Bridge>, request: &SipMessage, src: SocketAddr) {
    let Some(call_id) = request.call_id().map(str::to_string) else {
        let resp = reply(request, 400, "Bad Request (missing Call-ID)");
        let _ = bridge.send_sip(&resp.to_bytes(), src).await;
        return;
    };

    if request.body.is_empty() {
        let resp = reply(request, 400, "Bad Request (no SDP offer)");
        let _ = bridge.send_sip(&resp.to_bytes(), src).await;
        return;
    }

    let StartLineRequestUri(request_uri) = match extract_request_uri(request) {
        Some(u) => u,
        None => {
            let resp = reply(request, 400, "Bad Request");
            let _ = bridge.send_sip(&resp.to_bytes(), src).await;
            return;
        }
    };

    let Some(number) = number_from_request_uri(bridge, &request_uri) else {
        let resp = reply(request, 404, "Not Found");
        let _ = bridge.send_sip(&resp.to_bytes(), src).await;
        return;
    };

    if let Some(existing) = bridge.sessions.get_by_call_id(&call_id) {
        if existing.established() {
            // Re-INVITE on an already-bridged call: the LEELEN side has no
            // mid-dialog renegotiation, so there's nothing to offer back.
            let resp = reply(request, 488, "Not Acceptable Here");
            let _ = bridge.send_sip(&resp.to_bytes(), src).await;
            return;
        }
        // A retransmission of the original INVITE while we're still
        // working on it: just re-send 100 Trying, don't start a second
        // worker.
        let resp = reply(request, 100, "Trying");
        let _ = bridge.send_sip(&resp.to_bytes(), src).await;
        return;
    }

    let session = bridge
        .sessions
        .create(None, bridge.config.voip_timeout, bridge.config.bind_addr);
    bridge.sessions.link_call_id(call_id.clone(), session.dialog_id());
    *session.being_invited.lock() = Some(number);
    *session.sip_peer_addr.lock() = Some(src);
    session.sip.lock().call_id = Some(call_id.clone());

    let resp = reply(request, 100, "Trying");
    let _ = bridge.send_sip(&resp.to_bytes(), src).await;

    if !session.try_start_invite_worker() {
        return;
    }

    let bridge = bridge.clone();
    let request = request.clone();
    tokio::spawn(async move {
        invite_worker(bridge, session, number, request, src, call_id).await;
    });
}

struct StartLineRequestUri(String);

fn extract_request_uri(request: &SipMessage) -> Option<StartLineRequestUri> {
    match &request.start_line {
        sip_proto::StartLine::Request { request_uri, .. } => {
            Some(StartLineRequestUri(request_uri.clone()))
        }
        sip_proto::StartLine::Response { .. } => None,
    }
}

async fn invite_worker(
    bridge: Arc<Bridge>,
    session: Arc<crate::session::Session>,
    number: LeelenNumber,
    request: SipMessage,
    src: SocketAddr,
    call_id: String,
) {
    let host = match bridge.discovery.discover(&number.to_string(), DISCOVERY_TIMEOUT).await {
        Ok(host) => host,
        Err(e) => {
            warn!(%number, error = %e, "discovery failed for incoming INVITE");
            session.dialog.lock().nak();
            bridge.sessions.remove(session.dialog_id());
            let resp = reply(&request, 404, "Not Found");
            let _ = bridge.send_sip(&resp.to_bytes(), src).await;
            return;
        }
    };

    let sdp = SessionDescription::parse(&String::from_utf8_lossy(&request.body));
    let mut msg = LeelenMessage::new(
        if sdp.video().is_some() {
            LeelenCode::View
        } else {
            LeelenCode::Call
        },
        session.dialog_id(),
    );
    msg.to = Some(number);
    msg.from = Some(bridge.config.number);
    msg.from_type = Some(bridge.config.device_type as u32);
    if let Some(audio) = sdp.audio() {
        msg.audio = audio.formats.clone();
        msg.audio_port = Some(bridge.config.audio_port);
    }
    if let Some(video) = sdp.video() {
        msg.video = video.formats.clone();
        msg.video_port = Some(bridge.config.video_port);
    }

    let send_result = {
        let mut dialog = session.dialog.lock();
        dialog.send(msg.code.unwrap())
    };
    if let Err(e) = send_result {
        warn!(error = %e, "dialog rejected outgoing CALL/VIEW");
        let resp = reply(&request, 500, "Internal Server Error");
        let _ = bridge.send_sip(&resp.to_bytes(), src).await;
        return;
    }

    *session.peer_addr.lock() = Some(host.addr);
    let dest = SocketAddr::new(host.addr, bridge.config.voip_port);
    if let Err(e) = bridge.send_leelen(&msg.to_bytes(), dest).await {
        warn!(error = %e, "failed to send LEELEN CALL/VIEW");
        let resp = reply(&request, 500, "Internal Server Error");
        let _ = bridge.send_sip(&resp.to_bytes(), src).await;
        return;
    }

    let mut txs = bridge.transactions.lock();
    txs.create(
        TransactionKey::new(&call_id, request.cseq().map(|c| c.0).unwrap_or(1), SipMethod::Invite.as_str()),
        TransactionKind::Ist,
        request,
        TransactionData::new(Some(session), dest.is_ipv6()),
    );
}

/// `CANCEL`/`BYE` on a session: RFC 3261 §15.1.1 says a `CANCEL` only
/// applies while the original INVITE is still unanswered; once the
/// original transaction has moved past `Proceeding`, a `BYE` is required
/// instead.
pub async fn handle_bye_or_cancel(bridge: &Arc<Bridge>, request: &SipMessage, src: SocketAddr) {
    let Some(call_id) = request.call_id() else {
        let resp = reply(request, 400, "Bad Request");
        let _ = bridge.send_sip(&resp.to_bytes(), src).await;
        return;
    };

    let Some(session) = bridge.sessions.get_by_call_id(call_id) else {
        let resp = reply(request, 481, "Call/Transaction Does Not Exist");
        let _ = bridge.send_sip(&resp.to_bytes(), src).await;
        return;
    };

    let may_bye = session.dialog.lock().may_bye();
    if !may_bye {
        let resp = reply(request, 481, "Call/Transaction Does Not Exist");
        let _ = bridge.send_sip(&resp.to_bytes(), src).await;
        return;
    }

    if request.method() == Some(SipMethod::Cancel) {
        let original_cseq = request.cseq().map(|c| c.0).unwrap_or(0);
        let key = TransactionKey::new(call_id, original_cseq, SipMethod::Invite.as_str());
        let original_still_open = bridge.transactions.lock().get(&key).is_some();
        if original_still_open {
            let invite_reply = SipMessage::new_response(487, "Request Terminated")
                .with_header("Call-ID", call_id.to_string());
            let _ = bridge.send_sip(&invite_reply.to_bytes(), src).await;
        }
    }

    session.dialog.lock().send(LeelenCode::Bye).ok();
    if let Some(peer_addr) = *session.peer_addr.lock() {
        let bye = LeelenMessage::new(LeelenCode::Bye, session.dialog_id());
        let dest = SocketAddr::new(peer_addr, bridge.config.voip_port);
        let _ = bridge.send_leelen(&bye.to_bytes(), dest).await;
    }
    session.stop_forward();
    bridge.sessions.remove(session.dialog_id());

    let resp = reply(request, 200, "OK");
    let _ = bridge.send_sip(&resp.to_bytes(), src).await;
}
