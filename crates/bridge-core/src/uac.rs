//! The LEELEN-facing side: reacting to frames that arrive over the LEELEN
//! VoIP socket, whether they continue a dialog this bridge started (an
//! `OK` answering our `CALL`/`VIEW`) or start one a LEELEN device is
//! initiating towards the SIP side.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use leelen_core::wire::{LeelenCode, LeelenMessage};
use rand::Rng;
use sip_proto::{MediaDescription, MediaKind, SessionDescription, SipMessage, SipMethod, SipUri, TransactionKey, TransactionKind};
use tokio::net::UdpSocket;
use tracing::{info, warn};

use crate::bridge::Bridge;
use crate::forwarder::Forwarder;
use crate::session::Session;
use crate::transaction_data::TransactionData;

/// Entry point for every datagram received on the LEELEN VoIP socket.
pub async fn receive_leelen(bridge: &Arc<Bridge>, buf: &[u8], src: SocketAddr) {
    let msg = match LeelenMessage::from_bytes(buf) {
        Ok(m) => m,
        Err(e) => {
            warn!(%src, error = %e, "dropping malformed LEELEN frame");
            return;
        }
    };
    let Some(code) = msg.code else {
        return;
    };

    if code == LeelenCode::OpenGate {
        return;
    }

    if let Some(session) = bridge.sessions.get(msg.id) {
        dispatch_known(bridge, session, msg, src).await;
        return;
    }

    if !code.is_invite_like() {
        warn!(%src, id = msg.id, %code, "LEELEN frame for unknown dialog");
        return;
    }

    let session = bridge
        .sessions
        .create(Some(msg.id), bridge.config.voip_timeout, bridge.config.bind_addr);
    if let Err(e) = handle_new_inbound_call(bridge, &session, msg, src).await {
        warn!(error = %e, "inbound LEELEN call setup failed");
        bridge.sessions.remove(session.dialog_id());
    }
}

async fn dispatch_known(bridge: &Arc<Bridge>, session: Arc<Session>, msg: LeelenMessage, src: SocketAddr) {
    let Some(code) = msg.code else { return };
    if let (Some(number), Some(device_type)) = (msg.from, msg.from_type) {
        session.dialog.lock().update_peer_number(number, device_type);
    }
    match code {
        LeelenCode::Ok => handle_ok(bridge, session, msg, src).await,
        LeelenCode::Bye => handle_bye(bridge, session, src).await,
        LeelenCode::Call | LeelenCode::View | LeelenCode::VoiceMessage | LeelenCode::Accepted => {
            handle_resignal(bridge, session, msg, src).await
        }
        LeelenCode::OpenGate | LeelenCode::Unknown(_) => {}
    }
}

/// A fresh `CALL`/`VIEW`/`VOICE_MESSAGE`/`ACCEPTED` on a dialog that's
/// already known to us: the LEELEN side is re-signalling (e.g. escalating a
/// voice call to video), so originate a new SIP `INVITE` toward the
/// registered client the same way a brand new inbound call would.
async fn handle_resignal(bridge: &Arc<Bridge>, session: Arc<Session>, msg: LeelenMessage, src: SocketAddr) {
    let code = msg.code.expect("checked by caller");
    info!(dialog = session.dialog_id(), %code, "re-signalling on an existing LEELEN dialog, sending new INVITE");
    if session.dialog.lock().receive(code).is_err() {
        return;
    }
    if let Err(e) = originate_sip_invite(bridge, &session, msg, src).await {
        warn!(dialog = session.dialog_id(), error = %e, "failed to originate SIP INVITE for re-signal");
    }
}

async fn handle_new_inbound_call(
    bridge: &Arc<Bridge>,
    session: &Arc<Session>,
    msg: LeelenMessage,
    src: SocketAddr,
) -> crate::error::BridgeResult<()> {
    let code = msg.code.expect("checked by caller");
    session.dialog.lock().receive(code)?;
    *session.peer_addr.lock() = Some(src.ip());
    if let (Some(number), Some(device_type)) = (msg.from, msg.from_type) {
        session.dialog.lock().update_peer_number(number, device_type);
    }
    if let Some(port) = msg.audio_port {
        session.dialog.lock().update_peer_audio_port(port);
    }
    if let Some(port) = msg.video_port {
        session.dialog.lock().update_peer_video_port(port);
    }
    originate_sip_invite(bridge, session, msg, src).await
}

/// Build and send a fresh SIP `INVITE` toward the currently registered
/// client for a LEELEN-offered call, and track it as a new ICT. Shared by
/// the very first `CALL`/`VIEW` on a brand new dialog and by a later
/// re-signal (e.g. a voice call escalated to video) on one already known.
async fn originate_sip_invite(
    bridge: &Arc<Bridge>,
    session: &Arc<Session>,
    msg: LeelenMessage,
    src: SocketAddr,
) -> crate::error::BridgeResult<()> {
    let Some(client) = bridge.registered_client() else {
        warn!("LEELEN device called in but no SIP client is registered");
        session.dialog.lock().nak();
        let reject = LeelenMessage::new(LeelenCode::Bye, session.dialog_id());
        let _ = bridge.send_leelen(&reject.to_bytes(), src).await;
        return Ok(());
    };

    let mut media = Vec::new();
    if !msg.audio.is_empty() {
        media.push(MediaDescription {
            kind: MediaKind::Audio,
            port: bridge.config.audio_port,
            formats: msg.audio.clone(),
        });
    }
    if !msg.video.is_empty() {
        media.push(MediaDescription {
            kind: MediaKind::Video,
            port: bridge.config.video_port,
            formats: msg.video.clone(),
        });
    }
    let sdp = SessionDescription::build(&bridge.config.bind_addr.to_string(), &media);

    let call_id = format!("{:x}-{}", rand::thread_rng().gen::<u64>(), session.dialog_id());
    let local_tag = format!("{:x}", rand::thread_rng().gen::<u32>());
    let from_uri = SipUri::new(bridge.config.bind_addr.to_string()).with_user(bridge.config.number.to_string());
    let request = SipMessage::new_request(SipMethod::Invite, client.contact.to_string())
        .with_header("Via", format!("SIP/2.0/UDP {}", bridge.config.bind_addr))
        .with_header("From", format!("<{}>;tag={}", from_uri, local_tag))
        .with_header("To", format!("<{}>", client.contact))
        .with_header("Call-ID", call_id.clone())
        .with_header("CSeq", "1 INVITE")
        .with_header("Contact", format!("<{}>", from_uri))
        .with_header("User-Agent", bridge.config.user_agent.clone())
        .with_body(sdp.into_bytes());

    {
        let mut sip = session.sip.lock();
        sip.call_id = Some(call_id.clone());
        sip.local_tag = Some(local_tag);
        sip.local_cseq = 1;
    }
    bridge.sessions.link_call_id(call_id.clone(), session.dialog_id());
    *session.sip_peer_addr.lock() = Some(client.addr);

    bridge.send_sip(&request.to_bytes(), client.addr).await?;
    bridge.transactions.lock().create(
        TransactionKey::new(&call_id, 1, SipMethod::Invite.as_str()),
        TransactionKind::Ict,
        request,
        TransactionData::new(Some(session.clone()), client.addr.is_ipv6()),
    );
    Ok(())
}

/// Our earlier `CALL`/`VIEW` was accepted: open media sockets, answer the
/// waiting SIP `INVITE` transaction with 200 OK, and start forwarding.
async fn handle_ok(bridge: &Arc<Bridge>, session: Arc<Session>, msg: LeelenMessage, src: SocketAddr) {
    if session.dialog.lock().ack().is_err() {
        warn!(dialog = session.dialog_id(), "OK received outside Connecting, ignoring");
        return;
    }
    *session.peer_addr.lock() = Some(src.ip());
    if let Some(port) = msg.audio_port {
        session.dialog.lock().update_peer_audio_port(port);
    }
    if let Some(port) = msg.video_port {
        session.dialog.lock().update_peer_video_port(port);
    }

    let call_id = session.sip.lock().call_id.clone();
    let Some(call_id) = call_id else {
        warn!(dialog = session.dialog_id(), "OK received but no SIP leg is waiting");
        return;
    };
    let key = TransactionKey::new(&call_id, 1, SipMethod::Invite.as_str());
    let original_request = {
        let txs = bridge.transactions.lock();
        txs.get(&key).map(|t| t.last_request.clone())
    };
    let Some(original_request) = original_request else {
        warn!(dialog = session.dialog_id(), "OK received but original INVITE transaction is gone");
        return;
    };

    let (audio_sock, video_sock) = match setup_media_sockets(bridge, &session).await {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "failed to set up media sockets");
            return;
        }
    };

    let mut media = Vec::new();
    if !msg.audio.is_empty() {
        media.push(MediaDescription {
            kind: MediaKind::Audio,
            port: bridge.config.audio_port,
            formats: msg.audio.clone(),
        });
    }
    if !msg.video.is_empty() {
        media.push(MediaDescription {
            kind: MediaKind::Video,
            port: bridge.config.video_port,
            formats: msg.video.clone(),
        });
    }
    let sdp = SessionDescription::build(&bridge.config.bind_addr.to_string(), &media);

    let local_tag = {
        let mut sip = session.sip.lock();
        if sip.local_tag.is_none() {
            sip.local_tag = Some(format!("{:x}", rand::thread_rng().gen::<u32>()));
        }
        sip.local_tag.clone().unwrap()
    };

    let mut response = SipMessage::new_response(200, "OK");
    for name in ["Via", "From", "Call-ID", "CSeq"] {
        if let Some(v) = original_request.header(name) {
            response = response.with_header(name, v.to_string());
        }
    }
    let to = original_request.header("To").unwrap_or("").to_string();
    response = response
        .with_header("To", format!("{};tag={}", to, local_tag))
        .with_header("Contact", format!("<sip:{}@{}>", bridge.config.number, bridge.config.bind_addr))
        .with_header("User-Agent", bridge.config.user_agent.clone())
        .with_body(sdp.into_bytes());

    let via_src = via_source_addr(&original_request).unwrap_or(bridge.config.bind_addr);
    let dest = SocketAddr::new(via_src, bridge.config.voip_port);
    if let Err(e) = bridge.send_sip(&response.to_bytes(), dest).await {
        warn!(error = %e, "failed to send SIP 200 OK");
        return;
    }
    *session.sip_peer_addr.lock() = Some(dest);
    {
        let mut sip = session.sip.lock();
        sip.established_from = Some(format!("{};tag={}", to, local_tag));
        sip.established_to = original_request.header("From").map(str::to_string);
    }

    let offer_sdp = SessionDescription::parse(&String::from_utf8_lossy(&original_request.body));
    let peer_ip = *session.peer_addr.lock();
    let (peer_audio_port, peer_video_port) = {
        let dialog = session.dialog.lock();
        (dialog.peer_audio_port, dialog.peer_video_port)
    };

    let audio_forwarder = connect_leg(bridge, audio_sock, peer_ip, peer_audio_port, &offer_sdp, MediaKind::Audio).await;
    let video_forwarder = connect_leg(bridge, video_sock, peer_ip, peer_video_port, &offer_sdp, MediaKind::Video).await;
    if audio_forwarder.is_some() || video_forwarder.is_some() {
        session.start_forward(audio_forwarder, video_forwarder);
    }
}

/// Pair the LEELEN-facing socket (already bound to this leg's fixed port)
/// with a fresh ephemeral socket aimed at the SIP side's address for the
/// same leg, producing a forwarder — or `None` if the leg wasn't
/// negotiated on both sides.
async fn connect_leg(
    bridge: &Arc<Bridge>,
    leelen_sock: Option<UdpSocket>,
    peer_ip: Option<IpAddr>,
    peer_port: Option<u16>,
    sip_sdp: &SessionDescription,
    kind: MediaKind,
) -> Option<Forwarder> {
    let leelen_sock = leelen_sock?;
    let peer_ip = peer_ip?;
    let peer_port = peer_port?;
    let sip_media = match kind {
        MediaKind::Audio => sip_sdp.audio()?,
        MediaKind::Video => sip_sdp.video()?,
    };
    let sip_addr: SocketAddr = format!("{}:{}", sip_sdp.connection_addr.as_deref()?, sip_media.port)
        .parse()
        .ok()?;

    leelen_sock.connect(SocketAddr::new(peer_ip, peer_port)).await.ok()?;
    let sip_sock = UdpSocket::bind((bridge.config.bind_addr, 0)).await.ok()?;
    sip_sock.connect(sip_addr).await.ok()?;
    Some(Forwarder::new(leelen_sock, sip_sock, bridge.config.mtu))
}

async fn setup_media_sockets(
    bridge: &Arc<Bridge>,
    session: &Arc<Session>,
) -> crate::error::BridgeResult<(Option<UdpSocket>, Option<UdpSocket>)> {
    let has_audio = session.dialog.lock().peer_audio_port.is_some();
    let has_video = session.dialog.lock().peer_video_port.is_some();

    let audio = if has_audio {
        Some(UdpSocket::bind(SocketAddr::new(bridge.config.bind_addr, bridge.config.audio_port)).await?)
    } else {
        None
    };
    let video = if has_video {
        Some(UdpSocket::bind(SocketAddr::new(bridge.config.bind_addr, bridge.config.video_port)).await?)
    } else {
        None
    };
    Ok((audio, video))
}

fn via_source_addr(request: &SipMessage) -> Option<IpAddr> {
    let via = request.via()?;
    let host = via.rsplit(' ').next()?;
    let host = host.split(':').next()?;
    host.parse().ok()
}

/// A SIP response to a transaction this bridge originated. Only the
/// outbound-INVITE (`Ict`) case needs bridge-specific handling here: a 2xx
/// tells the waiting LEELEN caller `OK`, anything else tells it `BYE`.
pub async fn handle_sip_response(bridge: &Arc<Bridge>, response: &SipMessage, src: SocketAddr) {
    let Some(call_id) = response.call_id().map(str::to_string) else {
        return;
    };
    let Some((cseq, method)) = response.cseq() else {
        return;
    };
    if method != SipMethod::Invite {
        return;
    }
    let key = TransactionKey::new(&call_id, cseq, method.as_str());
    let status = response.status_code().unwrap_or(0);

    let session_and_kind = {
        let mut txs = bridge.transactions.lock();
        txs.get_mut(&key).map(|t| {
            let terminated = t.receive_response(response.clone());
            (t.data.session.clone(), t.kind, terminated)
        })
    };
    let Some((Some(session), sip_proto::TransactionKind::Ict, terminated)) = session_and_kind else {
        return;
    };

    if (100..=199).contains(&status) {
        return;
    }

    if terminated {
        bridge.transactions.lock().kill(&key);
    }

    if (200..=299).contains(&status) {
        session.dialog.lock().ack().ok();
        *session.sip_peer_addr.lock() = Some(src);
        {
            let mut sip = session.sip.lock();
            sip.established_from = response.header("To").map(str::to_string);
            sip.established_to = response.header("From").map(str::to_string);
        }

        let sdp = SessionDescription::parse(&String::from_utf8_lossy(&response.body));
        let mut ok = LeelenMessage::new(LeelenCode::Ok, session.dialog_id());
        if let Some(audio) = sdp.audio() {
            ok.audio = audio.formats.clone();
            ok.audio_port = Some(bridge.config.audio_port);
        }
        if let Some(video) = sdp.video() {
            ok.video = video.formats.clone();
            ok.video_port = Some(bridge.config.video_port);
        }
        if let Some(peer_addr) = *session.peer_addr.lock() {
            let dest = SocketAddr::new(peer_addr, bridge.config.voip_port);
            let _ = bridge.send_leelen(&ok.to_bytes(), dest).await;
        }

        let ack = SipMessage::new_request(SipMethod::Ack, "sip:peer")
            .with_header("Call-ID", call_id)
            .with_header("CSeq", format!("{cseq} ACK"));
        let _ = bridge.send_sip(&ack.to_bytes(), src).await;

        if let Ok((audio_sock, video_sock)) = setup_media_sockets(bridge, &session).await {
            let peer_ip = *session.peer_addr.lock();
            let (peer_audio_port, peer_video_port) = {
                let dialog = session.dialog.lock();
                (dialog.peer_audio_port, dialog.peer_video_port)
            };
            let audio_forwarder = connect_leg(bridge, audio_sock, peer_ip, peer_audio_port, &sdp, MediaKind::Audio).await;
            let video_forwarder = connect_leg(bridge, video_sock, peer_ip, peer_video_port, &sdp, MediaKind::Video).await;
            if audio_forwarder.is_some() || video_forwarder.is_some() {
                session.start_forward(audio_forwarder, video_forwarder);
            }
        }
    } else {
        warn!(dialog = session.dialog_id(), status, "outbound INVITE rejected by SIP peer");
        session.dialog.lock().nak();
        if let Some(peer_addr) = *session.peer_addr.lock() {
            let bye = LeelenMessage::new(LeelenCode::Bye, session.dialog_id());
            let dest = SocketAddr::new(peer_addr, bridge.config.voip_port);
            let _ = bridge.send_leelen(&bye.to_bytes(), dest).await;
        }
        bridge.sessions.remove(session.dialog_id());
    }
}

/// The LEELEN peer hung up. If the call was already bridged, tell the SIP
/// side with a `BYE`; if it was still ringing, kill the outstanding ICT
/// instead (there's no dialog to `BYE` yet).
async fn handle_bye(bridge: &Arc<Bridge>, session: Arc<Session>, src: SocketAddr) {
    let was_established = session.established();
    if session.dialog.lock().receive(LeelenCode::Bye).is_err() {
        return;
    }
    let _ = src;

    let call_id = session.sip.lock().call_id.clone();
    if let Some(call_id) = call_id {
        if was_established {
            send_established_bye(bridge, &session, call_id).await;
        } else {
            let key = TransactionKey::new(&call_id, 1, SipMethod::Invite.as_str());
            bridge.transactions.lock().kill(&key);
        }
    }
    session.stop_forward();
    bridge.sessions.remove(session.dialog_id());
}

/// Send a SIP `BYE` for an already-established session, using the tags and
/// peer address recorded when the dialog was confirmed. Used both when the
/// LEELEN side hangs up and when the reactor's maintenance sweep times a
/// stale dialog out from under it.
pub(crate) async fn send_established_bye(bridge: &Arc<Bridge>, session: &Arc<Session>, call_id: String) {
    let dest = *session.sip_peer_addr.lock();
    let (from, to) = {
        let sip = session.sip.lock();
        (sip.established_from.clone(), sip.established_to.clone())
    };
    let (Some(dest), Some(from), Some(to)) = (dest, from, to) else {
        warn!(dialog = session.dialog_id(), "established session missing SIP leg state, can't send BYE");
        return;
    };
    let cseq = {
        let mut sip = session.sip.lock();
        sip.local_cseq += 1;
        sip.local_cseq
    };
    let bye = SipMessage::new_request(SipMethod::Bye, to.trim_start_matches('<').trim_end_matches('>').to_string())
        .with_header("From", from)
        .with_header("To", to)
        .with_header("Call-ID", call_id)
        .with_header("CSeq", format!("{cseq} BYE"));
    let _ = bridge.send_sip(&bye.to_bytes(), dest).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn via_source_addr_reads_last_token_of_the_topmost_via() {
        let request = SipMessage::new_request(SipMethod::Invite, "sip:1001-0203@192.168.1.10")
            .with_header("Via", "SIP/2.0/UDP 192.168.1.55:5060");
        assert_eq!(via_source_addr(&request), Some("192.168.1.55".parse().unwrap()));
    }

    #[test]
    fn via_source_addr_is_none_without_a_via_header() {
        let request = SipMessage::new_request(SipMethod::Invite, "sip:1001-0203@192.168.1.10");
        assert_eq!(via_source_addr(&request), None);
    }
}
