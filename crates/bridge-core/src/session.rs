//! A bridged call: one LEELEN dialog, its paired SIP dialog identifiers,
//! and the audio/video forwarders that move media once both legs are up.
//!
//! Ownership mirrors the reference implementation's refcounted session:
//! the session table holds one `Arc`, each SIP transaction referencing the
//! session holds another (dropped when the transaction is killed), and the
//! session is freed once the last `Arc` goes away — `Arc`'s strong count
//! *is* the refcount, no separate atomic needed.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use leelen_core::dialog::{LeelenDialog, LeelenDialogState};
use leelen_core::number::LeelenNumber;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// SIP-side identifiers a session needs to build subsequent requests
/// (BYE, re-INVITE) without holding on to a full SIP dialog object.
#[derive(Debug, Clone, Default)]
pub struct SipLegState {
    pub call_id: Option<String>,
    pub local_tag: Option<String>,
    pub remote_tag: Option<String>,
    pub remote_target: Option<String>,
    pub local_cseq: u32,
    /// `From`/`To` header values to use when *this bridge* originates a
    /// request on an established dialog (e.g. a `BYE`) — already oriented
    /// and tagged correctly for whichever side we are.
    pub established_from: Option<String>,
    pub established_to: Option<String>,
}

struct ForwardHandles {
    stop: watch::Sender<bool>,
    audio: Option<JoinHandle<()>>,
    video: Option<JoinHandle<()>>,
}

pub struct Session {
    pub dialog: Mutex<LeelenDialog>,
    pub sip: Mutex<SipLegState>,
    pub local_addr: IpAddr,

    /// Guards the worker thread that performs blocking discovery for an
    /// incoming INVITE: `true` once a worker has been spawned for this
    /// session, so a retransmitted INVITE doesn't spawn a second one.
    invite_worker_started: AtomicBool,
    pub being_invited: Mutex<Option<LeelenNumber>>,
    /// The peer's LEELEN address, once known (either from discovery, or
    /// from the source address of an incoming LEELEN message).
    pub peer_addr: Mutex<Option<IpAddr>>,
    /// The SIP peer's address, for requests this bridge originates on an
    /// established dialog.
    pub sip_peer_addr: Mutex<Option<std::net::SocketAddr>>,

    forward: Mutex<Option<ForwardHandles>>,
}

impl Session {
    pub fn new(dialog_id: Option<u32>, timeout: Duration, local_addr: IpAddr) -> Self {
        Session {
            dialog: Mutex::new(LeelenDialog::new(dialog_id, timeout)),
            sip: Mutex::new(SipLegState::default()),
            local_addr,
            invite_worker_started: AtomicBool::new(false),
            being_invited: Mutex::new(None),
            peer_addr: Mutex::new(None),
            sip_peer_addr: Mutex::new(None),
            forward: Mutex::new(None),
        }
    }

    pub fn dialog_id(&self) -> u32 {
        self.dialog.lock().id
    }

    pub fn established(&self) -> bool {
        self.dialog.lock().state() == LeelenDialogState::Connected
    }

    /// Attempt to claim the single invite-processing slot for this session.
    /// Returns `true` exactly once, on the caller that actually gets to
    /// spawn the discovery worker; later retransmissions of the same
    /// INVITE see `false` and just wait.
    pub fn try_start_invite_worker(&self) -> bool {
        self.invite_worker_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Start whichever legs were actually negotiated; a call with no video
    /// simply never gets a video forwarder task.
    pub fn start_forward(
        &self,
        audio: Option<crate::forwarder::Forwarder>,
        video: Option<crate::forwarder::Forwarder>,
    ) {
        let (tx, rx) = watch::channel(false);
        let audio_handle = audio.map(|f| tokio::spawn(f.run(rx.clone())));
        let video_handle = video.map(|f| tokio::spawn(f.run(rx)));
        *self.forward.lock() = Some(ForwardHandles {
            stop: tx,
            audio: audio_handle,
            video: video_handle,
        });
    }

    /// Signal both forwarder tasks to stop. Does not wait for them to
    /// finish, matching `SIPLeelenSession_stop_forward`.
    pub fn stop_forward(&self) {
        if let Some(handles) = self.forward.lock().take() {
            let _ = handles.stop.send(true);
            if let Some(h) = handles.audio {
                h.abort();
            }
            if let Some(h) = handles.video {
                h.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn invite_worker_claims_exactly_once() {
        let session = Session::new(Some(1), Duration::from_millis(500), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert!(session.try_start_invite_worker());
        assert!(!session.try_start_invite_worker());
    }

    #[test]
    fn fresh_session_is_not_established() {
        let session = Session::new(Some(1), Duration::from_millis(500), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert!(!session.established());
    }
}
