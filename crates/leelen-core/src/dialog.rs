//! The LEELEN VoIP dialog state machine: tracks one call attempt from the
//! first `CALL`/`VIEW`/`VOICE_MESSAGE` through to teardown, independent of
//! whether the far end is another LEELEN device or a SIP peer behind the
//! bridge.

use std::time::{Duration, Instant};

use rand::Rng;
use tracing::warn;

use crate::error::{CoreError, CoreResult};
use crate::number::LeelenNumber;
use crate::wire::LeelenCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeelenDialogState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl LeelenDialogState {
    fn name(self) -> &'static str {
        match self {
            LeelenDialogState::Disconnected => "Disconnected",
            LeelenDialogState::Connecting => "Connecting",
            LeelenDialogState::Connected => "Connected",
            LeelenDialogState::Disconnecting => "Disconnecting",
        }
    }
}

/// One LEELEN call dialog. Holds everything needed to validate incoming
/// frames against the current state and to remember what the peer last told
/// us about itself.
#[derive(Debug)]
pub struct LeelenDialog {
    pub id: u32,
    state: LeelenDialogState,
    /// Per-dialog retransmission/ack timeout. Config-driven rather than the
    /// fixed `LEELEN_VOIP_TIMEOUT * 2` constant of older deployments, so a
    /// device with a slow link can be given more slack.
    timeout: Duration,
    last_activity: Instant,

    pub peer_number: Option<LeelenNumber>,
    pub peer_type: Option<u32>,
    pub peer_audio_port: Option<u16>,
    pub peer_video_port: Option<u16>,
}

impl LeelenDialog {
    /// Create a dialog. `id` of `0` (or `None`) picks a random nonzero id,
    /// matching the reference behaviour of never handing out dialog id 0.
    pub fn new(id: Option<u32>, timeout: Duration) -> Self {
        let id = match id {
            Some(0) | None => loop {
                let candidate = rand::thread_rng().gen::<u32>();
                if candidate != 0 {
                    break candidate;
                }
            },
            Some(id) => id,
        };
        LeelenDialog {
            id,
            state: LeelenDialogState::Disconnected,
            timeout,
            last_activity: Instant::now(),
            peer_number: None,
            peer_type: None,
            peer_audio_port: None,
            peer_video_port: None,
        }
    }

    pub fn state(&self) -> LeelenDialogState {
        self.state
    }

    fn violation(&self, code: LeelenCode, reason: &str) -> CoreError {
        CoreError::DialogProtocolViolation {
            state: format!("{} (code {})", self.state.name(), code),
            reason: reason.to_string(),
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Apply an incoming frame's code to the state machine. Mirrors
    /// `LeelenDialogState_receive` in the reference implementation: the
    /// receive side doesn't pass through `Connecting`/`Disconnecting` at
    /// all (those are the *send*-side's waiting states) — any invite-like
    /// code lands straight on `Connected`, and a `BYE` lands straight on
    /// `Disconnected`, regardless of the state the dialog was in.
    pub fn receive(&mut self, code: LeelenCode) -> CoreResult<()> {
        self.touch();
        match code {
            LeelenCode::OpenGate => Ok(()),
            c if c.is_invite_like() => {
                self.state = LeelenDialogState::Connected;
                Ok(())
            }
            LeelenCode::Bye => {
                self.state = LeelenDialogState::Disconnected;
                Ok(())
            }
            _ => Err(self.violation(code, "unexpected code for current dialog state")),
        }
    }

    /// Apply an outgoing frame's code to the state machine (mirrors
    /// `receive` from this side's point of view).
    pub fn send(&mut self, code: LeelenCode) -> CoreResult<()> {
        use LeelenDialogState::*;
        self.touch();
        match (self.state, code) {
            (_, LeelenCode::OpenGate) => Ok(()),
            (Disconnected, c) if c.is_invite_like() => {
                self.state = Connecting;
                Ok(())
            }
            (Connecting, LeelenCode::Ok) => {
                self.state = Connected;
                Ok(())
            }
            (Connecting | Connected, LeelenCode::Bye) => {
                self.state = Disconnecting;
                Ok(())
            }
            (Disconnecting, LeelenCode::Bye) => {
                self.state = Disconnected;
                Ok(())
            }
            _ => Err(self.violation(code, "unexpected code for current dialog state")),
        }
    }

    /// Explicit positive acknowledgement: completes a pending `Connecting`.
    pub fn ack(&mut self) -> CoreResult<()> {
        self.touch();
        match self.state {
            LeelenDialogState::Connecting => {
                self.state = LeelenDialogState::Connected;
                Ok(())
            }
            _ => Err(CoreError::DialogProtocolViolation {
                state: self.state.name().to_string(),
                reason: "ack() outside Connecting".to_string(),
            }),
        }
    }

    /// Negative acknowledgement: any in-progress attempt collapses straight
    /// to `Disconnected`.
    pub fn nak(&mut self) {
        self.touch();
        self.state = LeelenDialogState::Disconnected;
    }

    /// `true` once the dialog has progressed far enough that a `BYE` is a
    /// meaningful teardown rather than a stray message.
    pub fn may_bye(&self) -> bool {
        matches!(
            self.state,
            LeelenDialogState::Connecting | LeelenDialogState::Connected
        )
    }

    /// `true` if no activity has been seen within the configured timeout.
    pub fn check_timeout(&self) -> bool {
        self.last_activity.elapsed() > self.timeout
    }

    /// How long since the last frame sent or received, for callers that
    /// need to compare against a different threshold than the dialog's own
    /// (e.g. the reactor's longer grace period while `Disconnecting`).
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Record the peer's advertised number/device type, warning (not
    /// failing) if a later message disagrees with what was already learned.
    pub fn update_peer_number(&mut self, number: LeelenNumber, device_type: u32) {
        if let Some(existing) = self.peer_number {
            if existing != number {
                warn!(dialog = self.id, %existing, new = %number, "peer number changed mid-dialog");
            }
        }
        self.peer_number = Some(number);
        if let Some(existing) = self.peer_type {
            if existing != device_type {
                warn!(dialog = self.id, existing, new = device_type, "peer device type changed mid-dialog");
            }
        }
        self.peer_type = Some(device_type);
    }

    pub fn update_peer_audio_port(&mut self, port: u16) {
        if let Some(existing) = self.peer_audio_port {
            if existing != port {
                warn!(dialog = self.id, existing, new = port, "peer audio port changed mid-dialog");
            }
        }
        self.peer_audio_port = Some(port);
    }

    pub fn update_peer_video_port(&mut self, port: u16) {
        if let Some(existing) = self.peer_video_port {
            if existing != port {
                warn!(dialog = self.id, existing, new = port, "peer video port changed mid-dialog");
            }
        }
        self.peer_video_port = Some(port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dialog() -> LeelenDialog {
        LeelenDialog::new(Some(1), Duration::from_millis(1000))
    }

    #[test]
    fn random_id_is_never_zero() {
        let d = LeelenDialog::new(None, Duration::from_millis(1000));
        assert_ne!(d.id, 0);
        let d = LeelenDialog::new(Some(0), Duration::from_millis(1000));
        assert_ne!(d.id, 0);
    }

    #[test]
    fn happy_path_to_connected_and_bye() {
        let mut d = dialog();
        assert_eq!(d.state(), LeelenDialogState::Disconnected);
        d.receive(LeelenCode::Call).unwrap();
        assert_eq!(d.state(), LeelenDialogState::Connected);
        assert!(d.may_bye());
        d.receive(LeelenCode::Bye).unwrap();
        assert_eq!(d.state(), LeelenDialogState::Disconnected);
    }

    #[test]
    fn send_side_holds_connecting_until_ack() {
        let mut d = dialog();
        d.send(LeelenCode::Call).unwrap();
        assert_eq!(d.state(), LeelenDialogState::Connecting);
        d.ack().unwrap();
        assert_eq!(d.state(), LeelenDialogState::Connected);
    }

    #[test]
    fn receive_of_invite_like_code_on_an_active_dialog_stays_connected() {
        let mut d = dialog();
        d.receive(LeelenCode::Call).unwrap();
        assert_eq!(d.state(), LeelenDialogState::Connected);
        d.receive(LeelenCode::View).unwrap();
        assert_eq!(d.state(), LeelenDialogState::Connected);
    }

    #[test]
    fn open_gate_never_changes_state() {
        let mut d = dialog();
        d.receive(LeelenCode::OpenGate).unwrap();
        assert_eq!(d.state(), LeelenDialogState::Disconnected);
    }

    #[test]
    fn unexpected_code_is_protocol_violation() {
        let mut d = dialog();
        assert!(d.receive(LeelenCode::Ok).is_err());
    }

    #[test]
    fn nak_collapses_to_disconnected() {
        let mut d = dialog();
        d.receive(LeelenCode::Call).unwrap();
        d.nak();
        assert_eq!(d.state(), LeelenDialogState::Disconnected);
    }

    #[test]
    fn check_timeout_uses_configured_duration() {
        let d = LeelenDialog::new(Some(1), Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(d.check_timeout());
    }

    #[test]
    fn peer_port_mismatch_overwrites_and_warns() {
        let mut d = dialog();
        d.update_peer_audio_port(7078);
        d.update_peer_audio_port(7079);
        assert_eq!(d.peer_audio_port, Some(7079));
    }
}
