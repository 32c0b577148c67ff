//! Answering the passive side of discovery: deciding whether a solicitation
//! is for us, and formatting the `number?type*description` reply.

use std::net::IpAddr;

use leelen_core::number::LeelenNumber;
use regex::Regex;
use tracing::info;

/// Discovery advertisement format: `number?device_type*description`.
pub fn is_advertisement(msg: &str) -> bool {
    msg.contains('?')
}

pub fn format_advertisement(report_addr: &str, device_type: u8, desc: &str) -> String {
    format!("{}?{}*{}", report_addr, device_type, desc)
}

/// Decides whether an incoming solicitation should be answered, and builds
/// the reply.
#[derive(Debug)]
pub struct Advertiser {
    number_regex: Option<Regex>,
    base_number: Option<LeelenNumber>,
    /// Pre-configured report address; when unset the advertiser falls back
    /// to the local address the solicitation arrived on.
    pub report_addr: Option<IpAddr>,
    pub device_type: u8,
    pub desc: String,
    pub mtu: usize,
}

impl Advertiser {
    pub fn new(device_type: u8, desc: String, mtu: usize) -> Self {
        Advertiser {
            number_regex: None,
            base_number: None,
            report_addr: None,
            device_type,
            desc,
            mtu,
        }
    }

    pub fn with_number_regex(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.number_regex = Some(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn with_base_number(mut self, number: LeelenNumber) -> Self {
        self.base_number = Some(number);
        self
    }

    /// `true` if `number_regex` matches, or failing that, the device's own
    /// number's first 9 characters match. With neither configured, nothing
    /// is ever answered.
    pub fn should_reply(&self, number: &str) -> bool {
        if let Some(re) = &self.number_regex {
            return re.is_match(number);
        }
        if let Some(base) = &self.base_number {
            return base.should_reply(number);
        }
        false
    }

    /// Decide whether to answer a received message, and if so build the
    /// reply string and log the exchange the way the reference
    /// implementation does (info level only when actually replying).
    pub fn receive(
        &self,
        msg: &str,
        src_addr: std::net::SocketAddr,
        local_addr: IpAddr,
    ) -> Option<String> {
        if is_advertisement(msg) {
            return None;
        }
        let should_reply = self.should_reply(msg);
        if should_reply {
            info!(requested = msg, from = %src_addr, "replying to discovery solicitation");
        }
        if !should_reply {
            return None;
        }
        let report = self.report_addr.unwrap_or(local_addr);
        Some(format_advertisement(
            &report.to_string(),
            self.device_type,
            &self.desc,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_advertisement_by_question_mark() {
        assert!(is_advertisement("192.0.2.1?1*Front Door"));
        assert!(!is_advertisement("1001-0203"));
    }

    #[test]
    fn matches_via_base_number_prefix() {
        let base = LeelenNumber::parse("1001-0203", None).unwrap();
        let adv = Advertiser::new(1, "Front Door".into(), 1200).with_base_number(base);
        assert!(adv.should_reply("1001-0203"));
        assert!(!adv.should_reply("1002-0000"));
    }

    #[test]
    fn matches_via_regex_when_set() {
        let adv = Advertiser::new(1, "Front Door".into(), 1200)
            .with_number_regex(r"^1001-")
            .unwrap();
        assert!(adv.should_reply("1001-0203"));
        assert!(!adv.should_reply("1002-0203"));
    }

    #[test]
    fn no_rule_never_replies() {
        let adv = Advertiser::new(1, "Front Door".into(), 1200);
        assert!(!adv.should_reply("1001-0203"));
    }

    #[test]
    fn formats_advertisement_string() {
        assert_eq!(
            format_advertisement("192.0.2.1", 1, "Front Door"),
            "192.0.2.1?1*Front Door"
        );
    }
}
