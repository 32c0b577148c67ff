//! A deliberately small SIP URI: enough to read a request-URI's user part
//! and to build `Contact`/`To`/`From` headers, not a general-purpose SIP
//! URI library.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipUri {
    pub scheme: String,
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub params: Vec<(String, String)>,
}

impl SipUri {
    pub fn new(host: impl Into<String>) -> Self {
        SipUri {
            scheme: "sip".to_string(),
            user: None,
            host: host.into(),
            port: None,
            params: Vec::new(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let s = s.strip_prefix('<').and_then(|s| s.strip_suffix('>')).unwrap_or(s);
        let (scheme, rest) = s.split_once(':')?;
        let (userinfo_host, params_str) = match rest.split_once(';') {
            Some((a, b)) => (a, Some(b)),
            None => (rest, None),
        };
        let (user, hostport) = match userinfo_host.split_once('@') {
            Some((u, h)) => (Some(u.to_string()), h),
            None => (None, userinfo_host),
        };
        let (host, port) = match hostport.rsplit_once(':') {
            Some((h, p)) => (h.to_string(), p.parse().ok()),
            None => (hostport.to_string(), None),
        };
        let params = params_str
            .map(|p| {
                p.split(';')
                    .filter_map(|kv| {
                        let mut it = kv.splitn(2, '=');
                        let k = it.next()?.to_string();
                        let v = it.next().unwrap_or("").to_string();
                        Some((k, v))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Some(SipUri {
            scheme: scheme.to_string(),
            user,
            host,
            port,
            params,
        })
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        write!(f, "{}", self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        for (k, v) in &self.params {
            if v.is_empty() {
                write!(f, ";{}", k)?;
            } else {
                write!(f, ";{}={}", k, v)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_uri() {
        let uri = SipUri::parse("sip:1001-0203@192.0.2.1:5060").unwrap();
        assert_eq!(uri.scheme, "sip");
        assert_eq!(uri.user.as_deref(), Some("1001-0203"));
        assert_eq!(uri.host, "192.0.2.1");
        assert_eq!(uri.port, Some(5060));
    }

    #[test]
    fn parses_angle_bracketed_uri_with_params() {
        let uri = SipUri::parse("<sip:bob@example.com;transport=udp>").unwrap();
        assert_eq!(uri.host, "example.com");
        assert_eq!(uri.param("transport"), Some("udp"));
    }

    #[test]
    fn round_trips_through_display() {
        let uri = SipUri::new("192.0.2.1").with_user("1001-0203").with_port(5060);
        assert_eq!(uri.to_string(), "sip:1001-0203@192.0.2.1:5060");
    }
}
