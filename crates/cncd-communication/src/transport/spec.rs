//! Port specification parsing
//!
//! A port is configured as `<scheme>://<address><sep><parameter>` where the
//! separator is `@` or `:` and the parameter is numeric, for example
//! `serial:///dev/ttyUSB0@115200` or `tcp://192.168.1.20:23`.

use cncd_core::ConnectionError;
use regex::Regex;
use std::str::FromStr;
use std::sync::OnceLock;

static PORT_SPEC: OnceLock<Regex> = OnceLock::new();

fn port_spec_regex() -> &'static Regex {
    PORT_SPEC.get_or_init(|| {
        Regex::new(r"^(.+)://(.+)[@:]([0-9]+)$").expect("port spec regex is valid")
    })
}

/// Transport family selected by the scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// In-process device that acknowledges everything
    Dummy,
    /// Serial device; parameter is the baud rate
    Serial,
    /// TCP console; parameter is the port number
    Tcp,
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scheme::Dummy => write!(f, "dummy"),
            Scheme::Serial => write!(f, "serial"),
            Scheme::Tcp => write!(f, "tcp"),
        }
    }
}

/// A parsed port specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub scheme: Scheme,
    pub address: String,
    pub parameter: u32,
}

impl PortSpec {
    /// Parse a port specification string
    pub fn parse(spec: &str) -> Result<Self, ConnectionError> {
        let malformed = || ConnectionError::MalformedSpec {
            spec: spec.to_string(),
        };

        let caps = port_spec_regex().captures(spec.trim()).ok_or_else(malformed)?;
        let scheme = match &caps[1] {
            "dummy" => Scheme::Dummy,
            "serial" => Scheme::Serial,
            "tcp" => Scheme::Tcp,
            other => {
                return Err(ConnectionError::UnsupportedScheme {
                    scheme: other.to_string(),
                })
            }
        };
        let parameter = caps[3].parse::<u32>().map_err(|_| malformed())?;

        Ok(Self {
            scheme,
            address: caps[2].to_string(),
            parameter,
        })
    }

    /// Address and parameter joined the way the transport uses them
    pub fn endpoint(&self) -> String {
        match self.scheme {
            Scheme::Tcp => format!("{}:{}", self.address, self.parameter),
            Scheme::Serial | Scheme::Dummy => format!("{}@{}", self.address, self.parameter),
        }
    }
}

impl FromStr for PortSpec {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for PortSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.scheme, self.endpoint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_serial() {
        let spec = PortSpec::parse("serial:///dev/ttyUSB0@115200").unwrap();
        assert_eq!(spec.scheme, Scheme::Serial);
        assert_eq!(spec.address, "/dev/ttyUSB0");
        assert_eq!(spec.parameter, 115200);
    }

    #[test]
    fn test_parse_tcp_colon_separator() {
        let spec = PortSpec::parse("tcp://192.168.1.20:23").unwrap();
        assert_eq!(spec.scheme, Scheme::Tcp);
        assert_eq!(spec.address, "192.168.1.20");
        assert_eq!(spec.parameter, 23);
        assert_eq!(spec.endpoint(), "192.168.1.20:23");
    }

    #[test]
    fn test_parse_dummy() {
        let spec: PortSpec = "dummy://printer@0".parse().unwrap();
        assert_eq!(spec.scheme, Scheme::Dummy);
        assert_eq!(spec.to_string(), "dummy://printer@0");
    }

    #[test]
    fn test_malformed_spec() {
        for bad in ["", "serial:/dev/ttyUSB0@115200", "tcp://host", "tcp://host:port"] {
            assert!(
                matches!(
                    PortSpec::parse(bad),
                    Err(ConnectionError::MalformedSpec { .. })
                ),
                "{} should be malformed",
                bad
            );
        }
    }

    #[test]
    fn test_unsupported_scheme() {
        assert_eq!(
            PortSpec::parse("usb://printer@1"),
            Err(ConnectionError::UnsupportedScheme {
                scheme: "usb".to_string()
            })
        );
    }

    proptest! {
        #[test]
        fn prop_tcp_specs_roundtrip(host in "[a-z][a-z0-9.]{0,20}", port in 1u32..65535) {
            let spec = PortSpec::parse(&format!("tcp://{}:{}", host, port)).unwrap();
            prop_assert_eq!(spec.address, host);
            prop_assert_eq!(spec.parameter, port);
        }

        #[test]
        fn prop_parse_never_panics(input in ".*") {
            let _ = PortSpec::parse(&input);
        }
    }
}
