use std::fmt;
use std::io;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Ethernet,
    Ipv4,
    Tcp,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Layer::Ethernet => "ethernet",
            Layer::Ipv4 => "ipv4",
            Layer::Tcp => "tcp",
        };
        f.write_str(name)
    }
}

/// Why a received frame was not handed to the connection engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Truncated frame or a header length claim that overruns the buffer.
    #[error("malformed {0} header")]
    Malformed(Layer),
    /// Well-formed, but not IPv4/TCP. Bridged without inspection.
    #[error("not an IPv4/TCP frame")]
    Unsupported,
}

/// Rejection of a rule record from the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("csv field count mismatch ({0} / 8)")]
    FieldCount(usize),
    #[error("bad address \"{0}\"")]
    BadAddress(String),
    #[error("unsupported protocol \"{0}\"")]
    UnsupportedProto(String),
    #[error("invalid {field} \"{value}\"")]
    BadNumber { field: &'static str, value: String },
    #[error("end ({stop}) before start ({start})")]
    StopBeforeStart { start: u64, stop: u64 },
    #[error("unsupported action \"{0}\"")]
    UnknownAction(String),
    #[error("invalid protocol state \"{0}\"")]
    BadState(String),
    #[error("{action}: missing {key} tag")]
    MissingArg {
        action: &'static str,
        key: &'static str,
    },
    #[error("{action}: bad value for {key}: \"{value}\"")]
    BadArg {
        action: &'static str,
        key: &'static str,
        value: String,
    },
    #[error("malformed argument \"{0}\"")]
    MalformedArg(String),
    #[error("wildcard addresses only allowed with ACTIVE or CLEAR")]
    Wildcard,
    #[error("INJECT: start is zero and no addresses given")]
    InjectWithoutAddresses,
}

/// Failure attaching to a network interface.
#[derive(Debug, Error)]
pub enum IfaceError {
    #[error("could not create socket for {iface}")]
    Socket {
        iface: String,
        #[source]
        source: io::Error,
    },
    #[error("interface name \"{0}\" is too long")]
    NameTooLong(String),
    #[error("could not configure {iface}: {step}")]
    Configure {
        iface: String,
        step: &'static str,
        #[source]
        source: io::Error,
    },
}
