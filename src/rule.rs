use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};

use crate::codec::header::{MacAddr, TCP_ACK};
use crate::connection::{ProtocolState, StateFilter};
use crate::error::RuleError;
use crate::flow_key::FlowKey;
use crate::injector::{InjectionJob, SeqAckMethod, StaticAddressing};
use crate::modifier::{PreAckMethod, RenegeGrowth, Window};
use crate::packet_view::Direction;

const FIELD_COUNT: usize = 8;
const ARGS_DELIM: char = '&';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Proto {
    Tcp,
}

/// What a modifier does once installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Inject(InjectionJob),
    Division { bytes_per_chunk: u32 },
    Duplication { copies: u32 },
    PreAck { amount: u32, method: PreAckMethod },
    Renege { amount: u32, growth: RenegeGrowth },
    Burst { size: usize },
    LimitAck,
    Drop { percent: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub window: Window,
    pub action: Action,
}

/// A command aimed at a single connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnOp {
    Install(Rule),
    Print(bool),
    Clear,
    Time,
    State(ProtocolState),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Time the last packet was seen.
    Active,
    ClearAll,
    Connection {
        key: FlowKey,
        proto: Proto,
        op: ConnOp,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Addr {
    Wildcard,
    Ip(Ipv4Addr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActionKind {
    Inject,
    Div,
    Dup,
    PreAck,
    Renege,
    Burst,
    Print,
    Clear,
    LimitAck,
    Drop,
    Time,
    State,
    Active,
}

impl ActionKind {
    fn parse(s: &str) -> Result<Self, RuleError> {
        let s = s.trim();
        if let Some(code) = parse_int(s) {
            let kind = match code {
                0 => ActionKind::Inject,
                1 => ActionKind::Div,
                2 => ActionKind::Dup,
                3 => ActionKind::PreAck,
                4 => ActionKind::Renege,
                5 => ActionKind::Burst,
                6 => ActionKind::Print,
                7 => ActionKind::Clear,
                _ => return Err(RuleError::UnknownAction(s.to_string())),
            };
            return Ok(kind);
        }
        let kind = match s.to_ascii_uppercase().as_str() {
            "INJECT" => ActionKind::Inject,
            "DIV" => ActionKind::Div,
            "DUP" => ActionKind::Dup,
            "PREACK" => ActionKind::PreAck,
            "RENEGE" => ActionKind::Renege,
            "BURST" => ActionKind::Burst,
            "PRINT" => ActionKind::Print,
            "CLEAR" => ActionKind::Clear,
            "LIMITACK" => ActionKind::LimitAck,
            "DROP" => ActionKind::Drop,
            "TIME" => ActionKind::Time,
            "STATE" => ActionKind::State,
            "ACTIVE" => ActionKind::Active,
            _ => return Err(RuleError::UnknownAction(s.to_string())),
        };
        Ok(kind)
    }

    fn name(self) -> &'static str {
        match self {
            ActionKind::Inject => "INJECT",
            ActionKind::Div => "DIV",
            ActionKind::Dup => "DUP",
            ActionKind::PreAck => "PREACK",
            ActionKind::Renege => "RENEGE",
            ActionKind::Burst => "BURST",
            ActionKind::Print => "PRINT",
            ActionKind::Clear => "CLEAR",
            ActionKind::LimitAck => "LIMITACK",
            ActionKind::Drop => "DROP",
            ActionKind::Time => "TIME",
            ActionKind::State => "STATE",
            ActionKind::Active => "ACTIVE",
        }
    }
}

/// `key=value` pairs of the last field.
struct Args<'a> {
    action: &'static str,
    pairs: Vec<(&'a str, &'a str)>,
}

impl<'a> Args<'a> {
    fn parse(action: &'static str, field: &'a str) -> Result<Self, RuleError> {
        let mut pairs = Vec::new();
        for item in field.split(ARGS_DELIM).map(str::trim).filter(|s| !s.is_empty()) {
            let (k, v) = item
                .split_once('=')
                .ok_or_else(|| RuleError::MalformedArg(item.to_string()))?;
            pairs.push((k.trim(), v.trim()));
        }
        Ok(Self { action, pairs })
    }

    fn get(&self, key: &str) -> Option<&'a str> {
        self.pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    fn bad(&self, key: &'static str, value: &str) -> RuleError {
        RuleError::BadArg {
            action: self.action,
            key,
            value: value.to_string(),
        }
    }

    fn required(&self, key: &'static str) -> Result<&'a str, RuleError> {
        self.get(key).ok_or(RuleError::MissingArg {
            action: self.action,
            key,
        })
    }

    fn int<T: TryFrom<i64>>(&self, key: &'static str) -> Result<T, RuleError> {
        let raw = self.required(key)?;
        parse_int(raw)
            .and_then(|v| T::try_from(v).ok())
            .ok_or_else(|| self.bad(key, raw))
    }

    fn opt_int<T: TryFrom<i64>>(&self, key: &'static str) -> Result<Option<T>, RuleError> {
        match self.get(key) {
            None => Ok(None),
            Some(_) => self.int(key).map(Some),
        }
    }

    /// A 32-bit quantity added to sequence numbers; negative values wrap.
    fn amount(&self, key: &'static str) -> Result<u32, RuleError> {
        let v: i64 = self.int(key)?;
        if v < i64::from(i32::MIN) || v > i64::from(u32::MAX) {
            return Err(self.bad(key, &v.to_string()));
        }
        Ok(v as u32)
    }

    fn opt_amount(&self, key: &'static str) -> Result<u32, RuleError> {
        match self.get(key) {
            None => Ok(0),
            Some(_) => self.amount(key),
        }
    }

    fn mac(&self, key: &'static str) -> Result<Option<MacAddr>, RuleError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => parse_mac(raw).map(Some).ok_or_else(|| self.bad(key, raw)),
        }
    }
}

/// Integer in decimal or `0x` hex, optionally signed.
fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim();
    let (neg, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    if digits.is_empty() || digits.starts_with(['-', '+']) {
        return None;
    }
    let v = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i64>().ok()?,
    };
    Some(if neg { -v } else { v })
}

fn parse_mac(s: &str) -> Option<MacAddr> {
    let mut mac = [0u8; 6];
    let mut parts = s.split(':');
    for byte in &mut mac {
        *byte = u8::from_str_radix(parts.next()?.trim(), 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(MacAddr(mac))
}

/// Dotted quad, host name (first IPv4 result) or `*`.
fn parse_addr(s: &str) -> Result<Addr, RuleError> {
    let s = s.trim();
    if s.starts_with('*') {
        return Ok(Addr::Wildcard);
    }
    if let Ok(ip) = s.parse::<Ipv4Addr>() {
        return Ok(Addr::Ip(ip));
    }
    (s, 0)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| {
            addrs.find_map(|a| match a {
                SocketAddr::V4(v4) => Some(*v4.ip()),
                SocketAddr::V6(_) => None,
            })
        })
        .map(Addr::Ip)
        .ok_or_else(|| RuleError::BadAddress(s.to_string()))
}

fn parse_proto(s: &str) -> Result<Proto, RuleError> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("TCP") || s == "0" {
        return Ok(Proto::Tcp);
    }
    Err(RuleError::UnsupportedProto(s.to_string()))
}

fn parse_count(field: &'static str, s: &str) -> Result<u64, RuleError> {
    parse_int(s)
        .and_then(|v| u64::try_from(v).ok())
        .ok_or_else(|| RuleError::BadNumber {
            field,
            value: s.trim().to_string(),
        })
}

// ==========================================
// 规则解析：src,dst,proto,start,stop,state,action,args
// ==========================================
pub fn parse_command(line: &str) -> Result<Command, RuleError> {
    let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(',').collect();
    if fields.len() != FIELD_COUNT {
        return Err(RuleError::FieldCount(fields.len()));
    }

    let src = parse_addr(fields[0])?;
    let dst = parse_addr(fields[1])?;
    let proto = parse_proto(fields[2])?;
    let start = parse_count("start", fields[3])?;
    let stop = parse_count("stop", fields[4])?;
    if stop != 0 && stop < start {
        return Err(RuleError::StopBeforeStart { start, stop });
    }
    let state: StateFilter = fields[5].parse()?;
    let kind = ActionKind::parse(fields[6])?;
    let args = Args::parse(kind.name(), fields[7])?;

    let (src, dst) = match (src, dst, kind) {
        (Addr::Wildcard, Addr::Wildcard, ActionKind::Active) => return Ok(Command::Active),
        (Addr::Wildcard, Addr::Wildcard, ActionKind::Clear) => return Ok(Command::ClearAll),
        (Addr::Ip(src), Addr::Ip(dst), _) => (src, dst),
        _ => return Err(RuleError::Wildcard),
    };
    let window = Window { start, stop, state };

    let op = match kind {
        ActionKind::Active => return Err(RuleError::Wildcard),
        ActionKind::Print => ConnOp::Print(args.int::<i64>("on")? != 0),
        ActionKind::Clear => ConnOp::Clear,
        ActionKind::Time => ConnOp::Time,
        ActionKind::State => match state {
            StateFilter::Exactly(s) => ConnOp::State(s),
            StateFilter::Any => return Err(RuleError::BadState(fields[5].trim().to_string())),
        },
        ActionKind::Inject => {
            let job = inject_job(&args, src, dst, start)?;
            ConnOp::Install(Rule {
                window,
                action: Action::Inject(job),
            })
        }
        _ => ConnOp::Install(Rule {
            window,
            action: modifier_action(kind, &args)?,
        }),
    };

    Ok(Command::Connection {
        key: FlowKey::new(src, dst),
        proto,
        op,
    })
}

fn modifier_action(kind: ActionKind, args: &Args<'_>) -> Result<Action, RuleError> {
    let action = match kind {
        ActionKind::Div => {
            let bpc: u32 = args.int("bpc")?;
            if bpc == 0 {
                return Err(args.bad("bpc", "0"));
            }
            Action::Division {
                bytes_per_chunk: bpc,
            }
        }
        ActionKind::Dup => Action::Duplication {
            copies: args.int("num")?,
        },
        ActionKind::PreAck => {
            let amount = args.amount("amt")?;
            let code: u32 = args.int("method")?;
            let method = PreAckMethod::from_code(code)
                .ok_or_else(|| args.bad("method", &code.to_string()))?;
            Action::PreAck { amount, method }
        }
        ActionKind::Renege => {
            let amount = args.amount("amt")?;
            let growth: u32 = args.int("growth")?;
            Action::Renege {
                amount,
                growth: RenegeGrowth::from_code(growth),
            }
        }
        ActionKind::Burst => {
            let size: usize = args.int("num")?;
            if size == 0 {
                return Err(args.bad("num", "0"));
            }
            Action::Burst { size }
        }
        ActionKind::LimitAck => Action::LimitAck,
        ActionKind::Drop => {
            let percent: u32 = args.int("p")?;
            if percent > 100 {
                return Err(args.bad("p", &percent.to_string()));
            }
            Action::Drop { percent }
        }
        other => return Err(RuleError::UnknownAction(other.name().to_string())),
    };
    Ok(action)
}

fn inject_job(
    args: &Args<'_>,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    start: u64,
) -> Result<InjectionJob, RuleError> {
    let mac_src = args.mac("mac_src")?;
    let mac_dst = args.mac("mac_dst")?;
    let port_src: u16 = args.opt_int("src_port")?.unwrap_or(0);
    let port_dst: u16 = args.opt_int("dst_port")?.unwrap_or(0);

    let dir = match args.int::<i64>("dir")? {
        1 => Direction::Forward,
        2 => Direction::Backward,
        other => return Err(args.bad("dir", &other.to_string())),
    };
    let method = match args.get("method") {
        None => SeqAckMethod::Relative,
        Some(m) if m.eq_ignore_ascii_case("ABS") || m == "0" => SeqAckMethod::Absolute,
        Some(m) if m.eq_ignore_ascii_case("REL") || m == "1" => SeqAckMethod::Relative,
        Some(m) => return Err(args.bad("method", m)),
    };

    let addressing = match (mac_src, mac_dst) {
        (Some(mac_src), Some(mac_dst)) if port_src != 0 && port_dst != 0 => {
            Some(StaticAddressing {
                mac_src,
                mac_dst,
                ip_src: src,
                ip_dst: dst,
                port_src,
                port_dst,
            })
        }
        _ => None,
    };
    if start == 0 && addressing.is_none() {
        return Err(RuleError::InjectWithoutAddresses);
    }
    let freq_ms: u64 = args.int("freq")?;
    if freq_ms == 0 {
        return Err(args.bad("freq", "0"));
    }

    Ok(InjectionJob {
        addressing,
        flags: args.opt_int("type")?.unwrap_or(TCP_ACK),
        window: args.opt_int("win")?.unwrap_or(0),
        seq: args.opt_amount("seq")?,
        ack: args.opt_amount("ack")?,
        method,
        freq_ms,
        max_packets: args.opt_int("num")?,
        dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn install(line: &str) -> Rule {
        match parse_command(line) {
            Ok(Command::Connection {
                op: ConnOp::Install(rule),
                ..
            }) => rule,
            other => panic!("expected install, got {other:?}"),
        }
    }

    #[test]
    fn parses_a_division_rule() {
        let cmd = parse_command("10.0.0.1,10.0.0.2,TCP,5,0x20,*,DIV,bpc=100").unwrap();
        let Command::Connection { key, proto, op } = cmd else {
            panic!("expected connection command");
        };
        assert_eq!(key, FlowKey::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(proto, Proto::Tcp);
        assert_eq!(
            op,
            ConnOp::Install(Rule {
                window: Window {
                    start: 5,
                    stop: 32,
                    state: StateFilter::Any,
                },
                action: Action::Division {
                    bytes_per_chunk: 100
                },
            })
        );
    }

    #[test]
    fn numeric_actions_and_states() {
        let rule = install("1.2.3.4,5.6.7.8,0,0,0,STATE_CONG_AVOID,3,amt=100&method=2");
        assert_eq!(rule.window.state, StateFilter::Exactly(ProtocolState::CongAvoid));
        assert_eq!(
            rule.action,
            Action::PreAck {
                amount: 100,
                method: PreAckMethod::Trailing
            }
        );
        let rule = install("1.2.3.4,5.6.7.8,TCP,0,0,2,RENEGE,amt=-5&growth=1");
        assert_eq!(
            rule.action,
            Action::Renege {
                amount: (-5i32) as u32,
                growth: RenegeGrowth::Cumulative
            }
        );
    }

    #[test]
    fn wildcards() {
        assert_eq!(parse_command("*,*,TCP,0,0,*,ACTIVE,"), Ok(Command::Active));
        assert_eq!(parse_command("*,*,TCP,0,0,*,CLEAR,\n"), Ok(Command::ClearAll));
        assert_eq!(
            parse_command("*,1.2.3.4,TCP,0,0,*,DROP,p=5"),
            Err(RuleError::Wildcard)
        );
        assert_eq!(
            parse_command("1.2.3.4,5.6.7.8,TCP,0,0,*,ACTIVE,"),
            Err(RuleError::Wildcard)
        );
    }

    #[test]
    fn record_level_errors() {
        assert_eq!(
            parse_command("1.2.3.4,5.6.7.8,TCP,0,0,*,DIV"),
            Err(RuleError::FieldCount(7))
        );
        assert_eq!(
            parse_command("1.2.3.4,5.6.7.8,UDP,0,0,*,DIV,bpc=1"),
            Err(RuleError::UnsupportedProto("UDP".into()))
        );
        assert_eq!(
            parse_command("1.2.3.4,5.6.7.8,TCP,10,5,*,DIV,bpc=1"),
            Err(RuleError::StopBeforeStart { start: 10, stop: 5 })
        );
        assert!(matches!(
            parse_command("1.2.3.4,5.6.7.8,TCP,abc,0,*,DIV,bpc=1"),
            Err(RuleError::BadNumber { field: "start", .. })
        ));
        assert!(matches!(
            parse_command("1.2.3.4,5.6.7.8,TCP,0,0,*,FLOOD,"),
            Err(RuleError::UnknownAction(_))
        ));
        assert!(matches!(
            parse_command("1.2.3.4,5.6.7.8,TCP,0,0,STATE_NOPE,DIV,bpc=1"),
            Err(RuleError::BadState(_))
        ));
    }

    #[test]
    fn argument_errors() {
        assert_eq!(
            parse_command("1.2.3.4,5.6.7.8,TCP,0,0,*,DIV,"),
            Err(RuleError::MissingArg {
                action: "DIV",
                key: "bpc"
            })
        );
        assert!(matches!(
            parse_command("1.2.3.4,5.6.7.8,TCP,0,0,*,DIV,bpc=0"),
            Err(RuleError::BadArg { key: "bpc", .. })
        ));
        assert!(matches!(
            parse_command("1.2.3.4,5.6.7.8,TCP,0,0,*,BURST,num=0"),
            Err(RuleError::BadArg { key: "num", .. })
        ));
        assert!(matches!(
            parse_command("1.2.3.4,5.6.7.8,TCP,0,0,*,PREACK,amt=1&method=9"),
            Err(RuleError::BadArg { key: "method", .. })
        ));
        assert!(matches!(
            parse_command("1.2.3.4,5.6.7.8,TCP,0,0,*,DUP,num"),
            Err(RuleError::MalformedArg(_))
        ));
    }

    #[test]
    fn connection_commands() {
        let op = |line: &str| match parse_command(line) {
            Ok(Command::Connection { op, .. }) => op,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(op("1.2.3.4,5.6.7.8,TCP,0,0,*,PRINT,on=1"), ConnOp::Print(true));
        assert_eq!(op("1.2.3.4,5.6.7.8,TCP,0,0,*,6,on=0"), ConnOp::Print(false));
        assert_eq!(op("1.2.3.4,5.6.7.8,TCP,0,0,*,CLEAR,"), ConnOp::Clear);
        assert_eq!(op("1.2.3.4,5.6.7.8,TCP,0,0,*,TIME,"), ConnOp::Time);
        assert_eq!(
            op("1.2.3.4,5.6.7.8,TCP,0,0,STATE_RTO,STATE,"),
            ConnOp::State(ProtocolState::Rto)
        );
        assert!(matches!(
            parse_command("1.2.3.4,5.6.7.8,TCP,0,0,*,STATE,"),
            Err(RuleError::BadState(_))
        ));
    }

    #[test]
    fn inject_with_static_addresses() {
        let rule = install(
            "1.2.3.4,5.6.7.8,TCP,0,0,*,INJECT,\
             mac_src=02:00:00:00:00:0a&mac_dst=02:00:00:00:00:0b&src_port=1000&dst_port=80\
             &type=16&win=512&seq=1&ack=2&freq=100&dir=2&method=ABS&num=5",
        );
        let Action::Inject(job) = rule.action else {
            panic!("expected inject");
        };
        let addr = job.addressing.unwrap();
        assert_eq!(addr.mac_src, MacAddr([2, 0, 0, 0, 0, 0x0a]));
        assert_eq!(addr.ip_dst, Ipv4Addr::new(5, 6, 7, 8));
        assert_eq!((addr.port_src, addr.port_dst), (1000, 80));
        assert_eq!(job.dir, Direction::Backward);
        assert_eq!(job.method, SeqAckMethod::Absolute);
        assert_eq!((job.flags, job.window, job.seq, job.ack), (16, 512, 1, 2));
        assert_eq!(job.freq_ms, 100);
        assert_eq!(job.max_packets, Some(5));
    }

    #[test]
    fn inject_needs_addresses_when_starting_at_zero() {
        assert_eq!(
            parse_command("1.2.3.4,5.6.7.8,TCP,0,0,*,INJECT,dir=1&freq=10"),
            Err(RuleError::InjectWithoutAddresses)
        );
        let rule = install("1.2.3.4,5.6.7.8,TCP,3,0,*,INJECT,dir=1&freq=10&method=REL");
        let Action::Inject(job) = rule.action else {
            panic!("expected inject");
        };
        assert!(job.addressing.is_none());
        assert_eq!(job.method, SeqAckMethod::Relative);
        assert_eq!(job.dir, Direction::Forward);
        assert!(matches!(
            parse_command("1.2.3.4,5.6.7.8,TCP,3,0,*,INJECT,dir=3&freq=10"),
            Err(RuleError::BadArg { key: "dir", .. })
        ));
        assert!(matches!(
            parse_command("1.2.3.4,5.6.7.8,TCP,3,0,*,INJECT,dir=1&freq=10&mac_src=zz"),
            Err(RuleError::BadArg { key: "mac_src", .. })
        ));
    }

    #[test]
    fn inject_needs_a_nonzero_period() {
        assert_eq!(
            parse_command("1.2.3.4,5.6.7.8,TCP,1,0,*,INJECT,dir=1&type=16"),
            Err(RuleError::MissingArg {
                action: "INJECT",
                key: "freq",
            })
        );
        assert!(matches!(
            parse_command("1.2.3.4,5.6.7.8,TCP,1,0,*,INJECT,dir=1&freq=0"),
            Err(RuleError::BadArg { key: "freq", .. })
        ));
        assert!(matches!(
            parse_command("1.2.3.4,5.6.7.8,TCP,1,0,*,INJECT,dir=1&freq=-5"),
            Err(RuleError::BadArg { key: "freq", .. })
        ));
    }

    #[test]
    fn helpers() {
        assert_eq!(parse_int("0x1F"), Some(31));
        assert_eq!(parse_int("-12"), Some(-12));
        assert_eq!(parse_int("--1"), None);
        assert_eq!(parse_int(""), None);
        assert_eq!(parse_mac("1:2:3:4:5:6"), Some(MacAddr([1, 2, 3, 4, 5, 6])));
        assert_eq!(parse_mac("1:2:3:4:5"), None);
        assert_eq!(parse_mac("1:2:3:4:5:6:7"), None);
        assert_eq!(parse_addr("localhost"), Ok(Addr::Ip(Ipv4Addr::LOCALHOST)));
    }
}
