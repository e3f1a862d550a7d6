use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;

use crate::error::RuleError;

/// Congestion-control phase a connection is believed to be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolState {
    #[default]
    Unknown = 0,
    Init = 1,
    SlowStart = 2,
    CongAvoid = 3,
    FastRecov = 4,
    Rto = 5,
    End = 6,
}

const ANY_STATE_CODE: u8 = 7;

impl ProtocolState {
    pub fn from_code(code: u8) -> Option<Self> {
        let state = match code {
            0 => ProtocolState::Unknown,
            1 => ProtocolState::Init,
            2 => ProtocolState::SlowStart,
            3 => ProtocolState::CongAvoid,
            4 => ProtocolState::FastRecov,
            5 => ProtocolState::Rto,
            6 => ProtocolState::End,
            _ => return None,
        };
        Some(state)
    }

    pub fn name(self) -> &'static str {
        match self {
            ProtocolState::Unknown => "UNKNOWN",
            ProtocolState::Init => "INIT",
            ProtocolState::SlowStart => "SLOW_START",
            ProtocolState::CongAvoid => "CONG_AVOID",
            ProtocolState::FastRecov => "FAST_RECOV",
            ProtocolState::Rto => "RTO",
            ProtocolState::End => "END",
        }
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// State condition of a rule window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateFilter {
    #[default]
    Any,
    Exactly(ProtocolState),
}

impl StateFilter {
    pub fn matches(self, state: ProtocolState) -> bool {
        match self {
            StateFilter::Any => true,
            StateFilter::Exactly(want) => want == state,
        }
    }
}

lazy_static! {
    // 规则语言里的状态别名
    static ref STATE_ALIASES: HashMap<&'static str, StateFilter> = {
        let mut m = HashMap::new();
        m.insert("*", StateFilter::Any);
        m.insert("STATE_ANY", StateFilter::Any);
        for code in 0..ANY_STATE_CODE {
            if let Some(state) = ProtocolState::from_code(code) {
                m.insert(alias_of(state), StateFilter::Exactly(state));
            }
        }
        m
    };
}

fn alias_of(state: ProtocolState) -> &'static str {
    match state {
        ProtocolState::Unknown => "STATE_UNKNOWN",
        ProtocolState::Init => "STATE_INIT",
        ProtocolState::SlowStart => "STATE_SLOW_START",
        ProtocolState::CongAvoid => "STATE_CONG_AVOID",
        ProtocolState::FastRecov => "STATE_FAST_RECOV",
        ProtocolState::Rto => "STATE_RTO",
        ProtocolState::End => "STATE_END",
    }
}

impl FromStr for StateFilter {
    type Err = RuleError;

    /// Accepts `*`, the `STATE_*` aliases (case-insensitive) and the numeric
    /// codes 0-7, where 7 means any state.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(code) = s.parse::<u8>() {
            if code == ANY_STATE_CODE {
                return Ok(StateFilter::Any);
            }
            return ProtocolState::from_code(code)
                .map(StateFilter::Exactly)
                .ok_or_else(|| RuleError::BadState(s.to_string()));
        }
        STATE_ALIASES
            .get(s.to_ascii_uppercase().as_str())
            .copied()
            .ok_or_else(|| RuleError::BadState(s.to_string()))
    }
}
