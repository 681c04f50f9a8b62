//! Level range expressions: `<N`, `<=N`, `>N`, `>=N`, `=N`, `!N`, bare `N`.

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

/// One comparison against a member's level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelRange {
    pub op: LevelOp,
    pub value: i64,
}

impl LevelRange {
    /// Bare numbers mean "at least".
    pub fn at_least(value: i64) -> Self {
        Self {
            op: LevelOp::Ge,
            value,
        }
    }

    pub fn matches(&self, level: i64) -> bool {
        match self.op {
            LevelOp::Lt => level < self.value,
            LevelOp::Le => level <= self.value,
            LevelOp::Gt => level > self.value,
            LevelOp::Ge => level >= self.value,
            LevelOp::Eq => level == self.value,
            LevelOp::Ne => level != self.value,
        }
    }
}

impl FromStr for LevelRange {
    type Err = ConfigValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        // Two-character operators first so "<=" is not read as "<".
        let (op, rest) = if let Some(rest) = s.strip_prefix("<=") {
            (LevelOp::Le, rest)
        } else if let Some(rest) = s.strip_prefix(">=") {
            (LevelOp::Ge, rest)
        } else if let Some(rest) = s.strip_prefix('<') {
            (LevelOp::Lt, rest)
        } else if let Some(rest) = s.strip_prefix('>') {
            (LevelOp::Gt, rest)
        } else if let Some(rest) = s.strip_prefix('=') {
            (LevelOp::Eq, rest)
        } else if let Some(rest) = s.strip_prefix('!') {
            (LevelOp::Ne, rest)
        } else {
            (LevelOp::Ge, s)
        };

        let value = rest
            .trim()
            .parse::<i64>()
            .map_err(|_| ConfigValidationError::new(format!("invalid level range '{s}'")))?;
        Ok(Self { op, value })
    }
}

impl fmt::Display for LevelRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            LevelOp::Lt => "<",
            LevelOp::Le => "<=",
            LevelOp::Gt => ">",
            LevelOp::Ge => ">=",
            LevelOp::Eq => "=",
            LevelOp::Ne => "!",
        };
        write!(f, "{op}{}", self.value)
    }
}
