//! Speech rate as a signed percentage ("+35%", "-10%", "0%").

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::SpeechError;

const MIN_PERCENT: i32 = -50;
const MAX_PERCENT: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rate(i32);

impl Rate {
    pub fn percent(pct: i32) -> Self {
        Self(pct)
    }

    /// Multiplier sent to the speech service: "+35%" → 1.35.
    pub fn speed(self) -> f32 {
        1.0 + self.0 as f32 / 100.0
    }

    /// Adjust by `delta` percent, clamped to [-50%, +100%].
    pub fn adjusted(self, delta: i32) -> Self {
        Self(self.0.saturating_add(delta).clamp(MIN_PERCENT, MAX_PERCENT))
    }
}

impl FromStr for Rate {
    type Err = SpeechError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed.strip_suffix('%').unwrap_or(trimmed).trim();
        let digits = digits.strip_prefix('+').unwrap_or(digits);
        let pct: i32 = digits
            .parse()
            .map_err(|_| SpeechError::InvalidRate(s.to_string()))?;
        if !(MIN_PERCENT..=MAX_PERCENT).contains(&pct) {
            return Err(SpeechError::InvalidRate(s.to_string()));
        }
        Ok(Self(pct))
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+}%", self.0)
    }
}

impl Serialize for Rate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Rate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_signed_percentages() {
        assert_eq!("+35%".parse::<Rate>().unwrap(), Rate::percent(35));
        assert_eq!("-10%".parse::<Rate>().unwrap(), Rate::percent(-10));
        assert_eq!("0%".parse::<Rate>().unwrap(), Rate::percent(0));
        assert_eq!(" 20 ".parse::<Rate>().unwrap(), Rate::percent(20));
    }

    #[test]
    fn rejects_garbage() {
        assert!("fast".parse::<Rate>().is_err());
        assert!("+%".parse::<Rate>().is_err());
        assert!("-100%".parse::<Rate>().is_err());
    }

    #[test]
    fn rejects_out_of_range() {
        assert!("+2147483647%".parse::<Rate>().is_err());
        assert!("+101%".parse::<Rate>().is_err());
        assert!("-51%".parse::<Rate>().is_err());
        assert_eq!("+100%".parse::<Rate>().unwrap(), Rate::percent(100));
        assert_eq!("-50%".parse::<Rate>().unwrap(), Rate::percent(-50));
    }

    #[test]
    fn adjustment_never_overflows() {
        assert_eq!(Rate::percent(i32::MAX).adjusted(5), Rate::percent(100));
        assert_eq!(Rate::percent(i32::MIN).adjusted(-5), Rate::percent(-50));
    }

    #[test]
    fn display_always_signed() {
        assert_eq!(Rate::percent(35).to_string(), "+35%");
        assert_eq!(Rate::percent(-5).to_string(), "-5%");
        assert_eq!(Rate::percent(0).to_string(), "+0%");
    }

    #[test]
    fn speed_factor() {
        assert!((Rate::percent(35).speed() - 1.35).abs() < 1e-6);
        assert!((Rate::percent(-50).speed() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn adjustment_is_clamped() {
        assert_eq!(Rate::percent(95).adjusted(10), Rate::percent(100));
        assert_eq!(Rate::percent(-45).adjusted(-10), Rate::percent(-50));
        assert_eq!(Rate::percent(35).adjusted(-5), Rate::percent(30));
    }

    #[test]
    fn serde_uses_string_form() {
        let json = serde_json::to_string(&Rate::percent(35)).unwrap();
        assert_eq!(json, "\"+35%\"");
        let back: Rate = serde_json::from_str("\"-20%\"").unwrap();
        assert_eq!(back, Rate::percent(-20));
    }
}
