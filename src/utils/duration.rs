use std::{fmt::Display, ops::Deref, str::FromStr};

use anyhow::{anyhow, bail};
use chrono::TimeDelta;

/// Relative duration written in the compact form used by duration corrections, for example
/// `+1m5s`, `-25s`, `1.5h` or `300ms`. A sign is optional, a bare `0` is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SignedDuration(TimeDelta);

impl Display for SignedDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Nanoseconds per unit suffix.
fn unit_scale(unit: &str) -> Option<i128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(1_000),
        "ms" => Some(1_000_000),
        "s" => Some(1_000_000_000),
        "m" => Some(60 * 1_000_000_000),
        "h" => Some(3_600 * 1_000_000_000),
        _ => None,
    }
}

fn is_number_char(c: char) -> bool {
    c.is_ascii_digit() || c == '.'
}

/// Converts a single `<number><unit>` component into nanoseconds without going through floats.
fn component_nanos(number: &str, scale: i128) -> Option<i128> {
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    let whole = if whole.is_empty() { 0 } else { whole.parse::<i128>().ok()? };
    // Digits beyond nanosecond precision don't contribute.
    let fraction = &fraction[..fraction.len().min(18)];
    let fraction_nanos = if fraction.is_empty() {
        0
    } else {
        let digits = fraction.parse::<i128>().ok()?;
        digits * scale / 10i128.pow(fraction.len() as u32)
    };
    whole.checked_mul(scale)?.checked_add(fraction_nanos)
}

impl FromStr for SignedDuration {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (negative, mut rest) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };

        if rest == "0" {
            return Ok(SignedDuration(TimeDelta::zero()));
        }
        if rest.is_empty() {
            bail!("Can't parse {s:?} into duration");
        }

        let mut total: i128 = 0;
        while !rest.is_empty() {
            let number_end = rest.find(|c: char| !is_number_char(c)).unwrap_or(rest.len());
            let (number, tail) = rest.split_at(number_end);
            let unit_end = tail.find(is_number_char).unwrap_or(tail.len());
            let (unit, tail) = tail.split_at(unit_end);

            if unit.is_empty() {
                bail!("Missing unit in duration {s:?}");
            }
            let scale = unit_scale(unit).ok_or_else(|| anyhow!("Unknown unit {unit:?} in duration {s:?}"))?;
            let nanos = component_nanos(number, scale)
                .ok_or_else(|| anyhow!("Can't parse {s:?} into duration"))?;
            total = total
                .checked_add(nanos)
                .ok_or_else(|| anyhow!("Duration {s:?} is out of range"))?;
            rest = tail;
        }

        let total = if negative { -total } else { total };
        let nanos = i64::try_from(total).map_err(|_| anyhow!("Duration {s:?} is out of range"))?;
        Ok(SignedDuration(TimeDelta::nanoseconds(nanos)))
    }
}

impl Deref for SignedDuration {
    type Target = TimeDelta;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
