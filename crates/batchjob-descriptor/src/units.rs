//! Module for unit representations.
//!
//! Memory quantities follow the conventions of `sbatch --mem`: a bare single
//! letter suffix (`K`, `M`, `G`, `T`) is a power of two, while the explicit
//! `KB`/`KiB` family keeps its usual meaning.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bytesize::ByteSize;
use serde::Deserialize;
use serde::Serialize;

/// The number of seconds in a minute.
const SECS_PER_MINUTE: u64 = 60;

/// The number of seconds in an hour.
const SECS_PER_HOUR: u64 = 60 * SECS_PER_MINUTE;

/// The number of seconds in a day.
const SECS_PER_DAY: u64 = 24 * SECS_PER_HOUR;

/// Represents a storage unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StorageUnit {
    /// The unit is in bytes.
    #[default]
    Bytes,
    /// The unit is in kilobytes (10^3 bytes).
    Kilobytes,
    /// The unit is in megabytes (10^6 bytes).
    Megabytes,
    /// The unit is in gigabytes (10^9 bytes).
    Gigabytes,
    /// The unit is in terabytes (10^12 bytes).
    Terabytes,
    /// The unit is in kibibytes (2^10 bytes).
    Kibibytes,
    /// The unit is in mebibytes (2^20 bytes).
    Mebibytes,
    /// The unit is in gibibytes (2^30 bytes).
    Gibibytes,
    /// The unit is in tebibytes (2^40 bytes).
    Tebibytes,
}

impl StorageUnit {
    /// Converts the given number of units into the corresponding number of
    /// bytes.
    ///
    /// Returns `None` on overflow.
    pub fn bytes(&self, units: u64) -> Option<u64> {
        match self {
            Self::Bytes => Some(units),
            Self::Kilobytes => units.checked_mul(1000),
            Self::Megabytes => units.checked_mul(1000000),
            Self::Gigabytes => units.checked_mul(1000000000),
            Self::Terabytes => units.checked_mul(1000000000000),
            Self::Kibibytes => units.checked_mul(1024),
            Self::Mebibytes => units.checked_mul(1048576),
            Self::Gibibytes => units.checked_mul(1073741824),
            Self::Tebibytes => units.checked_mul(1099511627776),
        }
    }

    /// Gets the canonical suffix for the unit.
    ///
    /// Binary units use the single letter form understood by `sbatch`.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Bytes => "B",
            Self::Kilobytes => "KB",
            Self::Megabytes => "MB",
            Self::Gigabytes => "GB",
            Self::Terabytes => "TB",
            Self::Kibibytes => "K",
            Self::Mebibytes => "M",
            Self::Gibibytes => "G",
            Self::Tebibytes => "T",
        }
    }
}

impl FromStr for StorageUnit {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "B" => Ok(Self::Bytes),
            "KB" => Ok(Self::Kilobytes),
            "MB" => Ok(Self::Megabytes),
            "GB" => Ok(Self::Gigabytes),
            "TB" => Ok(Self::Terabytes),
            "K" | "KiB" | "Ki" => Ok(Self::Kibibytes),
            "M" | "MiB" | "Mi" => Ok(Self::Mebibytes),
            "G" | "GiB" | "Gi" => Ok(Self::Gibibytes),
            "T" | "TiB" | "Ti" => Ok(Self::Tebibytes),
            _ => Err(()),
        }
    }
}

/// A quantity of memory reserved for a job, such as `128G`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MemoryLimit {
    /// The number of units.
    amount: u64,
    /// The unit of `amount`.
    unit: StorageUnit,
    /// The total number of bytes.
    bytes: u64,
}

impl MemoryLimit {
    /// Creates a new memory limit.
    ///
    /// Returns `None` if the byte count overflows.
    pub fn new(amount: u64, unit: StorageUnit) -> Option<Self> {
        Some(Self {
            amount,
            unit,
            bytes: unit.bytes(amount)?,
        })
    }

    /// Gets the number of units.
    pub fn amount(&self) -> u64 {
        self.amount
    }

    /// Gets the unit.
    pub fn unit(&self) -> StorageUnit {
        self.unit
    }

    /// Gets the total size of the limit.
    pub fn size(&self) -> ByteSize {
        ByteSize::b(self.bytes)
    }

    /// Gets the limit in whole mebibytes, rounding up.
    pub fn mebibytes(&self) -> u64 {
        self.bytes.div_ceil(bytesize::MIB)
    }
}

impl FromStr for MemoryLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let index = s
            .chars()
            .position(|c| c.is_ascii_alphabetic())
            .ok_or_else(|| "expected a unit suffix such as `G` or `MiB`".to_string())?;
        let (n, unit) = s.split_at(index);
        let amount = n
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("`{n}` is not a whole number", n = n.trim()))?;
        let unit = unit
            .trim()
            .parse::<StorageUnit>()
            .map_err(|_| format!("unknown unit `{unit}`", unit = unit.trim()))?;

        if amount == 0 {
            return Err("memory cannot be zero".to_string());
        }

        Self::new(amount, unit).ok_or_else(|| "memory exceeds the maximum size".to_string())
    }
}

impl fmt::Display for MemoryLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{amount}{suffix}", amount = self.amount, suffix = self.unit.suffix())
    }
}

impl TryFrom<String> for MemoryLimit {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MemoryLimit> for String {
    fn from(value: MemoryLimit) -> Self {
        value.to_string()
    }
}

/// An upper bound on a job's wall-clock execution time.
///
/// Parsed from the `sbatch` forms `D-HH:MM:SS`, `D-HH:MM`, `D-HH` and
/// `HH:MM:SS`; always displayed as `D-HH:MM:SS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeLimit(Duration);

impl TimeLimit {
    /// Creates a time limit from a whole number of seconds.
    ///
    /// Returns `None` for a zero duration.
    pub fn from_secs(secs: u64) -> Option<Self> {
        (secs > 0).then(|| Self(Duration::from_secs(secs)))
    }

    /// Gets the limit as a duration.
    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

/// Parses a single numeric component of a time limit.
fn component(s: &str, what: &str, max: Option<u64>) -> Result<u64, String> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("{what} component `{s}` is not a whole number"));
    }

    let value = s
        .parse::<u64>()
        .map_err(|_| format!("{what} component `{s}` is too large"))?;
    if let Some(max) = max
        && value >= max
    {
        return Err(format!("{what} component `{s}` must be less than {max}"));
    }

    Ok(value)
}

impl FromStr for TimeLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let secs = match s.split_once('-') {
            Some((days, rest)) => {
                let days = component(days, "day", None)?;
                let parts: Vec<_> = rest.split(':').collect();
                if parts.len() > 3 {
                    return Err("expected `D-HH:MM:SS`".to_string());
                }

                let hours = component(parts[0], "hour", Some(24))?;
                let minutes = parts
                    .get(1)
                    .map(|m| component(m, "minute", Some(60)))
                    .transpose()?
                    .unwrap_or(0);
                let seconds = parts
                    .get(2)
                    .map(|s| component(s, "second", Some(60)))
                    .transpose()?
                    .unwrap_or(0);

                days.checked_mul(SECS_PER_DAY)
                    .and_then(|d| d.checked_add(hours * SECS_PER_HOUR))
                    .and_then(|t| t.checked_add(minutes * SECS_PER_MINUTE + seconds))
            }
            None => {
                let parts: Vec<_> = s.split(':').collect();
                let [hours, minutes, seconds] = parts.as_slice() else {
                    return Err("expected `D-HH:MM:SS` or `HH:MM:SS`".to_string());
                };

                let hours = component(hours, "hour", None)?;
                let minutes = component(minutes, "minute", Some(60))?;
                let seconds = component(seconds, "second", Some(60))?;
                hours
                    .checked_mul(SECS_PER_HOUR)
                    .and_then(|t| t.checked_add(minutes * SECS_PER_MINUTE + seconds))
            }
        }
        .ok_or_else(|| "time limit is too large".to_string())?;

        Self::from_secs(secs).ok_or_else(|| "time limit must be greater than zero".to_string())
    }
}

impl fmt::Display for TimeLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        write!(
            f,
            "{days}-{hours:02}:{minutes:02}:{seconds:02}",
            days = secs / SECS_PER_DAY,
            hours = (secs % SECS_PER_DAY) / SECS_PER_HOUR,
            minutes = (secs % SECS_PER_HOUR) / SECS_PER_MINUTE,
            seconds = secs % SECS_PER_MINUTE
        )
    }
}

impl TryFrom<String> for TimeLimit {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeLimit> for String {
    fn from(value: TimeLimit) -> Self {
        value.to_string()
    }
}
