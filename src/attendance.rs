//! Course attendance: a per-session bit vector checked against a quota.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ParseMaskError;
use crate::models::AttendanceRecord;

const WORD_BITS: usize = 64;
// Counts are compared against `quota * total`, which is rarely exact for
// fractions such as 2/3.
const QUOTA_TOLERANCE: f64 = 1e-9;

/// Arbitrary-width attendance bit vector. Bit `i` set means session `i + 1`
/// was attended. Trailing zero words are trimmed so equal masks compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttendanceMask {
    words: Vec<u64>,
}

impl AttendanceMask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_words(words: Vec<u64>) -> Self {
        let mut mask = Self { words };
        mask.trim();
        mask
    }

    /// Mask with the given 1-based sessions marked attended. Session 0 is
    /// ignored.
    pub fn from_sessions<I: IntoIterator<Item = u32>>(sessions: I) -> Self {
        let mut mask = Self::new();
        for session in sessions {
            mask.set(session, true);
        }
        mask
    }

    pub fn is_attended(&self, session: u32) -> bool {
        let Some(bit) = bit_index(session) else {
            return false;
        };
        self.words
            .get(bit / WORD_BITS)
            .is_some_and(|word| word & (1u64 << (bit % WORD_BITS)) != 0)
    }

    pub fn set(&mut self, session: u32, attended: bool) {
        let Some(bit) = bit_index(session) else {
            return;
        };
        let word = bit / WORD_BITS;
        if attended {
            if self.words.len() <= word {
                self.words.resize(word + 1, 0);
            }
            self.words[word] |= 1u64 << (bit % WORD_BITS);
        } else if let Some(value) = self.words.get_mut(word) {
            *value &= !(1u64 << (bit % WORD_BITS));
            self.trim();
        }
    }

    /// Flips a session and returns its new state.
    pub fn toggle(&mut self, session: u32) -> bool {
        let attended = !self.is_attended(session);
        self.set(session, attended);
        attended
    }

    /// Set bits among the first `total_classes` positions.
    pub fn count_within(&self, total_classes: u32) -> u32 {
        let limit = total_classes as usize;
        let mut count = 0;
        for (index, word) in self.words.iter().enumerate() {
            let start = index * WORD_BITS;
            if start >= limit {
                break;
            }
            let valid = limit - start;
            let word = if valid >= WORD_BITS {
                *word
            } else {
                word & ((1u64 << valid) - 1)
            };
            count += word.count_ones();
        }
        count
    }

    /// Attended sessions (1-based) up to `total_classes`.
    pub fn attended_sessions(&self, total_classes: u32) -> Vec<u32> {
        (1..=total_classes)
            .filter(|&session| self.is_attended(session))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    fn trim(&mut self) {
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }
}

fn bit_index(session: u32) -> Option<usize> {
    session.checked_sub(1).map(|bit| bit as usize)
}

/// Hexadecimal big-integer form, most significant digit first.
impl fmt::Display for AttendanceMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some((last, rest)) = self.words.split_last() else {
            return f.write_str("0x0");
        };
        write!(f, "0x{last:x}")?;
        for word in rest.iter().rev() {
            write!(f, "{word:016x}")?;
        }
        Ok(())
    }
}

impl FromStr for AttendanceMask {
    type Err = ParseMaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed)
            .replace('_', "");
        if digits.is_empty() {
            return Err(ParseMaskError(s.to_string()));
        }

        let mut words = Vec::with_capacity(digits.len() / 16 + 1);
        let mut word = 0u64;
        let mut shift = 0;
        for ch in digits.chars().rev() {
            let nibble = ch
                .to_digit(16)
                .ok_or_else(|| ParseMaskError(s.to_string()))? as u64;
            word |= nibble << shift;
            shift += 4;
            if shift == WORD_BITS {
                words.push(word);
                word = 0;
                shift = 0;
            }
        }
        if shift > 0 {
            words.push(word);
        }
        Ok(Self::from_words(words))
    }
}

impl Serialize for AttendanceMask {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AttendanceMask {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// A write against a single session of a course's attendance record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceChange {
    Present,
    Absent,
    Toggle,
}

impl AttendanceChange {
    /// Applies the change and returns whether the session is now attended.
    pub fn apply(self, mask: &mut AttendanceMask, session: u32) -> bool {
        match self {
            AttendanceChange::Present => {
                mask.set(session, true);
                true
            }
            AttendanceChange::Absent => {
                mask.set(session, false);
                false
            }
            AttendanceChange::Toggle => mask.toggle(session),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceStatus {
    pub current_attended: u32,
    pub total_classes: u32,
    pub attendance_rate: f64,
    /// Rate needed to stay safe, in percent.
    pub attendance_threshold: f64,
    /// Fewest attended sessions that keep the course safe.
    pub sessions_required: u32,
    pub is_attendance_safe: bool,
    pub is_attendance_fail: bool,
}

pub fn evaluate(record: &AttendanceRecord, quota: f64) -> AttendanceStatus {
    let total = record.total_classes;
    let current_attended = record.mask.count_within(total);
    let attendance_rate = if total == 0 {
        0.0
    } else {
        100.0 * current_attended as f64 / total as f64
    };
    let meets_quota = |attended: u32| attended as f64 + QUOTA_TOLERANCE >= quota * total as f64;
    let is_attendance_safe = total == 0 || meets_quota(current_attended);
    let sessions_required = (0..=total).find(|&k| meets_quota(k)).unwrap_or(total);

    AttendanceStatus {
        current_attended,
        total_classes: total,
        attendance_rate,
        attendance_threshold: 100.0 * quota,
        sessions_required,
        is_attendance_safe,
        is_attendance_fail: !is_attendance_safe,
    }
}
