use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// System-wide sequence of serial-unit codes.
///
/// Every received unit gets one, whether or not its item type tracks a
/// manufacturer serial. Codes look like `SU-20240301-000042`; the numeric
/// part is monotonic across days so codes never repeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialUnitSequence {
    prefix: String,
    last: u64,
}

impl SerialUnitSequence {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            last: 0,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Switch the prefix of future codes. The counter carries on, so codes
    /// stay unique across prefixes.
    pub fn set_prefix(&mut self, prefix: &str) {
        if self.prefix != prefix {
            self.prefix = prefix.to_string();
        }
    }

    pub fn next_code(&mut self, at: DateTime<Utc>) -> String {
        self.last += 1;
        format!("{}-{}-{:06}", self.prefix, at.format("%Y%m%d"), self.last)
    }

    /// Draw `n` consecutive codes.
    pub fn take(&mut self, n: usize, at: DateTime<Utc>) -> Vec<String> {
        (0..n).map(|_| self.next_code(at)).collect()
    }
}

impl Default for SerialUnitSequence {
    fn default() -> Self {
        Self::new("SU")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn codes_carry_date_and_monotonic_counter() {
        let mut seq = SerialUnitSequence::default();
        let day1 = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap();

        assert_eq!(seq.take(2, day1), vec!["SU-20240301-000001", "SU-20240301-000002"]);
        assert_eq!(seq.next_code(day2), "SU-20240302-000003");
    }

    #[test]
    fn new_prefix_keeps_counting() {
        let mut seq = SerialUnitSequence::default();
        let day = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let _ = seq.next_code(day);
        seq.set_prefix("UNIT");
        assert_eq!(seq.next_code(day), "UNIT-20240301-000002");
    }
}
