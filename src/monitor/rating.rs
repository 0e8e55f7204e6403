use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Rating value that means "nothing to do".
pub const NO_ACTION_RATING: i32 = 0;

/// Returns the integer after the last occurrence of `marker` in `content`.
///
/// Whitespace between the marker and the digits is skipped. A trailing marker with no digits
/// after it does not hide an earlier, complete one.
pub fn parse_latest_rating(content: &str, marker: &str) -> Option<i32> {
    if marker.is_empty() {
        return None;
    }

    content.rmatch_indices(marker).find_map(|(index, _)| {
        let rest = content[index + marker.len()..].trim_start();
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        rest[..digits_end].parse().ok()
    })
}

/// Rating → recording name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingTable {
    entries: BTreeMap<i32, String>,
}

impl Default for RatingTable {
    fn default() -> Self {
        Self::from_entries(
            [
                (10, "10_shake"),
                (11, "11_angry"),
                (20, "curious"),
                (21, "21_standup"),
                (30, "30_nod1"),
                (31, "31_wiggle"),
                (40, "excited"),
                (41, "41_courage"),
                (50, "happy_wiggle"),
                (51, "51_scanning"),
            ]
            .into_iter()
            .map(|(rating, action)| (rating, action.to_string()))
            .collect(),
        )
    }
}

impl RatingTable {
    pub fn from_entries(entries: BTreeMap<i32, String>) -> Self {
        Self { entries }
    }

    pub fn action_for(&self, rating: i32) -> Option<&str> {
        self.entries.get(&rating).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatPolicy {
    /// Dispatch on every tick, even if the rating has not changed.
    #[default]
    Retrigger,
    /// Dispatch only when the rating differs from the last dispatched one.
    Debounce,
}
