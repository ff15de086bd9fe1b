//! Weekday names at the storage boundary.
//!
//! Core logic only sees `chrono::Weekday`. Stored records spell weekdays two
//! ways: business hours use capitalised names (`"Monday"`), staff
//! availability keys are lowercase (`"monday"`). This table is the single
//! place that knows both spellings.

use chrono::Weekday;

const NAMES: [(Weekday, &str, &str); 7] = [
    (Weekday::Mon, "Monday", "monday"),
    (Weekday::Tue, "Tuesday", "tuesday"),
    (Weekday::Wed, "Wednesday", "wednesday"),
    (Weekday::Thu, "Thursday", "thursday"),
    (Weekday::Fri, "Friday", "friday"),
    (Weekday::Sat, "Saturday", "saturday"),
    (Weekday::Sun, "Sunday", "sunday"),
];

pub fn capitalized(day: Weekday) -> &'static str {
    NAMES[day.num_days_from_monday() as usize].1
}

pub fn lowercase(day: Weekday) -> &'static str {
    NAMES[day.num_days_from_monday() as usize].2
}

pub fn from_capitalized(name: &str) -> Option<Weekday> {
    NAMES.iter().find(|(_, cap, _)| *cap == name).map(|(d, _, _)| *d)
}

pub fn from_lowercase(name: &str) -> Option<Weekday> {
    NAMES.iter().find(|(_, _, low)| *low == name).map(|(d, _, _)| *d)
}

/// Serde adapter: a single `Weekday` field spelled `"Monday"`.
pub mod capitalized_name {
    use chrono::Weekday;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(day: &Weekday, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(super::capitalized(*day))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Weekday, D::Error> {
        let raw = String::deserialize(d)?;
        super::from_capitalized(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown weekday {raw:?}")))
    }
}

/// Serde adapter: a map keyed by lowercase weekday names.
pub mod lowercase_keys {
    use std::collections::HashMap;

    use chrono::Weekday;
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, V>(map: &HashMap<Weekday, V>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        V: Serialize,
    {
        // Stable Monday-first order keeps stored output deterministic.
        let mut days: Vec<_> = map.iter().collect();
        days.sort_by_key(|(d, _)| d.num_days_from_monday());
        let mut out = s.serialize_map(Some(days.len()))?;
        for (day, value) in days {
            out.serialize_entry(super::lowercase(*day), value)?;
        }
        out.end()
    }

    pub fn deserialize<'de, D, V>(d: D) -> Result<HashMap<Weekday, V>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        let raw: HashMap<String, V> = HashMap::deserialize(d)?;
        raw.into_iter()
            .map(|(name, value)| {
                super::from_lowercase(&name)
                    .map(|day| (day, value))
                    .ok_or_else(|| serde::de::Error::custom(format!("unknown weekday key {name:?}")))
            })
            .collect()
    }
}
