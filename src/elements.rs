//! Map primitives as delivered by the parsers
//!
//! Coordinates are fixed-point integers at 1e-7 degrees so that the PBF
//! and XML readers produce identical values for identical data.

use std::collections::BTreeMap;

/// Fixed-point scale: 1e-7 degrees per unit
pub const COORDINATE_SCALE: i32 = 10_000_000;

/// Tag set of a primitive, keyed by tag name
///
/// Backed by a `BTreeMap` so iteration order (and anything derived from
/// it) does not depend on hashing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags(BTreeMap<String, String>);

impl Tags {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// True if `key` is present with exactly `value`
    pub fn is(&self, key: &str, value: &str) -> bool {
        self.get(key) == Some(value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Tags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNode {
    pub id: i64,
    pub lat: i32,
    pub lon: i32,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawWay {
    pub id: i64,
    pub nodes: Vec<i64>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Node = 0,
    Way = 1,
    Relation = 2,
}

impl MemberKind {
    /// Parse the `type` attribute of an XML `<member>`
    pub fn from_xml(value: &str) -> Option<Self> {
        match value {
            "node" => Some(MemberKind::Node),
            "way" => Some(MemberKind::Way),
            "relation" => Some(MemberKind::Relation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub role: String,
    pub kind: MemberKind,
    pub ref_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRelation {
    pub id: i64,
    pub members: Vec<Member>,
    pub tags: Tags,
}

/// Parse a decimal degree string straight into 1e-7 fixed point
///
/// Digits beyond the seventh decimal are rounded half away from zero.
/// Returns `None` for anything that is not a plain decimal number or that
/// falls outside ±180 degrees.
pub fn parse_fixed_coordinate(s: &str) -> Option<i32> {
    let s = s.trim();
    let (negative, digits) = match s.as_bytes().first()? {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };

    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit())
        || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    let mut value: i64 = 0;
    for b in int_part.bytes() {
        value = value.checked_mul(10)?.checked_add((b - b'0') as i64)?;
        if value > 180 {
            return None;
        }
    }

    let frac = frac_part.as_bytes();
    for i in 0..7 {
        let digit = frac.get(i).map_or(0, |b| (b - b'0') as i64);
        value = value * 10 + digit;
    }
    if frac.get(7).is_some_and(|b| *b >= b'5') {
        value += 1;
    }

    if value > 180 * COORDINATE_SCALE as i64 {
        return None;
    }
    Some(if negative { -value } else { value } as i32)
}

/// Fixed point to floating degrees
pub fn to_degrees(fixed: i32) -> f64 {
    fixed as f64 / COORDINATE_SCALE as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fixed_coordinate() {
        assert_eq!(parse_fixed_coordinate("50.8503"), Some(508_503_000));
        assert_eq!(parse_fixed_coordinate("-4.3517"), Some(-43_517_000));
        assert_eq!(parse_fixed_coordinate("0"), Some(0));
        assert_eq!(parse_fixed_coordinate("1"), Some(10_000_000));
        assert_eq!(parse_fixed_coordinate(".5"), Some(5_000_000));
        assert_eq!(parse_fixed_coordinate("180.0"), Some(1_800_000_000));
    }

    #[test]
    fn test_parse_fixed_coordinate_rounds_eighth_digit() {
        assert_eq!(parse_fixed_coordinate("0.00000005"), Some(1));
        assert_eq!(parse_fixed_coordinate("0.00000004"), Some(0));
        assert_eq!(parse_fixed_coordinate("-0.12345678"), Some(-1_234_568));
    }

    #[test]
    fn test_parse_fixed_coordinate_rejects_garbage() {
        assert_eq!(parse_fixed_coordinate(""), None);
        assert_eq!(parse_fixed_coordinate("-"), None);
        assert_eq!(parse_fixed_coordinate("."), None);
        assert_eq!(parse_fixed_coordinate("12a.5"), None);
        assert_eq!(parse_fixed_coordinate("1e5"), None);
        assert_eq!(parse_fixed_coordinate("181"), None);
        assert_eq!(parse_fixed_coordinate("99999999999999999999"), None);
    }

    #[test]
    fn test_tags_lookup() {
        let tags: Tags = [("highway", "primary"), ("name", "Wetstraat")]
            .into_iter()
            .collect();
        assert_eq!(tags.get("highway"), Some("primary"));
        assert!(tags.is("name", "Wetstraat"));
        assert_eq!(tags.get("oneway"), None);
        assert_eq!(tags.len(), 2);
    }
}
