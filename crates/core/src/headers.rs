//! Ordered, multi-valued header map with case-insensitive names.
//!
//! Names keep the casing they arrived with so they can be written to the
//! target exactly as the caller supplied them.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value, keeping any existing values for the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace every value for `name` with a single value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Remove all values for `name`. Returns whether anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before != self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply `overrides` on top of these headers: every name present in
    /// `overrides` replaces the existing values, other names are kept.
    pub fn merge(&mut self, overrides: &Headers) {
        for (name, _) in &overrides.entries {
            self.remove(name);
        }
        self.entries.extend(overrides.entries.iter().cloned());
    }

    /// Names in first-seen order, one per case-insensitive group.
    fn grouped(&self) -> Vec<(&str, Vec<&str>)> {
        let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
        for (name, value) in &self.entries {
            match groups.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
                Some((_, values)) => values.push(value),
                None => groups.push((name, vec![value])),
            }
        }
        groups
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let groups = self.grouped();
        let mut map = serializer.serialize_map(Some(groups.len()))?;
        for (name, values) in groups {
            if let [single] = values.as_slice() {
                map.serialize_entry(name, single)?;
            } else {
                map.serialize_entry(name, &values)?;
            }
        }
        map.end()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HeaderValueRepr {
    One(String),
    Many(Vec<String>),
    Number(serde_json::Number),
    Bool(bool),
    Null(()),
}

struct HeadersVisitor;

impl<'de> Visitor<'de> for HeadersVisitor {
    type Value = Headers;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of header names to a string or a list of strings")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Headers, A::Error> {
        let mut headers = Headers::new();
        while let Some((name, value)) = access.next_entry::<String, HeaderValueRepr>()? {
            match value {
                HeaderValueRepr::One(v) => headers.append(name, v),
                HeaderValueRepr::Many(values) => {
                    for v in values {
                        headers.append(name.clone(), v);
                    }
                }
                HeaderValueRepr::Number(n) => headers.append(name, n.to_string()),
                HeaderValueRepr::Bool(b) => headers.append(name, b.to_string()),
                HeaderValueRepr::Null(()) => {}
            }
        }
        Ok(headers)
    }

    fn visit_unit<E: serde::de::Error>(self) -> Result<Headers, E> {
        Ok(Headers::new())
    }
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(HeadersVisitor)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut headers = Headers::new();
        headers.append("Content-Type", "text/html");
        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert!(headers.contains("CONTENT-TYPE"));
    }

    #[test]
    fn test_get_borrows_from_headers_only() {
        let headers: Headers = [("Server", "nginx")].into_iter().collect();
        let value = {
            let name = String::from("server");
            headers.get(&name)
        };
        assert_eq!(value, Some("nginx"));
    }

    #[test]
    fn test_insert_replaces_all_values() {
        let mut headers = Headers::new();
        headers.append("Set-Cookie", "a=1");
        headers.append("set-cookie", "b=2");
        headers.insert("SET-COOKIE", "c=3");
        assert_eq!(headers.get_all("set-cookie").collect::<Vec<_>>(), vec!["c=3"]);
    }

    #[test]
    fn test_merge_overrides_and_appends() {
        let mut headers: Headers = [("X-Scan", "1"), ("Accept", "*/*")].into_iter().collect();
        let defaults: Headers = [("x-scan", "agent"), ("X-Extra", "yes")].into_iter().collect();
        headers.merge(&defaults);

        assert_eq!(headers.get("X-Scan"), Some("agent"));
        assert_eq!(headers.get("accept"), Some("*/*"));
        assert_eq!(headers.get("x-extra"), Some("yes"));
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn test_deserialize_preserves_order_and_lists() {
        let headers: Headers = serde_json::from_value(json!({
            "Zeta": "1",
            "Alpha": ["a", "b"],
            "Content-Length": 12
        }))
        .unwrap();
        let pairs: Vec<_> = headers.iter().collect();
        assert_eq!(
            pairs,
            vec![
                ("Zeta", "1"),
                ("Alpha", "a"),
                ("Alpha", "b"),
                ("Content-Length", "12")
            ]
        );
    }

    #[test]
    fn test_serialize_groups_repeated_names() {
        let headers: Headers = [("Set-Cookie", "a=1"), ("set-cookie", "b=2"), ("Server", "x")]
            .into_iter()
            .collect();
        let value = serde_json::to_value(&headers).unwrap();
        assert_eq!(value, json!({"Set-Cookie": ["a=1", "b=2"], "Server": "x"}));
    }

    #[test]
    fn test_malformed_names_are_kept_verbatim() {
        let headers: Headers = serde_json::from_value(json!({"X Bad\r\nName": "v\u{0}"})).unwrap();
        assert_eq!(headers.get("x bad\r\nname"), Some("v\u{0}"));
    }
}
