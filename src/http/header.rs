//! Ordered, case-insensitive header multimap.
//!
//! Grounded on `original_source/seal-server.py`'s `HttpHeaders`: the same
//! operation set (`append`, `find`, `getall`, `set`, `delete`, index
//! access), restyled as a Rust `Vec<(String, String)>` with the teacher's
//! `Header` struct conventions
//! (`crates/httpserver/src/serve/common/header.rs`) for a single line's
//! `Display`.

use std::fmt;

#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a header, preserving any existing entries with the same
    /// name (this is a multimap).
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// First value for `name`, case-insensitive.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Replaces the first occurrence of `name` with `value` and deletes
    /// every later duplicate; appends if absent.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.find(&name) {
            Some(i) => {
                self.entries[i].1 = value;
                let name_lower = name.to_ascii_lowercase();
                let mut j = i + 1;
                while j < self.entries.len() {
                    if self.entries[j].0.to_ascii_lowercase() == name_lower {
                        self.entries.remove(j);
                    } else {
                        j += 1;
                    }
                }
            }
            None => self.entries.push((name, value)),
        }
    }

    /// Deletes every occurrence of `name`.
    pub fn remove_all(&mut self, name: &str) {
        self.entries
            .retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn at(&self, index: usize) -> Option<(&str, &str)> {
        self.entries.get(index).map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Numeric accessor: returns `default` if absent, fails on a present
    /// but unparseable value.
    pub fn get_usize(&self, name: &str, default: usize) -> anyhow::Result<usize> {
        match self.get(name) {
            None => Ok(default),
            Some(v) => v
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("header {name} is not a valid non-negative integer: {v:?}")),
        }
    }

    /// Adds a single header given a raw `name: value` line, trimming
    /// surrounding whitespace on both sides (as
    /// `original_source/seal-server.py`'s `add_header_line` does).
    pub fn append_line(&mut self, line: &str) -> anyhow::Result<()> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("malformed header line: {line:?}"))?;
        self.append(name.trim(), value.trim());
        Ok(())
    }
}

impl fmt::Display for HeaderMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in &self.entries {
            write!(f, "{k}: {v}\r\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_get_first() {
        let mut h = HeaderMap::new();
        h.append("X-Foo", "a");
        h.append("x-foo", "b");
        assert_eq!(h.get("X-FOO"), Some("a"));
        assert_eq!(h.get_all("x-foo"), vec!["a", "b"]);
    }

    #[test]
    fn case_insensitive_lookup() {
        let mut h = HeaderMap::new();
        h.append("Content-Type", "text/plain");
        assert_eq!(h.get("content-type"), Some("text/plain"));
        assert_eq!(h.get("CONTENT-TYPE"), Some("text/plain"));
    }

    #[test]
    fn set_replaces_first_and_removes_rest() {
        let mut h = HeaderMap::new();
        h.append("X-Foo", "a");
        h.append("X-Foo", "b");
        h.append("X-Bar", "c");
        h.set("x-foo", "z");
        assert_eq!(h.get_all("x-foo"), vec!["z"]);
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn insertion_order_preserved() {
        let mut h = HeaderMap::new();
        h.append("A", "1");
        h.append("B", "2");
        h.append("C", "3");
        let names: Vec<&str> = h.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn remove_all_deletes_every_occurrence() {
        let mut h = HeaderMap::new();
        h.append("X", "1");
        h.append("Y", "2");
        h.append("x", "3");
        h.remove_all("x");
        assert_eq!(h.len(), 1);
        assert_eq!(h.get("Y"), Some("2"));
    }

    #[test]
    fn numeric_accessor_defaults_on_absence() {
        let h = HeaderMap::new();
        assert_eq!(h.get_usize("Content-Length", 0).unwrap(), 0);
    }

    #[test]
    fn numeric_accessor_fails_on_unparseable() {
        let mut h = HeaderMap::new();
        h.append("Content-Length", "not-a-number");
        assert!(h.get_usize("Content-Length", 0).is_err());
    }

    #[test]
    fn display_round_trip() {
        let mut h = HeaderMap::new();
        h.append("User-Agent", "t");
        h.append("Accept", "*/*");
        assert_eq!(h.to_string(), "User-Agent: t\r\nAccept: */*\r\n");
    }
}
