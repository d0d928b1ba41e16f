//! Case-insensitive ordered multimap and header value scanning

#[allow(unused_imports)]
use std::ascii::AsciiExt;
use std::slice;


/// Ordered multimap with case-insensitive keys
///
/// Used for request headers, response headers, query strings and decoded
/// form bodies.  Insertion order is preserved; lookups compare names
/// ASCII-case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct HeaderTable {
    items: Vec<(String, String)>,
}

impl HeaderTable {
    pub fn new() -> HeaderTable {
        HeaderTable { items: Vec::new() }
    }

    /// Append a pair, keeping previous entries of the same name
    pub fn add(&mut self, name: &str, value: &str) {
        self.items.push((name.to_string(), value.to_string()));
    }

    /// Replace every entry of the name with a single pair
    pub fn set(&mut self, name: &str, value: &str) {
        self.items.retain(|&(ref n, _)| !n.eq_ignore_ascii_case(name));
        self.add(name, value);
    }

    /// First value under the name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.items.iter()
            .find(|&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| &v[..])
    }

    /// All values under the name, in insertion order
    pub fn get_all<'a>(&'a self, name: &'a str) -> Vec<&'a str> {
        self.items.iter()
            .filter(|&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| &v[..])
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.items.iter()
            .filter(|&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .count()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<(String, String)> {
        self.items.iter()
    }
}

/// Case-insensitive, whitespace-stripped comparison of a whole value
pub fn is_value(value: &str, expected: &str) -> bool {
    value.trim_matches(|c| matches!(c, ' ' | '\t' | '\r' | '\n'))
        .eq_ignore_ascii_case(expected)
}

/// Split a value on commas into lowercased, whitespace-stripped tokens
pub fn tokens(value: &str) -> Vec<String> {
    value.split(',')
        .map(|t| t.trim_matches(|c| matches!(c, ' ' | '\t' | '\r' | '\n')))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// True if any comma-separated token of the value matches
pub fn has_token(value: &str, token: &str) -> bool {
    tokens(value).iter().any(|t| t == token)
}

/// Normalize a header name to the conventional Title-Case-Hyphenated form
pub fn title_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut first = true;
    for ch in name.chars() {
        if first {
            out.extend(ch.to_uppercase());
        } else {
            out.extend(ch.to_lowercase());
        }
        first = ch == '-';
    }
    out
}


#[cfg(test)]
mod test {
    use super::{has_token, is_value, title_case, tokens, HeaderTable};

    #[test]
    fn lookups_ignore_case() {
        let mut table = HeaderTable::new();
        table.add("Content-Type", "text/plain");
        table.add("X-One", "1");
        table.add("x-one", "2");
        assert_eq!(table.get("content-type"), Some("text/plain"));
        assert_eq!(table.get("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(table.get_all("X-ONE"), vec!["1", "2"]);
        assert_eq!(table.count("x-one"), 2);
        assert!(table.contains("X-One"));
        assert!(!table.contains("X-Two"));
    }

    #[test]
    fn set_collapses_duplicates() {
        let mut table = HeaderTable::new();
        table.add("Connection", "keep-alive");
        table.add("connection", "upgrade");
        table.set("CONNECTION", "close");
        assert_eq!(table.get_all("connection"), vec!["close"]);
    }

    #[test]
    fn order_is_preserved() {
        let mut table = HeaderTable::new();
        table.add("b", "2");
        table.add("a", "1");
        table.add("b", "3");
        let names: Vec<&str> = table.iter()
            .map(|&(ref n, _)| &n[..]).collect();
        assert_eq!(names, vec!["b", "a", "b"]);
    }

    #[test]
    fn value_comparison() {
        assert!(is_value("close", "close"));
        assert!(is_value("Close", "close"));
        assert!(is_value("  CLOSE  ", "close"));
        assert!(is_value("\t100-Continue ", "100-continue"));
        assert!(!is_value("close 1", "close"));
        assert!(!is_value("xclose", "close"));
    }

    #[test]
    fn token_splitting() {
        assert_eq!(tokens(" gzip , Chunked "), vec!["gzip", "chunked"]);
        assert_eq!(tokens("identity"), vec!["identity"]);
        assert_eq!(tokens(" , ,"), Vec::<String>::new());
        assert!(has_token("gzip, chunked", "chunked"));
        assert!(has_token("ChUnKeD", "chunked"));
        assert!(!has_token("gzipped", "gzip"));
    }

    #[test]
    fn title_case_normalization() {
        assert_eq!(title_case("content-type"), "Content-Type");
        assert_eq!(title_case("X-REQUEST-ID"), "X-Request-Id");
        assert_eq!(title_case("date"), "Date");
        assert_eq!(title_case("dnt"), "Dnt");
    }
}
