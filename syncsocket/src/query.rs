//! Query string helpers
//!
//! Pairs are written verbatim as `name=value` and joined with `&`; no
//! percent-encoding is applied.

use std::collections::HashMap;

/// Render `params` as a query string, `?` included
///
/// An empty map renders as the empty string. Pair order follows the map's
/// iteration order.
pub fn query_string(params: &HashMap<String, String>) -> String {
    if params.is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = params
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect();
    format!("?{}", pairs.join("&"))
}

/// Append `params` to `url`
///
/// Continues an existing query with `&` and keeps any fragment last.
pub fn append_query(url: &str, params: &HashMap<String, String>) -> String {
    let query = query_string(params);
    if query.is_empty() {
        return url.to_string();
    }

    let (base, fragment) = match url.find('#') {
        Some(idx) => url.split_at(idx),
        None => (url, ""),
    };
    if !base.contains('?') {
        format!("{}{}{}", base, query, fragment)
    } else if base.ends_with('?') || base.ends_with('&') {
        format!("{}{}{}", base, &query[1..], fragment)
    } else {
        format!("{}&{}{}", base, &query[1..], fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_params() {
        assert_eq!(query_string(&HashMap::new()), "");
        assert_eq!(append_query("ws://h/p", &HashMap::new()), "ws://h/p");
    }

    #[test]
    fn test_single_pair() {
        assert_eq!(query_string(&params(&[("a", "1")])), "?a=1");
        assert_eq!(append_query("ws://h/p", &params(&[("a", "1")])), "ws://h/p?a=1");
    }

    #[test]
    fn test_pairs_in_any_order() {
        let query = query_string(&params(&[("a", "1"), ("b", "2")]));
        assert!(query == "?a=1&b=2" || query == "?b=2&a=1", "{}", query);
    }

    #[test]
    fn test_existing_query_is_continued() {
        let p = params(&[("b", "2")]);
        assert_eq!(append_query("ws://h/p?a=1", &p), "ws://h/p?a=1&b=2");
        assert_eq!(append_query("ws://h/p?", &p), "ws://h/p?b=2");
        assert_eq!(append_query("ws://h/p#top", &p), "ws://h/p?b=2#top");
    }
}
