//! The `key=value\n` text record format shared by every on-disk file
//! (spec.md §6 "On-disk files").

use std::collections::HashMap;

pub fn parse_kv(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn render_kv(entries: &[(&str, String)]) -> String {
    let mut out = String::new();
    for (k, v) in entries {
        out.push_str(k);
        out.push('=');
        out.push_str(v);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_lines() {
        let kv = parse_kv("a=1\nb=two\n");
        assert_eq!(kv.get("a"), Some(&"1".to_string()));
        assert_eq!(kv.get("b"), Some(&"two".to_string()));
    }

    #[test]
    fn ignores_lines_without_equals() {
        let kv = parse_kv("a=1\nnoeq\n");
        assert_eq!(kv.len(), 1);
    }
}
