//! Small output helpers shared by the verbs.

use serde_json::Value;

/// Shorten an id for table output: `op_promote_ab12cd34ef…`.
#[must_use]
pub fn short(id: &str) -> String {
    if id.len() <= 24 {
        id.to_owned()
    } else {
        format!("{}…", &id[..23])
    }
}

/// `1 file` / `3 files`.
#[must_use]
pub fn count(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("1 {noun}")
    } else {
        format!("{n} {noun}s")
    }
}

/// Pretty-print a JSON document to stdout.
pub fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(rendered) => println!("{rendered}"),
        Err(_) => println!("{value}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_keeps_small_ids() {
        assert_eq!(short("op_abc"), "op_abc");
    }

    #[test]
    fn short_truncates_long_ids() {
        let id = "op_promote_0123456789abcdef0123";
        let shortened = short(id);
        assert!(shortened.ends_with('…'));
        assert!(shortened.len() < id.len());
    }

    #[test]
    fn count_pluralizes() {
        assert_eq!(count(1, "conflict"), "1 conflict");
        assert_eq!(count(2, "conflict"), "2 conflicts");
    }
}
