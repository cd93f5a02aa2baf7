//! Flat placeholder substitution for generated config fragments
//!
//! Templates contain tokens of the exact shape `<< NAME >>` where `NAME` is
//! made of `_`, `A-Z` and `0-9`. Each token is replaced by the value stored
//! under `NAME` in a [`PlaceholderTable`]. A token with no value is left in
//! the output verbatim and reported, so an incomplete config still shows
//! where it is incomplete. Values are inserted as-is and never rescanned.

use regex_lite::{Captures, Regex};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::OnceLock;
use tracing::warn;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<< ([_A-Z0-9]+) >>").expect("valid placeholder pattern"))
}

/// Values available to a single render call, keyed by uppercase name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceholderTable {
    values: BTreeMap<String, String>,
}

impl PlaceholderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`; keys are case-insensitive
    pub fn insert(&mut self, key: &str, value: impl Display) {
        self.values.insert(key.to_uppercase(), value.to_string());
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(mut self, key: &str, value: impl Display) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&key.to_uppercase()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Output of a render call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    /// Placeholder names that had no value, in order of appearance
    pub unresolved: Vec<String>,
}

impl Rendered {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Substitute every placeholder of `template` from `table`
pub fn render(template: &str, table: &PlaceholderTable) -> Rendered {
    let mut unresolved = Vec::new();

    let text = placeholder_pattern()
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            match table.values.get(name) {
                Some(value) => value.clone(),
                None => {
                    warn!(placeholder = %name, "Template placeholder not found");
                    unresolved.push(name.to_string());
                    caps[0].to_string()
                }
            }
        })
        .into_owned();

    Rendered { text, unresolved }
}

/// Names of placeholders still present in generated text
pub fn unresolved_placeholders(text: &str) -> Vec<String> {
    placeholder_pattern()
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    const LISTEN: &str = "listen << PORT_80_443 >>;\nserver_name << DOMAIN_NAME >>;\n";

    #[test]
    fn test_missing_placeholder_left_verbatim() {
        let table = PlaceholderTable::new().with("DOMAIN_NAME", "example.com");
        let out = render(LISTEN, &table);

        assert_eq!(out.text, "listen << PORT_80_443 >>;\nserver_name example.com;\n");
        assert_eq!(out.unresolved, vec!["PORT_80_443"]);
        assert!(!out.is_complete());
        assert_eq!(unresolved_placeholders(&out.text), vec!["PORT_80_443"]);
    }

    #[traced_test]
    #[test]
    fn test_missing_placeholder_is_logged() {
        render(LISTEN, &PlaceholderTable::new().with("PORT_80_443", 80));
        assert!(logs_contain("Template placeholder not found"));
        assert!(logs_contain("DOMAIN_NAME"));
    }

    #[test]
    fn test_render_is_repeatable() {
        let table = PlaceholderTable::new().with("DOMAIN_NAME", "example.com");
        assert_eq!(render(LISTEN, &table), render(LISTEN, &table));
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        for key in ["hostname", "Hostname", "HOSTNAME"] {
            let table = PlaceholderTable::new().with(key, "cleat-a_com");
            let out = render("proxy_pass http://<< HOSTNAME >>;", &table);
            assert_eq!(out.text, "proxy_pass http://cleat-a_com;");
            assert!(out.is_complete());
        }
    }

    #[test]
    fn test_values_are_stringified() {
        let table = PlaceholderTable::new().with("port", 8080u16);
        assert_eq!(render("<< PORT >>", &table).text, "8080");
    }

    #[test]
    fn test_no_recursive_expansion() {
        let table = PlaceholderTable::new().with("A", "<< B >>").with("B", "never");
        let out = render("<< A >>", &table);
        assert_eq!(out.text, "<< B >>");
        assert!(out.is_complete());
    }

    #[test]
    fn test_only_exact_token_shape_matches() {
        let table = PlaceholderTable::new().with("NAME", "x");
        let template = "<<NAME>> << name >> <<  NAME  >> << NAME >>";
        let out = render(template, &table);
        assert_eq!(out.text, "<<NAME>> << name >> <<  NAME  >> x");
    }

    #[test]
    fn test_empty_value_substitutes_nothing() {
        let table = PlaceholderTable::new().with("REWRITE", "");
        let out = render("a << REWRITE >> b", &table);
        assert_eq!(out.text, "a  b");
        assert!(out.is_complete());
    }

    #[test]
    fn test_later_insert_overrides() {
        let mut table = PlaceholderTable::new();
        table.insert("domain_name", "a.com");
        table.insert("DOMAIN_NAME", "b.com");
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("Domain_Name"), Some("b.com"));
    }
}
