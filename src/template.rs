//! Response template placeholder substitution.
//!
//! Templates may carry `${name}` placeholders filled in from request
//! fields and a few generated values right before emission. Unknown
//! placeholders are left verbatim; substitution never fails a request.

use std::collections::HashMap;

/// Replace every `${name}` found in `vars`. Placeholders without a
/// matching variable survive untouched, as does a dangling `${`.
pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
    if vars.is_empty() || !template.contains("${") {
        return template.to_string();
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                // unterminated placeholder, keep the tail as-is
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Generated variables available to every template.
pub fn standard_vars() -> HashMap<String, String> {
    let now = chrono::Local::now();
    let mut vars = HashMap::new();
    vars.insert(
        "timestamp".to_string(),
        now.timestamp_millis().to_string(),
    );
    vars.insert("date".to_string(), now.format("%Y-%m-%d").to_string());
    vars.insert("time".to_string(), now.format("%H:%M:%S").to_string());
    vars
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_substitutes_known_placeholder() {
        let result = render(
            "txid=${transaction_id}&ok=t",
            &vars(&[("transaction_id", "abc-123")]),
        );
        assert_eq!(result, "txid=abc-123&ok=t");
    }

    #[test]
    fn test_unknown_placeholder_left_verbatim() {
        let result = render("<v>${unknown}</v>", &vars(&[("transaction_id", "1")]));
        assert_eq!(result, "<v>${unknown}</v>");
    }

    #[test]
    fn test_multiple_and_repeated_placeholders() {
        let result = render(
            "${a}-${b}-${a}",
            &vars(&[("a", "x"), ("b", "y")]),
        );
        assert_eq!(result, "x-y-x");
    }

    #[test]
    fn test_unterminated_placeholder_kept() {
        let result = render("head ${tail", &vars(&[("tail", "v")]));
        assert_eq!(result, "head ${tail");
    }

    #[test]
    fn test_no_placeholders_is_passthrough() {
        let body = "{\"ok\":true}";
        assert_eq!(render(body, &vars(&[("a", "b")])), body);
    }

    #[test]
    fn test_standard_vars_present() {
        let vars = standard_vars();
        assert!(vars.contains_key("timestamp"));
        assert!(vars.contains_key("date"));
        assert!(vars.contains_key("time"));
    }
}
