//! SQL text rendering helpers.

use std::fmt;

use serde_json::Value;

/// Quoted identifier.
#[derive(Debug, Clone, Copy)]
pub struct Ident<S>(pub S);

impl<S: AsRef<str>> fmt::Display for Ident<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"")?;
        for c in self.0.as_ref().chars() {
            if c == '"' {
                f.write_str("\"\"")?;
            } else {
                write!(f, "{c}")?;
            }
        }
        f.write_str("\"")
    }
}

/// Comma delimited list.
#[derive(Debug, Clone, Copy)]
pub struct Comma<L>(pub L);

impl<L, I> fmt::Display for Comma<L>
where
    L: IntoIterator<Item = I> + Clone,
    I: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = "";
        for item in self.0.clone() {
            write!(f, "{s}{item}")?;
            s = ", ";
        }
        Ok(())
    }
}

/// Render a string literal.
pub fn quote_str(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Render a JSON value as a SQL literal.
///
/// Arrays of strings become `TEXT[]` literals, objects become `jsonb`.
pub fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_str(s),
        Value::Array(items) if items.iter().all(Value::is_string) => {
            let items: Vec<String> = items.iter().map(literal).collect();
            format!("ARRAY[{}]::TEXT[]", items.join(", "))
        }
        other => format!("{}::jsonb", quote_str(&other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ident_quoting() {
        assert_eq!(Ident("user").to_string(), "\"user\"");
        assert_eq!(Ident("a\"b").to_string(), "\"a\"\"b\"");
    }

    #[test]
    fn test_comma() {
        let cols = ["a", "b", "c"];
        assert_eq!(Comma(cols.iter().map(Ident)).to_string(), "\"a\", \"b\", \"c\"");
    }

    #[test]
    fn test_literals() {
        assert_eq!(literal(&json!("O'Brien")), "'O''Brien'");
        assert_eq!(literal(&json!(42)), "42");
        assert_eq!(literal(&json!(false)), "false");
        assert_eq!(literal(&json!(["a", "b"])), "ARRAY['a', 'b']::TEXT[]");
        assert_eq!(literal(&json!({"k": 1})), "'{\"k\":1}'::jsonb");
    }
}
