//! SQL identifier and literal quoting.

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them (`"` → `""`),
/// which makes the result safe for any input string.
///
/// # Examples
///
/// ```
/// use rowlite_core::quote_ident;
///
/// assert_eq!(quote_ident("items"), "\"items\"");
/// assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
/// assert_eq!(quote_ident("select"), "\"select\""); // SQL keyword
/// ```
#[inline]
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a SQL string literal with single quotes.
///
/// Embedded single-quotes are doubled (`'` → `''`).
///
/// # Examples
///
/// ```
/// use rowlite_core::quote_str;
///
/// assert_eq!(quote_str("hello"), "'hello'");
/// assert_eq!(quote_str("it's"), "'it''s'");
/// ```
#[inline]
#[must_use]
pub fn quote_str(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_simple() {
        assert_eq!(quote_ident("items"), "\"items\"");
    }

    #[test]
    fn test_quote_ident_embedded_quote() {
        assert_eq!(quote_ident("a\"b\"c"), "\"a\"\"b\"\"c\"");
    }

    #[test]
    fn test_quote_ident_injection_attempt() {
        let malicious = "items\"; DROP TABLE secrets; --";
        assert_eq!(
            quote_ident(malicious),
            "\"items\"\"; DROP TABLE secrets; --\""
        );
    }

    #[test]
    fn test_quote_str_simple() {
        assert_eq!(quote_str("abc"), "'abc'");
    }

    #[test]
    fn test_quote_str_embedded_quote() {
        assert_eq!(quote_str("o'brien"), "'o''brien'");
        assert_eq!(quote_str("''"), "''''''");
    }

    #[test]
    fn test_quote_str_empty() {
        assert_eq!(quote_str(""), "''");
    }
}
