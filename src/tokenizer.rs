//! Identifier and source-line tokenization.
//!
//! Both the symbol index and the content indices share these rules, so a query
//! tokenized here lines up with whatever was indexed.

/// Tokens shorter than this are discarded.
pub const MIN_TOKEN_LEN: usize = 2;

fn is_separator(c: char) -> bool {
    matches!(c, '/' | '_' | '-' | '.') || c.is_ascii_whitespace()
}

/// Split an identifier, path or query into lowercase tokens.
///
/// Non-ASCII characters are dropped, the input is split on `/ _ - .` and
/// whitespace, each segment is split on camelCase boundaries, and tokens
/// shorter than [`MIN_TOKEN_LEN`] are discarded.
///
/// # Examples
///
/// ```
/// use codescout::tokenize;
///
/// assert_eq!(tokenize("getUserToken"), vec!["get", "user", "token"]);
/// assert_eq!(tokenize("APIKey"), vec!["api", "key"]);
/// assert_eq!(tokenize("tree-sitter"), vec!["tree", "sitter"]);
/// ```
#[must_use]
pub fn tokenize(input: &str) -> Vec<String> {
    let cleaned: String = input
        .chars()
        .filter(|c| c.is_ascii() && (*c >= ' ' || c.is_ascii_whitespace()) && *c != '\x7f')
        .collect();

    let mut tokens = Vec::new();
    for part in cleaned.split(is_separator).filter(|p| !p.is_empty()) {
        for piece in split_camel_case(part) {
            if piece.len() >= MIN_TOKEN_LEN {
                tokens.push(piece.to_ascii_lowercase());
            }
        }
    }
    tokens
}

/// Tokenize one line of source text.
///
/// Every run of characters outside `[A-Za-z0-9]` collapses to a single space
/// before the identifier rules of [`tokenize`] apply.
#[must_use]
pub fn tokenize_content_line(line: &str) -> Vec<String> {
    let mut normalized = String::with_capacity(line.len());
    let mut in_gap = false;
    for c in line.chars() {
        if c.is_ascii_alphanumeric() {
            in_gap = false;
            normalized.push(c);
        } else if !in_gap {
            in_gap = true;
            normalized.push(' ');
        }
    }
    tokenize(&normalized)
}

/// Split an ASCII segment on camelCase boundaries.
///
/// `getUserToken` → `get`, `User`, `Token`; `APIKey` → `API`, `Key`;
/// `handler404Response` → `handler`, `404`, `Response`.
fn split_camel_case(s: &str) -> Vec<&str> {
    let bytes = s.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;

    for i in 1..bytes.len() {
        let prev = bytes[i - 1];
        let cur = bytes[i];
        let split = (prev.is_ascii_lowercase() && cur.is_ascii_uppercase())
            || (prev.is_ascii_alphabetic() && cur.is_ascii_digit())
            || (prev.is_ascii_digit() && cur.is_ascii_alphabetic())
            || (prev.is_ascii_uppercase()
                && cur.is_ascii_uppercase()
                && bytes.get(i + 1).is_some_and(|n| n.is_ascii_lowercase()));
        if split {
            parts.push(&s[start..i]);
            start = i;
        }
    }
    if start < s.len() {
        parts.push(&s[start..]);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_camel_case() {
        assert_eq!(tokenize("getUserToken"), vec!["get", "user", "token"]);
    }

    #[test]
    fn test_tokenize_acronym_run() {
        assert_eq!(tokenize("APIKey"), vec!["api", "key"]);
        assert_eq!(tokenize("parseHTTPResponse"), vec!["parse", "http", "response"]);
    }

    #[test]
    fn test_tokenize_all_caps_kept_whole() {
        assert_eq!(tokenize("LOGIN"), vec!["login"]);
    }

    #[test]
    fn test_tokenize_separators() {
        assert_eq!(tokenize("tree-sitter"), vec!["tree", "sitter"]);
        assert_eq!(
            tokenize("src/auth_handler.go"),
            vec!["src", "auth", "handler", "go"]
        );
        assert_eq!(tokenize("foo\tbar  baz"), vec!["foo", "bar", "baz"]);
    }

    #[test]
    fn test_tokenize_digits() {
        let tokens = tokenize("handler404Response");
        assert!(tokens.contains(&"handler".to_string()));
        assert!(tokens.contains(&"404".to_string()));
        assert!(tokens.contains(&"response".to_string()));
    }

    #[test]
    fn test_tokenize_drops_short_and_non_ascii() {
        assert_eq!(tokenize("a b cd"), vec!["cd"]);
        assert_eq!(tokenize("résumé"), vec!["rsum"]);
        assert!(tokenize("").is_empty());
        assert!(tokenize("---").is_empty());
    }

    #[test]
    fn test_tokenize_content_line() {
        assert_eq!(
            tokenize_content_line("func (h *AuthHandler) Login(ctx context.Context) error {"),
            vec!["func", "auth", "handler", "login", "ctx", "context", "context", "error"]
        );
    }

    #[test]
    fn test_tokenize_content_line_punctuation_only() {
        assert!(tokenize_content_line("{}();").is_empty());
    }
}
