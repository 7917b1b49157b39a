//! Identifier- and path-aware tokenization.

/// Split text into lower-case search terms.
///
/// Breaks on camelCase and acronym boundaries, path separators and any other
/// non-alphanumeric character; single-character tokens are dropped.
///
/// # Examples
///
/// ```
/// use cartograph_search::tokenize;
///
/// assert_eq!(tokenize("handleLoginAttempt"), vec!["handle", "login", "attempt"]);
/// assert_eq!(tokenize("src/auth/login_form.tsx"), vec!["src", "auth", "login", "form", "tsx"]);
/// assert_eq!(tokenize("parseJSONBody"), vec!["parse", "json", "body"]);
/// assert_eq!(tokenize("a b"), Vec::<String>::new());
/// ```
pub fn tokenize(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut current = String::new();

    let flush = |current: &mut String, tokens: &mut Vec<String>| {
        if current.chars().count() > 1 {
            tokens.push(std::mem::take(current));
        } else {
            current.clear();
        }
    };

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            flush(&mut current, &mut tokens);
            continue;
        }
        if i > 0 && !current.is_empty() {
            let prev = chars[i - 1];
            let boundary = if c.is_uppercase() {
                prev.is_lowercase()
                    || prev.is_ascii_digit()
                    || (prev.is_uppercase() && chars.get(i + 1).is_some_and(|n| n.is_lowercase()))
            } else {
                false
            };
            if boundary {
                flush(&mut current, &mut tokens);
            }
        }
        current.extend(c.to_lowercase());
    }
    flush(&mut current, &mut tokens);
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digits_stay_attached() {
        assert_eq!(tokenize("sha256Digest"), vec!["sha256", "digest"]);
        assert_eq!(tokenize("v2Api"), vec!["v2", "api"]);
    }

    #[test]
    fn mixed_separators() {
        assert_eq!(
            tokenize("function:src/db/pool.ts::query"),
            vec!["function", "src", "db", "pool", "ts", "query"]
        );
    }

    #[test]
    fn empty_input() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("  --  ").is_empty());
    }
}
