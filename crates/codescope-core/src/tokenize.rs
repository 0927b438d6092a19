//! Identifier-aware tokenizer used by the keyword index.
//!
//! Text is split into identifier runs (`[A-Za-z0-9_]+`). Each run is then
//! split on `_` and on case boundaries:
//!
//! - lower/digit → upper: `getUser` → `get`, `user`
//! - acronym → word: `HTTPServer` → `http`, `server`
//!
//! Compound identifiers also keep their joined lowercase form, so
//! `getUserData` yields `getuserdata`, `get`, `user`, `data`. Tokens shorter
//! than two characters are dropped. Duplicates are kept; the keyword index
//! counts them as term frequency.
//!
//! ```rust
//! use codescope_core::tokenize::tokenize;
//!
//! assert_eq!(
//!     tokenize("getUserData"),
//!     vec!["getuserdata", "get", "user", "data"]
//! );
//! ```

/// Minimum token length kept by [`tokenize`].
pub const MIN_TOKEN_LEN: usize = 2;

/// Tokenize arbitrary text (source code or a natural-language query).
pub fn tokenize(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for word in text
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
    {
        let parts: Vec<String> = word
            .split('_')
            .filter(|p| !p.is_empty())
            .flat_map(split_identifier)
            .collect();

        if parts.len() > 1 {
            push_token(&mut out, parts.concat());
        }
        for part in parts {
            push_token(&mut out, part);
        }
    }
    out
}

fn push_token(out: &mut Vec<String>, token: String) {
    if token.chars().count() >= MIN_TOKEN_LEN {
        out.push(token);
    }
}

/// Split one `_`-free identifier on camelCase / PascalCase / acronym
/// boundaries, lowercasing each part.
pub fn split_identifier(ident: &str) -> Vec<String> {
    let chars: Vec<char> = ident.chars().collect();
    let mut parts = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if i > 0 && c.is_uppercase() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_is_lower);
            if boundary && !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
        }
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}
