//! Reversible escaping for identifiers that cross a text-based wire boundary.
//!
//! Entity ids and relation labels are free text, but some stores only accept
//! identifier-like strings (Cypher relationship types, for instance). Every
//! special character is replaced by a two-letter token wrapped in underscores
//! (`' '` becomes `_sp_`). The underscore itself is a special character, so
//! every `_` in an escaped string opens a token and decoding is unambiguous.

use crate::error::EscapeError;

/// Character ⇄ token table. Tokens are unique and two ASCII letters long.
const TOKENS: &[(char, &str)] = &[
    (' ', "sp"),
    ('_', "us"),
    ('-', "hy"),
    ('.', "dt"),
    (',', "cm"),
    (':', "cl"),
    (';', "sc"),
    ('\'', "sq"),
    ('"', "dq"),
    ('`', "bt"),
    ('(', "lp"),
    (')', "rp"),
    ('[', "lb"),
    (']', "rb"),
    ('{', "lc"),
    ('}', "rc"),
    ('/', "sl"),
    ('\\', "bs"),
    ('&', "am"),
    ('!', "ex"),
    ('?', "qm"),
    ('#', "hs"),
    ('%', "pc"),
    ('+', "pl"),
    ('*', "as"),
    ('=', "eq"),
    ('<', "lt"),
    ('>', "gt"),
    ('|', "vb"),
    ('@', "at"),
    ('$', "dl"),
    ('^', "ca"),
    ('~', "tl"),
    ('\n', "nl"),
    ('\t', "tb"),
    ('\r', "cr"),
];

fn token_for(c: char) -> Option<&'static str> {
    TOKENS.iter().find(|(ch, _)| *ch == c).map(|(_, t)| *t)
}

fn char_for(token: &str) -> Option<char> {
    TOKENS.iter().find(|(_, t)| *t == token).map(|(ch, _)| *ch)
}

/// Escape an identifier for the wire.
pub fn to_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match token_for(c) {
            Some(token) => {
                out.push('_');
                out.push_str(token);
                out.push('_');
            }
            None => out.push(c),
        }
    }
    out
}

/// Reverse [`to_escape`].
pub fn from_escape(input: &str) -> Result<String, EscapeError> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '_' {
            out.push(c);
            continue;
        }
        let mut token = String::with_capacity(2);
        let mut closed = false;
        for t in chars.by_ref() {
            if t == '_' {
                closed = true;
                break;
            }
            token.push(t);
            if token.len() > 2 {
                break;
            }
        }
        if !closed {
            return Err(EscapeError::Unterminated {
                input: input.to_string(),
            });
        }
        match char_for(&token) {
            Some(ch) => out.push(ch),
            None => {
                return Err(EscapeError::UnknownToken {
                    input: input.to_string(),
                    token,
                });
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn spaces_and_underscores_are_distinct() {
        assert_eq!(to_escape("part of"), "part_sp_of");
        assert_eq!(to_escape("part_of"), "part_us_of");
        assert_ne!(to_escape("part of"), to_escape("part_of"));
    }

    #[test]
    fn plain_identifiers_pass_through() {
        assert_eq!(to_escape("FEMA"), "FEMA");
        assert_eq!(from_escape("FEMA").unwrap(), "FEMA");
    }

    #[test]
    fn quotes_and_punctuation_round_trip() {
        let raw = r#"O'Brien said "hi", (really)!"#;
        let escaped = to_escape(raw);
        assert!(!escaped.contains('\''));
        assert!(!escaped.contains('"'));
        assert_eq!(from_escape(&escaped).unwrap(), raw);
    }

    #[test]
    fn unknown_token_is_rejected() {
        assert!(matches!(
            from_escape("a_zz_b"),
            Err(EscapeError::UnknownToken { .. })
        ));
    }

    #[test]
    fn unterminated_token_is_rejected() {
        assert!(matches!(
            from_escape("a_sp"),
            Err(EscapeError::Unterminated { .. })
        ));
    }

    #[test]
    fn non_ascii_passes_through() {
        let raw = "Zürich – 東京";
        assert_eq!(from_escape(&to_escape(raw)).unwrap(), raw);
    }

    proptest! {
        #[test]
        fn escape_is_a_bijection(s in "\\PC{0,40}") {
            prop_assert_eq!(from_escape(&to_escape(&s)).unwrap(), s);
        }

        #[test]
        fn distinct_inputs_stay_distinct(a in "[a-z _.-]{0,12}", b in "[a-z _.-]{0,12}") {
            prop_assume!(a != b);
            prop_assert_ne!(to_escape(&a), to_escape(&b));
        }
    }
}
