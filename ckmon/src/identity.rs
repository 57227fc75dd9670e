//! Identity-card text packing.
//!
//! A monitor can describe itself through entries tagged
//! [`IDENTITY_CARD_FULL`](crate::model::IDENTITY_CARD_FULL) (complete
//! replacement) or [`IDENTITY_CARD_UPDATE`](crate::model::IDENTITY_CARD_UPDATE)
//! (additive). The entry text packs the attributes: `\u{1}` separates a key
//! from its value, `\u{2}` separates pairs. Keys and values must not contain
//! either separator.

/// Key/value separator inside a pair.
pub const KEY_SEPARATOR: char = '\u{1}';
/// Pair separator.
pub const PAIR_SEPARATOR: char = '\u{2}';

/// Packs attributes into identity-card text.
///
/// Pairs whose key or value contains a separator are skipped with a warning;
/// pairs with an empty key are skipped silently.
pub fn pack<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut out = String::new();
    for (key, value) in pairs {
        if key.is_empty() {
            continue;
        }
        if key.contains(KEY_SEPARATOR)
            || key.contains(PAIR_SEPARATOR)
            || value.contains(KEY_SEPARATOR)
            || value.contains(PAIR_SEPARATOR)
        {
            tracing::warn!(key, "identity card attribute contains a separator, skipped");
            continue;
        }
        if !out.is_empty() {
            out.push(PAIR_SEPARATOR);
        }
        out.push_str(key);
        out.push(KEY_SEPARATOR);
        out.push_str(value);
    }
    out
}

/// Parses identity-card text back into attributes.
///
/// Tolerant: segments without a key separator or with an empty key are
/// dropped with a warning, the remaining pairs still apply.
pub fn parse(text: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for segment in text.split(PAIR_SEPARATOR) {
        if segment.is_empty() {
            continue;
        }
        match segment.split_once(KEY_SEPARATOR) {
            Some((key, value)) if !key.is_empty() => {
                pairs.push((key.to_string(), value.to_string()));
            }
            _ => {
                tracing::warn!("malformed identity card segment, skipped");
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_roundtrip_attributes() {
        // given
        let pairs = [("AppName", "backoffice"), ("Machine", "web-03")];

        // when
        let text = pack(pairs);
        let parsed = parse(&text);

        // then
        assert_eq!(
            parsed,
            vec![
                ("AppName".to_string(), "backoffice".to_string()),
                ("Machine".to_string(), "web-03".to_string()),
            ]
        );
    }

    #[test]
    fn should_keep_valid_pairs_when_a_segment_is_malformed() {
        // given - middle segment has no key separator
        let text = format!(
            "AppName{k}backoffice{p}garbage{p}Machine{k}web-03",
            k = KEY_SEPARATOR,
            p = PAIR_SEPARATOR
        );

        // when
        let parsed = parse(&text);

        // then
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].0, "AppName");
        assert_eq!(parsed[1].0, "Machine");
    }

    #[test]
    fn should_skip_pairs_containing_separators_when_packing() {
        // given
        let bad_value = format!("a{}b", PAIR_SEPARATOR);
        let pairs = [("Good", "yes"), ("Bad", bad_value.as_str())];

        // when
        let text = pack(pairs);

        // then
        assert_eq!(parse(&text), vec![("Good".to_string(), "yes".to_string())]);
    }

    #[test]
    fn should_parse_empty_text_as_no_attributes() {
        assert!(parse("").is_empty());
    }

    #[test]
    fn should_allow_empty_values() {
        let text = pack([("Flag", "")]);
        assert_eq!(parse(&text), vec![("Flag".to_string(), String::new())]);
    }
}
