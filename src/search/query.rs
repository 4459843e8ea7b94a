//! Smart-query parser.
//!
//! The search box accepts a compact mini-language mixing free text with
//! `property:value` filter tokens:
//!
//! ```text
//! goblin level:5-10 role:boss "fire breath"
//! ```
//!
//! Quoted phrases are always free text. Unquoted `key:value` tokens resolve
//! the key through the schema's alias/name/id-suffix cascade; anything that
//! does not resolve cleanly (unknown key, ambiguous prefix, malformed numeric
//! value) reverts the whole token to free text rather than producing a
//! partial filter.

use crate::model::types::{NumberFilter, ParsedSearchQuery, PropertyDatatype, PropertyFilter};
use crate::schema::PropertyResolver;

/// Numeric epsilon applied to strict comparisons: ranges are always
/// inclusive, so `>N` becomes `min = N + EPSILON`.
const STRICT_BOUND_EPSILON: f64 = 0.001;

/// Parse a raw query string against the given property resolver.
///
/// Pure and deterministic; an empty query yields an empty result.
pub fn parse_query(query: &str, resolver: &PropertyResolver<'_>) -> ParsedSearchQuery {
    let mut parsed = ParsedSearchQuery::default();
    let mut free_text: Vec<String> = Vec::new();

    for token in tokenize(query) {
        match token {
            Token::Phrase(text) => free_text.push(text),
            Token::Word(word) => match interpret_word(&word, resolver) {
                Some(Filter::Text(config_id, filter)) => {
                    parsed.properties.insert(config_id, filter);
                }
                Some(Filter::Number(config_id, filter)) => {
                    parsed.number_filters.insert(config_id, filter);
                }
                None => free_text.push(word),
            },
        }
    }

    parsed.text = free_text.join(" ").trim().to_string();
    parsed
}

enum Token {
    /// Quoted phrase, inner content verbatim.
    Phrase(String),
    Word(String),
}

enum Filter {
    Text(String, PropertyFilter),
    Number(String, NumberFilter),
}

fn tokenize(query: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = query.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '"' {
            chars.next();
            let mut phrase = String::new();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                phrase.push(c);
            }
            if !phrase.trim().is_empty() {
                tokens.push(Token::Phrase(phrase));
            }
        } else {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                word.push(c);
                chars.next();
            }
            tokens.push(Token::Word(word));
        }
    }

    tokens
}

/// Try to interpret one unquoted token as a property filter.
///
/// Returns `None` when the token must stay free text.
fn interpret_word(word: &str, resolver: &PropertyResolver<'_>) -> Option<Filter> {
    let colon = word.find(':')?;
    // Leading or trailing colon keeps the whole token as free text.
    if colon == 0 || colon == word.len() - 1 {
        return None;
    }

    let key = &word[..colon];
    // The value is everything after the first colon and is never re-split.
    let value = &word[colon + 1..];

    let config = resolver.resolve(key)?;
    match config.datatype {
        PropertyDatatype::Number => {
            let filter = parse_number_value(value)?;
            Some(Filter::Number(config.id.clone(), filter))
        }
        PropertyDatatype::String | PropertyDatatype::Boolean => {
            Some(Filter::Text(config.id.clone(), parse_text_value(value)))
        }
    }
}

fn parse_text_value(value: &str) -> PropertyFilter {
    if value.contains(',') {
        let items: Vec<String> = value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        PropertyFilter::Many(items)
    } else {
        PropertyFilter::One(value.to_string())
    }
}

/// Parse the value side of a numeric filter token.
///
/// Grammar, tried in order: `=N` exact; `>` `>=` `<` `<=` comparisons;
/// `A-B` range (negatives allowed on either side); comma-separated exact
/// set; bare number. Any other shape is invalid and the caller reverts the
/// token to free text.
fn parse_number_value(value: &str) -> Option<NumberFilter> {
    if let Some(rest) = value.strip_prefix('=') {
        let n = parse_decimal(rest)?;
        return Some(NumberFilter {
            exact: Some(vec![n]),
            ..Default::default()
        });
    }

    if let Some(rest) = value.strip_prefix(">=") {
        let n = parse_decimal(rest)?;
        return Some(NumberFilter {
            min: Some(n),
            ..Default::default()
        });
    }
    if let Some(rest) = value.strip_prefix("<=") {
        let n = parse_decimal(rest)?;
        return Some(NumberFilter {
            max: Some(n),
            ..Default::default()
        });
    }
    if let Some(rest) = value.strip_prefix('>') {
        let n = parse_decimal(rest)?;
        return Some(NumberFilter {
            min: Some(n + STRICT_BOUND_EPSILON),
            ..Default::default()
        });
    }
    if let Some(rest) = value.strip_prefix('<') {
        let n = parse_decimal(rest)?;
        return Some(NumberFilter {
            max: Some(n - STRICT_BOUND_EPSILON),
            ..Default::default()
        });
    }

    if let Some((min, max)) = parse_range(value) {
        return Some(NumberFilter {
            min: Some(min),
            max: Some(max),
            ..Default::default()
        });
    }

    if value.contains(',') {
        let mut exact = Vec::new();
        for part in value.split(',') {
            exact.push(parse_decimal(part.trim())?);
        }
        return Some(NumberFilter {
            exact: Some(exact),
            ..Default::default()
        });
    }

    let n = parse_decimal(value)?;
    Some(NumberFilter {
        exact: Some(vec![n]),
        ..Default::default()
    })
}

/// `A-B` numeric range. The separator is any `-` that is not the leading
/// sign, splitting the value into two parseable decimals; negative numbers
/// are allowed on either side (`-3-7`, `5--1`).
fn parse_range(value: &str) -> Option<(f64, f64)> {
    for (idx, _) in value.match_indices('-').skip_while(|(i, _)| *i == 0) {
        let (left, right) = (&value[..idx], &value[idx + 1..]);
        if let (Some(min), Some(max)) = (parse_decimal(left), parse_decimal(right)) {
            return Some((min, max));
        }
    }
    None
}

/// Strict decimal parse: finite numbers only, no `inf`/`nan` spellings.
fn parse_decimal(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty()
        || !s
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'))
    {
        return None;
    }
    s.parse::<f64>().ok().filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::{PropertyConfig, PropertyDatatype};

    fn configs() -> Vec<PropertyConfig> {
        vec![
            PropertyConfig::new("monster.level", "Level", PropertyDatatype::Number)
                .with_aliases(&["lvl"]),
            PropertyConfig::new("monster.role", "Role", PropertyDatatype::String).multi(),
            PropertyConfig::new("monster.legendary", "Legendary", PropertyDatatype::Boolean),
            PropertyConfig::new("monster.stamina", "Stamina", PropertyDatatype::Number),
            PropertyConfig::new("monster.stance", "Stance", PropertyDatatype::String),
        ]
    }

    fn parse(query: &str) -> ParsedSearchQuery {
        let configs = configs();
        let resolver = PropertyResolver::new(configs.iter());
        parse_query(query, &resolver)
    }

    #[test]
    fn plain_text_passes_through_normalized() {
        let parsed = parse("  goblin   cave  ");
        assert_eq!(parsed.text, "goblin cave");
        assert!(parsed.properties.is_empty());
        assert!(parsed.number_filters.is_empty());
    }

    #[test]
    fn empty_query_is_empty() {
        assert!(parse("").is_empty());
        assert!(parse("   ").is_empty());
    }

    #[test]
    fn alias_resolves_to_exact_number() {
        let parsed = parse("lvl:5");
        assert_eq!(parsed.text, "");
        assert_eq!(
            parsed.number_filters["monster.level"],
            NumberFilter {
                exact: Some(vec![5.0]),
                ..Default::default()
            }
        );
    }

    #[test]
    fn comma_value_on_string_property_becomes_array() {
        let parsed = parse("role:boss,brute");
        assert_eq!(
            parsed.properties["monster.role"],
            PropertyFilter::Many(vec!["boss".into(), "brute".into()])
        );
    }

    #[test]
    fn numeric_range() {
        let parsed = parse("level:3-7");
        assert_eq!(
            parsed.number_filters["monster.level"],
            NumberFilter {
                min: Some(3.0),
                max: Some(7.0),
                exact: None,
            }
        );
    }

    #[test]
    fn numeric_range_negative_sides() {
        let parsed = parse("level:-3-7");
        assert_eq!(
            parsed.number_filters["monster.level"],
            NumberFilter {
                min: Some(-3.0),
                max: Some(7.0),
                exact: None,
            }
        );

        let parsed = parse("level:5--1");
        assert_eq!(
            parsed.number_filters["monster.level"],
            NumberFilter {
                min: Some(5.0),
                max: Some(-1.0),
                exact: None,
            }
        );
    }

    #[test]
    fn comparison_operators() {
        let parsed = parse("level:>=5");
        assert_eq!(parsed.number_filters["monster.level"].min, Some(5.0));

        let parsed = parse("level:<=5");
        assert_eq!(parsed.number_filters["monster.level"].max, Some(5.0));

        let parsed = parse("level:>5");
        let min = parsed.number_filters["monster.level"].min.unwrap();
        assert!((min - 5.001).abs() < 1e-9);

        let parsed = parse("level:<5");
        let max = parsed.number_filters["monster.level"].max.unwrap();
        assert!((max - 4.999).abs() < 1e-9);
    }

    #[test]
    fn explicit_exact_and_exact_set() {
        let parsed = parse("level:=7");
        assert_eq!(
            parsed.number_filters["monster.level"].exact,
            Some(vec![7.0])
        );

        let parsed = parse("level:1,3,5");
        assert_eq!(
            parsed.number_filters["monster.level"].exact,
            Some(vec![1.0, 3.0, 5.0])
        );
    }

    #[test]
    fn invalid_numeric_value_reverts_whole_token() {
        let parsed = parse("level:high");
        assert_eq!(parsed.text, "level:high");
        assert!(parsed.number_filters.is_empty());

        let parsed = parse("level:1,two");
        assert_eq!(parsed.text, "level:1,two");
        assert!(parsed.number_filters.is_empty());
    }

    #[test]
    fn ambiguous_prefix_stays_free_text() {
        // Both stamina and stance share the "sta" prefix.
        let parsed = parse("sta:5");
        assert_eq!(parsed.text, "sta:5");
        assert!(parsed.properties.is_empty());
        assert!(parsed.number_filters.is_empty());
    }

    #[test]
    fn leading_and_trailing_colons_are_free_text() {
        let parsed = parse(":foo level: bar");
        assert_eq!(parsed.text, ":foo level: bar");
        assert!(parsed.number_filters.is_empty());
    }

    #[test]
    fn value_is_not_resplit_on_further_colons() {
        let parsed = parse("role:chief:of:staff");
        assert_eq!(
            parsed.properties["monster.role"],
            PropertyFilter::One("chief:of:staff".into())
        );
    }

    #[test]
    fn quoted_phrases_are_always_free_text() {
        let parsed = parse("\"level:5\" goblin");
        assert_eq!(parsed.text, "level:5 goblin");
        assert!(parsed.number_filters.is_empty());
    }

    #[test]
    fn later_token_overwrites_earlier_for_same_property() {
        let parsed = parse("level:3 level:7");
        assert_eq!(
            parsed.number_filters["monster.level"].exact,
            Some(vec![7.0])
        );
        assert_eq!(parsed.number_filters.len(), 1);
    }

    #[test]
    fn boolean_property_takes_raw_value() {
        let parsed = parse("legendary:true");
        assert_eq!(
            parsed.properties["monster.legendary"],
            PropertyFilter::One("true".into())
        );
    }

    #[test]
    fn mixed_query_end_to_end() {
        let parsed = parse("goblin level:5-10 role:boss");
        assert_eq!(parsed.text, "goblin");
        assert_eq!(parsed.number_filters["monster.level"].min, Some(5.0));
        assert_eq!(parsed.number_filters["monster.level"].max, Some(10.0));
        assert_eq!(
            parsed.properties["monster.role"],
            PropertyFilter::One("boss".into())
        );
    }
}
