//! Facet aggregation and filter-selection state.
//!
//! Facets drive the filter sidebar: for every facet-flagged property of the
//! active class, the aggregator produces a value/count breakdown over the
//! currently filtered entity subset. Counts are occurrence counts — a
//! multi-valued property contributes one increment per array element,
//! duplicates included.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::types::{
    Entity, NumberFilter, PropertyConfig, PropertyDatatype, PropertyValue, format_number,
};

/// One bucket of a facet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetValue {
    pub value: String,
    pub count: usize,
}

/// Aggregated breakdown of one property over an entity subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facet {
    pub property_id: String,
    pub name: String,
    pub datatype: PropertyDatatype,
    /// Buckets sorted by numeric-aware collation of the value.
    pub values: Vec<FacetValue>,
    /// Observed bounds, number facets only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// Compute facets for the given property configs over an entity subset.
///
/// Properties not flagged `is_facet`, and properties with zero observed
/// values, are omitted.
pub fn aggregate_facets(configs: &[PropertyConfig], entities: &[&Entity]) -> Vec<Facet> {
    let mut facets = Vec::new();

    for config in configs.iter().filter(|c| c.is_facet) {
        let mut buckets: BTreeMap<String, usize> = BTreeMap::new();
        let mut min: Option<f64> = None;
        let mut max: Option<f64> = None;

        for entity in entities {
            let Some(value) = entity.properties.get(&config.id) else {
                continue;
            };
            for occurrence in occurrences(value) {
                if config.datatype == PropertyDatatype::Number {
                    if let Some(n) = occurrence.parse::<f64>().ok().filter(|n| n.is_finite()) {
                        min = Some(min.map_or(n, |m| m.min(n)));
                        max = Some(max.map_or(n, |m| m.max(n)));
                    }
                }
                *buckets.entry(occurrence).or_insert(0) += 1;
            }
        }

        if buckets.is_empty() {
            continue;
        }

        let mut values: Vec<FacetValue> = buckets
            .into_iter()
            .map(|(value, count)| FacetValue { value, count })
            .collect();
        values.sort_by(|a, b| natural_cmp(&a.value, &b.value));

        facets.push(Facet {
            property_id: config.id.clone(),
            name: config.name.clone(),
            datatype: config.datatype,
            values,
            min,
            max,
        });
    }

    facets
}

/// The bucket strings one property value contributes.
fn occurrences(value: &PropertyValue) -> Vec<String> {
    match value {
        PropertyValue::StringArray(items) => items.clone(),
        other => vec![other.to_display_string()],
    }
}

/// Numeric-aware, case-insensitive string ordering: digit runs compare as
/// numbers, everything else compares per character. `level 2` sorts before
/// `level 10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ca = a.chars().peekable();
    let mut cb = b.chars().peekable();
    // Case differences only break ties between otherwise-equal strings.
    let mut case_tiebreak = Ordering::Equal;

    loop {
        match (ca.peek().copied(), cb.peek().copied()) {
            (None, None) => return case_tiebreak,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                if x.is_ascii_digit() && y.is_ascii_digit() {
                    let na = take_digits(&mut ca);
                    let nb = take_digits(&mut cb);
                    let (na, nb) = (na.trim_start_matches('0'), nb.trim_start_matches('0'));
                    let ord = na.len().cmp(&nb.len()).then_with(|| na.cmp(nb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                } else {
                    let ord = x.to_lowercase().cmp(y.to_lowercase());
                    if ord != Ordering::Equal {
                        return ord;
                    }
                    if case_tiebreak == Ordering::Equal {
                        case_tiebreak = x.cmp(&y);
                    }
                    ca.next();
                    cb.next();
                }
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut out = String::new();
    while let Some(&c) = chars.peek() {
        if !c.is_ascii_digit() {
            break;
        }
        out.push(c);
        chars.next();
    }
    out
}

/// Active facet filter selections, as held by filter UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FacetSelections {
    /// property id -> selected values.
    #[serde(default)]
    pub strings: BTreeMap<String, Vec<String>>,
    /// property id -> numeric constraints.
    #[serde(default)]
    pub numbers: BTreeMap<String, NumberFilter>,
}

impl FacetSelections {
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty() && self.numbers.is_empty()
    }

    /// Add the value if absent, remove it if present. The key disappears
    /// once its selection list is empty.
    pub fn toggle_string(&mut self, property_id: &str, value: &str) {
        let values = self.strings.entry(property_id.to_string()).or_default();
        if let Some(pos) = values.iter().position(|v| v == value) {
            values.remove(pos);
        } else {
            values.push(value.to_string());
        }
        if values.is_empty() {
            self.strings.remove(property_id);
        }
    }

    /// Merge a new lower bound into the numeric selection; `None` clears it.
    pub fn set_number_min(&mut self, property_id: &str, min: Option<f64>) {
        self.merge_number(property_id, |f| f.min = min);
    }

    /// Merge a new upper bound into the numeric selection; `None` clears it.
    pub fn set_number_max(&mut self, property_id: &str, max: Option<f64>) {
        self.merge_number(property_id, |f| f.max = max);
    }

    /// Replace the exact-value set; `None` or an empty set clears it.
    pub fn set_number_exact(&mut self, property_id: &str, exact: Option<Vec<f64>>) {
        self.merge_number(property_id, |f| {
            f.exact = exact.filter(|v| !v.is_empty());
        });
    }

    fn merge_number(&mut self, property_id: &str, apply: impl FnOnce(&mut NumberFilter)) {
        let entry = self.numbers.entry(property_id.to_string()).or_default();
        apply(entry);
        if entry.is_empty() {
            self.numbers.remove(property_id);
        }
    }

    /// Serialize to query-string pairs: `s_<propId>=a,b` for string facets,
    /// `n_<propId>=min:X,max:Y,exact:A|B|C` for numeric facets.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for (prop, values) in &self.strings {
            pairs.push((format!("s_{prop}"), values.join(",")));
        }
        for (prop, filter) in &self.numbers {
            let mut parts = Vec::new();
            if let Some(min) = filter.min {
                parts.push(format!("min:{}", format_number(min)));
            }
            if let Some(max) = filter.max {
                parts.push(format!("max:{}", format_number(max)));
            }
            if let Some(exact) = &filter.exact {
                let joined = exact
                    .iter()
                    .map(|n| format_number(*n))
                    .collect::<Vec<_>>()
                    .join("|");
                parts.push(format!("exact:{joined}"));
            }
            pairs.push((format!("n_{prop}"), parts.join(",")));
        }
        pairs
    }

    /// Parse selections back out of query-string pairs. Unrecognized keys
    /// and malformed values are ignored.
    pub fn from_query_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut selections = Self::default();

        for (key, value) in pairs {
            if let Some(prop) = key.strip_prefix("s_") {
                let values: Vec<String> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                if !values.is_empty() {
                    selections.strings.insert(prop.to_string(), values);
                }
            } else if let Some(prop) = key.strip_prefix("n_") {
                let mut filter = NumberFilter::default();
                for part in value.split(',') {
                    let Some((field, raw)) = part.split_once(':') else {
                        continue;
                    };
                    match field {
                        "min" => filter.min = raw.parse().ok(),
                        "max" => filter.max = raw.parse().ok(),
                        "exact" => {
                            let exact: Vec<f64> =
                                raw.split('|').filter_map(|n| n.parse().ok()).collect();
                            if !exact.is_empty() {
                                filter.exact = Some(exact);
                            }
                        }
                        _ => {}
                    }
                }
                if !filter.is_empty() {
                    selections.numbers.insert(prop.to_string(), filter);
                }
            }
        }

        selections
    }
}
