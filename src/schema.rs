//! Schema registry: class and property config lookup.
//!
//! The registry is the engine's view of the (external) schema source. It
//! precomputes the lowercase lookup maps the query parser's resolution
//! cascade consults: alias, display name, and id-suffix.

use std::collections::HashMap;

use crate::model::types::{ClassConfig, PropertyConfig};

/// Read-only registry of class configs, indexed for property resolution.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    classes: HashMap<String, ClassConfig>,
}

impl SchemaRegistry {
    pub fn new(classes: Vec<ClassConfig>) -> Self {
        let classes = classes.into_iter().map(|c| (c.id.clone(), c)).collect();
        Self { classes }
    }

    pub fn class(&self, id: &str) -> Option<&ClassConfig> {
        self.classes.get(id)
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassConfig> {
        self.classes.values()
    }

    /// Property configs of one class, empty when the class is unknown.
    pub fn class_properties(&self, class_id: &str) -> &[PropertyConfig] {
        self.classes
            .get(class_id)
            .map(|c| c.properties.as_slice())
            .unwrap_or(&[])
    }

    /// Look up one property config on a class.
    pub fn property(&self, class_id: &str, property_id: &str) -> Option<&PropertyConfig> {
        self.class_properties(class_id)
            .iter()
            .find(|p| p.id == property_id)
    }

    /// All property configs across every class. Used when parsing a query
    /// without an active class, and for facet-relevance checks at index time.
    pub fn all_properties(&self) -> Vec<&PropertyConfig> {
        let mut out: Vec<&PropertyConfig> = self
            .classes
            .values()
            .flat_map(|c| c.properties.iter())
            .collect();
        // Deterministic order regardless of HashMap iteration.
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out.dedup_by(|a, b| a.id == b.id);
        out
    }
}

/// Precomputed lowercase lookup maps over a slice of property configs.
///
/// Resolution order is fixed: exact alias, exact display name (internal
/// whitespace stripped), exact id-suffix, then an unambiguous prefix of the
/// id-suffix for keys of at least two characters. Any miss or ambiguity means
/// the token stays free text.
pub struct PropertyResolver<'a> {
    configs: Vec<&'a PropertyConfig>,
    by_alias: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
    by_suffix: HashMap<String, usize>,
    suffixes: Vec<(String, usize)>,
}

impl<'a> PropertyResolver<'a> {
    pub fn new<I>(configs: I) -> Self
    where
        I: IntoIterator<Item = &'a PropertyConfig>,
    {
        let configs: Vec<&PropertyConfig> = configs.into_iter().collect();
        let mut by_alias = HashMap::new();
        let mut by_name = HashMap::new();
        let mut by_suffix = HashMap::new();
        let mut suffixes = Vec::new();

        for (idx, config) in configs.iter().enumerate() {
            for alias in &config.aliases {
                by_alias.entry(alias.to_lowercase()).or_insert(idx);
            }
            let name_key: String = config
                .name
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_lowercase();
            by_name.entry(name_key).or_insert(idx);

            let suffix = config.id_suffix();
            by_suffix.entry(suffix.clone()).or_insert(idx);
            suffixes.push((suffix, idx));
        }

        Self {
            configs,
            by_alias,
            by_name,
            by_suffix,
            suffixes,
        }
    }

    /// Resolve a query key to a property config, or `None` when unresolved
    /// or ambiguous.
    pub fn resolve(&self, key: &str) -> Option<&'a PropertyConfig> {
        let key = key.to_lowercase();

        if let Some(&idx) = self.by_alias.get(&key) {
            return Some(self.configs[idx]);
        }
        if let Some(&idx) = self.by_name.get(&key) {
            return Some(self.configs[idx]);
        }
        if let Some(&idx) = self.by_suffix.get(&key) {
            return Some(self.configs[idx]);
        }

        // Prefix attempt: unique match required, short keys never qualify.
        if key.len() < 2 {
            return None;
        }
        let mut candidates = self
            .suffixes
            .iter()
            .filter(|(suffix, _)| suffix.starts_with(&key));
        let first = candidates.next()?;
        if candidates.next().is_some() {
            return None;
        }
        Some(self.configs[first.1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::PropertyDatatype;

    fn configs() -> Vec<PropertyConfig> {
        vec![
            PropertyConfig::new("monster.level", "Challenge Level", PropertyDatatype::Number)
                .with_aliases(&["lvl", "cr"]),
            PropertyConfig::new("monster.role", "Role", PropertyDatatype::String).multi(),
            PropertyConfig::new("monster.stamina", "Stamina", PropertyDatatype::Number),
            PropertyConfig::new("monster.stance", "Stance", PropertyDatatype::String),
        ]
    }

    #[test]
    fn resolves_exact_alias_case_insensitive() {
        let configs = configs();
        let resolver = PropertyResolver::new(configs.iter());
        assert_eq!(resolver.resolve("LVL").unwrap().id, "monster.level");
        assert_eq!(resolver.resolve("cr").unwrap().id, "monster.level");
    }

    #[test]
    fn resolves_display_name_without_internal_whitespace() {
        let configs = configs();
        let resolver = PropertyResolver::new(configs.iter());
        assert_eq!(
            resolver.resolve("challengelevel").unwrap().id,
            "monster.level"
        );
    }

    #[test]
    fn resolves_id_suffix() {
        let configs = configs();
        let resolver = PropertyResolver::new(configs.iter());
        assert_eq!(resolver.resolve("role").unwrap().id, "monster.role");
        assert_eq!(resolver.resolve("LEVEL").unwrap().id, "monster.level");
    }

    #[test]
    fn resolves_unambiguous_prefix() {
        let configs = configs();
        let resolver = PropertyResolver::new(configs.iter());
        assert_eq!(resolver.resolve("ro").unwrap().id, "monster.role");
        assert_eq!(resolver.resolve("lev").unwrap().id, "monster.level");
    }

    #[test]
    fn ambiguous_prefix_fails() {
        let configs = configs();
        let resolver = PropertyResolver::new(configs.iter());
        // Both "stamina" and "stance" start with "sta".
        assert!(resolver.resolve("sta").is_none());
        assert!(resolver.resolve("stam").is_some());
    }

    #[test]
    fn single_char_prefix_never_matches() {
        let configs = configs();
        let resolver = PropertyResolver::new(configs.iter());
        assert!(resolver.resolve("r").is_none());
    }

    #[test]
    fn unknown_key_fails() {
        let configs = configs();
        let resolver = PropertyResolver::new(configs.iter());
        assert!(resolver.resolve("weight").is_none());
    }

    #[test]
    fn registry_scopes_properties_per_class() {
        let registry = SchemaRegistry::new(vec![
            ClassConfig {
                id: "monster".into(),
                name: "Monster".into(),
                properties: configs(),
            },
            ClassConfig {
                id: "item".into(),
                name: "Item".into(),
                properties: vec![PropertyConfig::new(
                    "item.rarity",
                    "Rarity",
                    PropertyDatatype::String,
                )],
            },
        ]);

        assert!(registry.property("monster", "monster.level").is_some());
        assert!(registry.property("item", "monster.level").is_none());
        assert_eq!(registry.class_properties("unknown").len(), 0);
        assert_eq!(registry.all_properties().len(), 5);
    }
}
