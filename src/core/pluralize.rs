//! Collection names for entity types
//!
//! Entity types are registered by their singular PascalCase name; the URL
//! collection name is derived from it unless a plugin supplies one.

/// Utility for deriving collection names from entity type names
pub struct Pluralizer;

impl Pluralizer {
    /// Convert a singular type name to its collection name
    ///
    /// Compound names of the form `<Noun>Of<Rest>` pluralize the head noun.
    ///
    /// # Examples
    ///
    /// ```
    /// use sta::core::pluralize::Pluralizer;
    ///
    /// assert_eq!(Pluralizer::pluralize("Thing"), "Things");
    /// assert_eq!(Pluralizer::pluralize("ObservedProperty"), "ObservedProperties");
    /// assert_eq!(Pluralizer::pluralize("FeatureOfInterest"), "FeaturesOfInterest");
    /// ```
    pub fn pluralize(singular: &str) -> String {
        if let Some(pos) = singular.find("Of").filter(|&p| p > 0) {
            let (head, tail) = singular.split_at(pos);
            if tail[2..].starts_with(|c: char| c.is_ascii_uppercase()) {
                return format!("{}{}", Self::pluralize_word(head), tail);
            }
        }
        Self::pluralize_word(singular)
    }

    fn pluralize_word(word: &str) -> String {
        if word.is_empty() {
            return word.to_string();
        }

        let lower = word.to_ascii_lowercase();
        match lower.as_str() {
            // Consonant + y -> ies
            s if s.ends_with('y')
                && s.len() > 1
                && !matches!(s.as_bytes()[s.len() - 2], b'a' | b'e' | b'i' | b'o' | b'u') =>
            {
                format!("{}ies", &word[..word.len() - 1])
            }

            // Sibilants -> es
            s if s.ends_with('s')
                || s.ends_with("sh")
                || s.ends_with("ch")
                || s.ends_with('x')
                || s.ends_with('z') =>
            {
                format!("{word}es")
            }

            _ => format!("{word}s"),
        }
    }
}
