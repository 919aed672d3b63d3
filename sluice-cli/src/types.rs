//! Common types used across CLI modules

use uuid::Uuid;

/// Identifier that can be either a full UUID or an unambiguous prefix
#[derive(Debug, Clone, PartialEq)]
pub enum IdOrPrefix {
    Full(Uuid),
    /// Prefix that should uniquely identify a resource
    Prefix(String),
}

impl IdOrPrefix {
    /// Parses as a full UUID first, otherwise keeps the input as a prefix
    pub fn parse(input: &str) -> Self {
        match Uuid::parse_str(input) {
            Ok(uuid) => IdOrPrefix::Full(uuid),
            Err(_) => IdOrPrefix::Prefix(input.to_lowercase()),
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            IdOrPrefix::Full(uuid) => Some(*uuid),
            IdOrPrefix::Prefix(_) => None,
        }
    }

    /// Picks the single id among `candidates` this identifier designates
    pub fn pick(&self, kind: &str, candidates: impl IntoIterator<Item = Uuid>) -> anyhow::Result<Uuid> {
        let prefix = match self {
            IdOrPrefix::Full(uuid) => return Ok(*uuid),
            IdOrPrefix::Prefix(prefix) => prefix,
        };

        let matches: Vec<Uuid> = candidates
            .into_iter()
            .filter(|id| id.to_string().starts_with(prefix.as_str()))
            .collect();

        match matches.as_slice() {
            [] => anyhow::bail!("No {} found with ID starting with '{}'", kind, prefix),
            [id] => Ok(*id),
            _ => {
                let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
                anyhow::bail!(
                    "Ambiguous prefix '{}' matches multiple {}s: {}",
                    prefix,
                    kind,
                    ids.join(", ")
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> Uuid {
        Uuid::parse_str(s).unwrap()
    }

    #[test]
    fn test_parse_full_and_prefix() {
        let full = "6f1c2a9e-0000-4000-8000-000000000001";
        assert_eq!(IdOrPrefix::parse(full), IdOrPrefix::Full(id(full)));
        assert_eq!(IdOrPrefix::parse("6F1C"), IdOrPrefix::Prefix("6f1c".to_string()));
    }

    #[test]
    fn test_pick_by_prefix() {
        let a = id("6f1c2a9e-0000-4000-8000-000000000001");
        let b = id("6f1d0000-0000-4000-8000-000000000002");
        let candidates = [a, b];

        assert_eq!(IdOrPrefix::parse("6f1c").pick("pipeline", candidates).unwrap(), a);

        let ambiguous = IdOrPrefix::parse("6f1").pick("pipeline", candidates).unwrap_err();
        assert!(ambiguous.to_string().starts_with("Ambiguous prefix '6f1'"));

        let missing = IdOrPrefix::parse("ab").pick("pipeline", candidates).unwrap_err();
        assert_eq!(missing.to_string(), "No pipeline found with ID starting with 'ab'");
    }
}
