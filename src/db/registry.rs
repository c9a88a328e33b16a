//! DSN registry: named connection configurations.

use crate::config::DsnConfig;
use crate::error::{DbError, DbResult};
use indexmap::IndexMap;
use tracing::{debug, info};

/// Prefix for names generated for configurations registered without one.
pub const AUTO_NAME_PREFIX: &str = "PDODB-";

/// Named DSN configurations, in registration order.
///
/// Names are unique. Registering does not connect.
#[derive(Debug, Clone, Default)]
pub struct DsnRegistry {
    configs: IndexMap<String, DsnConfig>,
}

impl DsnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a configuration and return its name.
    ///
    /// A blank name is replaced with `PDODB-<n>`, where `n` is one more than
    /// the number of registered configurations.
    pub fn register(&mut self, mut config: DsnConfig) -> DbResult<String> {
        config.validate()?;

        let name = config.name.trim().to_string();
        let name = if name.is_empty() {
            self.next_auto_name()
        } else {
            name
        };

        if self.configs.contains_key(&name) {
            return Err(DbError::duplicate_name(name));
        }

        config.name = name.clone();
        info!(
            dsn = %name,
            engine = %config.engine,
            target = %config.masked_url(),
            "Registered DSN"
        );
        self.configs.insert(name.clone(), config);
        Ok(name)
    }

    fn next_auto_name(&self) -> String {
        let mut n = self.configs.len() + 1;
        loop {
            let candidate = format!("{}{}", AUTO_NAME_PREFIX, n);
            if !self.configs.contains_key(&candidate) {
                debug!(dsn = %candidate, "Generated DSN name");
                return candidate;
            }
            n += 1;
        }
    }

    pub fn lookup(&self, name: &str) -> DbResult<&DsnConfig> {
        self.configs
            .get(name)
            .ok_or_else(|| DbError::unknown_dsn(name))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.configs.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = DsnRegistry::new();
        let name = registry
            .register(DsnConfig::sqlite_memory("local"))
            .unwrap();

        assert_eq!(name, "local");
        assert!(registry.exists("local"));
        assert_eq!(registry.lookup("local").unwrap().name, "local");
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = DsnRegistry::new();
        registry.register(DsnConfig::sqlite_memory("a")).unwrap();
        let err = registry.register(DsnConfig::sqlite_memory("a")).unwrap_err();
        assert!(matches!(err, DbError::DuplicateName { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_auto_names() {
        let mut registry = DsnRegistry::new();
        let first = registry.register(DsnConfig::sqlite_memory("")).unwrap();
        let second = registry.register(DsnConfig::sqlite_memory("  ")).unwrap();

        assert_eq!(first, "PDODB-1");
        assert_eq!(second, "PDODB-2");
        assert_eq!(registry.lookup("PDODB-2").unwrap().name, "PDODB-2");
    }

    #[test]
    fn test_auto_name_skips_taken() {
        let mut registry = DsnRegistry::new();
        registry
            .register(DsnConfig::sqlite_memory("PDODB-2"))
            .unwrap();
        assert_eq!(
            registry.register(DsnConfig::sqlite_memory("")).unwrap(),
            "PDODB-3"
        );
    }

    #[test]
    fn test_unknown_lookup() {
        let registry = DsnRegistry::new();
        assert!(!registry.exists("missing"));
        assert!(matches!(
            registry.lookup("missing"),
            Err(DbError::UnknownDsn { .. })
        ));
    }

    #[test]
    fn test_names_in_registration_order() {
        let mut registry = DsnRegistry::new();
        registry.register(DsnConfig::sqlite_memory("b")).unwrap();
        registry.register(DsnConfig::sqlite_memory("a")).unwrap();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["b", "a"]);
    }
}
