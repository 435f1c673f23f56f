//! Maps recipient candidates to the owning disposable address.

use std::collections::HashMap;

use tracing::debug;

use crate::Result;
use crate::model::{AddressMatch, OwnerId};
use crate::store::AddressRegistry;

/// Resolves recipients against the allow-list and the address registry.
///
/// Registry answers (hits and misses) are cached by lower-cased address for
/// the lifetime of the resolver, which is one poll invocation.
pub struct AddressResolver<'a, R> {
    registry: &'a R,
    domains: Vec<String>,
    cache: HashMap<String, Option<OwnerId>>,
}

impl<'a, R: AddressRegistry> AddressResolver<'a, R> {
    /// Creates a resolver with a snapshot of the active domains.
    pub fn new(registry: &'a R, domains: Vec<String>) -> Self {
        let domains = domains
            .into_iter()
            .map(|d| d.trim().trim_start_matches('@').to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        Self {
            registry,
            domains,
            cache: HashMap::new(),
        }
    }

    /// Finds the owner of a message from its ordered recipient candidates.
    ///
    /// Candidates on an allowed domain are probed first, in order. If none of
    /// them is registered, every candidate is probed in order, which covers
    /// addresses on domains missing from the allow-list snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if a registry lookup fails.
    pub async fn resolve(&mut self, candidates: &[String]) -> Result<Option<AddressMatch>> {
        let allowed: Vec<&String> = candidates
            .iter()
            .filter(|address| self.is_allowed(address))
            .collect();

        for address in allowed {
            if let Some(found) = self.probe(address).await? {
                return Ok(Some(found));
            }
        }

        for address in candidates {
            if let Some(found) = self.probe(address).await? {
                debug!(address = %address, "Matched outside the domain allow-list");
                return Ok(Some(found));
            }
        }

        Ok(None)
    }

    /// Returns true if the address ends in an allowed domain.
    fn is_allowed(&self, address: &str) -> bool {
        let address = address.to_lowercase();
        self.domains
            .iter()
            .any(|domain| address.ends_with(&format!("@{domain}")))
    }

    async fn probe(&mut self, address: &str) -> Result<Option<AddressMatch>> {
        let key = address.to_lowercase();
        let owner = match self.cache.get(&key) {
            Some(cached) => *cached,
            None => {
                let owner = self.registry.find_active_owner(&key).await?;
                self.cache.insert(key.clone(), owner);
                owner
            }
        };

        Ok(owner.map(|owner_id| AddressMatch {
            owner_id,
            matched_recipient: key,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct FakeRegistry {
        entries: Vec<(&'static str, i64)>,
        lookups: AtomicUsize,
    }

    impl FakeRegistry {
        fn new(entries: Vec<(&'static str, i64)>) -> Self {
            Self {
                entries,
                lookups: AtomicUsize::new(0),
            }
        }
    }

    impl AddressRegistry for FakeRegistry {
        async fn find_active_owner(&self, address: &str) -> Result<Option<OwnerId>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .entries
                .iter()
                .find(|(a, _)| *a == address)
                .map(|(_, id)| OwnerId(*id)))
        }
    }

    fn list(addresses: &[&str]) -> Vec<String> {
        addresses.iter().map(|a| (*a).to_string()).collect()
    }

    #[tokio::test]
    async fn test_allow_listed_address_wins() {
        let registry = FakeRegistry::new(vec![("legacy@old.example", 1), ("box@temp.example", 2)]);
        let mut resolver = AddressResolver::new(&registry, vec!["temp.example".to_string()]);

        // The non-allow-listed address comes first but is registered too.
        let found = resolver
            .resolve(&list(&["legacy@old.example", "box@temp.example"]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.owner_id, OwnerId(2));
        assert_eq!(found.matched_recipient, "box@temp.example");
    }

    #[tokio::test]
    async fn test_falls_back_to_any_registered_address() {
        let registry = FakeRegistry::new(vec![("legacy@old.example", 1)]);
        let mut resolver = AddressResolver::new(&registry, vec!["temp.example".to_string()]);

        let found = resolver
            .resolve(&list(&["nobody@temp.example", "legacy@old.example"]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.owner_id, OwnerId(1));
    }

    #[tokio::test]
    async fn test_no_match() {
        let registry = FakeRegistry::new(vec![]);
        let mut resolver = AddressResolver::new(&registry, vec!["temp.example".to_string()]);

        assert!(resolver.resolve(&list(&["x@temp.example"])).await.unwrap().is_none());
        assert!(resolver.resolve(&[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lookups_are_cached_per_resolver() {
        let registry = FakeRegistry::new(vec![("box@temp.example", 2)]);
        let mut resolver = AddressResolver::new(&registry, vec!["@Temp.Example".to_string()]);

        for _ in 0..3 {
            resolver
                .resolve(&list(&["miss@temp.example", "BOX@temp.example"]))
                .await
                .unwrap();
        }
        // One lookup per distinct address: the miss is cached too.
        assert_eq!(registry.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_subdomain_is_not_an_allowed_suffix_match() {
        let registry = FakeRegistry::new(vec![("a@eviltemp.example", 1), ("b@temp.example", 2)]);
        let mut resolver = AddressResolver::new(&registry, vec!["temp.example".to_string()]);

        let found = resolver
            .resolve(&list(&["a@eviltemp.example", "b@temp.example"]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.owner_id, OwnerId(2));
    }
}
