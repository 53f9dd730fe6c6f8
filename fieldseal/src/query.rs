//! Equality-query rewriting for deterministic attributes.
//!
//! A plaintext lookup value may be stored under several ciphertexts: one per
//! deterministic key generation, one per previous deterministic scheme, and
//! possibly as cleartext. The rewriter produces all of them so the caller can
//! build an `IN (...)` predicate.

use crate::engine::EncryptionEngine;
use crate::error::Error;
use crate::scheme::EncryptionScheme;
use std::collections::BTreeSet;
use tracing::debug;

/// Builds ciphertext candidates for equality queries.
///
/// # Example
///
/// ```
/// use fieldseal::config::EncryptionConfig;
/// use fieldseal::query::QueryRewriter;
/// use fieldseal::scheme::EncryptionScheme;
///
/// let config = EncryptionConfig::new("primary", "salt")
///     .with_deterministic_key("k1")
///     .with_deterministic_key("k2")
///     .with_iterations(1_000);
/// let scheme = EncryptionScheme::builder("email").deterministic(true).build(&config).unwrap();
///
/// let candidates = QueryRewriter::default().rewrite_equality_query("a@example.com", &scheme).unwrap();
/// assert_eq!(candidates.len(), 2);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryRewriter {
    engine: EncryptionEngine,
}

impl QueryRewriter {
    /// Creates a rewriter on top of an engine.
    #[must_use]
    pub const fn new(engine: EncryptionEngine) -> Self {
        Self { engine }
    }

    /// Returns every stored form `value` may have under `scheme`.
    ///
    /// The candidates are the union of:
    /// - `value` encrypted under each query key of the scheme
    /// - the same for each deterministic previous scheme, when `extend_queries` is on
    /// - `value` itself, when unencrypted data is supported
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the scheme is not deterministic, and
    /// key provider errors as for [`EncryptionEngine::encrypt`].
    pub fn rewrite_equality_query(
        &self,
        value: &str,
        scheme: &EncryptionScheme,
    ) -> Result<BTreeSet<String>, Error> {
        if !scheme.is_deterministic() {
            return Err(Error::Configuration(format!(
                "{}: equality queries need deterministic encryption",
                scheme.attribute_name()
            )));
        }

        let mut candidates = BTreeSet::new();
        self.add_scheme_candidates(value, scheme, &mut candidates)?;

        if scheme.extend_queries() {
            for previous in scheme.all_schemes().into_iter().skip(1) {
                if previous.is_deterministic() {
                    self.add_scheme_candidates(value, previous, &mut candidates)?;
                }
            }
        }

        if scheme.support_unencrypted_data() {
            candidates.insert(value.to_string());
        }

        debug!(
            attribute = scheme.attribute_name(),
            candidates = candidates.len(),
            "rewrote equality query"
        );
        Ok(candidates)
    }

    /// Returns the union of [`rewrite_equality_query`](Self::rewrite_equality_query)
    /// over `values`.
    ///
    /// # Errors
    ///
    /// Same as [`rewrite_equality_query`](Self::rewrite_equality_query).
    pub fn rewrite_in_query<I, S>(
        &self,
        values: I,
        scheme: &EncryptionScheme,
    ) -> Result<BTreeSet<String>, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut candidates = BTreeSet::new();
        for value in values {
            candidates.extend(self.rewrite_equality_query(value.as_ref(), scheme)?);
        }
        Ok(candidates)
    }

    fn add_scheme_candidates(
        &self,
        value: &str,
        scheme: &EncryptionScheme,
        candidates: &mut BTreeSet<String>,
    ) -> Result<(), Error> {
        for key in scheme.key_provider().query_keys()? {
            candidates.insert(self.engine.encrypt_with_key(value, scheme, &key)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EncryptionConfig, PreviousKeys};
    use std::sync::Arc;

    fn config() -> EncryptionConfig {
        EncryptionConfig::new("primary", "salt").with_deterministic_key("k1").with_iterations(10)
    }

    fn deterministic(config: &EncryptionConfig) -> Arc<EncryptionScheme> {
        EncryptionScheme::builder("email").deterministic(true).build(config).unwrap()
    }

    #[test]
    fn test_rejects_random_scheme() {
        let scheme = EncryptionScheme::builder("name").build(&config()).unwrap();
        let result = QueryRewriter::default().rewrite_equality_query("Alice", &scheme);

        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_single_key_single_candidate() {
        let scheme = deterministic(&config());
        let engine = EncryptionEngine::new();

        let candidates =
            QueryRewriter::new(engine).rewrite_equality_query("a@example.com", &scheme).unwrap();

        assert_eq!(candidates.len(), 1);
        assert!(candidates.contains(&engine.encrypt("a@example.com", &scheme).unwrap()));
    }

    #[test]
    fn test_candidates_decrypt_to_value() {
        let scheme = deterministic(&config().with_deterministic_key("k2"));
        let engine = EncryptionEngine::new();

        let candidates =
            QueryRewriter::new(engine).rewrite_equality_query("a@example.com", &scheme).unwrap();

        assert_eq!(candidates.len(), 2);
        for candidate in &candidates {
            assert_eq!(engine.decrypt(candidate, &scheme).unwrap(), "a@example.com");
        }
    }

    #[test]
    fn test_normalizes_before_encrypting() {
        let scheme = EncryptionScheme::builder("email")
            .deterministic(true)
            .downcase(true)
            .build(&config())
            .unwrap();
        let rewriter = QueryRewriter::default();

        assert_eq!(
            rewriter.rewrite_equality_query("A@Example.com", &scheme).unwrap(),
            rewriter.rewrite_equality_query("a@example.com", &scheme).unwrap()
        );
    }

    #[test]
    fn test_previous_generation_included() {
        let config = config()
            .with_previous(PreviousKeys { deterministic_key: vec!["k0".into()], ..PreviousKeys::default() });
        let scheme = deterministic(&config);

        let candidates = QueryRewriter::default().rewrite_equality_query("v", &scheme).unwrap();
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn test_extend_queries_off_skips_previous_schemes() {
        let config = config()
            .with_extend_queries(false)
            .with_previous(PreviousKeys { deterministic_key: vec!["k0".into()], ..PreviousKeys::default() });
        let scheme = deterministic(&config);

        let candidates = QueryRewriter::default().rewrite_equality_query("v", &scheme).unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn test_random_previous_scheme_skipped() {
        let scheme = EncryptionScheme::builder("email")
            .deterministic(true)
            .previous(EncryptionScheme::builder("email"))
            .build(&config())
            .unwrap();

        let candidates = QueryRewriter::default().rewrite_equality_query("v", &scheme).unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn test_unencrypted_value_included() {
        let scheme = deterministic(&config().with_support_unencrypted_data(true));

        let candidates = QueryRewriter::default().rewrite_equality_query("v", &scheme).unwrap();

        assert_eq!(candidates.len(), 2);
        assert!(candidates.contains("v"));
    }

    #[test]
    fn test_in_query_union() {
        let scheme = deterministic(&config());
        let rewriter = QueryRewriter::default();

        let candidates = rewriter.rewrite_in_query(["a", "b", "a"], &scheme).unwrap();
        assert_eq!(candidates.len(), 2);
    }
}
