//! Deterministic trigger/function naming.
//!
//! Names derive from `(cache name, target table, source table)` so that
//! re-running synthesis on an unchanged cache yields byte-identical DDL and
//! the migration engine can diff by name. Names exceeding PostgreSQL's
//! 63-byte identifier limit are shortened deterministically: the prefix is
//! truncated and an 8-hex-digit SHA-256 tag of the full name is appended, so
//! the same inputs always map to the same short name.

use sha2::{Digest, Sha256};

/// PostgreSQL's identifier length limit (NAMEDATALEN - 1).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Name of the generated trigger function for a (cache, source) pair.
pub fn function_name(cache: &str, target: &str, source: &str) -> String {
    shorten(&format!("pgdn_{cache}__{target}__{source}_fn"))
}

/// Name of the generated trigger for a (cache, source) pair.
pub fn trigger_name(cache: &str, target: &str, source: &str) -> String {
    shorten(&format!("pgdn_{cache}__{target}__{source}_tg"))
}

/// Shorten an identifier to fit [`MAX_IDENTIFIER_LEN`] bytes.
pub fn shorten(name: &str) -> String {
    if name.len() <= MAX_IDENTIFIER_LEN {
        return name.to_string();
    }
    let digest = Sha256::digest(name.as_bytes());
    let tag: String = digest[..4].iter().map(|b| format!("{b:02x}")).collect();
    // keep room for '_' + 8 hex chars
    let keep = MAX_IDENTIFIER_LEN - 9;
    let mut prefix = &name[..keep];
    // Never split a multi-byte character (identifiers are normally ASCII,
    // but quoted identifiers may not be).
    while !name.is_char_boundary(prefix.len()) {
        prefix = &prefix[..prefix.len() - 1];
    }
    format!("{prefix}_{tag}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_names_pass_through() {
        assert_eq!(
            function_name("orders_count", "clients", "orders"),
            "pgdn_orders_count__clients__orders_fn"
        );
        assert_eq!(
            trigger_name("orders_count", "clients", "orders"),
            "pgdn_orders_count__clients__orders_tg"
        );
    }

    #[test]
    fn test_function_and_trigger_names_differ() {
        let f = function_name("c", "t", "s");
        let t = trigger_name("c", "t", "s");
        assert_ne!(f, t);
    }

    #[test]
    fn test_long_names_fit_limit() {
        let long = "a".repeat(80);
        let name = function_name(&long, "clients", "orders");
        assert!(name.len() <= MAX_IDENTIFIER_LEN);
    }

    #[test]
    fn test_shortening_is_deterministic() {
        let long = format!("pgdn_{}__clients__orders_fn", "x".repeat(100));
        assert_eq!(shorten(&long), shorten(&long));
    }

    #[test]
    fn test_shortened_names_keep_readable_prefix() {
        let long = format!("pgdn_very_long_cache_name_{}", "y".repeat(60));
        let short = shorten(&long);
        assert!(short.starts_with("pgdn_very_long_cache_name_"));
        assert_eq!(short.len(), MAX_IDENTIFIER_LEN);
    }

    #[test]
    fn test_distinct_long_names_stay_distinct() {
        let a = shorten(&format!("pgdn_{}_a", "z".repeat(100)));
        let b = shorten(&format!("pgdn_{}_b", "z".repeat(100)));
        assert_ne!(a, b);
    }
}
