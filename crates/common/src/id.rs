//! Token generation for the identity boundary.
//!
//! Every other identifier in this system is a natural key (a slug or a
//! per-scope sequential number minted by the Counter primitive); the one
//! place that needs an opaque random identifier is the session token.

use uuid::Uuid;

/// Generates opaque random tokens.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    _private: (),
}

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Generate a cryptographically random session token.
    #[must_use]
    pub fn generate_token(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_token_is_32_hex_chars() {
        let id_gen = IdGenerator::new();
        let token = id_gen.generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generate_token_is_unique() {
        let id_gen = IdGenerator::new();
        assert_ne!(id_gen.generate_token(), id_gen.generate_token());
    }
}
