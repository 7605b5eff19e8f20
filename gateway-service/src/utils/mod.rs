//! Token generation.

use rand::RngCore;
use rand::rngs::OsRng;

/// Fixed prefix making gateway credentials recognizable in logs and support
/// tickets without revealing anything about the token itself.
pub const TOKEN_PREFIX: &str = "sk_live_";

/// Generate an opaque API token: 256 bits from the OS CSPRNG, hex encoded.
pub fn generate_api_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    format!("{}{}", TOKEN_PREFIX, hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_token_shape() {
        let token = generate_api_token();
        assert!(token.starts_with(TOKEN_PREFIX));
        assert_eq!(token.len(), TOKEN_PREFIX.len() + 64);
        assert!(token[TOKEN_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_tokens_are_unique() {
        let tokens: HashSet<_> = (0..64).map(|_| generate_api_token()).collect();
        assert_eq!(tokens.len(), 64);
    }
}
