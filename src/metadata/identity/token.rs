//! Public key tokens.
//!
//! A public key token is the abbreviated form of a strong-name public key used in assembly
//! references and display names: the last eight bytes of the SHA-1 hash of the public key blob,
//! in reverse order.
//!
//! # Reference
//! - [ECMA-335 II.6.2.1.3](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use std::fmt;

use sha1::{Digest, Sha1};

use crate::Result;

/// An eight-byte public key token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKeyToken([u8; 8]);

impl PublicKeyToken {
    /// Compute the token of a public key blob, or `None` for an empty key.
    #[must_use]
    pub fn compute(public_key: &[u8]) -> Option<PublicKeyToken> {
        if public_key.is_empty() {
            return None;
        }

        let mut hasher = Sha1::new();
        hasher.update(public_key);
        let result = hasher.finalize();

        let mut token = [0u8; 8];
        token.copy_from_slice(&result[result.len() - 8..]);
        token.reverse();

        Some(PublicKeyToken(token))
    }

    /// Create a token from its display-order bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 8]) -> PublicKeyToken {
        PublicKeyToken(bytes)
    }

    /// Parse the 16 hex digit display form.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `value` is not exactly eight hex-encoded bytes.
    pub fn parse(value: &str) -> Result<PublicKeyToken> {
        let token_bytes = hex::decode(value)
            .map_err(|e| malformed_error!("Invalid hex in PublicKeyToken '{}': {}", value, e))?;

        let Ok(token) = <[u8; 8]>::try_from(token_bytes.as_slice()) else {
            return Err(malformed_error!(
                "PublicKeyToken must be exactly 8 bytes (16 hex characters), got {} bytes from '{}'",
                token_bytes.len(),
                value
            ));
        };

        Ok(PublicKeyToken(token))
    }

    /// Token bytes in display order.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for PublicKeyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        signing::keys::snk::ECMA_PUBLIC_KEY,
        test::keys::{
            key_1024_b, key_2048, JOHN_PUBLIC_KEY_HEX, JOHN_TOKEN, KEYPAIR_2048_TOKEN,
            KEYPAIR_A_TOKEN, KEYPAIR_B_TOKEN, PUBLIC_A_SNK,
        },
    };

    #[test]
    fn known_tokens() {
        let john = hex::decode(JOHN_PUBLIC_KEY_HEX).unwrap();
        assert_eq!(
            PublicKeyToken::compute(&john).unwrap().to_string(),
            JOHN_TOKEN
        );
        assert_eq!(
            PublicKeyToken::compute(&ECMA_PUBLIC_KEY).unwrap().to_string(),
            "b77a5c561934e089"
        );
        assert_eq!(
            PublicKeyToken::compute(PUBLIC_A_SNK).unwrap().to_string(),
            KEYPAIR_A_TOKEN
        );
    }

    #[test]
    fn fixture_key_pair_tokens() {
        for (key, token) in [
            (key_1024_b(), KEYPAIR_B_TOKEN),
            (key_2048(), KEYPAIR_2048_TOKEN),
        ] {
            let computed = PublicKeyToken::compute(&key.public_key_blob()).unwrap();
            assert_eq!(computed.to_string(), token);
        }
    }

    #[test]
    fn token_is_reversed_hash_tail() {
        let data = [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];

        let mut hasher = Sha1::new();
        hasher.update(data);
        let hash = hasher.finalize();

        let token = PublicKeyToken::compute(&data).unwrap();
        for i in 0..8 {
            assert_eq!(token.as_bytes()[i], hash[19 - i]);
        }
    }

    #[test]
    fn empty_key_has_no_token() {
        assert!(PublicKeyToken::compute(&[]).is_none());
    }

    #[test]
    fn parse_display_form() {
        let token = PublicKeyToken::parse("ce65828c82a341f2").unwrap();
        assert_eq!(token.as_bytes()[0], 0xce);
        assert_eq!(token.to_string(), "ce65828c82a341f2");

        assert!(PublicKeyToken::parse("ce65828c").is_err());
        assert!(PublicKeyToken::parse("zz65828c82a341f2").is_err());
    }
}
