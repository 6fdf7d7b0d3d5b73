//! Ed25519 key material in the ledger's text encoding (`ed25519:<base58>`).

use crate::Error;
use ed25519_consensus::{Signature, SigningKey, VerificationKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of every supported key
pub const ED25519_PREFIX: &str = "ed25519:";

/// Length of an ed25519 public key
pub const PUBLIC_KEY_LEN: usize = 32;

/// Length of an ed25519 seed
pub const SEED_LEN: usize = 32;

/// Length of an ed25519 signature
pub const SIGNATURE_LEN: usize = 64;

fn decode(text: &str) -> Result<Vec<u8>, Error> {
    let encoded = text
        .trim()
        .strip_prefix(ED25519_PREFIX)
        .ok_or_else(|| Error::InvalidKey("only ed25519 keys are supported".into()))?;
    bs58::decode(encoded)
        .into_vec()
        .map_err(|e| Error::InvalidKey(format!("invalid base58: {e}")))
}

/// An ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    pub fn parse(text: &str) -> Result<Self, Error> {
        let bytes: [u8; PUBLIC_KEY_LEN] = decode(text)?
            .try_into()
            .map_err(|_| Error::InvalidKey("public key must be 32 bytes".into()))?;
        Ok(Self(bytes))
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.0
    }

    /// Verify `signature` over `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8; SIGNATURE_LEN]) -> bool {
        let Ok(key) = VerificationKey::try_from(self.0) else {
            return false;
        };
        key.verify(&Signature::from(*signature), message).is_ok()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ED25519_PREFIX}{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl TryFrom<String> for PublicKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PublicKey> for String {
    fn from(value: PublicKey) -> Self {
        value.to_string()
    }
}

/// An ed25519 signing key.
///
/// The public half is always derived from the secret, never taken from input.
#[derive(Clone)]
pub struct KeyPair {
    secret: SigningKey,
    public: PublicKey,
}

impl KeyPair {
    /// Parse a secret key given either as a 32-byte seed or as the 64-byte
    /// `seed || public` form.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let bytes = decode(text)?;
        let (seed, claimed) = match bytes.len() {
            SEED_LEN => (&bytes[..], None),
            64 => (&bytes[..SEED_LEN], Some(&bytes[SEED_LEN..])),
            n => return Err(Error::InvalidKey(format!("secret key has {n} bytes"))),
        };
        let seed: [u8; SEED_LEN] = seed
            .try_into()
            .map_err(|_| Error::InvalidKey("invalid seed".into()))?;
        let pair = Self::from_seed(seed);
        if let Some(claimed) = claimed {
            if claimed != pair.public.0 {
                return Err(Error::InvalidKey(
                    "embedded public key does not match secret".into(),
                ));
            }
        }
        Ok(pair)
    }

    pub fn from_seed(seed: [u8; SEED_LEN]) -> Self {
        let secret = SigningKey::from(seed);
        let public = PublicKey(secret.verification_key().to_bytes());
        Self { secret, public }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.secret.sign(message).to_bytes()
    }

    /// Encode in the 64-byte `seed || public` text form.
    pub fn to_secret_string(&self) -> String {
        let mut bytes = self.secret.to_bytes().to_vec();
        bytes.extend_from_slice(&self.public.0);
        format!("{ED25519_PREFIX}{}", bs58::encode(bytes).into_string())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

impl PartialEq for KeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.public == other.public
    }
}

impl Eq for KeyPair {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_text() {
        let pair = KeyPair::from_seed([7; SEED_LEN]);
        let text = pair.public_key().to_string();
        assert!(text.starts_with(ED25519_PREFIX));
        assert_eq!(PublicKey::parse(&text).unwrap(), pair.public_key());
    }

    #[test]
    fn test_secret_forms() {
        let pair = KeyPair::from_seed([9; SEED_LEN]);
        let full = pair.to_secret_string();
        assert_eq!(KeyPair::parse(&full).unwrap(), pair);

        let seed = format!(
            "{ED25519_PREFIX}{}",
            bs58::encode([9u8; SEED_LEN]).into_string()
        );
        assert_eq!(KeyPair::parse(&seed).unwrap(), pair);
    }

    #[test]
    fn test_mismatched_embedded_public_key() {
        let pair = KeyPair::from_seed([1; SEED_LEN]);
        let other = KeyPair::from_seed([2; SEED_LEN]);
        let mut bytes = [1u8; SEED_LEN].to_vec();
        bytes.extend_from_slice(&other.public_key().to_bytes());
        let text = format!("{ED25519_PREFIX}{}", bs58::encode(bytes).into_string());
        assert!(matches!(KeyPair::parse(&text), Err(Error::InvalidKey(_))));
        assert_ne!(pair, other);
    }

    #[test]
    fn test_rejects_other_curves() {
        assert!(matches!(
            PublicKey::parse("secp256k1:abc"),
            Err(Error::InvalidKey(_))
        ));
        assert!(matches!(
            PublicKey::parse("ed25519:0OIl"),
            Err(Error::InvalidKey(_))
        ));
    }

    #[test]
    fn test_sign_and_verify() {
        let pair = KeyPair::from_seed([3; SEED_LEN]);
        let signature = pair.sign(b"payload");
        assert!(pair.public_key().verify(b"payload", &signature));
        assert!(!pair.public_key().verify(b"other", &signature));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let pair = KeyPair::from_seed([4; SEED_LEN]);
        let debug = format!("{pair:?}");
        assert!(!debug.contains(&pair.to_secret_string()));
        assert!(debug.contains(&pair.public_key().to_string()));
    }
}
