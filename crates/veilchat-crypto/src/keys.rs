//! Long-term RSA keypairs and OAEP key wrapping.
//!
//! Public keys travel as SPKI DER, private keys as PKCS#8 DER. Wrapping
//! encrypts raw symmetric key material with RSA-OAEP over SHA-256.

use rand_core::CryptoRngCore;
use rsa::{
    Oaep, RsaPrivateKey, RsaPublicKey,
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey},
    traits::PublicKeyParts,
};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{CryptoError, RSA_MODULUS_BITS, SymmetricKey};

/// RSA public key used to wrap session keys for its owner.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(RsaPublicKey);

impl PublicKey {
    /// Serialize as SPKI DER.
    pub fn to_spki_der(&self) -> Result<Vec<u8>, CryptoError> {
        self.0
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| CryptoError::KeyEncoding { reason: e.to_string() })
    }

    /// Import from SPKI DER.
    ///
    /// # Errors
    ///
    /// - `KeyEncoding`: malformed DER, or a modulus below [`RSA_MODULUS_BITS`]
    pub fn from_spki_der(der: &[u8]) -> Result<Self, CryptoError> {
        let key = RsaPublicKey::from_public_key_der(der)
            .map_err(|e| CryptoError::KeyEncoding { reason: e.to_string() })?;

        let bits = key.size() * 8;
        if bits < RSA_MODULUS_BITS {
            return Err(CryptoError::KeyEncoding {
                reason: format!("modulus of {bits} bits is below {RSA_MODULUS_BITS}"),
            });
        }

        Ok(Self(key))
    }

    /// Modulus length in bits.
    pub fn bits(&self) -> usize {
        self.0.size() * 8
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey").field("bits", &self.bits()).finish()
    }
}

/// RSA private key. Zeroized on drop by the `rsa` crate.
#[derive(Clone)]
pub struct PrivateKey(RsaPrivateKey);

impl PrivateKey {
    /// Serialize as PKCS#8 DER. The buffer is zeroized on drop.
    pub fn to_pkcs8_der(&self) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.0
            .to_pkcs8_der()
            .map(|doc| Zeroizing::new(doc.as_bytes().to_vec()))
            .map_err(|e| CryptoError::KeyEncoding { reason: e.to_string() })
    }

    /// Import from PKCS#8 DER.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, CryptoError> {
        RsaPrivateKey::from_pkcs8_der(der)
            .map(Self)
            .map_err(|e| CryptoError::KeyEncoding { reason: e.to_string() })
    }

    /// The public half of this key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.to_public_key())
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey").field("key", &"[REDACTED]").finish()
    }
}

/// A user's long-term asymmetric keypair.
#[derive(Debug, Clone)]
pub struct Keypair {
    /// Public half, published to the key directory
    pub public: PublicKey,
    /// Private half, only ever stored encrypted under the PIN
    pub private: PrivateKey,
}

impl Keypair {
    /// Generate a fresh 2048-bit keypair.
    ///
    /// Generation only fails if the RNG is broken, which is fatal.
    pub fn generate(rng: &mut impl CryptoRngCore) -> Self {
        let Ok(private) = RsaPrivateKey::new(rng, RSA_MODULUS_BITS) else {
            unreachable!("RSA key generation cannot fail with a working RNG");
        };

        Self::from_private(PrivateKey(private))
    }

    /// Rebuild a keypair from its private half.
    pub fn from_private(private: PrivateKey) -> Self {
        Self { public: private.public_key(), private }
    }
}

/// Wrap a symmetric key under `public` with RSA-OAEP(SHA-256).
///
/// Produces a fresh randomized blob on every call.
///
/// # Errors
///
/// - `Wrap`: the key cannot carry the payload (modulus too small)
pub fn wrap_key(
    key: &SymmetricKey,
    public: &PublicKey,
    rng: &mut impl CryptoRngCore,
) -> Result<Vec<u8>, CryptoError> {
    public
        .0
        .encrypt(rng, Oaep::new::<Sha256>(), key.as_bytes())
        .map_err(|e| CryptoError::Wrap { reason: e.to_string() })
}

/// Recover a symmetric key wrapped by [`wrap_key`].
///
/// # Errors
///
/// - `Unwrap`: corrupt blob, wrong private key, or unwrapped material of the
///   wrong length
pub fn unwrap_key(blob: &[u8], private: &PrivateKey) -> Result<SymmetricKey, CryptoError> {
    let raw = private
        .0
        .decrypt(Oaep::new::<Sha256>(), blob)
        .map(Zeroizing::new)
        .map_err(|e| CryptoError::Unwrap { reason: e.to_string() })?;

    SymmetricKey::from_slice(&raw).ok_or_else(|| CryptoError::Unwrap {
        reason: format!("unwrapped key has {} bytes", raw.len()),
    })
}
