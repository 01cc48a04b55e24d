//! Veilchat Cryptographic Primitives
//!
//! Stateless building blocks for end-to-end encrypted private messaging. Every
//! function is a pure transformation over byte buffers; randomness is supplied
//! by the caller through a [`rand_core::CryptoRngCore`] so tests can run with
//! a seeded generator.
//!
//! # Key Lifecycle
//!
//! A user's long-term RSA keypair is protected at rest by a key derived from
//! their PIN. Conversations use a random symmetric session key which is
//! wrapped under the public key of each participant, so both sides can
//! recover it with only their own private key.
//!
//! ```text
//! PIN + salt
//!     │  PBKDF2-HMAC-SHA256 (100k iterations)
//!     ▼
//! Wrapping Key ──AEAD──► encrypted private key (at rest)
//!
//! Session Key (random, 256-bit)
//!     ├── RSA-OAEP(SHA-256) under recipient public key
//!     ├── RSA-OAEP(SHA-256) under sender public key
//!     ▼
//! AEAD Encryption → Ciphertext
//! ```
//!
//! # Security
//!
//! Authenticity:
//! - XChaCha20-Poly1305 AEAD rejects tampered ciphertext, wrong keys and wrong
//!   nonces with a typed [`CryptoError::Decrypt`]
//! - Nonces are 192-bit random values, so random generation cannot collide in
//!   practice for a single session key
//!
//! Key hygiene:
//! - Symmetric keys are zeroized on drop
//! - RSA private keys are zeroized on drop by the `rsa` crate
//!
//! Not provided:
//! - Forward secrecy beyond one session key per conversation
//! - Public key authenticity (keys are trusted on first use)

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aead;
pub mod error;
pub mod kdf;
pub mod keys;

pub use aead::{SealedPayload, decrypt, encrypt, encrypt_with_nonce};
pub use error::CryptoError;
pub use kdf::{SymmetricKey, derive_key, generate_salt};
pub use keys::{Keypair, PrivateKey, PublicKey, unwrap_key, wrap_key};

/// Size of a symmetric key in bytes (256-bit).
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Size of an `XChaCha20` nonce in bytes (192-bit).
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Size of a PBKDF2 salt in bytes.
pub const SALT_SIZE: usize = 16;

/// PBKDF2-HMAC-SHA256 iteration count for PIN derivation.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// RSA modulus length in bits.
pub const RSA_MODULUS_BITS: usize = 2048;
