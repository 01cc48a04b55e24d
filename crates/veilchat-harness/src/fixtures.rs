//! Shared RSA keypairs.
//!
//! 2048-bit key generation dominates test time, so each fixture is generated
//! once per test binary from a fixed seed.

use std::sync::OnceLock;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use veilchat_crypto::Keypair;

fn generate(slot: &'static OnceLock<Keypair>, seed: u64) -> &'static Keypair {
    slot.get_or_init(|| Keypair::generate(&mut ChaCha20Rng::seed_from_u64(seed)))
}

/// Alice's keypair.
pub fn alice_keypair() -> &'static Keypair {
    static KEYPAIR: OnceLock<Keypair> = OnceLock::new();
    generate(&KEYPAIR, 0xA11CE)
}

/// Bob's keypair.
pub fn bob_keypair() -> &'static Keypair {
    static KEYPAIR: OnceLock<Keypair> = OnceLock::new();
    generate(&KEYPAIR, 0xB0B)
}

/// Carol's keypair; also stands in for a user's replacement key after a reset.
pub fn carol_keypair() -> &'static Keypair {
    static KEYPAIR: OnceLock<Keypair> = OnceLock::new();
    generate(&KEYPAIR, 0xCA201)
}
