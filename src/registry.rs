//! Registry key derivation for the external Merkle registry.
//!
//! The key of a document is the ZK-friendly hash of five values taken from its
//! Active Authentication modulus. The byte reordering below is fixed by the
//! on-chain verifier and must not change.

extern crate alloc;
use alloc::vec::Vec;
use core::fmt;
use num_bigint::BigUint;
use tracing::{error, trace};

use crate::EmrtdError;

/// Shortest modulus the derivation accepts.
pub const MIN_MODULUS_LENGTH: usize = 120;
const WINDOW: usize = 32;
const STEP: usize = 24;
const CHUNK: usize = 8;
const ROUNDS: usize = 5;

/// The external ZK-friendly hash (e.g. Poseidon over the circuit's field).
pub trait ZkHasher {
    fn hash(&self, inputs: &[BigUint]) -> BigUint;
}

/// Lookup key of a document in the registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegistryKey(pub BigUint);

impl RegistryKey {
    #[must_use]
    pub fn to_bytes_be(&self) -> Vec<u8> {
        self.0.to_bytes_be()
    }
}

impl fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Answer of the registry for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryProof {
    pub exists: bool,
    /// Sibling hashes from the leaf up to the root.
    pub siblings: Vec<BigUint>,
}

/// The on-chain sparse Merkle registry.
pub trait RegistryOracle {
    /// # Errors
    ///
    /// Whatever the backing registry reports.
    fn root(&self) -> Result<BigUint, EmrtdError>;

    /// # Errors
    ///
    /// Whatever the backing registry reports.
    fn lookup(&self, key: &RegistryKey) -> Result<RegistryProof, EmrtdError>;
}

/// The three low 64-bit chunks of the 32-byte window ending at `end`, in reverse order.
fn reversed_window(modulus: &[u8], end: usize) -> BigUint {
    let mut window = [0_u8; WINDOW];
    let start = end.saturating_sub(WINDOW);
    window[WINDOW - (end - start)..].copy_from_slice(&modulus[start..end]);

    let mut reversed = Vec::with_capacity(3 * CHUNK);
    for chunk in window[WINDOW - 3 * CHUNK..].chunks_exact(CHUNK).rev() {
        reversed.extend_from_slice(chunk);
    }
    BigUint::from_bytes_be(&reversed)
}

/// Derives the registry key of an Active Authentication modulus.
///
/// Five windows of 32 bytes are taken from the end of the modulus, each 24
/// bytes before the previous one (a window reaching before the first byte is
/// zero-padded on the left). Of each window the chunks `c2 || c1 || c0` (its
/// low 24 bytes) become `c0 || c1 || c2`, and the five values are hashed in
/// that order.
///
/// # Errors
///
/// * `EmrtdError::InvalidModulusLength` if the modulus is shorter than 120 bytes.
pub fn derive_key<H: ZkHasher + ?Sized>(
    hasher: &H,
    modulus: &[u8],
) -> Result<RegistryKey, EmrtdError> {
    if modulus.len() < MIN_MODULUS_LENGTH {
        error!(
            "Registry key derivation needs at least {MIN_MODULUS_LENGTH} modulus bytes, got {}",
            modulus.len()
        );
        return Err(EmrtdError::InvalidModulusLength(modulus.len()));
    }
    let inputs: Vec<BigUint> = (0..ROUNDS)
        .map(|i| reversed_window(modulus, modulus.len() - STEP * i))
        .collect();
    let key = RegistryKey(hasher.hash(&inputs));
    trace!("Derived registry key {key}");
    Ok(key)
}

/// Whether the document with this modulus is in the registry.
///
/// # Errors
///
/// * Same as [`derive_key`] and the oracle's errors.
pub fn is_registered<H, O>(hasher: &H, oracle: &O, modulus: &[u8]) -> Result<bool, EmrtdError>
where
    H: ZkHasher + ?Sized,
    O: RegistryOracle + ?Sized,
{
    let key = derive_key(hasher, modulus)?;
    Ok(oracle.lookup(&key)?.exists)
}
