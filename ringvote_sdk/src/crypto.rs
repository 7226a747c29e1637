//! Signing and proving capability.
//!
//! Workflows only see [`RingCrypto`]; big integers cross it as big-endian
//! bytes and the codec takes care of the on-chain little-endian form.

use crate::batching::BatchPlan;
use crate::codec::KeyArrays;
use crate::error::{Result, VoteError};
use crate::keyfile::VoterSecret;
use crate::types::{EXPONENT_BYTES, MODULUS_BYTES};
use num_bigint::{BigUint, RandBigInt};
use rs_merkle::{algorithms, MerkleTree};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Linkable ring signature, every component big-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingSignature {
    pub c: Vec<u8>,
    /// Key image.
    pub i: Vec<u8>,
    pub r_array: Vec<Vec<u8>>,
}

pub trait RingCrypto: Send + Sync {
    /// Sign `message` with the key at `offset` of `ring`.
    fn create_ring_signature(
        &self,
        ring: &KeyArrays,
        secret: &VoterSecret,
        offset: usize,
        message: &[u8],
    ) -> Result<RingSignature>;

    /// Root of the tree whose leaves are the batches of `keys`.
    fn create_merkle_root(&self, keys: &KeyArrays, batch_size: usize) -> Result<[u8; 32]>;

    /// Inclusion proof for the leaf of batch `batch_index`.
    fn create_merkle_proof(
        &self,
        keys: &KeyArrays,
        batch_size: usize,
        batch_index: usize,
    ) -> Result<Vec<u8>>;
}

/// RSA ring signatures and a SHA-256 merkle tree over key batches, in the
/// form the on-chain verifier checks.
#[derive(Debug, Default, Clone, Copy)]
pub struct RsaRingCrypto;

fn pad_le(value: &BigUint, width: usize) -> Vec<u8> {
    let mut bytes = value.to_bytes_le();
    bytes.resize(width, 0);
    bytes
}

fn hash_to_int(n: &BigUint) -> BigUint {
    BigUint::from_bytes_le(&Sha256::digest(pad_le(n, MODULUS_BYTES)))
}

/// Leaf hash of one batch: `sha256(n_0 ‖ e_0 ‖ n_1 ‖ e_1 ‖ …)`.
pub fn batch_leaf_hash(batch: &KeyArrays) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for (n, e) in batch
        .moduli
        .chunks_exact(MODULUS_BYTES)
        .zip(batch.exponents.chunks_exact(EXPONENT_BYTES))
    {
        hasher.update(n);
        hasher.update(e);
    }
    hasher.finalize().into()
}

fn merkle_tree(keys: &KeyArrays, batch_size: usize) -> Result<MerkleTree<algorithms::Sha256>> {
    let plan = BatchPlan::new(keys.count, batch_size)?;
    if plan.batch_count() == 0 {
        return Err(VoteError::Validation("at least one key required".into()));
    }
    let leaves = plan
        .ranges()
        .map(|r| Ok(batch_leaf_hash(&keys.slice(r.start, r.len())?)))
        .collect::<Result<Vec<[u8; 32]>>>()?;
    Ok(MerkleTree::<algorithms::Sha256>::from_leaves(&leaves))
}

impl RingCrypto for RsaRingCrypto {
    fn create_ring_signature(
        &self,
        ring: &KeyArrays,
        secret: &VoterSecret,
        offset: usize,
        message: &[u8],
    ) -> Result<RingSignature> {
        let keys = ring.to_keys()?;
        let len = keys.len();
        if offset >= len || keys[offset] != secret.public {
            return Err(VoteError::CryptographicMismatch(format!(
                "signer key is not at ring offset {}",
                offset
            )));
        }

        let one = BigUint::from(1u32);
        let mut rng = rand::thread_rng();
        let n_s = &secret.public.n;

        let mut transcript = Sha256::new();
        transcript.update(message);
        for key in &keys {
            transcript.update(pad_le(&key.n, MODULUS_BYTES));
            transcript.update(pad_le(&key.e, EXPONENT_BYTES));
        }
        let challenge = |x: &BigUint, y: &BigUint| -> BigUint {
            let mut h = transcript.clone();
            h.update(pad_le(x, MODULUS_BYTES));
            h.update(pad_le(y, MODULUS_BYTES));
            BigUint::from_bytes_le(&h.finalize())
        };

        let a = rng.gen_biguint_range(&one, n_s);
        let h = hash_to_int(n_s);
        let image = h.modpow(&secret.d, n_s) * &secret.p % n_s;

        let mut c = vec![BigUint::default(); len];
        let mut r = vec![BigUint::default(); len];

        let qpe = secret.q.modpow(&secret.public.e, n_s);
        let commit = &a * &qpe % n_s;
        c[(offset + 1) % len] = challenge(&commit, &(&commit * &h % n_s));

        let mut i = (offset + 1) % len;
        while i != offset {
            let key = &keys[i];
            r[i] = rng.gen_biguint_range(&one, &key.n);
            let rpow = r[i].modpow(&key.e, &key.n);
            let lhs = &c[i] * &rpow % &key.n;
            let rhs = (&c[i] * hash_to_int(&key.n) + &image) * &rpow % &key.n;
            c[(i + 1) % len] = challenge(&lhs, &rhs);
            i = (i + 1) % len;
        }

        let phi = (&secret.p - &one) * (&secret.q - &one);
        let inv_c = c[offset].modpow(&(phi - &one), n_s);
        r[offset] = (a * inv_c % n_s).modpow(&secret.d, n_s) * &secret.q % n_s;

        Ok(RingSignature {
            c: c[0].to_bytes_be(),
            i: image.to_bytes_be(),
            r_array: r.iter().map(BigUint::to_bytes_be).collect(),
        })
    }

    fn create_merkle_root(&self, keys: &KeyArrays, batch_size: usize) -> Result<[u8; 32]> {
        merkle_tree(keys, batch_size)?
            .root()
            .ok_or_else(|| VoteError::Crypto("merkle tree has no root".into()))
    }

    fn create_merkle_proof(
        &self,
        keys: &KeyArrays,
        batch_size: usize,
        batch_index: usize,
    ) -> Result<Vec<u8>> {
        let tree = merkle_tree(keys, batch_size)?;
        if batch_index >= tree.leaves_len() {
            return Err(VoteError::Validation(format!(
                "batch {} out of range ({} batches)",
                batch_index,
                tree.leaves_len()
            )));
        }
        Ok(tree.proof(&[batch_index]).to_bytes())
    }
}

/// Deterministic stand-in for [`RsaRingCrypto`] in tests and dry runs.
///
/// Signatures are hashes of the inputs; the key image depends on the voter's
/// modulus only, so repeated votes by one voter share an image.
#[derive(Debug, Default)]
pub struct FixtureCrypto {
    signatures: AtomicUsize,
}

impl FixtureCrypto {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ring signatures produced so far.
    pub fn signature_count(&self) -> usize {
        self.signatures.load(Ordering::SeqCst)
    }
}

impl RingCrypto for FixtureCrypto {
    fn create_ring_signature(
        &self,
        ring: &KeyArrays,
        secret: &VoterSecret,
        offset: usize,
        message: &[u8],
    ) -> Result<RingSignature> {
        let keys = ring.to_keys()?;
        if keys.get(offset) != Some(&secret.public) {
            return Err(VoteError::CryptographicMismatch(format!(
                "signer key is not at ring offset {}",
                offset
            )));
        }
        self.signatures.fetch_add(1, Ordering::SeqCst);

        let c = Sha256::new()
            .chain_update(message)
            .chain_update(&ring.moduli)
            .finalize()
            .to_vec();
        let i = Sha256::digest(secret.public.n.to_bytes_le()).to_vec();
        let r_array = (0..ring.count)
            .map(|k| {
                Sha256::new()
                    .chain_update(&c)
                    .chain_update((k as u32).to_le_bytes())
                    .finalize()
                    .to_vec()
            })
            .collect();
        Ok(RingSignature { c, i, r_array })
    }

    fn create_merkle_root(&self, keys: &KeyArrays, batch_size: usize) -> Result<[u8; 32]> {
        if keys.count == 0 {
            return Err(VoteError::Validation("at least one key required".into()));
        }
        Ok(Sha256::new()
            .chain_update(&keys.moduli)
            .chain_update(&keys.exponents)
            .chain_update((batch_size as u32).to_le_bytes())
            .finalize()
            .into())
    }

    fn create_merkle_proof(
        &self,
        keys: &KeyArrays,
        batch_size: usize,
        batch_index: usize,
    ) -> Result<Vec<u8>> {
        let root = self.create_merkle_root(keys, batch_size)?;
        Ok(Sha256::new()
            .chain_update(root)
            .chain_update((batch_index as u32).to_le_bytes())
            .finalize()
            .to_vec())
    }
}
