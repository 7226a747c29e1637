//! Byte-exact encodings of every record published on chain.
//!
//! All integers are little-endian. Counts are `u16`, parallel arrays are
//! stored back to back (all hashes, then all indices; all moduli, then all
//! exponents). Decoders validate the declared count against the buffer
//! length before touching any entry, and reject trailing bytes.
//!
//! | record            | layout                                          |
//! |-------------------|-------------------------------------------------|
//! | CandidateList     | count ‖ count × (id[4] ‖ description[100])      |
//! | PubKeyBatch       | count ‖ count × n[256] ‖ count × e[4]           |
//! | PubkeyIndexCell   | count ‖ count × tx_hash[32] ‖ count × index u32 |
//! | MerkleRootRecord  | root[32] ‖ leaf_count u32 ‖ batch_count u32     |

use crate::config::ProtocolVariant;
use crate::crypto::RingSignature;
use crate::error::{Result, VoteError};
use crate::types::*;
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use num_bigint::BigUint;

pub const MERKLE_ROOT_RECORD_BYTES: usize = 32 + 4 + 4;

/// Width of every big integer in a ring signature.
pub const SIGNATURE_INT_BYTES: usize = 256;

const COUNT_BYTES: usize = 2;
const INDEX_ENTRY_BYTES: usize = 32 + 4;
const KEY_BYTES: usize = MODULUS_BYTES + EXPONENT_BYTES;

/// Bounds-checked cursor over an on-chain buffer.
struct RecordReader<'a> {
    record: &'static str,
    buf: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    fn new(record: &'static str, buf: &'a [u8]) -> Self {
        Self { record, buf, pos: 0 }
    }

    fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.buf.len());
        match end {
            Some(end) => {
                let slice = &self.buf[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(VoteError::Parse(format!(
                "{}: truncated {} (need {} bytes at offset {}, {} left)",
                self.record,
                field,
                len,
                self.pos,
                self.buf.len() - self.pos
            ))),
        }
    }

    fn read_u16(&mut self, field: &str) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2, field)?))
    }

    fn read_u32(&mut self, field: &str) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4, field)?))
    }

    fn read_array<const N: usize>(&mut self, field: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }

    /// Reads the u16 entry count and checks the buffer holds exactly
    /// `count × entry_bytes` after it.
    fn read_count(&mut self, entry_bytes: usize) -> Result<usize> {
        let count = self.read_u16("count")? as usize;
        let expected = COUNT_BYTES + count * entry_bytes;
        if self.buf.len() != expected {
            return Err(VoteError::Parse(format!(
                "{}: count {} implies {} bytes, buffer has {}",
                self.record,
                count,
                expected,
                self.buf.len()
            )));
        }
        Ok(count)
    }

    fn finish(self) -> Result<()> {
        if self.pos != self.buf.len() {
            return Err(VoteError::Parse(format!(
                "{}: {} trailing bytes",
                self.record,
                self.buf.len() - self.pos
            )));
        }
        Ok(())
    }
}

fn encode_count(buf: &mut Vec<u8>, count: usize, record: &str) -> Result<()> {
    let count = u16::try_from(count).map_err(|_| {
        VoteError::Encoding(format!(
            "{} holds {} entries, at most {} fit the count field",
            record,
            count,
            u16::MAX
        ))
    })?;
    buf.write_u16::<LittleEndian>(count)?;
    Ok(())
}

/// Writes `value` little-endian, zero-padded to `width`.
pub fn write_le_fixed(buf: &mut Vec<u8>, value: &BigUint, width: usize, field: &str) -> Result<()> {
    let mut bytes = value.to_bytes_le();
    if bytes.len() > width {
        return Err(VoteError::Encoding(format!(
            "{} is {} bytes, limit is {}",
            field,
            bytes.len(),
            width
        )));
    }
    bytes.resize(width, 0);
    buf.extend_from_slice(&bytes);
    Ok(())
}

/// Converts a big-endian integer from the crypto capability into the
/// fixed-width little-endian form stored on chain.
pub fn le_fixed_from_be(be: &[u8], width: usize, field: &str) -> Result<Vec<u8>> {
    let significant = be.iter().position(|b| *b != 0).map_or(&be[be.len()..], |i| &be[i..]);
    if significant.len() > width {
        return Err(VoteError::Encoding(format!(
            "{} is {} bytes, limit is {}",
            field,
            significant.len(),
            width
        )));
    }
    let mut le: Vec<u8> = significant.iter().rev().copied().collect();
    le.resize(width, 0);
    Ok(le)
}

// ========== CandidateList ==========

pub fn encode_candidate_list(entries: &[CandidateEntry]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(COUNT_BYTES + entries.len() * CANDIDATE_SLOT_BYTES);
    encode_count(&mut buf, entries.len(), "candidate list")?;
    for entry in entries {
        let desc = entry.description.as_bytes();
        if desc.len() > MAX_DESCRIPTION_BYTES {
            return Err(VoteError::Encoding(format!(
                "description of candidate {} is {} UTF-8 bytes, limit is {}",
                hex::encode(entry.id),
                desc.len(),
                MAX_DESCRIPTION_BYTES
            )));
        }
        // Trailing NULs would be trimmed away on decode.
        if desc.last() == Some(&0) {
            return Err(VoteError::Encoding(format!(
                "description of candidate {} ends with a NUL byte",
                hex::encode(entry.id)
            )));
        }
        buf.extend_from_slice(&entry.id);
        buf.extend_from_slice(desc);
        buf.resize(buf.len() + DESCRIPTION_FIELD_BYTES - desc.len(), 0);
    }
    Ok(buf)
}

pub fn decode_candidate_list(data: &[u8]) -> Result<Vec<CandidateEntry>> {
    let mut reader = RecordReader::new("candidate list", data);
    let count = reader.read_count(CANDIDATE_SLOT_BYTES)?;
    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let id = reader.read_array::<CANDIDATE_ID_BYTES>("candidate id")?;
        let field = reader.take(DESCRIPTION_FIELD_BYTES, "candidate description")?;
        let end = field.iter().rposition(|b| *b != 0).map_or(0, |p| p + 1);
        let description = String::from_utf8(field[..end].to_vec()).map_err(|e| {
            VoteError::Parse(format!("candidate {}: description is not UTF-8: {}", i, e))
        })?;
        entries.push(CandidateEntry { id, description });
    }
    reader.finish()?;
    Ok(entries)
}

// ========== PubKeyBatch ==========

/// Parallel little-endian key arrays, the form both the chain and the
/// crypto capability consume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyArrays {
    pub count: usize,
    /// `count × 256` bytes.
    pub moduli: Vec<u8>,
    /// `count × 4` bytes.
    pub exponents: Vec<u8>,
}

impl KeyArrays {
    pub fn from_keys(keys: &[RsaPubKey]) -> Result<Self> {
        let mut moduli = Vec::with_capacity(keys.len() * MODULUS_BYTES);
        let mut exponents = Vec::with_capacity(keys.len() * EXPONENT_BYTES);
        for (i, key) in keys.iter().enumerate() {
            write_le_fixed(&mut moduli, &key.n, MODULUS_BYTES, &format!("modulus of key {}", i))?;
            write_le_fixed(
                &mut exponents,
                &key.e,
                EXPONENT_BYTES,
                &format!("exponent of key {}", i),
            )?;
        }
        Ok(Self {
            count: keys.len(),
            moduli,
            exponents,
        })
    }

    pub fn to_keys(&self) -> Result<Vec<RsaPubKey>> {
        if self.moduli.len() != self.count * MODULUS_BYTES
            || self.exponents.len() != self.count * EXPONENT_BYTES
        {
            return Err(VoteError::Parse(format!(
                "key arrays for {} keys have {} modulus and {} exponent bytes",
                self.count,
                self.moduli.len(),
                self.exponents.len()
            )));
        }
        Ok(self
            .moduli
            .chunks_exact(MODULUS_BYTES)
            .zip(self.exponents.chunks_exact(EXPONENT_BYTES))
            .map(|(n, e)| RsaPubKey::new(BigUint::from_bytes_le(n), BigUint::from_bytes_le(e)))
            .collect())
    }

    /// Arrays for the contiguous key range `start..start + len`.
    pub fn slice(&self, start: usize, len: usize) -> Result<Self> {
        let out_of_range = || {
            VoteError::Validation(format!(
                "keys {}..{} out of range for {} keys",
                start,
                start.saturating_add(len),
                self.count
            ))
        };
        let end = start.checked_add(len).ok_or_else(out_of_range)?;
        if end > self.count {
            return Err(out_of_range());
        }
        let moduli = self
            .moduli
            .get(start * MODULUS_BYTES..end * MODULUS_BYTES)
            .ok_or_else(|| {
                VoteError::Parse(format!(
                    "{} modulus bytes for {} keys",
                    self.moduli.len(),
                    self.count
                ))
            })?;
        let exponents = self
            .exponents
            .get(start * EXPONENT_BYTES..end * EXPONENT_BYTES)
            .ok_or_else(|| {
                VoteError::Parse(format!(
                    "{} exponent bytes for {} keys",
                    self.exponents.len(),
                    self.count
                ))
            })?;
        Ok(Self {
            count: len,
            moduli: moduli.to_vec(),
            exponents: exponents.to_vec(),
        })
    }
}

pub fn encode_pubkey_batch(keys: &[RsaPubKey]) -> Result<Vec<u8>> {
    let arrays = KeyArrays::from_keys(keys)?;
    let mut buf = Vec::with_capacity(COUNT_BYTES + keys.len() * KEY_BYTES);
    encode_count(&mut buf, keys.len(), "public key batch")?;
    buf.extend_from_slice(&arrays.moduli);
    buf.extend_from_slice(&arrays.exponents);
    Ok(buf)
}

pub fn decode_pubkey_batch(data: &[u8]) -> Result<Vec<RsaPubKey>> {
    let mut reader = RecordReader::new("public key batch", data);
    let count = reader.read_count(KEY_BYTES)?;
    let arrays = KeyArrays {
        count,
        moduli: reader.take(count * MODULUS_BYTES, "moduli")?.to_vec(),
        exponents: reader.take(count * EXPONENT_BYTES, "exponents")?.to_vec(),
    };
    reader.finish()?;
    arrays.to_keys()
}

// ========== PubkeyIndexCell ==========

pub fn encode_pubkey_index(entries: &[PubkeyIndexEntry]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(COUNT_BYTES + entries.len() * INDEX_ENTRY_BYTES);
    encode_count(&mut buf, entries.len(), "public key index")?;
    for entry in entries {
        buf.extend_from_slice(entry.tx_hash.as_bytes());
    }
    for entry in entries {
        buf.write_u32::<LittleEndian>(entry.index)?;
    }
    Ok(buf)
}

pub fn decode_pubkey_index(data: &[u8]) -> Result<Vec<PubkeyIndexEntry>> {
    let mut reader = RecordReader::new("public key index", data);
    let count = reader.read_count(INDEX_ENTRY_BYTES)?;
    let mut hashes = Vec::with_capacity(count);
    for _ in 0..count {
        hashes.push(H256(reader.read_array::<32>("batch tx hash")?));
    }
    let mut entries = Vec::with_capacity(count);
    for tx_hash in hashes {
        let index = reader.read_u32("batch output index")?;
        entries.push(PubkeyIndexEntry { tx_hash, index });
    }
    reader.finish()?;
    Ok(entries)
}

// ========== MerkleRootRecord ==========

pub fn encode_merkle_root(record: &MerkleRootRecord) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(MERKLE_ROOT_RECORD_BYTES);
    buf.extend_from_slice(&record.root);
    buf.write_u32::<LittleEndian>(record.leaf_count)?;
    buf.write_u32::<LittleEndian>(record.batch_count)?;
    Ok(buf)
}

pub fn decode_merkle_root(data: &[u8]) -> Result<MerkleRootRecord> {
    if data.len() != MERKLE_ROOT_RECORD_BYTES {
        return Err(VoteError::Parse(format!(
            "merkle root record must be {} bytes, got {}",
            MERKLE_ROOT_RECORD_BYTES,
            data.len()
        )));
    }
    let mut reader = RecordReader::new("merkle root record", data);
    let record = MerkleRootRecord {
        root: reader.read_array::<32>("root")?,
        leaf_count: reader.read_u32("leaf count")?,
        batch_count: reader.read_u32("batch count")?,
    };
    reader.finish()?;
    Ok(record)
}

// ========== Ballot payloads ==========

/// Merkle inclusion of the signing batch.
#[derive(Debug, Clone, Copy)]
pub struct BatchInclusion<'a> {
    pub batch_index: u32,
    pub proof: &'a [u8],
}

/// Ballot output data.
///
/// Index-cell ballots start with the variant tag; merkle ballots keep the
/// `id ‖ key image` layout the verifier reads at fixed offsets.
pub fn encode_ballot_output(
    variant: ProtocolVariant,
    candidate_id: &[u8; CANDIDATE_ID_BYTES],
    signature: &RingSignature,
) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(1 + CANDIDATE_ID_BYTES + SIGNATURE_INT_BYTES);
    if variant == ProtocolVariant::IndexCell {
        buf.push(variant.tag());
    }
    buf.extend_from_slice(candidate_id);
    buf.extend_from_slice(&le_fixed_from_be(
        &signature.i,
        SIGNATURE_INT_BYTES,
        "signature key image",
    )?);
    Ok(buf)
}

/// Splits ballot output data into candidate id and key image.
pub fn decode_ballot_output(
    variant: ProtocolVariant,
    data: &[u8],
) -> Result<([u8; CANDIDATE_ID_BYTES], Vec<u8>)> {
    let mut reader = RecordReader::new("ballot output", data);
    if variant == ProtocolVariant::IndexCell {
        let [tag] = reader.read_array::<1>("format tag")?;
        if tag != variant.tag() {
            return Err(VoteError::Parse(format!(
                "ballot output tag {:#04x}, expected {:#04x}",
                tag,
                variant.tag()
            )));
        }
    }
    let id = reader.read_array::<CANDIDATE_ID_BYTES>("candidate id")?;
    let image = reader.take(SIGNATURE_INT_BYTES, "key image")?.to_vec();
    reader.finish()?;
    Ok((id, image))
}

/// Witness payload: `c ‖ r_array` for index-cell ballots, and
/// `c ‖ ring_size ‖ r_array ‖ moduli ‖ exponents ‖ batch_index ‖ proof_len ‖ proof`
/// for merkle ballots.
pub fn encode_ballot_witness(
    variant: ProtocolVariant,
    signature: &RingSignature,
    ring: &KeyArrays,
    inclusion: Option<BatchInclusion<'_>>,
) -> Result<Vec<u8>> {
    if signature.r_array.len() != ring.count {
        return Err(VoteError::Encoding(format!(
            "signature has {} responses for a ring of {}",
            signature.r_array.len(),
            ring.count
        )));
    }
    let mut buf = Vec::with_capacity(SIGNATURE_INT_BYTES * (1 + 2 * ring.count) + 12);
    buf.extend_from_slice(&le_fixed_from_be(&signature.c, SIGNATURE_INT_BYTES, "signature c")?);

    match variant {
        ProtocolVariant::IndexCell => {
            write_responses(&mut buf, signature)?;
        }
        ProtocolVariant::MerkleRoot => {
            let inclusion = inclusion.ok_or_else(|| {
                VoteError::Validation("merkle ballot requires an inclusion proof".into())
            })?;
            let ring_size = u32::try_from(ring.count)
                .map_err(|_| VoteError::Encoding("ring size exceeds u32".into()))?;
            let proof_len = u32::try_from(inclusion.proof.len())
                .map_err(|_| VoteError::Encoding("merkle proof exceeds u32 length".into()))?;
            buf.write_u32::<LittleEndian>(ring_size)?;
            write_responses(&mut buf, signature)?;
            buf.extend_from_slice(&ring.moduli);
            buf.extend_from_slice(&ring.exponents);
            buf.write_u32::<LittleEndian>(inclusion.batch_index)?;
            buf.write_u32::<LittleEndian>(proof_len)?;
            buf.extend_from_slice(inclusion.proof);
        }
    }
    Ok(buf)
}

fn write_responses(buf: &mut Vec<u8>, signature: &RingSignature) -> Result<()> {
    for (i, r) in signature.r_array.iter().enumerate() {
        buf.extend_from_slice(&le_fixed_from_be(
            r,
            SIGNATURE_INT_BYTES,
            &format!("signature response {}", i),
        )?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> RsaPubKey {
        let mut n = vec![seed; MODULUS_BYTES];
        n[MODULUS_BYTES - 1] = 0xc1;
        RsaPubKey::new(BigUint::from_bytes_be(&n), BigUint::from(65537u32))
    }

    #[test]
    fn test_single_candidate_layout() {
        let entries = vec![CandidateEntry::new([0, 0, 0, 1], "Alice")];
        let encoded = encode_candidate_list(&entries).unwrap();
        assert_eq!(encoded.len(), 106);
        assert_eq!(&encoded[..2], &[1, 0]);
        assert_eq!(&encoded[2..6], &[0, 0, 0, 1]);
        assert_eq!(&encoded[6..11], b"Alice");
        assert!(encoded[11..].iter().all(|b| *b == 0));
        assert_eq!(decode_candidate_list(&encoded).unwrap(), entries);
    }

    #[test]
    fn test_description_bounds() {
        let exact = "é".repeat(49) + "x"; // 99 bytes
        assert_eq!(exact.len(), 99);
        let entries = vec![CandidateEntry::new([9; 4], exact)];
        let encoded = encode_candidate_list(&entries).unwrap();
        assert_eq!(decode_candidate_list(&encoded).unwrap(), entries);

        let too_long = vec![CandidateEntry::new([9; 4], "y".repeat(100))];
        assert!(matches!(
            encode_candidate_list(&too_long),
            Err(VoteError::Encoding(_))
        ));
    }

    #[test]
    fn test_interior_nul_survives() {
        let entries = vec![CandidateEntry::new([1; 4], "a\0b")];
        let encoded = encode_candidate_list(&entries).unwrap();
        assert_eq!(decode_candidate_list(&encoded).unwrap()[0].description, "a\0b");
    }

    #[test]
    fn test_truncated_candidate_list() {
        let encoded = encode_candidate_list(&[CandidateEntry::new([1; 4], "Bob")]).unwrap();
        assert!(matches!(
            decode_candidate_list(&encoded[..50]),
            Err(VoteError::Parse(_))
        ));
        assert!(matches!(decode_candidate_list(&[]), Err(VoteError::Parse(_))));
        // count says 2, only one slot present
        let mut lying = encoded.clone();
        lying[0] = 2;
        assert!(matches!(decode_candidate_list(&lying), Err(VoteError::Parse(_))));
    }

    #[test]
    fn test_pubkey_batch_layout() {
        let keys = vec![key(1), key(2), key(3)];
        let encoded = encode_pubkey_batch(&keys).unwrap();
        assert_eq!(encoded.len(), 2 + 3 * 260);
        // first modulus byte is the least significant one
        assert_eq!(encoded[2], 0xc1);
        // exponents start after all moduli
        let e_start = 2 + 3 * 256;
        assert_eq!(&encoded[e_start..e_start + 4], &[0x01, 0x00, 0x01, 0x00]);
        assert_eq!(decode_pubkey_batch(&encoded).unwrap(), keys);
    }

    #[test]
    fn test_key_array_slice_bounds() {
        let arrays = KeyArrays::from_keys(&[key(1), key(2), key(3)]).unwrap();
        let tail = arrays.slice(1, 2).unwrap();
        assert_eq!(tail.to_keys().unwrap(), vec![key(2), key(3)]);
        assert_eq!(arrays.slice(3, 0).unwrap().count, 0);

        assert!(matches!(arrays.slice(2, 2), Err(VoteError::Validation(_))));
        assert!(matches!(arrays.slice(usize::MAX, 2), Err(VoteError::Validation(_))));

        // count disagrees with the byte arrays
        let short = KeyArrays {
            count: 3,
            moduli: arrays.moduli[..MODULUS_BYTES].to_vec(),
            exponents: arrays.exponents.clone(),
        };
        assert!(matches!(short.slice(1, 1), Err(VoteError::Parse(_))));
    }

    #[test]
    fn test_modulus_bounds() {
        let exact = RsaPubKey::new(BigUint::from_bytes_be(&[0xff; 256]), BigUint::from(3u32));
        assert!(encode_pubkey_batch(&[exact]).is_ok());

        let mut oversized = vec![0xff; 257];
        oversized[0] = 1;
        let big = RsaPubKey::new(BigUint::from_bytes_be(&oversized), BigUint::from(3u32));
        assert!(matches!(
            encode_pubkey_batch(&[big]),
            Err(VoteError::Encoding(_))
        ));

        let wide_e = RsaPubKey::new(BigUint::from(7u32), BigUint::from(1u64 << 32));
        assert!(matches!(
            encode_pubkey_batch(&[wide_e]),
            Err(VoteError::Encoding(_))
        ));
    }

    #[test]
    fn test_index_cell_layout() {
        let entries = vec![
            PubkeyIndexEntry { tx_hash: H256([0xaa; 32]), index: 0 },
            PubkeyIndexEntry { tx_hash: H256([0xbb; 32]), index: 7 },
        ];
        let encoded = encode_pubkey_index(&entries).unwrap();
        assert_eq!(encoded.len(), 2 + 2 * 36);
        assert_eq!(&encoded[2..34], &[0xaa; 32]);
        assert_eq!(&encoded[34..66], &[0xbb; 32]);
        assert_eq!(&encoded[70..74], &[7, 0, 0, 0]);
        assert_eq!(decode_pubkey_index(&encoded).unwrap(), entries);
        assert!(decode_pubkey_index(&encoded[..73]).is_err());
    }

    #[test]
    fn test_merkle_record() {
        let record = MerkleRootRecord {
            root: [5; 32],
            leaf_count: 601,
            batch_count: 2,
        };
        let encoded = encode_merkle_root(&record).unwrap();
        assert_eq!(encoded.len(), 40);
        assert_eq!(&encoded[32..36], &601u32.to_le_bytes());
        assert_eq!(decode_merkle_root(&encoded).unwrap(), record);
        assert!(decode_merkle_root(&encoded[..39]).is_err());
    }

    #[test]
    fn test_be_to_le_conversion() {
        assert_eq!(le_fixed_from_be(&[0x00, 0x01, 0x02], 4, "x").unwrap(), vec![2, 1, 0, 0]);
        assert_eq!(le_fixed_from_be(&[], 2, "x").unwrap(), vec![0, 0]);
        assert!(le_fixed_from_be(&[1, 2, 3], 2, "x").is_err());
    }

    #[test]
    fn test_ballot_payloads() {
        let ring = KeyArrays::from_keys(&[key(1), key(2)]).unwrap();
        let signature = RingSignature {
            c: vec![0x01, 0x02],
            i: vec![0x03],
            r_array: vec![vec![0x04], vec![0x05]],
        };

        let out = encode_ballot_output(ProtocolVariant::IndexCell, &[1, 2, 3, 4], &signature)
            .unwrap();
        assert_eq!(out.len(), 1 + 4 + 256);
        assert_eq!(out[0], ProtocolVariant::IndexCell.tag());
        let (id, image) = decode_ballot_output(ProtocolVariant::IndexCell, &out).unwrap();
        assert_eq!(id, [1, 2, 3, 4]);
        assert_eq!(image[0], 0x03);

        let plain = encode_ballot_witness(ProtocolVariant::IndexCell, &signature, &ring, None)
            .unwrap();
        assert_eq!(plain.len(), 3 * 256);
        assert_eq!(&plain[..2], &[0x02, 0x01]);

        let proof = [9u8; 64];
        let merkle = encode_ballot_witness(
            ProtocolVariant::MerkleRoot,
            &signature,
            &ring,
            Some(BatchInclusion { batch_index: 3, proof: &proof }),
        )
        .unwrap();
        let cursor = 256 + 4 + 2 * 256 + 2 * 256 + 2 * 4;
        assert_eq!(&merkle[256..260], &2u32.to_le_bytes());
        assert_eq!(&merkle[cursor..cursor + 4], &3u32.to_le_bytes());
        assert_eq!(&merkle[cursor + 4..cursor + 8], &64u32.to_le_bytes());
        assert_eq!(merkle.len(), cursor + 8 + 64);

        assert!(matches!(
            encode_ballot_witness(ProtocolVariant::MerkleRoot, &signature, &ring, None),
            Err(VoteError::Validation(_))
        ));
    }
}
