use hashing::{Digest, Hasher};

use crate::AuditPath;

use super::navigator::{bit_clear, bit_is_set, bit_set};
use super::position::HyperPosition;

/// Proof that a key digest maps to a version in the hyper tree
///
/// The audit path holds one sibling digest per level from just below the
/// root down to the height where the leaf rests; the verifier derives that
/// height from the number of entries.
#[derive(Debug, Clone)]
pub struct HyperProof<H: Hasher> {
    pub audit_path: AuditPath,
    pub key: Digest,
    /// The leaf value: the 8-byte big-endian version of first insertion
    pub value: Vec<u8>,
    hasher: H,
}

impl<H: Hasher> HyperProof<H> {
    pub(crate) fn new(audit_path: AuditPath, key: Digest, value: Vec<u8>, hasher: H) -> Self {
        Self {
            audit_path,
            key,
            value,
            hasher,
        }
    }

    /// Recompute the root from the leaf value and the audit path, and
    /// compare it against `expected_root`
    ///
    /// Never fails: a structurally broken path yields `false`.
    #[must_use]
    pub fn verify(&self, key_digest: &Digest, expected_root: &Digest) -> bool {
        let num_bits = self.hasher.len();
        let key = key_digest.as_bytes();
        if key.len() != usize::from(num_bits / 8) {
            return false;
        }
        let entries = self.audit_path.len();
        if entries == 0 || entries > usize::from(num_bits) {
            return false;
        }
        let resting = num_bits - entries as u16;

        // the leaf position: the key with every bit below its height cleared
        let mut index = key.to_vec();
        for bit in (num_bits - resting)..num_bits {
            bit_clear(&mut index, bit);
        }
        let mut pos = HyperPosition::new(index, resting);
        let mut current = self.hasher.salted(&pos.bytes(), &[&self.value]);

        for height in resting..num_bits {
            let bit = num_bits - height - 1;
            let from_right = bit_is_set(key, bit);

            let mut parent_index = pos.index.clone();
            bit_clear(&mut parent_index, bit);
            let parent = HyperPosition::new(parent_index, height + 1);

            let mut sibling_index = parent.index.clone();
            if !from_right {
                bit_set(&mut sibling_index, bit);
            }
            let sibling = HyperPosition::new(sibling_index, height);

            let Some(sibling_digest) = self.audit_path.get(&sibling.id()) else {
                return false;
            };
            current = match from_right {
                true => self.hasher.salted(
                    &parent.bytes(),
                    &[sibling_digest.as_bytes(), current.as_bytes()],
                ),
                false => self.hasher.salted(
                    &parent.bytes(),
                    &[current.as_bytes(), sibling_digest.as_bytes()],
                ),
            };
            pos = parent;
        }

        &current == expected_root
    }
}

#[cfg(test)]
mod tests {
    use hashing::XorHasher;

    use super::*;

    fn digest(byte: u8) -> Digest {
        Digest::new(vec![byte])
    }

    fn path(entries: &[(&str, u8)]) -> AuditPath {
        entries
            .iter()
            .map(|(id, byte)| (id.to_string(), digest(*byte)))
            .collect()
    }

    // a hand-built tree: the lone leaf 0x00 rests at height 3, so the path
    // carries siblings for heights 7..=3 only
    fn lone_leaf_proof() -> HyperProof<XorHasher> {
        HyperProof::new(
            path(&[
                ("80|7", 0x0),
                ("40|6", 0x0),
                ("20|5", 0x0),
                ("10|4", 0x0),
                ("08|3", 0x0),
            ]),
            digest(0x00),
            0u64.to_be_bytes().to_vec(),
            XorHasher::new(),
        )
    }

    #[test]
    fn accepts_a_path_down_to_the_resting_height() {
        let proof = lone_leaf_proof();
        // the xor root is the xor of the version bytes: 0
        assert!(proof.verify(&digest(0x00), &digest(0x00)));
        assert!(!proof.verify(&digest(0x00), &digest(0x01)));
    }

    #[test]
    fn rejects_a_key_off_the_path() {
        let proof = lone_leaf_proof();
        assert!(!proof.verify(&digest(0x80), &digest(0x00)));
    }

    #[test]
    fn rejects_an_empty_path() {
        let proof = HyperProof::new(
            AuditPath::new(),
            digest(0x00),
            0u64.to_be_bytes().to_vec(),
            XorHasher::new(),
        );
        assert!(!proof.verify(&digest(0x00), &digest(0x00)));
    }

    #[test]
    fn rejects_a_wrong_length_key() {
        let proof = lone_leaf_proof();
        assert!(!proof.verify(&Digest::new(vec![0x00, 0x00]), &digest(0x00)));
    }
}
