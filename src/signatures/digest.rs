//! Message digests over signed byte ranges.

use super::byterange::ByteRange;
use super::types::DigestAlgorithm;
use crate::error::Result;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

fn hash_parts<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = D::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

impl DigestAlgorithm {
    /// Hash a single buffer.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        self.digest_parts(&[data])
    }

    /// Hash the concatenation of `parts` without copying them together.
    pub fn digest_parts(&self, parts: &[&[u8]]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Sha1 => hash_parts::<Sha1>(parts),
            DigestAlgorithm::Sha256 => hash_parts::<Sha256>(parts),
            DigestAlgorithm::Sha384 => hash_parts::<Sha384>(parts),
            DigestAlgorithm::Sha512 => hash_parts::<Sha512>(parts),
        }
    }
}

/// Hash the two spans named by `byte_range`. The placeholder window is never read.
pub fn digest_byte_range(algorithm: DigestAlgorithm, data: &[u8], byte_range: &ByteRange) -> Result<Vec<u8>> {
    let [first, second] = byte_range.spans(data)?;
    Ok(algorithm.digest_parts(&[first, second]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_sha256() {
        let digest = DigestAlgorithm::Sha256.digest(b"abc");
        assert_eq!(
            hex::encode(digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_parts_equal_concatenation() {
        for alg in DigestAlgorithm::ALL {
            let whole = alg.digest(b"hello world");
            let parts = alg.digest_parts(&[b"hello", b" ", b"world"]);
            assert_eq!(whole, parts);
            assert_eq!(whole.len(), alg.output_len());
        }
    }

    #[test]
    fn test_byte_range_skips_window() {
        let data = b"AAAA<0000>BBBB";
        let br = ByteRange::new(0, 4, 10, 4);
        let digest = digest_byte_range(DigestAlgorithm::Sha256, data, &br).unwrap();
        assert_eq!(digest, DigestAlgorithm::Sha256.digest(b"AAAABBBB"));
    }

    #[test]
    fn test_byte_range_out_of_bounds() {
        let br = ByteRange::new(0, 4, 10, 40);
        assert!(digest_byte_range(DigestAlgorithm::Sha1, b"short", &br).is_err());
    }
}
