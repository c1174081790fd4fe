use crate::integrity::error::{IntegrityError, IntegrityResult};
use blake3::Hasher;

pub struct IntegrityVerifier;

impl IntegrityVerifier {
    /// Hex BLAKE3 digest of `data`
    pub fn calculate_tag(data: &[u8]) -> String {
        blake3::hash(data).to_hex().to_string()
    }

    /// Tag of an object assembled from ordered parts: the digest of the raw
    /// part digests, suffixed with `-<part count>` so multipart objects are
    /// recognisable from the tag alone.
    pub fn composite_tag<'a, I>(part_tags: I) -> IntegrityResult<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut hasher = Hasher::new();
        let mut parts = 0u32;
        for tag in part_tags {
            hasher.update(&Self::decode_tag(tag)?);
            parts += 1;
        }
        Ok(format!("{}-{}", hasher.finalize().to_hex(), parts))
    }

    /// Parts a composite tag was built from; `None` for single-shot tags
    pub fn part_count(tag: &str) -> Option<u32> {
        tag.rsplit_once('-').and_then(|(_, count)| count.parse().ok())
    }

    pub fn verify(data: &[u8], expected: &str) -> IntegrityResult<()> {
        let actual = Self::calculate_tag(data);
        if actual == expected {
            Ok(())
        } else {
            Err(IntegrityError::TagMismatch {
                expected: expected.to_string(),
                actual,
            })
        }
    }

    fn decode_tag(tag: &str) -> IntegrityResult<[u8; 32]> {
        let hash = blake3::Hash::from_hex(tag)
            .map_err(|e| IntegrityError::MalformedTag(format!("{tag}: {e}")))?;
        Ok(*hash.as_bytes())
    }
}
