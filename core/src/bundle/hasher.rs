//! Content hashing and fixed-size chunking
//!
//! Files smaller than [`CHUNK_SIZE`] are stored inline in their manifest
//! entry. Larger files are split at fixed offsets; each chunk is hashed on its
//! own and travels separately.

use super::mime::mime_type_of;
use super::types::{ChunkInfo, ContentHash, FileEntry};

/// Chunk boundary (256 KiB)
pub const CHUNK_SIZE: usize = 256 * 1024;

/// BLAKE3-256 digest of `bytes`
pub fn hash(bytes: &[u8]) -> ContentHash {
    ContentHash(*blake3::hash(bytes).as_bytes())
}

/// Whether a file of `size` bytes is carried inline
pub fn is_inline_size(size: usize) -> bool {
    size < CHUNK_SIZE
}

/// Owned chunk bytes together with their digest
#[derive(Clone, PartialEq, Eq)]
pub struct ChunkPayload {
    pub hash: ContentHash,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for ChunkPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkPayload")
            .field("hash", &self.hash)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Split `bytes` at [`CHUNK_SIZE`] boundaries
pub fn chunk(bytes: &[u8]) -> Vec<(ChunkInfo, &[u8])> {
    bytes
        .chunks(CHUNK_SIZE)
        .enumerate()
        .map(|(index, slice)| {
            let info = ChunkInfo {
                index: index as u32,
                hash: hash(slice),
                size: slice.len() as u64,
            };
            (info, slice)
        })
        .collect()
}

/// Build the manifest entry for one file, returning the chunk payloads that
/// must be stored alongside it (empty for inline files).
pub fn file_entry(path: &str, bytes: &[u8]) -> (FileEntry, Vec<ChunkPayload>) {
    let mut entry = FileEntry {
        path: path.to_string(),
        size: bytes.len() as u64,
        mime_type: mime_type_of(path).to_string(),
        hash: hash(bytes),
        content: None,
        chunks: None,
    };

    if is_inline_size(bytes.len()) {
        entry.content = Some(bytes.to_vec());
        return (entry, Vec::new());
    }

    let (infos, payloads): (Vec<_>, Vec<_>) = chunk(bytes)
        .into_iter()
        .map(|(info, slice)| {
            let payload = ChunkPayload {
                hash: info.hash,
                bytes: slice.to_vec(),
            };
            (info, payload)
        })
        .unzip();

    entry.chunks = Some(infos);
    (entry, payloads)
}

/// Concatenate chunk bytes in ascending index order
pub fn reassemble(mut parts: Vec<(u32, Vec<u8>)>) -> Vec<u8> {
    parts.sort_by_key(|(index, _)| *index);
    let total = parts.iter().map(|(_, b)| b.len()).sum();
    let mut out = Vec::with_capacity(total);
    for (_, bytes) in parts {
        out.extend_from_slice(&bytes);
    }
    out
}

/// Check a chunk's bytes against its declared digest and size
pub fn verify_chunk(info: &ChunkInfo, bytes: &[u8]) -> bool {
    bytes.len() as u64 == info.size && hash(bytes) == info.hash
}

/// Check a file's full contents against its declared digest and size
pub fn verify_file(entry: &FileEntry, bytes: &[u8]) -> bool {
    bytes.len() as u64 == entry.size && hash(bytes) == entry.hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_hash_is_blake3() {
        assert_eq!(hash(b"abc").0, *blake3::hash(b"abc").as_bytes());
    }

    #[test]
    fn test_small_file_is_inline() {
        let bytes = patterned(500);
        let (entry, chunks) = file_entry("index.html", &bytes);

        assert!(entry.is_inline());
        assert!(chunks.is_empty());
        assert_eq!(entry.content.as_deref(), Some(bytes.as_slice()));
        assert_eq!(entry.mime_type, "text/html");
        assert!(verify_file(&entry, &bytes));
    }

    #[test]
    fn test_boundary_sized_file_is_chunked() {
        let bytes = patterned(CHUNK_SIZE);
        let (entry, chunks) = file_entry("blob.bin", &bytes);
        assert!(!entry.is_inline());
        assert_eq!(chunks.len(), 1);
        assert_eq!(entry.chunk_list()[0].size, CHUNK_SIZE as u64);
    }

    #[test]
    fn test_600_kib_file_splits_into_three() {
        let bytes = patterned(600 * 1024);
        let (entry, chunks) = file_entry("bundle.js", &bytes);

        let infos = entry.chunk_list();
        assert_eq!(infos.len(), 3);
        assert_eq!(infos[0].size, CHUNK_SIZE as u64);
        assert_eq!(infos[1].size, CHUNK_SIZE as u64);
        assert_eq!(infos[2].size, (600 * 1024 - 2 * CHUNK_SIZE) as u64);
        assert_eq!(infos.iter().map(|c| c.size).sum::<u64>(), entry.size);

        for (info, payload) in infos.iter().zip(&chunks) {
            assert_eq!(info.hash, payload.hash);
            assert!(verify_chunk(info, &payload.bytes));
        }
    }

    #[test]
    fn test_flipped_byte_fails_chunk_verification() {
        let bytes = patterned(CHUNK_SIZE + 10);
        let (entry, chunks) = file_entry("big.bin", &bytes);

        let mut corrupted = chunks[1].bytes.clone();
        corrupted[0] ^= 0xff;
        assert!(!verify_chunk(&entry.chunk_list()[1], &corrupted));
    }

    #[test]
    fn test_reassemble_orders_by_index() {
        let parts = vec![(2, b"c".to_vec()), (0, b"a".to_vec()), (1, b"b".to_vec())];
        assert_eq!(reassemble(parts), b"abc");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_chunks_reassemble_exactly(len in 0usize..(3 * CHUNK_SIZE + 17), seed in any::<u8>()) {
            let bytes: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect();
            let mut parts: Vec<(u32, Vec<u8>)> = chunk(&bytes)
                .into_iter()
                .map(|(info, slice)| (info.index, slice.to_vec()))
                .collect();
            parts.reverse();
            prop_assert_eq!(reassemble(parts), bytes);
        }
    }
}
