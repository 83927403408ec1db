//! The prayer graph: entities, denormalized link state, derived aggregates,
//! and similarity search.

pub mod aggregate;
pub mod delete;
pub mod editor;
pub mod link;
pub mod merge;
pub mod search;
pub mod store;
pub mod types;
pub mod vector;

/// Encode an embedding as little-endian `f32` bytes for a BLOB column.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// Decode a BLOB column written by [`embedding_to_bytes`]. Trailing bytes that do
/// not form a whole `f32` are ignored.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_bytes_are_little_endian_f32() {
        let v = vec![1.0f32, -0.5, 3.25];
        let bytes = embedding_to_bytes(&v);
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
        assert_eq!(bytes_to_embedding(&bytes), v);
    }
}
