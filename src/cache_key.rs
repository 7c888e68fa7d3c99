//! Deterministic cache keys for the host's result cache

/// Separator between variable-length components
const SEPARATOR: u8 = 0xFF;

/// Builder for cache keys: a one-byte tag followed by the appended components
///
/// Strings are UTF-8 followed by a separator byte that never occurs in UTF-8, so
/// adjacent strings cannot run into each other. Numbers are fixed-width big-endian.
#[derive(Debug, Clone)]
pub(crate) struct CacheKeyBuilder {
    bytes: Vec<u8>,
}

impl CacheKeyBuilder {
    pub(crate) fn new(tag: u8) -> Self {
        CacheKeyBuilder { bytes: vec![tag] }
    }

    pub(crate) fn string(mut self, value: &str) -> Self {
        self.bytes.extend_from_slice(value.as_bytes());
        self.bytes.push(SEPARATOR);
        self
    }

    pub(crate) fn int(mut self, value: u32) -> Self {
        self.bytes.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub(crate) fn double(mut self, value: f64) -> Self {
        self.bytes.extend_from_slice(&value.to_bits().to_be_bytes());
        self
    }

    pub(crate) fn build(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let key = CacheKeyBuilder::new(0x60).string("ab").int(258).build();
        assert_eq!(key, vec![0x60, b'a', b'b', 0xFF, 0, 0, 1, 2]);
    }

    #[test]
    fn test_strings_do_not_collide() {
        let left = CacheKeyBuilder::new(1).string("ab").string("c").build();
        let right = CacheKeyBuilder::new(1).string("a").string("bc").build();
        assert_ne!(left, right);
    }

    #[test]
    fn test_double_bits() {
        let key = CacheKeyBuilder::new(0).double(1.0).build();
        assert_eq!(key, vec![0, 0x3F, 0xF0, 0, 0, 0, 0, 0, 0]);
    }
}
