/// A node of the hyper tree, addressed by `(index, height)`
///
/// The index holds `L` bits; a node at height `h` roots the subtree of keys
/// sharing its top `L - h` bits, and its own low `h` bits are zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct HyperPosition {
    pub index: Vec<u8>,
    pub height: u16,
}

impl HyperPosition {
    pub fn new(index: Vec<u8>, height: u16) -> Self {
        Self { index, height }
    }

    /// The storage and salt key: `index(L/8) ‖ height(2)`, big-endian
    pub fn bytes(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(self.index.len() + 2);
        b.extend_from_slice(&self.index);
        b.extend_from_slice(&self.height.to_be_bytes());
        b
    }

    /// The audit-path key: hex `index|height`
    pub fn id(&self) -> String {
        format!("{}|{}", hex::encode(&self.index), self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_append_the_height() {
        let pos = HyperPosition::new(vec![0xab, 0xcd], 300);
        assert_eq!(pos.bytes(), vec![0xab, 0xcd, 0x01, 0x2c]);
    }

    #[test]
    fn id_is_hex_index_and_decimal_height() {
        let pos = HyperPosition::new(vec![0x10], 4);
        assert_eq!(pos.id(), "10|4");
    }
}
