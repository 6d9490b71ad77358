//! Common type aliases shared across the node crates.

/// A public key in its wire/hex representation (`from`/`to` fields).
pub type PublicKeyHex = String;

/// Integer balance/amount unit. Kept as a plain integer (rather than a
/// fixed-point/decimal type) so balance arithmetic stays exact.
pub type Amount = u64;

/// Unix milliseconds. Kept as a plain integer on the wire/hash path so
/// `computeHash` stays canonical and language-agnostic; `chrono` is only
/// used at the logging/display edges (see crate docs).
pub type Timestamp = i64;

/// 1-based block number.
pub type BlockNumber = u64;

/// Index of a transaction within a block's `data` array.
pub type TxIndex = u32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_have_expected_widths() {
        let _: Amount = u64::MAX;
        let _: BlockNumber = u64::MAX;
        let _: TxIndex = u32::MAX;
        let _: Timestamp = i64::MIN;
    }
}
