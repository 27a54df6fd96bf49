use alloy_primitives::{b256, B256, U256};

/// Keccak-256 hash of empty input, the code hash of accounts without code.
pub const KECCAK_EMPTY: B256 =
    b256!("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470");

/// An account as stored in the state trie.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Account {
    /// Account nonce.
    pub nonce: u64,
    /// Account balance.
    pub balance: U256,
    /// Root of the account's storage trie.
    pub storage_root: B256,
    /// Hash of the account's bytecode.
    pub code_hash: B256,
}

impl Account {
    /// Whether the account has bytecode associated with it. A zero code hash
    /// counts as codeless the same way [`KECCAK_EMPTY`] does.
    pub fn has_bytecode(&self) -> bool {
        !(self.code_hash.is_zero() || self.code_hash == KECCAK_EMPTY)
    }

    /// An account is empty if it holds no nonce, no balance and no bytecode.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && !self.has_bytecode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::keccak256;

    #[test]
    fn empty_code_hash() {
        assert_eq!(keccak256(b""), KECCAK_EMPTY);
    }

    #[test]
    fn empty_account() {
        assert!(Account::default().is_empty());

        let codeless = Account { code_hash: KECCAK_EMPTY, ..Default::default() };
        assert!(!codeless.has_bytecode());
        assert!(codeless.is_empty());

        let funded = Account { balance: U256::from(1), ..Default::default() };
        assert!(!funded.is_empty());

        let contract = Account { code_hash: keccak256(b"\x60\x00"), ..Default::default() };
        assert!(contract.has_bytecode());
        assert!(!contract.is_empty());
    }
}
