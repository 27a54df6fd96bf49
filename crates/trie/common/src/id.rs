use alloy_primitives::B256;

/// Identifies a single trie within a state: the hash of the owning account and
/// the trie root.
///
/// A zero owner denotes the account trie itself; any other owner denotes the
/// storage trie of that account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TrieId {
    /// Hash of the account owning the trie, zero for the account trie.
    pub owner: B256,
    /// Root hash of the trie.
    pub root: B256,
}

impl TrieId {
    /// Creates a new trie identifier.
    pub const fn new(owner: B256, root: B256) -> Self {
        Self { owner, root }
    }

    /// Whether this id refers to the account trie rather than a storage trie.
    pub fn is_account_trie(&self) -> bool {
        self.owner.is_zero()
    }
}
