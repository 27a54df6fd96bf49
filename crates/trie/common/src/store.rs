use crate::Account;
use alloy_primitives::{Address, B256, U256};
use std::fmt;

/// Errors returned by a [`TrieStore`] and the [`Trie`] handles it opens.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TrieStoreError {
    /// No trie with the requested root is present in the backing database.
    #[error("missing trie for root {0}")]
    RootNotFound(B256),
    /// No storage trie with the requested root is present for the owner.
    #[error("missing storage trie for owner {owner} at root {root}")]
    StorageRootNotFound {
        /// Hash of the account owning the storage trie.
        owner: B256,
        /// Root hash of the storage trie.
        root: B256,
    },
    /// The backing database failed.
    #[error("trie database error: {0}")]
    Database(String),
}

/// A handle on a single open trie.
///
/// A handle is **not** safe for concurrent use; concurrent readers must each
/// operate on their own [`TrieStore::copy_trie`] of it. Lookups resolve trie
/// nodes through the store's node cache, warming it as a side effect.
pub trait Trie: fmt::Debug + Send + 'static {
    /// Looks up an account by address.
    fn get_account(&mut self, address: Address) -> Result<Option<Account>, TrieStoreError>;

    /// Looks up a storage slot of the given account.
    fn get_storage(&mut self, address: Address, key: &[u8])
        -> Result<Option<U256>, TrieStoreError>;
}

/// A database that opens account and storage tries by root.
///
/// Implementations are cheap to clone and share a node cache between every
/// handle they hand out, so warming one handle warms them all.
pub trait TrieStore: Clone + fmt::Debug + Send + Sync + 'static {
    /// The trie handle type produced by this store.
    type Trie: Trie;

    /// Opens the account trie at the given state root.
    fn open_trie(&self, root: B256) -> Result<Self::Trie, TrieStoreError>;

    /// Opens the storage trie of `owner` at the given root, in the state
    /// identified by `state_root`.
    fn open_storage_trie(
        &self,
        state_root: B256,
        owner: B256,
        root: B256,
    ) -> Result<Self::Trie, TrieStoreError>;

    /// Produces an independent handle on the same trie, sharing the underlying
    /// node cache with the original.
    fn copy_trie(&self, trie: &Self::Trie) -> Self::Trie;
}
