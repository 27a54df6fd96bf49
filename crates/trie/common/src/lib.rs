//! Common types shared by the state trie and its consumers.

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod account;
pub use account::{Account, KECCAK_EMPTY};

mod id;
pub use id::TrieId;

mod store;
pub use store::{Trie, TrieStore, TrieStoreError};
