pub mod codec;
pub mod error;
pub mod iterator;
pub mod key;
pub mod node;
pub mod tree;

pub use error::BTreeError;
pub use iterator::TreeIterator;
pub use key::IndexKey;
pub use node::{BTreeNode, BTreePageType};
pub use tree::BPlusTree;
