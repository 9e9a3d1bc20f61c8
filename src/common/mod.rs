pub mod arena;
pub mod bitset;
pub mod error;
pub mod fx_hash;
pub mod hash_tree;
pub mod queue;
pub mod source;
pub mod string_pool;
