//! Re-exports of the `rustc-hash` FxHash map/set under the path several
//! passes already expect (`crate::common::fx_hash::{FxHashMap, FxHashSet}`).
//! FxHash is non-cryptographic and deterministic within a process, which is
//! exactly what the pipeline needs: every pass iterates these in insertion
//! or otherwise-defined order, never relying on hash-bucket order for
//! results (GVN's "buckets are scanned in insertion order" requirement is
//! implemented with an explicit `Vec` per bucket, not by relying on map
//! iteration order).

pub use rustc_hash::{FxHashMap, FxHashSet};
