//! Helpers reading `/sys`.

pub mod block;
