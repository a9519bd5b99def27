//! Parsers for `/proc` files. Pure functions over file content so they can be
//! tested with canned samples.

pub mod meminfo;
pub mod mountinfo;
pub mod swaps;
