//! # Algorithms Module
//!
//! Range resolution, merge policies, call deadlines and ABI helpers.

pub mod abi;
pub mod deadline;
pub mod merge;
pub mod range_resolver;

pub use abi::{
    decode_uint_word, encode_read_call, encode_safe_mint, parse_hex_u64, selector,
    to_hex_quantity, u256_to_u64, SAFE_MINT_SIGNATURE,
};
pub use deadline::bounded_call;
pub use merge::{mark_failed, merge_root_update, overwrite_count};
pub use range_resolver::{select_latest, EventRangeResolver};
