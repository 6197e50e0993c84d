//! Index operations
//!
//! The mutating and querying operations over a working tree's entry
//! store: add, remove, sync, move, list and match, plus folder synthesis
//! and the build-artifact invalidation that keeps derived outputs from
//! outliving the hashes they were keyed by.

pub mod ops;

pub use ops::{
    add_to_index, check_update, create_missing_folders, entry_exists, get_entry,
    get_matching_entries, list_entries, move_entry, remove_from_index, sanitize_query_param,
    sync_index, sync_local_mtimes, FileStatus,
};
