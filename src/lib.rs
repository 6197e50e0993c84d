//! geodex: a content-addressed index of geospatial assets
//!
//! Manages the entry store colocated with a working tree (a directory
//! marked by `.ddb/dbase.sqlite`):
//! - Classifies files into semantic entry types and extracts per-type
//!   metadata plus derived geometries in EPSG:4326
//! - Reconciles computed entries against the persisted index (add, sync,
//!   move, remove) under single-writer exclusive transactions
//! - Keys derived artifacts (thumbnails, tile pyramids, build outputs)
//!   by content hash and invalidates them when hashes are retired

pub mod build;
pub mod entry;
pub mod error;
pub mod extract;
pub mod geo;
pub mod hash;
pub mod index;
pub mod meta;
pub mod paths;
pub mod profile;
pub mod storage;

pub use build::{get_thumbnail, get_tile, invalidate_build_artifacts};
pub use entry::classifier::classify;
pub use entry::parser::{parse_entry, parse_files, ParseFilesOpts};
pub use entry::{Entry, EntryType};
pub use error::{GeodexError, Result};
pub use index::{
    add_to_index, check_update, entry_exists, get_entry, get_matching_entries, list_entries,
    move_entry, remove_from_index, sync_index, sync_local_mtimes, FileStatus,
};
pub use meta::MetaManager;
pub use profile::Profile;
pub use storage::{init_index, open_index, Database, DBASE_NAME, DDB_FOLDER};
