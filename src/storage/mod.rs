pub mod db;
mod legacy;
mod media;
pub mod models;
mod tables;

pub use db::{Database, DatabaseError, DB_FILE_NAME};
pub(crate) use legacy::{drop_unified_in, for_each_legacy, get_marker_in, put_marker_in, remove_marker_in};
pub(crate) use db::open_optional;
pub(crate) use media::{decode_rows, MediaTables};
pub use media::NamePolicy;
pub use tables::*;
