use redb::TableDefinition;

/// Unified media records: uuid -> Media (msgpack). Created lazily by the first
/// write and dropped by a migration rollback.
pub const MEDIA: TableDefinition<&str, &[u8]> = TableDefinition::new("media");

/// Unique checksum index: raw 32-byte digest -> media uuid
pub const MEDIA_CHECKSUMS: TableDefinition<&[u8], &str> = TableDefinition::new("media_checksums");

/// Pre-unification image records: uuid -> LegacyRecord (msgpack)
pub const LEGACY_IMAGES: TableDefinition<&str, &[u8]> = TableDefinition::new("legacy_images");

/// Pre-unification document records: uuid -> LegacyRecord (msgpack)
pub const LEGACY_DOCS: TableDefinition<&str, &[u8]> = TableDefinition::new("legacy_docs");

/// Migration markers: migration name -> MigrationRecord (msgpack)
pub const MIGRATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("migrations");
