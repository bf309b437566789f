//! Persistence: record store trait, libSQL backend, migrations.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use traits::{PetitionType, PetitionTypeInput, ProcessingRecord, RecordStatus, RecordStore};
