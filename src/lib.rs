pub mod cli;
pub mod config;
pub mod entry;
pub mod error;
pub mod note;
pub mod overview;
pub mod registry;
pub mod store;
pub mod util;

pub use config::{ConfigLoader, ConfigPaths, UserSettings};
pub use entry::Entry;
pub use error::EngineError;
pub use note::{Note, SaveOutcome};
pub use overview::{Overview, OVERVIEW_ID};
pub use registry::NoteRegistry;
pub use store::{BaseDir, DiskStore, FileStore};
