pub mod engine;
pub mod file;
pub mod memory;
pub mod preferences;

pub use engine::KeyValueStore;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use preferences::{PreferencesStore, ViewPreferences};
