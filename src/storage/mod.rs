mod settings_storage;

pub use settings_storage::{
    InMemorySettingsStorage, JsonFileSettingsStorage, SettingsStore, StorageError,
};
