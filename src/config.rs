/// Device configuration store.
///
/// A fixed schema of string and integer settings addressed by [`ConfigKey`].
/// Some keys are read-only to callers and only change through boot
/// bookkeeping. Values persist through a [`ConfigStorage`] backend (NVS on
/// the device, in-memory in tests).
use heapless::String;

/// Longest stored string value; longer input is truncated.
pub const MAX_VALUE_LEN: usize = 64;

pub type ValueString = String<MAX_VALUE_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    BootMode,
    BootCount,
    BuildId,
    ReleaseId,
    Hostname,
    WifiSsid,
    WifiPass,
    MqttHost,
    MqttPort,
    MqttTls,
    MqttUser,
    MqttPass,
}

const KEY_COUNT: usize = 12;

impl ConfigKey {
    pub const ALL: [ConfigKey; KEY_COUNT] = [
        ConfigKey::BootMode,
        ConfigKey::BootCount,
        ConfigKey::BuildId,
        ConfigKey::ReleaseId,
        ConfigKey::Hostname,
        ConfigKey::WifiSsid,
        ConfigKey::WifiPass,
        ConfigKey::MqttHost,
        ConfigKey::MqttPort,
        ConfigKey::MqttTls,
        ConfigKey::MqttUser,
        ConfigKey::MqttPass,
    ];

    /// Storage and form-field name.
    pub fn name(self) -> &'static str {
        ITEMS[self as usize].name
    }

    pub fn is_read_only(self) -> bool {
        ITEMS[self as usize].read_only
    }

    /// Case-insensitive lookup by name.
    pub fn lookup(name: &str) -> Option<ConfigKey> {
        ConfigKey::ALL
            .iter()
            .copied()
            .find(|key| key.name().eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    Str(ValueString),
    Int(i32),
}

#[derive(Clone, Copy)]
enum DefaultValue {
    Str(&'static str),
    Int(i32),
}

struct Item {
    name: &'static str,
    default: DefaultValue,
    read_only: bool,
}

/// Indexed by `ConfigKey as usize`.
static ITEMS: [Item; KEY_COUNT] = [
    Item { name: "boot_mode", default: DefaultValue::Int(0), read_only: false },
    Item { name: "boot_count", default: DefaultValue::Int(0), read_only: true },
    Item { name: "build_id", default: DefaultValue::Str(""), read_only: true },
    Item { name: "release_id", default: DefaultValue::Int(0), read_only: false },
    Item { name: "hostname", default: DefaultValue::Str(""), read_only: false },
    Item { name: "wifi_ssid", default: DefaultValue::Str(""), read_only: false },
    Item { name: "wifi_pass", default: DefaultValue::Str(""), read_only: false },
    Item { name: "mqtt_host", default: DefaultValue::Str(""), read_only: false },
    Item { name: "mqtt_port", default: DefaultValue::Int(1883), read_only: false },
    Item { name: "mqtt_tls", default: DefaultValue::Int(0), read_only: false },
    Item { name: "mqtt_user", default: DefaultValue::Str(""), read_only: false },
    Item { name: "mqtt_pass", default: DefaultValue::Str(""), read_only: false },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    /// Scan and publish beacons
    Normal = 0,
    /// Serve the configuration web UI
    Config = 1,
}

impl BootMode {
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => BootMode::Config,
            _ => BootMode::Normal,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            BootMode::Normal => BootMode::Config,
            BootMode::Config => BootMode::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Backend-specific error code
    Backend(i32),
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StorageError::Backend(code) => write!(f, "storage error {}", code),
        }
    }
}

/// Persistent key-value backend for [`Config`].
pub trait ConfigStorage {
    fn get_str(&mut self, name: &str) -> Result<Option<ValueString>, StorageError>;
    fn get_i32(&mut self, name: &str) -> Result<Option<i32>, StorageError>;
    fn set_str(&mut self, name: &str, value: &str) -> Result<(), StorageError>;
    fn set_i32(&mut self, name: &str, value: i32) -> Result<(), StorageError>;
    fn commit(&mut self) -> Result<(), StorageError>;
}

/// Cut `value` to at most [`MAX_VALUE_LEN`] bytes on a character boundary.
fn truncate(value: &str) -> &str {
    if value.len() <= MAX_VALUE_LEN {
        return value;
    }
    let mut end = MAX_VALUE_LEN;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

fn to_value_string(value: &str) -> ValueString {
    let mut s = ValueString::new();
    // Cannot fail after truncation
    let _ = s.push_str(truncate(value));
    s
}

/// Replace anything but ASCII alphanumerics, `-` and `.` with `-`.
pub fn sanitize_hostname(value: &str) -> ValueString {
    let mut out = ValueString::new();
    for c in truncate(value).chars() {
        let c = if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
            c
        } else {
            '-'
        };
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    values: [ConfigValue; KEY_COUNT],
}

impl Config {
    /// A store holding every default.
    pub fn new() -> Self {
        let mut config = Self {
            values: core::array::from_fn(|_| ConfigValue::Int(0)),
        };
        config.reset();
        config
    }

    pub fn reset(&mut self) {
        for (value, item) in self.values.iter_mut().zip(ITEMS.iter()) {
            *value = match item.default {
                DefaultValue::Str(s) => ConfigValue::Str(to_value_string(s)),
                DefaultValue::Int(i) => ConfigValue::Int(i),
            };
        }
    }

    /// String value, or `""` if `key` holds an integer.
    pub fn get_str(&self, key: ConfigKey) -> &str {
        match &self.values[key as usize] {
            ConfigValue::Str(s) => s.as_str(),
            ConfigValue::Int(_) => "",
        }
    }

    /// Integer value, or `0` if `key` holds a string.
    pub fn get_int(&self, key: ConfigKey) -> i32 {
        match self.values[key as usize] {
            ConfigValue::Int(i) => i,
            ConfigValue::Str(_) => 0,
        }
    }

    /// Store a string. Ignored (returns false) for read-only or integer keys.
    pub fn set_str(&mut self, key: ConfigKey, value: &str) -> bool {
        if key.is_read_only() {
            log::debug!("Config: {} is read-only", key.name());
            return false;
        }
        match &mut self.values[key as usize] {
            ConfigValue::Str(s) => {
                *s = to_value_string(value);
                true
            }
            ConfigValue::Int(_) => false,
        }
    }

    /// Store an integer. Ignored (returns false) for read-only or string keys.
    pub fn set_int(&mut self, key: ConfigKey, value: i32) -> bool {
        if key.is_read_only() {
            log::debug!("Config: {} is read-only", key.name());
            return false;
        }
        match &mut self.values[key as usize] {
            ConfigValue::Int(i) => {
                *i = value;
                true
            }
            ConfigValue::Str(_) => false,
        }
    }

    pub fn boot_mode(&self) -> BootMode {
        BootMode::from_i32(self.get_int(ConfigKey::BootMode))
    }

    pub fn set_boot_mode(&mut self, mode: BootMode) {
        self.set_int(ConfigKey::BootMode, mode as i32);
    }

    pub fn boot_count(&self) -> u32 {
        u32::try_from(self.get_int(ConfigKey::BootCount)).unwrap_or(0)
    }

    /// Overlay every value present in `storage`. Missing keys keep their
    /// current value.
    pub fn load<S: ConfigStorage>(&mut self, storage: &mut S) -> Result<(), StorageError> {
        for key in ConfigKey::ALL {
            match &mut self.values[key as usize] {
                ConfigValue::Str(s) => {
                    if let Some(stored) = storage.get_str(key.name())? {
                        *s = stored;
                    }
                }
                ConfigValue::Int(i) => {
                    if let Some(stored) = storage.get_i32(key.name())? {
                        *i = stored;
                    }
                }
            }
        }
        Ok(())
    }

    /// Write every value and commit.
    pub fn save<S: ConfigStorage>(&self, storage: &mut S) -> Result<(), StorageError> {
        for key in ConfigKey::ALL {
            match &self.values[key as usize] {
                ConfigValue::Str(s) => storage.set_str(key.name(), s)?,
                ConfigValue::Int(i) => storage.set_i32(key.name(), *i)?,
            }
        }
        storage.commit()
    }

    /// Boot bookkeeping, run once after [`load`](Self::load).
    ///
    /// Counts boots since the running build was first seen and persists
    /// Normal as the next boot mode, so Config mode lasts a single boot.
    /// The in-memory boot mode is left as loaded.
    pub fn record_boot<S: ConfigStorage>(
        &mut self,
        storage: &mut S,
        build_id: &str,
    ) -> Result<u32, StorageError> {
        let mut count = self.get_int(ConfigKey::BootCount).saturating_add(1);
        if self.get_str(ConfigKey::BuildId) != build_id {
            self.values[ConfigKey::BuildId as usize] = ConfigValue::Str(to_value_string(build_id));
            storage.set_str(ConfigKey::BuildId.name(), build_id)?;
            count = 1;
        }
        self.values[ConfigKey::BootCount as usize] = ConfigValue::Int(count);
        storage.set_i32(ConfigKey::BootCount.name(), count)?;
        storage.set_i32(ConfigKey::BootMode.name(), BootMode::Normal as i32)?;
        storage.commit()?;
        Ok(u32::try_from(count).unwrap_or(0))
    }
}

impl core::default::Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory [`ConfigStorage`] for tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct MemoryStorage {
    pub strings: std::collections::HashMap<std::string::String, std::string::String>,
    pub ints: std::collections::HashMap<std::string::String, i32>,
    pub commits: usize,
}

#[cfg(test)]
impl ConfigStorage for MemoryStorage {
    fn get_str(&mut self, name: &str) -> Result<Option<ValueString>, StorageError> {
        Ok(self.strings.get(name).map(|s| to_value_string(s)))
    }

    fn get_i32(&mut self, name: &str) -> Result<Option<i32>, StorageError> {
        Ok(self.ints.get(name).copied())
    }

    fn set_str(&mut self, name: &str, value: &str) -> Result<(), StorageError> {
        self.strings.insert(name.into(), value.into());
        Ok(())
    }

    fn set_i32(&mut self, name: &str, value: i32) -> Result<(), StorageError> {
        self.ints.insert(name.into(), value);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.commits += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Defaults and typed access ─────────────────────────────────

    #[test]
    fn defaults() {
        let config = Config::new();
        assert_eq!(config.get_int(ConfigKey::MqttPort), 1883);
        assert_eq!(config.get_str(ConfigKey::Hostname), "");
        assert_eq!(config.boot_mode(), BootMode::Normal);
    }

    #[test]
    fn type_mismatch_reads_as_empty() {
        let config = Config::new();
        assert_eq!(config.get_str(ConfigKey::MqttPort), "");
        assert_eq!(config.get_int(ConfigKey::Hostname), 0);
    }

    #[test]
    fn type_mismatch_set_is_ignored() {
        let mut config = Config::new();
        assert!(!config.set_str(ConfigKey::MqttPort, "99"));
        assert!(!config.set_int(ConfigKey::Hostname, 5));
        assert_eq!(config.get_int(ConfigKey::MqttPort), 1883);
        assert_eq!(config.get_str(ConfigKey::Hostname), "");
    }

    #[test]
    fn read_only_keys_reject_writes() {
        let mut config = Config::new();
        assert!(!config.set_int(ConfigKey::BootCount, 9));
        assert!(!config.set_str(ConfigKey::BuildId, "x"));
        assert_eq!(config.get_int(ConfigKey::BootCount), 0);
    }

    #[test]
    fn long_values_truncate_on_char_boundary() {
        let mut config = Config::new();
        let long = "é".repeat(40); // 80 bytes
        assert!(config.set_str(ConfigKey::WifiSsid, &long));
        let stored = config.get_str(ConfigKey::WifiSsid);
        assert_eq!(stored.len(), MAX_VALUE_LEN);
        assert!(stored.chars().all(|c| c == 'é'));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(ConfigKey::lookup("MQTT_Host"), Some(ConfigKey::MqttHost));
        assert_eq!(ConfigKey::lookup("hostname"), Some(ConfigKey::Hostname));
        assert_eq!(ConfigKey::lookup("nope"), None);
    }

    #[test]
    fn every_key_round_trips_its_name() {
        for key in ConfigKey::ALL {
            assert_eq!(ConfigKey::lookup(key.name()), Some(key));
        }
    }

    // ── Persistence ───────────────────────────────────────────────

    #[test]
    fn save_then_load() {
        let mut storage = MemoryStorage::default();
        let mut config = Config::new();
        config.set_str(ConfigKey::Hostname, "lobby");
        config.set_int(ConfigKey::MqttPort, 8883);
        config.save(&mut storage).unwrap();
        assert_eq!(storage.commits, 1);

        let mut loaded = Config::new();
        loaded.load(&mut storage).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn load_keeps_defaults_for_missing_keys() {
        let mut storage = MemoryStorage::default();
        storage.strings.insert("hostname".into(), "den".into());
        let mut config = Config::new();
        config.load(&mut storage).unwrap();
        assert_eq!(config.get_str(ConfigKey::Hostname), "den");
        assert_eq!(config.get_int(ConfigKey::MqttPort), 1883);
    }

    #[test]
    fn reset_restores_defaults() {
        let mut config = Config::new();
        config.set_str(ConfigKey::MqttHost, "h");
        config.set_boot_mode(BootMode::Config);
        config.reset();
        assert_eq!(config, Config::new());
    }

    // ── Boot bookkeeping ──────────────────────────────────────────

    #[test]
    fn boot_count_increments_for_same_build() {
        let mut storage = MemoryStorage::default();
        let mut config = Config::new();
        assert_eq!(config.record_boot(&mut storage, "b1").unwrap(), 1);

        let mut next = Config::new();
        next.load(&mut storage).unwrap();
        assert_eq!(next.record_boot(&mut storage, "b1").unwrap(), 2);
        assert_eq!(storage.ints["boot_count"], 2);
    }

    #[test]
    fn boot_count_resets_on_new_build() {
        let mut storage = MemoryStorage::default();
        storage.ints.insert("boot_count".into(), 41);
        storage.strings.insert("build_id".into(), "old".into());
        let mut config = Config::new();
        config.load(&mut storage).unwrap();
        assert_eq!(config.record_boot(&mut storage, "new").unwrap(), 1);
        assert_eq!(config.get_str(ConfigKey::BuildId), "new");
        assert_eq!(storage.strings["build_id"], "new");
    }

    #[test]
    fn config_mode_lasts_one_boot() {
        let mut storage = MemoryStorage::default();
        storage.ints.insert("boot_mode".into(), BootMode::Config as i32);
        let mut config = Config::new();
        config.load(&mut storage).unwrap();
        config.record_boot(&mut storage, "b").unwrap();
        assert_eq!(config.boot_mode(), BootMode::Config);
        assert_eq!(storage.ints["boot_mode"], BootMode::Normal as i32);
    }

    // ── Hostname sanitizing ───────────────────────────────────────

    #[test]
    fn sanitize_replaces_disallowed_characters() {
        assert_eq!(sanitize_hostname("my*device!").as_str(), "my-device-");
        assert_eq!(sanitize_hostname("host-1.lan").as_str(), "host-1.lan");
        assert_eq!(sanitize_hostname("a b_c").as_str(), "a-b-c");
    }

    #[test]
    fn boot_mode_toggle() {
        assert_eq!(BootMode::Normal.toggled(), BootMode::Config);
        assert_eq!(BootMode::from_i32(7), BootMode::Normal);
    }
}
