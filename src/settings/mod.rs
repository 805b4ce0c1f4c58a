//! XSETTINGS channel: desktop settings published by the settings daemon.
//!
//! The daemon owns the `_XSETTINGS_S{screen}` selection and keeps every
//! setting in one `_XSETTINGS_SETTINGS` property on the owner window. We
//! watch that window for property changes, decode the blob, keep a
//! name-to-value cache, and tell listeners which settings changed.

mod parse;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub use parse::{SettingsParseError, peek_serial};

use crate::atoms::AtomTable;
use crate::property::XProperty;
use crate::protocol::{Atom, NONE, Window, XProtocol, event_mask};

/// Integer setting holding the desktop scale factor.
pub const SCALING_FACTOR: &str = "Gdk/WindowScalingFactor";
/// String setting holding the GTK theme name.
pub const THEME_NAME: &str = "Net/ThemeName";

/// 8-bit RGBA colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Colour {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
}

/// Value of a single setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    Integer(i32),
    String(String),
    Colour(Colour),
    /// Lookup sentinel for an unknown name. Never stored in the cache.
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingType {
    Integer,
    String,
    Colour,
    Invalid,
}

/// A named setting as handed to listeners and returned by lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XSetting {
    pub name: String,
    pub value: SettingValue,
}

impl XSetting {
    pub fn invalid(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: SettingValue::Invalid,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.value != SettingValue::Invalid
    }

    pub fn setting_type(&self) -> SettingType {
        match self.value {
            SettingValue::Integer(_) => SettingType::Integer,
            SettingValue::String(_) => SettingType::String,
            SettingValue::Colour(_) => SettingType::Colour,
            SettingValue::Invalid => SettingType::Invalid,
        }
    }

    pub fn as_integer(&self) -> Option<i32> {
        match self.value {
            SettingValue::Integer(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            SettingValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Receives a call for every setting that changed value or appeared.
pub trait SettingsListener: Send + Sync {
    fn setting_changed(&self, setting: &XSetting);
}

/// Registration handle returned by [`XSettings::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ListenerToken(u64);

struct Subscription {
    active: AtomicBool,
    listener: Arc<dyn SettingsListener>,
}

#[derive(Default)]
struct Cache {
    last_serial: Option<u32>,
    settings: HashMap<String, XSetting>,
}

/// Settings cache bound to the daemon's settings window.
pub struct XSettings {
    settings_window: Window,
    settings_property: Atom,
    cache: Mutex<Cache>,
    // Tokens increase monotonically, so map order is registration order.
    listeners: Mutex<BTreeMap<ListenerToken, Arc<Subscription>>>,
    next_token: AtomicU64,
}

impl XSettings {
    /// Find the settings daemon for the default screen and load its
    /// current settings. `None` when no daemon owns the selection.
    pub fn create(conn: &impl XProtocol, atoms: &AtomTable) -> Option<Self> {
        let selection_name = format!("_XSETTINGS_S{}", conn.screen().screen_num);
        let selection = atoms.get_if_exists(conn, &selection_name);
        if selection == NONE {
            return None;
        }

        let owner = match conn.selection_owner(selection) {
            Ok(owner) if owner != NONE => owner,
            Ok(_) => return None,
            Err(e) => {
                tracing::debug!(error = %e, "GetSelectionOwner for XSETTINGS failed");
                return None;
            }
        };

        let settings_property = atoms.get_creating(conn, "_XSETTINGS_SETTINGS");
        if let Err(e) = conn.select_input(
            owner,
            event_mask::PROPERTY_CHANGE | event_mask::STRUCTURE_NOTIFY,
        ) {
            tracing::warn!(
                window = format_args!("0x{owner:x}"),
                error = %e,
                "cannot watch XSETTINGS window"
            );
        }

        let settings = Self::new(owner, settings_property);
        settings.update(conn);
        Some(settings)
    }

    pub(crate) fn new(settings_window: Window, settings_property: Atom) -> Self {
        Self {
            settings_window,
            settings_property,
            cache: Mutex::new(Cache::default()),
            listeners: Mutex::new(BTreeMap::new()),
            next_token: AtomicU64::new(0),
        }
    }

    pub fn settings_window(&self) -> Window {
        self.settings_window
    }

    pub fn settings_property(&self) -> Atom {
        self.settings_property
    }

    /// Re-read the settings property and apply it.
    pub fn update(&self, conn: &impl XProtocol) {
        let prop = XProperty::fetch_all(
            conn,
            self.settings_window,
            self.settings_property,
            false,
            self.settings_property,
        );
        if !prop.success || prop.actual_format != 8 {
            tracing::debug!(
                window = format_args!("0x{:x}", self.settings_window),
                "XSETTINGS property unavailable"
            );
            return;
        }
        // Errors are logged by `apply` and leave the cache as it was.
        let _ = self.apply(&prop.data);
    }

    /// Apply a raw settings blob. Returns how many settings changed.
    ///
    /// A blob carrying the serial already applied is skipped. A malformed
    /// blob leaves the cache untouched and notifies nobody.
    pub fn apply(&self, data: &[u8]) -> Result<usize, SettingsParseError> {
        let serial = peek_serial(data).inspect_err(|e| {
            tracing::warn!(error = %e, "discarding XSETTINGS blob with unreadable header");
        })?;
        if self.lock_cache().last_serial == Some(serial) {
            return Ok(0);
        }

        let blob = parse::parse(data).inspect_err(|e| {
            tracing::warn!(serial, error = %e, "discarding malformed XSETTINGS blob");
        })?;

        // Checked again under the same guard as the update, so a serial
        // applied concurrently is applied once.
        let changed: Vec<XSetting> = {
            let mut cache = self.lock_cache();
            if cache.last_serial == Some(blob.serial) {
                return Ok(0);
            }
            let mut changed = Vec::new();
            for (name, value) in blob.entries {
                let setting = XSetting { name, value };
                if cache.settings.get(&setting.name) != Some(&setting) {
                    changed.push(setting.clone());
                    cache.settings.insert(setting.name.clone(), setting);
                }
            }
            cache.last_serial = Some(blob.serial);
            changed
        };

        tracing::debug!(serial, changed = changed.len(), "XSETTINGS updated");
        for setting in &changed {
            self.notify(setting);
        }
        Ok(changed.len())
    }

    /// Cached value of `name`, or the invalid sentinel.
    pub fn get_setting(&self, name: &str) -> XSetting {
        self.lock_cache()
            .settings
            .get(name)
            .cloned()
            .unwrap_or_else(|| XSetting::invalid(name))
    }

    /// Every cached setting, sorted by name.
    pub fn all(&self) -> Vec<XSetting> {
        let mut all: Vec<XSetting> = self.lock_cache().settings.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn add_listener(&self, listener: Arc<dyn SettingsListener>) -> ListenerToken {
        let token = ListenerToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let subscription = Arc::new(Subscription {
            active: AtomicBool::new(true),
            listener,
        });
        self.lock_listeners().insert(token, subscription);
        token
    }

    /// Unregister. Takes effect immediately, including for a notification
    /// already in progress on another thread or further up this stack.
    pub fn remove_listener(&self, token: ListenerToken) {
        if let Some(sub) = self.lock_listeners().remove(&token) {
            sub.active.store(false, Ordering::Release);
        }
    }

    fn notify(&self, setting: &XSetting) {
        let snapshot: Vec<Arc<Subscription>> = self.lock_listeners().values().cloned().collect();
        for sub in snapshot {
            if sub.active.load(Ordering::Acquire) {
                sub.listener.setting_changed(setting);
            }
        }
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, Cache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_listeners(
        &self,
    ) -> std::sync::MutexGuard<'_, BTreeMap<ListenerToken, Arc<Subscription>>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}
