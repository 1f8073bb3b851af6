use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const DEFAULT_BATCH_SIZE: i64 = 20;

/// Loosely typed options map, as accepted by every batch operation.
///
/// Recognized keys: `batch_size`, `flush_auto`, `clear_auto`, `nested_bag`.
pub type BatchOptions = serde_json::Map<String, JsonValue>;

/// Turns a JSON object into an options map; anything else yields no options.
pub fn batch_options(value: JsonValue) -> BatchOptions {
    match value {
        JsonValue::Object(map) => map,
        _ => BatchOptions::new(),
    }
}

/// Right-biased merge: keys in `overrides` replace those in `base`.
pub fn merge_options(base: &BatchOptions, overrides: BatchOptions) -> BatchOptions {
    let mut merged = base.clone();
    merged.extend(overrides);
    merged
}

/// What a cursor does with its reference bag when it drains a nested
/// streaming result that carries its own cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NestedBagPolicy {
    /// The nested result keeps its own bag (or none)
    #[default]
    Isolated,
    /// The nested result is handed the outer cursor's bag
    Inherit,
}

/// Flush/clear cadence of one batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Items per synchronization boundary; `<= 0` disables count boundaries
    #[serde(rename = "batch_size", default = "default_batch_size")]
    pub size: i64,

    /// Flush pending writes at each boundary
    #[serde(default = "default_enabled")]
    pub flush_auto: bool,

    /// Purge the identity map at each boundary
    #[serde(default = "default_enabled")]
    pub clear_auto: bool,

    #[serde(default)]
    pub nested_bag: NestedBagPolicy,
}

const fn default_batch_size() -> i64 {
    DEFAULT_BATCH_SIZE
}

const fn default_enabled() -> bool {
    true
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_BATCH_SIZE,
            flush_auto: true,
            clear_auto: true,
            nested_bag: NestedBagPolicy::Isolated,
        }
    }
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a config from an options map merged over the defaults.
    ///
    /// Values are coerced rather than validated: `"50"` and `50.0` are both
    /// a batch size of 50, `0`/`""`/`"0"`/`"false"` are false. Unknown keys are
    /// ignored, `null` counts as missing.
    pub fn from_options(options: &BatchOptions) -> Self {
        let defaults = Self::default();
        Self {
            size: options
                .get("batch_size")
                .and_then(coerce_int)
                .unwrap_or(defaults.size),
            flush_auto: options
                .get("flush_auto")
                .and_then(coerce_bool)
                .unwrap_or(defaults.flush_auto),
            clear_auto: options
                .get("clear_auto")
                .and_then(coerce_bool)
                .unwrap_or(defaults.clear_auto),
            nested_bag: options
                .get("nested_bag")
                .and_then(|value| serde_json::from_value(value.clone()).ok())
                .unwrap_or(defaults.nested_bag),
        }
    }

    /// Set the batch size
    pub fn size(mut self, size: i64) -> Self {
        self.size = size;
        self
    }

    /// Set auto flush
    pub fn flush_auto(mut self, enabled: bool) -> Self {
        self.flush_auto = enabled;
        self
    }

    /// Set auto clear
    pub fn clear_auto(mut self, enabled: bool) -> Self {
        self.clear_auto = enabled;
        self
    }

    /// Set the nested reference bag policy
    pub fn nested_bag(mut self, policy: NestedBagPolicy) -> Self {
        self.nested_bag = policy;
        self
    }

    pub fn enable_flush_auto(&mut self) -> &mut Self {
        self.flush_auto = true;
        self
    }

    pub fn disable_flush_auto(&mut self) -> &mut Self {
        self.flush_auto = false;
        self
    }

    pub fn enable_clear_auto(&mut self) -> &mut Self {
        self.clear_auto = true;
        self
    }

    pub fn disable_clear_auto(&mut self) -> &mut Self {
        self.clear_auto = false;
        self
    }

    /// Whether the item at 1-based `index` closes a batch.
    ///
    /// Never true for the first item, never true when `size <= 0`.
    pub fn is_boundary(&self, index: usize) -> bool {
        if self.size <= 0 || index <= 1 {
            return false;
        }
        let Ok(size) = usize::try_from(self.size) else {
            return false;
        };
        index % size == 0
    }

    /// Whether a synchronization step does anything at all.
    pub fn synchronizes(&self) -> bool {
        self.flush_auto || self.clear_auto
    }
}

fn coerce_int(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Null => None,
        JsonValue::Bool(b) => Some(i64::from(*b)),
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        JsonValue::String(s) => {
            let s = s.trim();
            Some(
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
                    .unwrap_or(0),
            )
        }
        JsonValue::Array(_) | JsonValue::Object(_) => None,
    }
}

fn coerce_bool(value: &JsonValue) -> Option<bool> {
    match value {
        JsonValue::Null => None,
        JsonValue::Bool(b) => Some(*b),
        JsonValue::Number(n) => Some(n.as_f64().is_some_and(|f| f != 0.0)),
        JsonValue::String(s) => Some(!matches!(s.trim(), "" | "0" | "false")),
        JsonValue::Array(items) => Some(!items.is_empty()),
        JsonValue::Object(map) => Some(!map.is_empty()),
    }
}
