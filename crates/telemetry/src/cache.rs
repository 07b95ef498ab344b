use std::collections::BTreeMap;

use printlink_protocol::PrinterState;
use serde_json::{Map, Value};

use crate::types::FileMetadata;

/// Rounded `[current, target]` pair as last transmitted for a heater.
pub type TempPair = [i64; 2];

/// Last-known-sent values for every reportable category.
///
/// Firmware, machine and cpu info persist across remote reconnects. The
/// print-related fields are cleared by [`ReportCache::reset_print_state`]
/// when the machine itself goes away.
#[derive(Debug, Clone, Default)]
pub struct ReportCache {
    pub state: PrinterState,
    /// Keyed by report key (`tool0`, `tool1`, `bed`).
    pub temps: BTreeMap<String, TempPair>,
    pub metadata: FileMetadata,
    pub mesh: Map<String, Value>,
    pub job_info: Map<String, Value>,
    /// `T<n>`, empty until the machine reports one.
    pub active_extruder: String,
    pub firmware_info: Map<String, Value>,
    pub machine_info: Map<String, Value>,
    pub cpu_info: Map<String, Value>,
    /// UI connection whose name/version is currently reported.
    pub current_ui_id: Option<u64>,
}

impl ReportCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset_print_state(&mut self) {
        self.temps.clear();
        self.mesh.clear();
        self.job_info.clear();
    }

    /// Cached temps in wire form: `{"tool0": [cur, tgt], ...}`.
    pub fn temps_value(&self) -> Value {
        temps_to_value(&self.temps)
    }
}

pub(crate) fn temps_to_value<'a, I, V>(temps: I) -> Value
where
    I: IntoIterator<Item = (&'a String, V)>,
    V: AsRef<[i64]>,
{
    let map: Map<String, Value> = temps
        .into_iter()
        .map(|(k, v)| (k.clone(), Value::from(v.as_ref().to_vec())))
        .collect();
    Value::Object(map)
}

/// Entries of `new` that are absent from `cached` or hold a different value.
///
/// An empty `cached` yields `new` unchanged. Keys only present in `cached`
/// are not reported.
pub fn diff(new: &Map<String, Value>, cached: &Map<String, Value>) -> Map<String, Value> {
    if cached.is_empty() {
        return new.clone();
    }
    new.iter()
        .filter(|(k, v)| cached.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
