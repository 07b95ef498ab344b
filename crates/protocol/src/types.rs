use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Printer state as reported to the remote service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrinterState {
    #[default]
    Offline,
    Operational,
    Printing,
    Pausing,
    Paused,
    Resuming,
    Cancelling,
    Error,
}

impl PrinterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Operational => "operational",
            Self::Printing => "printing",
            Self::Pausing => "pausing",
            Self::Paused => "paused",
            Self::Resuming => "resuming",
            Self::Cancelling => "cancelling",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for PrinterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reporting interval category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IntervalKind {
    Job,
    Temps,
    TempsTarget,
    Cpu,
}

impl IntervalKind {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Job => "job",
            Self::Temps => "temps",
            Self::TempsTarget => "temps_target",
            Self::Cpu => "cpu",
        }
    }
}

/// Smallest accepted value for every category except `temps_target`.
pub const MIN_INTERVAL_SECS: f64 = 0.1;

/// Largest accepted value for any category.
pub const MAX_INTERVAL_SECS: f64 = 86_400.0;

/// `temps_target` values at or below this mean "re-check immediately".
pub const IMMEDIATE_RECHECK_SECS: f64 = 0.2501;

/// Reporting intervals in seconds, updated by the remote service.
///
/// The remote sends values in milliseconds. Categories this client does not
/// use are stored verbatim so they show up in logs.
#[derive(Debug, Clone, PartialEq)]
pub struct Intervals {
    values: BTreeMap<String, f64>,
}

impl Default for Intervals {
    fn default() -> Self {
        let mut values = BTreeMap::new();
        values.insert("job".to_string(), 1.0);
        values.insert("temps".to_string(), 1.0);
        values.insert("temps_target".to_string(), 0.25);
        values.insert("cpu".to_string(), 10.0);
        Self { values }
    }
}

impl Intervals {
    /// Returns the interval for a category in seconds.
    pub fn get(&self, kind: IntervalKind) -> f64 {
        self.values.get(kind.key()).copied().unwrap_or(1.0)
    }

    /// Returns the interval as a [`std::time::Duration`].
    pub fn duration(&self, kind: IntervalKind) -> std::time::Duration {
        std::time::Duration::try_from_secs_f64(self.get(kind).min(MAX_INTERVAL_SECS))
            .unwrap_or(std::time::Duration::from_secs(1))
    }

    /// Overwrites entries from a `{category: milliseconds}` map.
    ///
    /// Non-numeric, negative, zero and non-finite values are ignored. Values
    /// above [`MAX_INTERVAL_SECS`] are clamped to it.
    /// Returns the number of entries applied.
    pub fn apply_millis(&mut self, update: &serde_json::Map<String, serde_json::Value>) -> usize {
        let mut applied = 0;
        for (key, val) in update {
            let Some(ms) = val.as_f64() else {
                continue;
            };
            if !ms.is_finite() || ms <= 0.0 {
                continue;
            }
            let mut secs = (ms / 1000.0).min(MAX_INTERVAL_SECS);
            if key != IntervalKind::TempsTarget.key() {
                secs = secs.max(MIN_INTERVAL_SECS);
            }
            self.values.insert(key.clone(), secs);
            applied += 1;
        }
        applied
    }

    /// Iterates over all stored `(category, seconds)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl std::fmt::Display for Intervals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.iter().map(|(k, v)| format!("{k}={v}s")).collect();
        write!(f, "{}", parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn printer_state_wire_names() {
        assert_eq!(
            serde_json::to_string(&PrinterState::Cancelling).unwrap(),
            "\"cancelling\""
        );
        let st: PrinterState = serde_json::from_str("\"operational\"").unwrap();
        assert_eq!(st, PrinterState::Operational);
        assert_eq!(PrinterState::default(), PrinterState::Offline);
    }

    #[test]
    fn interval_defaults() {
        let iv = Intervals::default();
        assert_eq!(iv.get(IntervalKind::Job), 1.0);
        assert_eq!(iv.get(IntervalKind::Temps), 1.0);
        assert_eq!(iv.get(IntervalKind::TempsTarget), 0.25);
        assert_eq!(iv.get(IntervalKind::Cpu), 10.0);
    }

    #[test]
    fn apply_millis_converts_to_seconds() {
        let mut iv = Intervals::default();
        let update = json!({"job": 5000, "temps": 2500, "cpu": 30000});
        let applied = iv.apply_millis(update.as_object().unwrap());
        assert_eq!(applied, 3);
        assert_eq!(iv.get(IntervalKind::Job), 5.0);
        assert_eq!(iv.get(IntervalKind::Temps), 2.5);
        assert_eq!(iv.get(IntervalKind::Cpu), 30.0);
    }

    #[test]
    fn apply_millis_rejects_bad_values() {
        let mut iv = Intervals::default();
        let update = json!({"job": 0, "temps": -100, "cpu": "fast"});
        assert_eq!(iv.apply_millis(update.as_object().unwrap()), 0);
        assert_eq!(iv, Intervals::default());
    }

    #[test]
    fn apply_millis_floors_small_values() {
        let mut iv = Intervals::default();
        let update = json!({"job": 1, "temps_target": 10});
        iv.apply_millis(update.as_object().unwrap());
        assert_eq!(iv.get(IntervalKind::Job), MIN_INTERVAL_SECS);
        assert_eq!(iv.get(IntervalKind::TempsTarget), 0.01);
    }

    #[test]
    fn apply_millis_clamps_huge_values() {
        let mut iv = Intervals::default();
        let update = json!({"job": 1e23, "temps_target": 1e300});
        assert_eq!(iv.apply_millis(update.as_object().unwrap()), 2);
        assert_eq!(iv.get(IntervalKind::Job), MAX_INTERVAL_SECS);
        assert_eq!(
            iv.duration(IntervalKind::Job),
            std::time::Duration::from_secs(86_400)
        );
        assert_eq!(
            iv.duration(IntervalKind::TempsTarget),
            std::time::Duration::from_secs(86_400)
        );
    }

    #[test]
    fn apply_millis_keeps_unknown_keys() {
        let mut iv = Intervals::default();
        let update = json!({"webcam": 4000});
        assert_eq!(iv.apply_millis(update.as_object().unwrap()), 1);
        assert!(iv.iter().any(|(k, v)| k == "webcam" && v == 4.0));
    }
}
