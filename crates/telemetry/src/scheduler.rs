//! Interval-gated telemetry pipeline.
//!
//! [`TelemetryScheduler`] owns the [`ReportCache`] and both detectors. Every
//! method is synchronous: the caller passes the current monotonic time and
//! an [`Outbox`] describing the session, and flushes the frames afterwards.

use std::collections::{BTreeMap, HashMap};

use printlink_protocol::messages::{FirmwarePayload, NewValue, TermUpdate};
use printlink_protocol::types::IMMEDIATE_RECHECK_SECS;
use printlink_protocol::{IntervalKind, Intervals, MessageType, PrinterState};
use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::ambient::AmbientDetector;
use crate::buffer::MissedJobQueue;
use crate::cache::{self, ReportCache, TempPair};
use crate::layer::LayerDetector;
use crate::outbox::Outbox;
use crate::types::{
    FileMetadata, JobEnd, JobState, JobStats, MachineState, MachineStatus, ProcStats,
    StatusUpdate, UiConnection,
};

/// Raw readings closer than this to the last received one are noise.
const TEMP_DEBOUNCE: f64 = 0.75;

/// A heater with a target is "seeking" while further than this from it.
const SEEKING_BAND: i64 = 5;

/// An idle heater this far above ambient is still cooling down.
const COOLING_MARGIN: i64 = 25;

pub struct TelemetryScheduler {
    cache: ReportCache,
    intervals: Intervals,
    ambient: AmbientDetector,
    layer: LayerDetector,
    missed: MissedJobQueue,
    /// Device name -> report key.
    heaters: BTreeMap<String, String>,
    status: MachineStatus,
    last_received_temps: HashMap<String, f64>,
    /// `None` means the next temperature update is processed immediately.
    next_temp_update: Option<Instant>,
    last_cpu_update: Option<Instant>,
    terminal_enabled: bool,
    job_timer: bool,
}

impl TelemetryScheduler {
    pub fn new(initial_ambient: i64) -> Self {
        Self {
            cache: ReportCache::new(),
            intervals: Intervals::default(),
            ambient: AmbientDetector::new(initial_ambient),
            layer: LayerDetector::new(),
            missed: MissedJobQueue::default(),
            heaters: BTreeMap::new(),
            status: MachineStatus::default(),
            last_received_temps: HashMap::new(),
            next_temp_update: None,
            last_cpu_update: None,
            terminal_enabled: false,
            job_timer: false,
        }
    }

    pub fn cache(&self) -> &ReportCache {
        &self.cache
    }

    pub fn intervals(&self) -> &Intervals {
        &self.intervals
    }

    pub fn ambient(&self) -> i64 {
        self.ambient.ambient()
    }

    pub fn is_ambient_running(&self) -> bool {
        self.ambient.is_running()
    }

    /// Whether the periodic job-progress tick should be scheduled.
    pub fn is_job_timer_running(&self) -> bool {
        self.job_timer
    }

    pub fn missed_events(&self) -> usize {
        self.missed.len()
    }

    pub fn terminal_enabled(&self) -> bool {
        self.terminal_enabled
    }

    pub fn set_terminal(&mut self, enabled: bool) {
        self.terminal_enabled = enabled;
    }

    /// Overwrites intervals from a `{category: milliseconds}` map.
    pub fn apply_intervals(&mut self, update: &Map<String, Value>) {
        if self.intervals.apply_millis(update) > 0 {
            tracing::info!(intervals = %self.intervals, "intervals updated");
        }
    }

    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------

    /// Sets the cached state, pushing `state_change` when it differs.
    pub fn update_state(&mut self, new: PrinterState, out: &mut Outbox) {
        if self.cache.state == new {
            return;
        }
        self.cache.state = new;
        out.push_payload(MessageType::StateChange, &NewValue::new(new));
    }

    /// Pushes the cached state again, unconditionally.
    pub fn reassert_state(&self, out: &mut Outbox) {
        out.push_payload(MessageType::StateChange, &NewValue::new(self.cache.state));
    }

    pub fn on_pause_requested(&mut self, out: &mut Outbox) {
        if self.cache.state == PrinterState::Printing {
            self.update_state(PrinterState::Pausing, out);
        }
    }

    pub fn on_resume_requested(&mut self, out: &mut Outbox) {
        if self.cache.state == PrinterState::Paused {
            self.update_state(PrinterState::Resuming, out);
        }
    }

    pub fn on_cancel_requested(&mut self, out: &mut Outbox) {
        if matches!(
            self.cache.state,
            PrinterState::Printing | PrinterState::Paused | PrinterState::Pausing
        ) {
            self.update_state(PrinterState::Cancelling, out);
        }
    }

    // -----------------------------------------------------------------------
    // Machine lifecycle
    // -----------------------------------------------------------------------

    /// Machine firmware connection came up.
    pub fn on_machine_startup(
        &mut self,
        state: MachineState,
        firmware: Option<Map<String, Value>>,
        out: &mut Outbox,
    ) {
        if state != MachineState::Ready {
            self.update_state(PrinterState::Error, out);
            out.push(MessageType::PrinterError, Value::Null);
        }
        out.push_payload(MessageType::Connection, &NewValue::new("connected"));
        if let Some(fw) = firmware {
            self.on_firmware(fw, out);
        }
    }

    /// Machine reached the ready state.
    ///
    /// `metadata` belongs to the job in `stats` and is only used when that
    /// job is printing. Returns a new ambient estimate when starting the
    /// detector lowered it.
    pub fn on_machine_ready(
        &mut self,
        stats: &JobStats,
        metadata: FileMetadata,
        heaters: &[String],
        initial: Option<&StatusUpdate>,
        now: Instant,
        out: &mut Outbox,
    ) -> Option<i64> {
        if stats.state == JobState::Printing {
            self.on_print_start(&stats.filename, metadata, false, now, out);
        } else {
            self.update_state(PrinterState::Operational, out);
        }
        self.set_heaters(heaters);

        if let Some(status) = initial {
            tracing::info!("received initial machine status");
            self.status = MachineStatus::default();
            self.status.apply(status);
            self.next_temp_update = None;
            self.update_temps(now, out);
            self.next_temp_update = None;
            if status.bed_mesh.is_some() {
                self.send_mesh(out);
            }
            if let Some(extruder) = &status.active_extruder {
                self.send_active_extruder(extruder, out);
            }
            if let Some(pos) = status.gcode_position {
                self.layer.update(pos[2]);
            }
        }

        let changed = self.start_ambient(out);
        self.job_timer = true;
        changed
    }

    pub fn on_machine_shutdown(&mut self, out: &mut Outbox) {
        out.push(MessageType::PrinterError, Value::Null);
    }

    pub fn on_machine_disconnected(&mut self, out: &mut Outbox) {
        self.update_state(PrinterState::Offline, out);
        out.push_payload(MessageType::Connection, &NewValue::new("disconnected"));
        self.ambient.stop();
        self.job_timer = false;
        self.cache.reset_print_state();
        self.status = MachineStatus::default();
    }

    /// Stops the periodic work ahead of a bridge shutdown.
    pub fn shutdown(&mut self) {
        self.ambient.stop();
        self.job_timer = false;
    }

    fn set_heaters(&mut self, available: &[String]) {
        let mut names: Vec<&String> = available.iter().collect();
        names.sort();
        self.heaters.clear();
        for name in names {
            if let Some(key) = heater_report_key(name) {
                self.heaters.insert(name.clone(), key);
            }
        }
        tracing::info!(heaters = ?self.heaters.keys().collect::<Vec<_>>(), "heaters detected");
    }

    // -----------------------------------------------------------------------
    // Jobs
    // -----------------------------------------------------------------------

    /// A job started printing. `need_start_event` is false when the job was
    /// already running before the bridge saw it.
    pub fn on_print_start(
        &mut self,
        filename: &str,
        metadata: FileMetadata,
        need_start_event: bool,
        now: Instant,
        out: &mut Outbox,
    ) {
        self.update_state(PrinterState::Printing, out);

        let mut job = Map::new();
        job.insert("filename".into(), Value::from(filename));
        if let Some(filament) = metadata.filament_total {
            job.insert("filament".into(), Value::from(filament.round() as i64));
        }
        if let Some(est) = metadata.estimated_time {
            job.insert("time".into(), number(est));
        }
        self.layer.start(&metadata);
        self.cache.metadata = metadata;
        self.cache
            .job_info
            .extend(job.iter().map(|(k, v)| (k.clone(), v.clone())));
        if need_start_event {
            job.insert("started".into(), Value::Bool(true));
        }
        self.send_job_event(job, now, out);
    }

    pub fn on_print_paused(&mut self, out: &mut Outbox) {
        let mut job = Map::new();
        job.insert("paused".into(), Value::Bool(true));
        out.push(MessageType::JobInfo, Value::Object(job));
        self.update_state(PrinterState::Paused, out);
        self.layer.stop();
    }

    pub fn on_print_resumed(&mut self, out: &mut Outbox) {
        self.update_state(PrinterState::Printing, out);
        self.layer.resume();
    }

    /// A job left the printing/paused states. `machine` decides the state
    /// reported afterwards.
    pub fn on_print_end(
        &mut self,
        end: JobEnd,
        machine: MachineState,
        now: Instant,
        out: &mut Outbox,
    ) {
        if let Some(flag) = end.flag() {
            let mut job = Map::new();
            job.insert(flag.into(), Value::Bool(true));
            self.send_job_event(job, now, out);
        }
        self.update_state(machine.printer_state(), out);
        self.cache.job_info.clear();
        self.layer.stop();
    }

    /// Sends a job event, or queues it for replay while disconnected.
    ///
    /// Queued events absorb the cached job info, with cached values taking
    /// precedence.
    pub fn send_job_event(&mut self, mut event: Map<String, Value>, now: Instant, out: &mut Outbox) {
        if out.is_connected() {
            out.push(MessageType::JobInfo, Value::Object(event));
            return;
        }
        for (k, v) in &self.cache.job_info {
            event.insert(k.clone(), v.clone());
        }
        self.missed.push(now, event);
        tracing::debug!(queued = self.missed.len(), "job event queued while disconnected");
    }

    /// Periodic job tick. `print_duration` comes from the job provider.
    pub fn job_tick(&mut self, print_duration: f64, out: &mut Outbox) {
        if self.cache.state == PrinterState::Printing {
            self.update_job_progress(print_duration, out);
        }
    }

    fn update_job_progress(&mut self, print_duration: f64, out: &mut Outbox) {
        let mut job = Map::new();

        if let Some(est) = self.cache.metadata.estimated_time {
            let time_left = (est - print_duration + 0.5).floor().max(0.0) as i64;
            let last_time_left = self
                .cache
                .job_info
                .get("time")
                .and_then(Value::as_f64)
                .unwrap_or(time_left as f64 + 60.0);
            let time_diff = last_time_left - time_left as f64;
            if (time_left < 60 || time_diff >= 30.0) && time_left as f64 != last_time_left {
                job.insert("time".into(), Value::from(time_left));
            }
        }

        if let Some(progress) = self.status.progress {
            let pct = round_half_up(progress * 100.0);
            let cached = self.cache.job_info.get("progress").and_then(Value::as_i64);
            if pct != cached.unwrap_or(0) {
                job.insert("progress".into(), Value::from(pct));
            }
        }

        let layer = self.layer.layer();
        let cached = self.cache.job_info.get("layer").and_then(Value::as_i64);
        if layer != cached.unwrap_or(-1) {
            job.insert("layer".into(), Value::from(layer));
        }

        if !job.is_empty() {
            self.cache
                .job_info
                .extend(job.iter().map(|(k, v)| (k.clone(), v.clone())));
            out.push(MessageType::JobInfo, Value::Object(job));
        }
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    /// Merges a partial machine status update and reports what changed.
    pub fn on_status_update(&mut self, update: &StatusUpdate, now: Instant, out: &mut Outbox) {
        self.status.apply(update);
        self.update_temps(now, out);
        if update.bed_mesh.is_some() {
            self.send_mesh(out);
        }
        if let Some(extruder) = &update.active_extruder {
            self.send_active_extruder(extruder, out);
        }
        if let Some(pos) = update.gcode_position {
            self.layer.update(pos[2]);
        }
    }

    fn update_temps(&mut self, now: Instant, out: &mut Outbox) {
        if self.next_temp_update.is_some_and(|next| now < next) {
            return;
        }

        let mut need_rapid_update = false;
        let mut temp_data: BTreeMap<String, Vec<i64>> = BTreeMap::new();
        for (device, key) in &self.heaters {
            let Some(reading) = self.status.heaters.get(device) else {
                continue;
            };
            let raw = reading.temperature;
            let current: TempPair = [round_half_up(raw), round_half_up(reading.target)];
            let [last_cur, last_tgt] = self.cache.temps.get(key).copied().unwrap_or([-100, -100]);

            if current[1] == last_tgt {
                let seeking = if current[1] != 0 {
                    (current[1] - current[0]).abs() > SEEKING_BAND
                } else {
                    current[0] >= self.ambient.ambient() + COOLING_MARGIN
                };
                need_rapid_update |= seeking;
                if !seeking {
                    if let Some(last_raw) = self.last_received_temps.get(key) {
                        if (raw - last_raw).abs() < TEMP_DEBOUNCE {
                            self.last_received_temps.remove(key);
                            continue;
                        }
                    }
                }
                if current[0] == last_cur {
                    self.last_received_temps.insert(key.clone(), raw);
                    continue;
                }
                temp_data.insert(key.clone(), vec![current[0]]);
            } else {
                temp_data.insert(key.clone(), current.to_vec());
            }
            self.last_received_temps.insert(key.clone(), raw);
            self.cache.temps.insert(key.clone(), current);
        }

        self.next_temp_update = if need_rapid_update {
            let target_secs = self.intervals.get(IntervalKind::TempsTarget);
            (target_secs >= IMMEDIATE_RECHECK_SECS)
                .then(|| now + self.intervals.duration(IntervalKind::TempsTarget))
        } else {
            Some(now + self.intervals.duration(IntervalKind::Temps))
        };

        if !temp_data.is_empty() && out.is_set_up() {
            out.push(MessageType::Temps, cache::temps_to_value(&temp_data));
        }
    }

    fn send_mesh(&mut self, out: &mut Outbox) {
        let mesh = self.status.bed_mesh.clone().unwrap_or_default();
        self.cache.mesh = mesh.clone();
        out.push(MessageType::MeshData, Value::Object(mesh));
    }

    fn send_active_extruder(&mut self, extruder: &str, out: &mut Outbox) {
        let tool = tool_name(extruder);
        if tool == self.cache.active_extruder {
            return;
        }
        out.push_payload(MessageType::Tool, &NewValue::new(&tool));
        self.cache.active_extruder = tool;
    }

    /// Host process statistics, rate limited by the `cpu` interval.
    pub fn on_proc_stats(&mut self, stats: &ProcStats, now: Instant, out: &mut Outbox) {
        let Some(usage) = stats.cpu_usage else {
            return;
        };
        if let Some(last) = self.last_cpu_update {
            if now.saturating_duration_since(last) < self.intervals.duration(IntervalKind::Cpu) {
                return;
            }
        }
        self.last_cpu_update = Some(now);

        let mem_pct = match (stats.memory_used, stats.memory_total) {
            (Some(used), Some(total)) if total > 0 => used as f64 / total as f64 * 100.0,
            _ => 0.0,
        };
        let mut cpu = Map::new();
        cpu.insert("usage".into(), Value::from(round_half_up(usage)));
        cpu.insert(
            "temp".into(),
            Value::from(round_half_up(stats.cpu_temp.unwrap_or(0.0))),
        );
        cpu.insert("memory".into(), Value::from(round_half_up(mem_pct)));

        let diff = cache::diff(&cpu, &self.cache.cpu_info);
        if !diff.is_empty() {
            self.cache.cpu_info = cpu;
            out.push(MessageType::Cpu, Value::Object(diff));
        }
    }

    // -----------------------------------------------------------------------
    // Ambient
    // -----------------------------------------------------------------------

    fn start_ambient(&mut self, out: &mut Outbox) -> Option<i64> {
        let tool0 = self.cache.temps.get("tool0").copied();
        let changed = self.ambient.start(tool0)?;
        out.push_payload(MessageType::Ambient, &NewValue::new(changed));
        Some(changed)
    }

    /// Periodic ambient detector tick. Returns the new estimate when it
    /// changed so the caller can persist it.
    pub fn ambient_tick(&mut self, now: Instant, out: &mut Outbox) -> Option<i64> {
        let tool0 = self.cache.temps.get("tool0").copied();
        let changed = self.ambient.tick(now, tool0)?;
        out.push_payload(MessageType::Ambient, &NewValue::new(changed));
        Some(changed)
    }

    // -----------------------------------------------------------------------
    // Host / UI info
    // -----------------------------------------------------------------------

    /// Firmware description; pushed as a diff against the cache.
    pub fn on_firmware(&mut self, fw: Map<String, Value>, out: &mut Outbox) {
        let diff = cache::diff(&fw, &self.cache.firmware_info);
        if diff.is_empty() {
            return;
        }
        self.cache.firmware_info = fw;
        out.push_payload(
            MessageType::Firmware,
            &FirmwarePayload {
                fw: diff,
                raw: false,
            },
        );
    }

    /// Complete machine description; pushed as a diff against the cache.
    pub fn on_machine_data(&mut self, data: Map<String, Value>, out: &mut Outbox) {
        let diff = cache::diff(&data, &self.cache.machine_info);
        if diff.is_empty() {
            return;
        }
        self.cache.machine_info = data;
        out.push(MessageType::MachineData, Value::Object(diff));
    }

    /// Recomputes `{ui, ui_version}` from the longest-lived web connection
    /// and tracks it.
    pub fn ui_info(&mut self, web: &[UiConnection]) -> Map<String, Value> {
        self.cache.current_ui_id = None;
        let mut data = Map::new();
        data.insert("ui".into(), Value::Null);
        data.insert("ui_version".into(), Value::Null);
        if let Some(longest) = web.iter().find(|c| c.is_web()) {
            data.insert("ui".into(), Value::from(longest.name.clone()));
            data.insert("ui_version".into(), Value::from(longest.version.clone()));
            self.cache.current_ui_id = Some(longest.id);
        }
        data
    }

    pub fn on_ui_identified(&mut self, conn: &UiConnection, out: &mut Outbox) {
        if self.cache.current_ui_id.is_some() || !conn.is_web() {
            return;
        }
        let mut data = Map::new();
        data.insert("ui".into(), Value::from(conn.name.clone()));
        data.insert("ui_version".into(), Value::from(conn.version.clone()));
        self.cache
            .firmware_info
            .extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.cache.current_ui_id = Some(conn.id);
        out.push(MessageType::MachineData, Value::Object(data));
    }

    /// `remaining` lists the web connections still open, longest lived first.
    pub fn on_ui_removed(&mut self, id: u64, remaining: &[UiConnection], out: &mut Outbox) {
        if self.cache.current_ui_id != Some(id) {
            return;
        }
        let data = self.ui_info(remaining);
        if cache::diff(&data, &self.cache.firmware_info).is_empty() {
            return;
        }
        self.cache
            .firmware_info
            .extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
        out.push(MessageType::MachineData, Value::Object(data));
    }

    // -----------------------------------------------------------------------
    // Terminal relay
    // -----------------------------------------------------------------------

    pub fn on_gcode_response(&self, response: &str, out: &mut Outbox) {
        if !self.terminal_enabled {
            return;
        }
        let lines = response
            .split('\n')
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        out.push_payload(
            MessageType::TermUpdate,
            &TermUpdate {
                response: Some(lines),
                command: None,
            },
        );
    }

    pub fn on_gcode_received(&self, script: &str, out: &mut Outbox) {
        if !self.terminal_enabled {
            return;
        }
        let tokens = script.split_whitespace().map(str::to_string).collect();
        out.push_payload(
            MessageType::TermUpdate,
            &TermUpdate {
                response: None,
                command: Some(tokens),
            },
        );
    }

    // -----------------------------------------------------------------------
    // Session
    // -----------------------------------------------------------------------

    /// Full state push after the remote acknowledged the session. Replays
    /// and clears the missed job events.
    pub fn push_initial_state(&mut self, now: Instant, out: &mut Outbox) {
        self.reassert_state(out);
        if !self.cache.temps.is_empty() && out.is_set_up() {
            out.push(MessageType::Temps, self.cache.temps_value());
        }
        if !self.cache.firmware_info.is_empty() {
            out.push_payload(
                MessageType::Firmware,
                &FirmwarePayload {
                    fw: self.cache.firmware_info.clone(),
                    raw: false,
                },
            );
        }
        for event in self.missed.drain_with_delay(now) {
            out.push(MessageType::JobInfo, Value::Object(event));
        }
        if !self.cache.active_extruder.is_empty() {
            out.push_payload(
                MessageType::Tool,
                &NewValue::new(&self.cache.active_extruder),
            );
        }
        if !self.cache.cpu_info.is_empty() {
            out.push(MessageType::CpuInfo, Value::Object(self.cache.cpu_info.clone()));
        }
        out.push_payload(MessageType::Ambient, &NewValue::new(self.ambient.ambient()));
    }
}

/// Maps a machine heater name to its report key.
pub fn heater_report_key(device: &str) -> Option<String> {
    if device == "heater_bed" {
        return Some("bed".into());
    }
    match device.strip_prefix("extruder")? {
        "" => Some("tool0".into()),
        n => Some(format!("tool{n}")),
    }
}

/// Maps an extruder device name to its tool name (`extruder` -> `T0`).
pub fn tool_name(extruder: &str) -> String {
    match extruder.strip_prefix("extruder") {
        Some("") => "T0".into(),
        Some(n) => format!("T{n}"),
        None => format!("T{extruder}"),
    }
}

fn round_half_up(v: f64) -> i64 {
    (v + 0.5).floor() as i64
}

/// Whole numbers go out as integers.
fn number(v: f64) -> Value {
    if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
        Value::from(v as i64)
    } else {
        Value::from(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HeaterUpdate;
    use serde_json::json;
    use std::time::Duration;

    fn frames(out: &Outbox, t: MessageType) -> Vec<Value> {
        out.frames()
            .iter()
            .filter(|f| f.msg_type == t)
            .map(|f| f.data.clone().unwrap_or(Value::Null))
            .collect()
    }

    fn heater(temp: f64, target: f64) -> StatusUpdate {
        let mut upd = StatusUpdate::default();
        upd.heaters.insert(
            "extruder".into(),
            HeaterUpdate {
                temperature: Some(temp),
                target: Some(target),
            },
        );
        upd
    }

    /// Scheduler with `extruder` registered and the machine ready.
    fn ready(now: Instant) -> TelemetryScheduler {
        let mut sched = TelemetryScheduler::new(85);
        let mut out = Outbox::new(true, true);
        sched.on_machine_ready(
            &JobStats::default(),
            FileMetadata::default(),
            &["extruder".into()],
            None,
            now,
            &mut out,
        );
        sched
    }

    fn metadata() -> FileMetadata {
        FileMetadata {
            filament_total: Some(1234.6),
            estimated_time: Some(3600.0),
            layer_height: Some(0.2),
            ..Default::default()
        }
    }

    #[test]
    fn repeated_state_pushes_once() {
        let mut sched = TelemetryScheduler::new(85);
        let mut out = Outbox::new(true, true);
        sched.update_state(PrinterState::Operational, &mut out);
        sched.update_state(PrinterState::Operational, &mut out);
        sched.update_state(PrinterState::Operational, &mut out);
        assert_eq!(
            frames(&out, MessageType::StateChange),
            vec![json!({"new": "operational"})]
        );
    }

    #[test]
    fn requested_transitions() {
        let mut sched = TelemetryScheduler::new(85);
        let mut out = Outbox::new(true, true);

        sched.on_resume_requested(&mut out);
        assert_eq!(sched.cache().state, PrinterState::Offline);

        sched.update_state(PrinterState::Printing, &mut out);
        sched.on_pause_requested(&mut out);
        assert_eq!(sched.cache().state, PrinterState::Pausing);
        sched.on_cancel_requested(&mut out);
        assert_eq!(sched.cache().state, PrinterState::Cancelling);

        sched.update_state(PrinterState::Paused, &mut out);
        sched.on_resume_requested(&mut out);
        assert_eq!(sched.cache().state, PrinterState::Resuming);
    }

    #[test]
    fn temperature_drift_is_debounced() {
        let t0 = Instant::now();
        let mut sched = ready(t0);

        let mut out = Outbox::new(true, true);
        sched.on_status_update(&heater(20.0, 0.0), t0, &mut out);
        assert_eq!(frames(&out, MessageType::Temps), vec![json!({"tool0": [20, 0]})]);

        // 0.5 degree drift with the target unchanged: nothing goes out.
        let mut out = Outbox::new(true, true);
        sched.on_status_update(&heater(20.5, 0.0), t0 + Duration::from_secs(1), &mut out);
        assert!(frames(&out, MessageType::Temps).is_empty());
        assert_eq!(sched.cache().temps["tool0"], [20, 0]);

        // The debounce reference was consumed, so the next change is sent.
        let mut out = Outbox::new(true, true);
        sched.on_status_update(&heater(20.6, 0.0), t0 + Duration::from_secs(2), &mut out);
        assert_eq!(frames(&out, MessageType::Temps), vec![json!({"tool0": [21]})]);
    }

    #[test]
    fn temperature_updates_are_interval_gated() {
        let t0 = Instant::now();
        let mut sched = ready(t0);
        let mut out = Outbox::new(true, true);
        sched.on_status_update(&heater(20.0, 0.0), t0, &mut out);
        sched.on_status_update(&heater(30.0, 0.0), t0 + Duration::from_millis(500), &mut out);
        assert_eq!(frames(&out, MessageType::Temps).len(), 1);
        // Status was still merged.
        sched.on_status_update(&StatusUpdate::default(), t0 + Duration::from_secs(1), &mut out);
        assert_eq!(frames(&out, MessageType::Temps).len(), 2);
        assert_eq!(sched.cache().temps["tool0"], [30, 0]);
    }

    #[test]
    fn seeking_heater_rechecks_immediately() {
        let t0 = Instant::now();
        let mut sched = ready(t0);
        let mut out = Outbox::new(true, true);
        sched.on_status_update(&heater(25.0, 200.0), t0, &mut out);
        sched.on_status_update(&heater(30.0, 200.0), t0 + Duration::from_secs(1), &mut out);
        sched.on_status_update(
            &heater(40.0, 200.0),
            t0 + Duration::from_millis(1010),
            &mut out,
        );
        assert_eq!(
            frames(&out, MessageType::Temps),
            vec![
                json!({"tool0": [25, 200]}),
                json!({"tool0": [30]}),
                json!({"tool0": [40]}),
            ]
        );
    }

    #[test]
    fn cooling_nozzle_is_reported_without_delay() {
        let t0 = Instant::now();
        let mut sched = TelemetryScheduler::new(25);
        let mut out = Outbox::new(true, true);
        sched.on_machine_ready(
            &JobStats::default(),
            FileMetadata::default(),
            &["extruder".into()],
            None,
            t0,
            &mut out,
        );

        let mut out = Outbox::new(true, true);
        sched.on_status_update(&heater(150.0, 0.0), t0, &mut out);
        // Sub-debounce drift well above ambient still goes out.
        sched.on_status_update(&heater(149.49, 0.0), t0 + Duration::from_secs(1), &mut out);
        // And the temps interval no longer holds the next reading back.
        sched.on_status_update(&heater(148.0, 0.0), t0 + Duration::from_millis(1100), &mut out);
        assert_eq!(
            frames(&out, MessageType::Temps),
            vec![
                json!({"tool0": [150, 0]}),
                json!({"tool0": [149]}),
                json!({"tool0": [148]}),
            ]
        );
        assert_eq!(sched.cache().temps["tool0"], [148, 0]);

        // Near ambient the regular interval applies again.
        let mut out = Outbox::new(true, true);
        sched.on_status_update(&heater(40.0, 0.0), t0 + Duration::from_millis(1200), &mut out);
        sched.on_status_update(&heater(38.0, 0.0), t0 + Duration::from_millis(1300), &mut out);
        assert_eq!(frames(&out, MessageType::Temps), vec![json!({"tool0": [40]})]);
    }

    #[test]
    fn temps_held_back_until_set_up() {
        let t0 = Instant::now();
        let mut sched = ready(t0);
        let mut out = Outbox::new(true, false);
        sched.on_status_update(&heater(20.0, 0.0), t0, &mut out);
        assert!(frames(&out, MessageType::Temps).is_empty());
        assert_eq!(sched.cache().temps["tool0"], [20, 0]);
    }

    #[test]
    fn heater_keys_and_tool_names() {
        assert_eq!(heater_report_key("extruder").as_deref(), Some("tool0"));
        assert_eq!(heater_report_key("extruder2").as_deref(), Some("tool2"));
        assert_eq!(heater_report_key("heater_bed").as_deref(), Some("bed"));
        assert_eq!(heater_report_key("heater_generic chamber"), None);
        assert_eq!(tool_name("extruder"), "T0");
        assert_eq!(tool_name("extruder1"), "T1");
    }

    #[test]
    fn active_tool_pushed_on_change_only() {
        let t0 = Instant::now();
        let mut sched = ready(t0);
        let mut out = Outbox::new(true, true);
        let upd = StatusUpdate {
            active_extruder: Some("extruder1".into()),
            ..Default::default()
        };
        sched.on_status_update(&upd, t0, &mut out);
        sched.on_status_update(&upd, t0, &mut out);
        assert_eq!(frames(&out, MessageType::Tool), vec![json!({"new": "T1"})]);
    }

    #[test]
    fn print_start_reports_job_info() {
        let t0 = Instant::now();
        let mut sched = ready(t0);
        let mut out = Outbox::new(true, true);
        sched.on_print_start("benchy.gcode", metadata(), true, t0, &mut out);

        assert_eq!(
            frames(&out, MessageType::StateChange),
            vec![json!({"new": "printing"})]
        );
        assert_eq!(
            frames(&out, MessageType::JobInfo),
            vec![json!({"filename": "benchy.gcode", "filament": 1235, "time": 3600, "started": true})]
        );
        assert!(!sched.cache().job_info.contains_key("started"));
    }

    #[test]
    fn job_progress_tick() {
        let t0 = Instant::now();
        let mut sched = ready(t0);
        let mut out = Outbox::new(true, true);
        sched.on_print_start("a.gcode", metadata(), true, t0, &mut out);

        // Ten seconds in: remaining time moved by less than 30 s.
        let mut out = Outbox::new(true, true);
        sched.job_tick(10.0, &mut out);
        assert_eq!(frames(&out, MessageType::JobInfo), vec![json!({"layer": 0})]);

        let mut out = Outbox::new(true, true);
        sched.on_status_update(
            &StatusUpdate {
                progress: Some(0.26),
                ..Default::default()
            },
            t0,
            &mut out,
        );
        sched.job_tick(40.0, &mut out);
        assert_eq!(
            frames(&out, MessageType::JobInfo),
            vec![json!({"time": 3560, "progress": 26})]
        );

        // Nothing changed: nothing sent.
        let mut out = Outbox::new(true, true);
        sched.job_tick(41.0, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn job_tick_counts_down_final_minute() {
        let t0 = Instant::now();
        let mut sched = ready(t0);
        let mut out = Outbox::new(true, true);
        sched.on_print_start("a.gcode", metadata(), true, t0, &mut out);
        sched.job_tick(3550.0, &mut out);
        let mut out = Outbox::new(true, true);
        sched.job_tick(3551.0, &mut out);
        assert_eq!(frames(&out, MessageType::JobInfo), vec![json!({"time": 49})]);
    }

    #[test]
    fn job_tick_ignored_unless_printing() {
        let t0 = Instant::now();
        let mut sched = ready(t0);
        let mut out = Outbox::new(true, true);
        sched.job_tick(10.0, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn pause_and_end_of_job() {
        let t0 = Instant::now();
        let mut sched = ready(t0);
        let mut out = Outbox::new(true, true);
        sched.on_print_start("a.gcode", metadata(), true, t0, &mut out);

        let mut out = Outbox::new(true, true);
        sched.on_print_paused(&mut out);
        assert_eq!(frames(&out, MessageType::JobInfo), vec![json!({"paused": true})]);
        assert_eq!(sched.cache().state, PrinterState::Paused);

        let mut out = Outbox::new(true, true);
        sched.on_print_end(JobEnd::Cancelled, MachineState::Ready, t0, &mut out);
        assert_eq!(frames(&out, MessageType::JobInfo), vec![json!({"cancelled": true})]);
        assert_eq!(sched.cache().state, PrinterState::Operational);
        assert!(sched.cache().job_info.is_empty());

        let mut out = Outbox::new(true, true);
        sched.on_print_end(JobEnd::Standby, MachineState::Shutdown, t0, &mut out);
        assert!(frames(&out, MessageType::JobInfo).is_empty());
        assert_eq!(sched.cache().state, PrinterState::Error);
    }

    #[test]
    fn missed_events_replayed_once_on_connect() {
        let t0 = Instant::now();
        let mut sched = ready(t0);

        let mut offline = Outbox::new(false, true);
        sched.on_print_start("a.gcode", metadata(), true, t0, &mut offline);
        sched.on_print_end(
            JobEnd::Complete,
            MachineState::Ready,
            t0 + Duration::from_secs(5),
            &mut offline,
        );
        assert!(offline.is_empty());
        assert_eq!(sched.missed_events(), 2);

        let mut out = Outbox::new(true, true);
        sched.push_initial_state(t0 + Duration::from_secs(35), &mut out);
        let jobs = frames(&out, MessageType::JobInfo);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0]["started"], json!(true));
        assert_eq!(jobs[0]["delay"], json!(35));
        assert_eq!(jobs[1]["finished"], json!(true));
        assert_eq!(jobs[1]["filename"], json!("a.gcode"));
        assert_eq!(jobs[1]["delay"], json!(30));
        assert_eq!(sched.missed_events(), 0);

        let mut out = Outbox::new(true, true);
        sched.push_initial_state(t0 + Duration::from_secs(40), &mut out);
        assert!(frames(&out, MessageType::JobInfo).is_empty());
    }

    #[test]
    fn queued_event_takes_cached_values() {
        let t0 = Instant::now();
        let mut sched = ready(t0);
        let mut out = Outbox::new(true, true);
        sched.on_print_start("cached.gcode", metadata(), true, t0, &mut out);

        let mut offline = Outbox::new(false, true);
        let mut event = Map::new();
        event.insert("filename".into(), json!("event.gcode"));
        event.insert("failed".into(), json!(true));
        sched.send_job_event(event, t0, &mut offline);

        let mut out = Outbox::new(true, true);
        sched.push_initial_state(t0, &mut out);
        let jobs = frames(&out, MessageType::JobInfo);
        assert_eq!(jobs[0]["filename"], json!("cached.gcode"));
        assert_eq!(jobs[0]["failed"], json!(true));
        assert_eq!(jobs[0]["delay"], json!(0));
    }

    #[test]
    fn initial_state_order() {
        let t0 = Instant::now();
        let mut sched = ready(t0);
        let mut out = Outbox::new(true, true);
        sched.on_status_update(&heater(21.0, 0.0), t0, &mut out);
        let mut fw = Map::new();
        fw.insert("firmware".into(), json!("Klipper"));
        sched.on_firmware(fw, &mut out);

        let mut out = Outbox::new(true, true);
        sched.push_initial_state(t0, &mut out);
        let types: Vec<MessageType> = out.frames().iter().map(|f| f.msg_type).collect();
        assert_eq!(
            types,
            vec![
                MessageType::StateChange,
                MessageType::Temps,
                MessageType::Firmware,
                MessageType::Ambient,
            ]
        );
        assert_eq!(
            out.frames()[2].data,
            Some(json!({"fw": {"firmware": "Klipper"}, "raw": false}))
        );
    }

    #[test]
    fn cpu_stats_are_rate_limited_and_diffed() {
        let t0 = Instant::now();
        let mut sched = TelemetryScheduler::new(85);
        let stats = ProcStats {
            cpu_usage: Some(12.4),
            cpu_temp: Some(45.6),
            memory_used: Some(512),
            memory_total: Some(1024),
        };

        let mut out = Outbox::new(true, true);
        sched.on_proc_stats(&stats, t0, &mut out);
        assert_eq!(
            frames(&out, MessageType::Cpu),
            vec![json!({"usage": 12, "temp": 46, "memory": 50})]
        );

        let mut out = Outbox::new(true, true);
        sched.on_proc_stats(&stats, t0 + Duration::from_secs(5), &mut out);
        sched.on_proc_stats(&stats, t0 + Duration::from_secs(10), &mut out);
        assert!(out.is_empty());

        let busier = ProcStats {
            cpu_usage: Some(20.0),
            ..stats.clone()
        };
        sched.on_proc_stats(&busier, t0 + Duration::from_secs(20), &mut out);
        assert_eq!(frames(&out, MessageType::Cpu), vec![json!({"usage": 20})]);

        let mut out = Outbox::new(true, true);
        sched.on_proc_stats(&ProcStats::default(), t0 + Duration::from_secs(60), &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn firmware_and_machine_data_are_diffed() {
        let mut sched = TelemetryScheduler::new(85);
        let mut out = Outbox::new(true, true);
        let mut data = Map::new();
        data.insert("hostname".into(), json!("pi"));
        data.insert("os".into(), json!("Debian"));
        sched.on_machine_data(data.clone(), &mut out);
        sched.on_machine_data(data.clone(), &mut out);
        data.insert("hostname".into(), json!("voron"));
        sched.on_machine_data(data, &mut out);
        assert_eq!(
            frames(&out, MessageType::MachineData),
            vec![
                json!({"hostname": "pi", "os": "Debian"}),
                json!({"hostname": "voron"}),
            ]
        );
    }

    #[test]
    fn ui_connection_tracking() {
        let mut sched = TelemetryScheduler::new(85);
        let mut out = Outbox::new(true, true);
        let mainsail = UiConnection {
            id: 1,
            client_type: "web".into(),
            name: "mainsail".into(),
            version: "2.1".into(),
        };
        let fluidd = UiConnection {
            id: 2,
            client_type: "web".into(),
            name: "fluidd".into(),
            version: "1.9".into(),
        };
        sched.on_ui_identified(&mainsail, &mut out);
        sched.on_ui_identified(&fluidd, &mut out);
        assert_eq!(sched.cache().current_ui_id, Some(1));

        // Removing an untracked connection is ignored.
        sched.on_ui_removed(2, &[mainsail.clone()], &mut out);
        sched.on_ui_removed(1, &[fluidd.clone()], &mut out);
        assert_eq!(sched.cache().current_ui_id, Some(2));
        assert_eq!(
            frames(&out, MessageType::MachineData),
            vec![
                json!({"ui": "mainsail", "ui_version": "2.1"}),
                json!({"ui": "fluidd", "ui_version": "1.9"}),
            ]
        );

        let mut out = Outbox::new(true, true);
        sched.on_ui_removed(2, &[], &mut out);
        assert_eq!(
            frames(&out, MessageType::MachineData),
            vec![json!({"ui": null, "ui_version": null})]
        );
        assert_eq!(sched.cache().current_ui_id, None);
    }

    #[test]
    fn machine_lifecycle_notifications() {
        let t0 = Instant::now();
        let mut sched = TelemetryScheduler::new(85);
        let mut out = Outbox::new(true, true);
        sched.on_machine_startup(MachineState::Startup, None, &mut out);
        assert_eq!(sched.cache().state, PrinterState::Error);
        assert_eq!(frames(&out, MessageType::PrinterError).len(), 1);
        assert_eq!(
            frames(&out, MessageType::Connection),
            vec![json!({"new": "connected"})]
        );

        let mut sched = ready(t0);
        let mut out = Outbox::new(true, true);
        sched.on_status_update(&heater(22.0, 0.0), t0, &mut out);
        assert!(sched.is_ambient_running());
        assert!(sched.is_job_timer_running());

        let mut out = Outbox::new(true, true);
        sched.on_machine_disconnected(&mut out);
        assert_eq!(sched.cache().state, PrinterState::Offline);
        assert_eq!(
            frames(&out, MessageType::Connection),
            vec![json!({"new": "disconnected"})]
        );
        assert!(!sched.is_ambient_running());
        assert!(!sched.is_job_timer_running());
        assert!(sched.cache().temps.is_empty());
    }

    #[test]
    fn ready_while_printing_resumes_job_without_start_flag() {
        let t0 = Instant::now();
        let mut sched = TelemetryScheduler::new(85);
        let mut out = Outbox::new(true, true);
        let stats = JobStats {
            state: JobState::Printing,
            print_duration: 100.0,
            filename: "a.gcode".into(),
        };
        let mut initial = heater(23.0, 0.0);
        initial.active_extruder = Some("extruder".into());
        sched.on_machine_ready(
            &stats,
            metadata(),
            &["heater_bed".into(), "extruder".into()],
            Some(&initial),
            t0,
            &mut out,
        );

        assert_eq!(sched.cache().state, PrinterState::Printing);
        let jobs = frames(&out, MessageType::JobInfo);
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].get("started").is_none());
        assert_eq!(frames(&out, MessageType::Temps), vec![json!({"tool0": [23, 0]})]);
        assert_eq!(frames(&out, MessageType::Tool), vec![json!({"new": "T0"})]);
        // The idle nozzle is below the initial estimate.
        assert_eq!(frames(&out, MessageType::Ambient), vec![json!({"new": 23})]);
    }

    #[test]
    fn terminal_relay() {
        let mut sched = TelemetryScheduler::new(85);
        let mut out = Outbox::new(true, true);
        sched.on_gcode_response("ok", &mut out);
        assert!(out.is_empty());

        sched.set_terminal(true);
        sched.on_gcode_response("  // line one \n\n ok\n", &mut out);
        sched.on_gcode_received("G1  X10\nM105", &mut out);
        assert_eq!(
            frames(&out, MessageType::TermUpdate),
            vec![
                json!({"response": ["// line one", "ok"]}),
                json!({"command": ["G1", "X10", "M105"]}),
            ]
        );
    }

    #[test]
    fn interval_change_applies() {
        let mut sched = TelemetryScheduler::new(85);
        sched.apply_intervals(json!({"job": 3000}).as_object().unwrap());
        assert_eq!(sched.intervals().get(IntervalKind::Job), 3.0);
    }
}
