//! The bridge actor.
//!
//! One task owns the [`TelemetryScheduler`] and every timer. Machine
//! events, inbound frames, timer firings and finished machine actions all
//! arrive on a single mailbox and are handled one at a time; outbound
//! frames leave through the [`ConnectionManager`] in emission order.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use printlink_connection::{ConnectionEvent, ConnectionManager, InfoStore};
use printlink_protocol::constants::STATE_REASSERT_DELAY;
use printlink_protocol::{Demand, IntervalKind, PrinterState};
use printlink_telemetry::{
    AMBIENT_TICK, FileMetadata, INITIAL_AMBIENT, JobState, Outbox, TelemetryScheduler,
};

use crate::collaborators::{Collaborators, ControlError};
use crate::dispatcher::{Dispatched, ProtocolDispatcher};
use crate::events::MachineEvent;
use crate::machine_info;
use crate::timers::{TimerHandle, schedule_after};

const MAILBOX_CAPACITY: usize = 256;

/// Machine actions a demand can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrintAction {
    Pause,
    Resume,
    Cancel,
}

impl PrintAction {
    fn name(&self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
        }
    }

    /// Whether the action makes sense in the cached printer state.
    fn permitted(&self, state: PrinterState) -> bool {
        match self {
            Self::Pause => state == PrinterState::Printing,
            Self::Resume => state == PrinterState::Paused,
            Self::Cancel => matches!(state, PrinterState::Printing | PrinterState::Paused),
        }
    }
}

#[derive(Debug)]
enum BridgeMsg {
    Machine(MachineEvent),
    Connection(ConnectionEvent),
    JobTick,
    AmbientTick,
    ReassertState,
    ActionDone {
        action: PrintAction,
        result: Result<(), ControlError>,
    },
    MachineData(Map<String, Value>),
    Shutdown(oneshot::Sender<()>),
}

/// Single-writer owner of all reporting state.
pub struct Bridge {
    conn: Arc<ConnectionManager>,
    store: Arc<InfoStore>,
    dispatcher: ProtocolDispatcher,
    scheduler: TelemetryScheduler,
    collab: Collaborators,
    tx: mpsc::Sender<BridgeMsg>,
    rx: mpsc::Receiver<BridgeMsg>,
    job_timer: Option<TimerHandle>,
    ambient_timer: Option<TimerHandle>,
    reassert_timer: Option<TimerHandle>,
}

/// Cheap handle for posting machine events to a running [`Bridge`].
#[derive(Clone)]
pub struct BridgeHandle {
    tx: mpsc::Sender<BridgeMsg>,
}

impl Bridge {
    /// Creates the bridge. The ambient estimate starts from the persisted
    /// value when one exists.
    pub fn new(
        conn: Arc<ConnectionManager>,
        store: Arc<InfoStore>,
        collab: Collaborators,
    ) -> (Self, BridgeHandle) {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let ambient = store.ambient_temp().unwrap_or(INITIAL_AMBIENT);
        let bridge = Self {
            dispatcher: ProtocolDispatcher::new(conn.clone(), store.clone()),
            conn,
            store,
            scheduler: TelemetryScheduler::new(ambient),
            collab,
            tx: tx.clone(),
            rx,
            job_timer: None,
            ambient_timer: None,
            reassert_timer: None,
        };
        (bridge, BridgeHandle { tx })
    }

    /// Processes the mailbox until [`BridgeHandle::shutdown`] is called.
    pub async fn run(mut self) {
        let forwarder = self.conn.take_events().map(|mut events| {
            let tx = self.tx.clone();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    if tx.send(BridgeMsg::Connection(event)).await.is_err() {
                        break;
                    }
                }
            })
        });

        info!("bridge started");
        while let Some(msg) = self.rx.recv().await {
            if let BridgeMsg::Shutdown(done) = msg {
                self.shutdown().await;
                let _ = done.send(());
                break;
            }
            self.handle(msg);
            self.sync_timers();
        }

        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }
        info!("bridge stopped");
    }

    fn handle(&mut self, msg: BridgeMsg) {
        match msg {
            BridgeMsg::Machine(event) => self.on_machine_event(event),
            BridgeMsg::Connection(event) => self.on_connection_event(event),
            BridgeMsg::JobTick => {
                self.job_timer = None;
                let stats = self.collab.job.last_stats();
                let mut out = self.outbox();
                self.scheduler.job_tick(stats.print_duration, &mut out);
                self.flush(out);
            }
            BridgeMsg::AmbientTick => {
                self.ambient_timer = None;
                let mut out = self.outbox();
                let changed = self.scheduler.ambient_tick(Instant::now(), &mut out);
                self.flush(out);
                self.persist_ambient(changed);
            }
            BridgeMsg::ReassertState => {
                self.reassert_timer = None;
                let mut out = self.outbox();
                self.scheduler.reassert_state(&mut out);
                self.flush(out);
            }
            BridgeMsg::ActionDone { action, result } => match result {
                Ok(()) => debug!(action = action.name(), "print action completed"),
                Err(e) => {
                    warn!(action = action.name(), error = %e, "print action failed");
                    self.schedule_reassert();
                }
            },
            BridgeMsg::MachineData(data) => {
                info!(?data, "calculated machine data");
                let mut out = self.outbox();
                self.scheduler.on_machine_data(data, &mut out);
                self.flush(out);
            }
            BridgeMsg::Shutdown(done) => {
                let _ = done.send(());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Connection
    // -----------------------------------------------------------------------

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => debug!("socket open, waiting for session ack"),
            ConnectionEvent::Frame(text) => {
                if let Some(dispatched) = self.dispatcher.handle_text(&text) {
                    self.on_dispatched(dispatched);
                }
            }
            ConnectionEvent::Disconnected(close) => {
                debug!(?close, "session lost");
            }
        }
    }

    fn on_dispatched(&mut self, dispatched: Dispatched) {
        match dispatched {
            Dispatched::SessionStarted { intervals } => {
                if let Some(update) = intervals {
                    self.apply_intervals(&update);
                }
                let mut out = self.outbox();
                self.scheduler.push_initial_state(Instant::now(), &mut out);
                self.flush(out);
                self.request_machine_data();
            }
            Dispatched::Intervals(update) => self.apply_intervals(&update),
            Dispatched::Demand(demand) => self.on_demand(demand),
        }
    }

    fn apply_intervals(&mut self, update: &Map<String, Value>) {
        self.scheduler.apply_intervals(update);
        // Re-armed with the new job interval by `sync_timers`.
        self.job_timer = None;
    }

    /// Computes the machine description. The network lookup runs off the
    /// actor and the result comes back as a mailbox message.
    fn request_machine_data(&mut self) {
        let ui = self.scheduler.ui_info(&self.collab.ui.web_connections());
        let sys = self.collab.host.system_info();
        let host = self.collab.host.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let net = host.public_network().await;
            let data = machine_info::machine_data(ui, &sys, &net);
            let _ = tx.send(BridgeMsg::MachineData(data)).await;
        });
    }

    // -----------------------------------------------------------------------
    // Demands
    // -----------------------------------------------------------------------

    fn on_demand(&mut self, demand: Demand) {
        if !self.collab.machine.is_connected() {
            debug!(demand = demand.name(), "ignoring demand, machine not connected");
            return;
        }
        match demand {
            Demand::Pause => self.request_print_action(PrintAction::Pause),
            Demand::Resume => self.request_print_action(PrintAction::Resume),
            Demand::Cancel => self.request_print_action(PrintAction::Cancel),
            Demand::Terminal { enabled } => {
                if let Some(enabled) = enabled {
                    info!(enabled, "gcode terminal relay toggled");
                    self.scheduler.set_terminal(enabled);
                }
            }
            Demand::Gcode { lines } => {
                if lines.is_empty() {
                    return;
                }
                let script = lines.join("\n");
                let machine = self.collab.machine.clone();
                tokio::spawn(async move {
                    if let Err(e) = machine.run_script(script).await {
                        warn!(error = %e, "gcode demand failed");
                    }
                });
            }
            Demand::Other(name) => info!(demand = %name, "unknown demand"),
        }
    }

    fn request_print_action(&mut self, action: PrintAction) {
        let state = self.scheduler.cache().state;
        if !action.permitted(state) {
            debug!(action = action.name(), %state, "print action not permitted");
            self.schedule_reassert();
            return;
        }

        let machine = self.collab.machine.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = match action {
                PrintAction::Pause => machine.pause().await,
                PrintAction::Resume => machine.resume().await,
                PrintAction::Cancel => machine.cancel().await,
            };
            let _ = tx.send(BridgeMsg::ActionDone { action, result }).await;
        });
    }

    /// Pushes the cached state again shortly, so the remote drops any
    /// optimistic state it assumed for the rejected demand.
    fn schedule_reassert(&mut self) {
        self.reassert_timer = Some(schedule_after(
            STATE_REASSERT_DELAY,
            self.tx.clone(),
            BridgeMsg::ReassertState,
        ));
    }

    // -----------------------------------------------------------------------
    // Machine events
    // -----------------------------------------------------------------------

    fn on_machine_event(&mut self, event: MachineEvent) {
        let now = Instant::now();
        let mut out = self.outbox();
        let mut ambient_changed = None;

        match event {
            MachineEvent::Startup { state } => {
                let firmware = self
                    .collab
                    .host
                    .firmware()
                    .map(|fw| machine_info::firmware_info(&fw));
                self.scheduler.on_machine_startup(state, firmware, &mut out);
            }
            MachineEvent::Ready { heaters, initial } => {
                let stats = self.collab.job.last_stats();
                let metadata = if stats.state == JobState::Printing {
                    self.collab.metadata.metadata(&stats.filename)
                } else {
                    FileMetadata::default()
                };
                ambient_changed = self.scheduler.on_machine_ready(
                    &stats,
                    metadata,
                    &heaters,
                    initial.as_ref(),
                    now,
                    &mut out,
                );
            }
            MachineEvent::Shutdown => self.scheduler.on_machine_shutdown(&mut out),
            MachineEvent::Disconnected => self.scheduler.on_machine_disconnected(&mut out),

            MachineEvent::PrintStarted => {
                let stats = self.collab.job.last_stats();
                let metadata = self.collab.metadata.metadata(&stats.filename);
                self.scheduler
                    .on_print_start(&stats.filename, metadata, true, now, &mut out);
            }
            MachineEvent::PrintPaused => self.scheduler.on_print_paused(&mut out),
            MachineEvent::PrintResumed => self.scheduler.on_print_resumed(&mut out),
            MachineEvent::PrintEnded(end) => {
                let machine = self.collab.machine.state();
                self.scheduler.on_print_end(end, machine, now, &mut out);
            }

            MachineEvent::PauseRequested => self.scheduler.on_pause_requested(&mut out),
            MachineEvent::ResumeRequested => self.scheduler.on_resume_requested(&mut out),
            MachineEvent::CancelRequested => self.scheduler.on_cancel_requested(&mut out),

            MachineEvent::Status(update) => self.scheduler.on_status_update(&update, now, &mut out),
            MachineEvent::ProcStats(stats) => self.scheduler.on_proc_stats(&stats, now, &mut out),

            MachineEvent::UiIdentified(conn) => self.scheduler.on_ui_identified(&conn, &mut out),
            MachineEvent::UiRemoved { id } => {
                let remaining = self.collab.ui.web_connections();
                self.scheduler.on_ui_removed(id, &remaining, &mut out);
            }

            MachineEvent::GcodeResponse(text) => self.scheduler.on_gcode_response(&text, &mut out),
            MachineEvent::GcodeReceived(script) => {
                self.scheduler.on_gcode_received(&script, &mut out)
            }
        }

        self.flush(out);
        self.persist_ambient(ambient_changed);
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    fn outbox(&self) -> Outbox {
        Outbox::new(self.conn.is_session_connected(), self.conn.is_set_up())
    }

    fn flush(&self, out: Outbox) {
        for frame in out.into_frames() {
            if !self.conn.send(&frame) {
                debug!(msg_type = %frame.msg_type, "frame not sent, session down");
            }
        }
    }

    fn persist_ambient(&self, changed: Option<i64>) {
        let Some(ambient) = changed else {
            return;
        };
        info!(ambient, "ambient temperature changed");
        if let Err(e) = self.store.set_ambient_temp(ambient) {
            warn!(error = %e, "failed to persist ambient temperature");
        }
    }

    /// Arms or disarms the periodic ticks to match the scheduler.
    fn sync_timers(&mut self) {
        if !self.scheduler.is_job_timer_running() {
            self.job_timer = None;
        } else if self.job_timer.is_none() {
            let delay = self.scheduler.intervals().duration(IntervalKind::Job);
            self.job_timer = Some(schedule_after(delay, self.tx.clone(), BridgeMsg::JobTick));
        }

        if !self.scheduler.is_ambient_running() {
            self.ambient_timer = None;
        } else if self.ambient_timer.is_none() {
            self.ambient_timer = Some(schedule_after(
                AMBIENT_TICK,
                self.tx.clone(),
                BridgeMsg::AmbientTick,
            ));
        }
    }

    async fn shutdown(&mut self) {
        info!("bridge shutting down");
        self.scheduler.shutdown();
        self.job_timer = None;
        self.ambient_timer = None;
        self.reassert_timer = None;
        self.conn.close().await;
    }
}

impl BridgeHandle {
    /// Posts a machine event, waiting for mailbox space. Returns `false`
    /// once the bridge has stopped.
    pub async fn send(&self, event: MachineEvent) -> bool {
        self.tx.send(BridgeMsg::Machine(event)).await.is_ok()
    }

    /// Posts a machine event without waiting. Drops it when the mailbox is
    /// full.
    pub fn try_send(&self, event: MachineEvent) -> bool {
        match self.tx.try_send(BridgeMsg::Machine(event)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("bridge mailbox full, dropping machine event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Stops the bridge and closes the connection. Returns once done.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(BridgeMsg::Shutdown(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}
