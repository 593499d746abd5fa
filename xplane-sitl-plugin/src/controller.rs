//! Step controller — the time-synchronization state machine.
//!
//! Driven one tick per host frame from the flight-loop callback. In
//! lock-step mode each tick freezes host time, exchanges exactly one
//! state/command round trip with the autopilot and unfreezes; in
//! free-running mode the exchange is best-effort and never blocks. This
//! module is free of any XPLM types so it can be fully unit-tested via the
//! `MockXplm` shim.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use sitl_schema::ActuatorCommand;

use crate::capture::DataRefManifest;
use crate::config::SitlConfig;
use crate::status::StatusReport;
use crate::transport::{Transport, TransportError};
use crate::xplm_shim::{CommandHandle, DataRefHandle, XplmApi};

/// Reconnect backoff bounds.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
pub const MAX_BACKOFF: Duration = Duration::from_secs(5);

// ── X-Plane control paths ─────────────────────────────────────────────────────

mod paths {
    // Commands
    pub const PAUSE_ON:  &str = "sim/operation/pause_on";
    pub const PAUSE_OFF: &str = "sim/operation/pause_off";
    // Actuator routing: channels 0-2 drive the yoke, 3+ the throttle array.
    pub const YOKE_ROLL:    &str = "sim/joystick/yoke_roll_ratio";
    pub const YOKE_PITCH:   &str = "sim/joystick/yoke_pitch_ratio";
    pub const YOKE_HEADING: &str = "sim/joystick/yoke_heading_ratio";
    pub const THROTTLE:     &str = "sim/flightmodel/engine/ENGN_thro_use";
}

// ── SessionState ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session; the flight loop asks to stop being called.
    Idle,
    /// Host time frozen during each tick while awaiting the reply.
    PausedWaitingReply,
    /// Host time advancing; exchange is best-effort.
    FreeRunning,
}

// ── HostControls ─────────────────────────────────────────────────────────────

/// Write-side host collaborator: pause/unpause commands and actuator
/// datarefs, resolved once at session start.
struct HostControls {
    pause_on: Option<CommandHandle>,
    pause_off: Option<CommandHandle>,
    yoke: [Option<DataRefHandle>; 3],
    throttle: Option<DataRefHandle>,
    missing: Vec<&'static str>,
}

impl HostControls {
    fn unresolved() -> Self {
        HostControls {
            pause_on: None,
            pause_off: None,
            yoke: [None; 3],
            throttle: None,
            missing: Vec::new(),
        }
    }

    fn resolve(xplm: &dyn XplmApi) -> Self {
        let mut missing = Vec::new();

        let mut find_cmd = |path: &'static str| {
            let h = xplm.find_command(path);
            if h.is_none() {
                xplm.log(&format!("XSITL: command not found: {path}\n"));
                missing.push(path);
            }
            h
        };
        let pause_on = find_cmd(paths::PAUSE_ON);
        let pause_off = find_cmd(paths::PAUSE_OFF);

        let mut find_ref = |path: &'static str| {
            let h = xplm.find_dataref(path);
            if h.is_none() {
                xplm.log(&format!("XSITL: dataref not found: {path}\n"));
                missing.push(path);
            }
            h
        };
        let yoke = [
            find_ref(paths::YOKE_ROLL),
            find_ref(paths::YOKE_PITCH),
            find_ref(paths::YOKE_HEADING),
        ];
        let throttle = find_ref(paths::THROTTLE);

        HostControls {
            pause_on,
            pause_off,
            yoke,
            throttle,
            missing,
        }
    }

    fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    fn pause(&self, xplm: &dyn XplmApi) {
        if let Some(h) = self.pause_on {
            xplm.command_once(h);
        }
    }

    fn unpause(&self, xplm: &dyn XplmApi) {
        if let Some(h) = self.pause_off {
            xplm.command_once(h);
        }
    }

    /// Route the command's channels onto the host control surfaces.
    /// Values are clamped into [-1, 1] before writing.
    fn apply(&self, xplm: &dyn XplmApi, cmd: &ActuatorCommand) {
        let cmd = cmd.clamped();
        for (i, handle) in self.yoke.iter().enumerate() {
            if let (Some(h), Some(v)) = (handle, cmd.channels.get(i)) {
                xplm.set_float(*h, *v);
            }
        }
        if cmd.channels.len() > 3 {
            if let Some(h) = self.throttle {
                xplm.set_float_array(h, 0, &cmd.channels[3..]);
            }
        }
    }
}

// ── ReconnectBackoff ─────────────────────────────────────────────────────────

/// Exponential backoff between reconnect attempts, polled from the tick.
pub struct ReconnectBackoff {
    next: Duration,
}

impl ReconnectBackoff {
    pub fn new() -> Self {
        ReconnectBackoff {
            next: INITIAL_BACKOFF,
        }
    }

    /// Delay for the upcoming attempt; subsequent delays double up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let d = self.next;
        self.next = (d * 2).min(MAX_BACKOFF);
        d
    }

    pub fn reset(&mut self) {
        self.next = INITIAL_BACKOFF;
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new()
    }
}

// ── StepController ───────────────────────────────────────────────────────────

pub struct StepController {
    xplm: Box<dyn XplmApi>,
    config: SitlConfig,
    manifest: DataRefManifest,
    controls: HostControls,
    transport: Option<Transport>,
    state: SessionState,
    /// User-selected mode; honored only while the link is up.
    lockstep: bool,
    /// Cleared on disconnect, set again by the first successful receive.
    link_up: bool,
    /// Set between issuing pause and the matching unpause.
    host_paused: bool,
    last_command: ActuatorCommand,
    backoff: ReconnectBackoff,
    next_connect_attempt: Option<Instant>,
    status: StatusReport,
}

impl StepController {
    pub fn new(xplm: Box<dyn XplmApi>, config: SitlConfig) -> Self {
        let channels = config.channel_count;
        StepController {
            xplm,
            config,
            manifest: DataRefManifest::default(),
            controls: HostControls::unresolved(),
            transport: None,
            state: SessionState::Idle,
            lockstep: false,
            link_up: false,
            host_paused: false,
            last_command: ActuatorCommand::neutral(channels),
            backoff: ReconnectBackoff::new(),
            next_connect_attempt: None,
            status: StatusReport::new(),
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Start a session: resolve host handles, open the transport, pick the
    /// starting state. Safe to call again after `disable`.
    pub fn enable(&mut self) {
        self.manifest = DataRefManifest::resolve(self.xplm.as_ref());
        self.controls = HostControls::resolve(self.xplm.as_ref());
        self.lockstep = self.config.lockstep;
        self.last_command = ActuatorCommand::neutral(self.config.channel_count);
        self.backoff = ReconnectBackoff::new();
        self.next_connect_attempt = None;

        self.open_transport();
        // Optimistic: the peer is assumed reachable until proven otherwise,
        // so a lock-step session starts exchanging on the very first tick.
        self.link_up = self.transport.is_some();
        self.state = self.select_state();

        self.xplm.log(&format!(
            "XSITL: session enabled, remote {}, {} mode\n",
            self.config.remote_addr,
            if self.lockstep { "lock-step" } else { "free-running" }
        ));
    }

    /// Tear the session down. Safe to call at any point, including with a
    /// reconnect pending; the socket is released and the host is never left
    /// paused.
    pub fn disable(&mut self) {
        if self.host_paused {
            self.controls.unpause(self.xplm.as_ref());
            self.host_paused = false;
        }
        self.transport = None;
        self.next_connect_attempt = None;
        self.link_up = false;
        self.state = SessionState::Idle;
        self.status = StatusReport::new();
        self.xplm.log("XSITL: session disabled\n");
    }

    /// Flip between lock-step and free-running at runtime.
    pub fn toggle_lockstep(&mut self) {
        self.lockstep = !self.lockstep;
        self.xplm.log(&format!(
            "XSITL: {} mode selected\n",
            if self.lockstep { "lock-step" } else { "free-running" }
        ));
    }

    pub fn lockstep_selected(&self) -> bool {
        self.lockstep
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.as_ref().and_then(|t| t.local_addr())
    }

    /// Current status line for the display collaborator.
    pub fn status_line(&self) -> String {
        self.status.line()
    }

    // ── Tick ─────────────────────────────────────────────────────────────────

    /// One host frame. Returns the flight-loop scheduling value: -1.0 to be
    /// called again next frame, 0.0 to stop (disabled).
    ///
    /// Never panics and never lets an error escape; every failure becomes a
    /// status update plus degrade-and-continue behavior.
    pub fn tick(&mut self, elapsed_real_s: f32, _elapsed_sim_s: f32) -> f32 {
        if self.state == SessionState::Idle {
            return 0.0;
        }

        self.status.record_frame(elapsed_real_s);
        self.poll_reconnect();
        self.state = self.select_state();

        if self.transport.is_some() {
            match self.state {
                SessionState::PausedWaitingReply => self.lockstep_tick(),
                SessionState::FreeRunning => self.free_tick(),
                SessionState::Idle => {}
            }
        } else {
            // Backoff window: keep the surfaces at the held (neutral) command.
            self.apply_last();
        }

        self.refresh_status();
        -1.0
    }

    /// The state an enabled session should be in right now. Lock-step is
    /// only honored while the link is confirmed up; a reconnecting session
    /// runs free so host time is never frozen against a dead peer.
    fn select_state(&self) -> SessionState {
        if self.lockstep && self.link_up && self.transport.is_some() {
            SessionState::PausedWaitingReply
        } else {
            SessionState::FreeRunning
        }
    }

    // ── Lock-step exchange ───────────────────────────────────────────────────

    /// Freeze host time, run one blocking round trip, unfreeze. Exactly one
    /// pause and one unpause per tick on every path out of this function.
    fn lockstep_tick(&mut self) {
        self.controls.pause(self.xplm.as_ref());
        self.host_paused = true;

        let snap = self.manifest.capture(self.xplm.as_ref());
        let timeout = Duration::from_millis(self.config.recv_timeout_ms);
        let outcome = match self.transport.as_ref() {
            Some(t) => t.send(&snap).and_then(|_| t.receive(timeout)),
            None => Err(TransportError::Timeout),
        };

        match outcome {
            Ok(cmd) => self.accept(cmd),
            Err(TransportError::Timeout) => self.status.set_error("timeout"),
            Err(TransportError::Malformed(_)) => self.status.set_error("bad frame"),
            Err(TransportError::Disconnected(e)) => self.on_disconnect(&e),
        }

        self.apply_last();
        self.controls.unpause(self.xplm.as_ref());
        self.host_paused = false;
    }

    // ── Free-running exchange ────────────────────────────────────────────────

    /// Send the snapshot, drain whatever command already arrived (stale by a
    /// frame or more is acceptable drift), apply the freshest known command.
    /// Bounded: nothing here blocks.
    fn free_tick(&mut self) {
        let snap = self.manifest.capture(self.xplm.as_ref());

        let outcome = match self.transport.as_ref() {
            Some(t) => t.send(&snap).and_then(|_| t.poll_receive()),
            None => return,
        };

        match outcome {
            Ok(polled) => {
                if polled.dropped > 0 {
                    self.status.set_error("bad frame");
                }
                if let Some(cmd) = polled.newest {
                    self.accept(cmd);
                }
            }
            Err(TransportError::Disconnected(e)) => self.on_disconnect(&e),
            // poll_receive never reports Timeout/Malformed directly.
            Err(_) => {}
        }

        self.apply_last();
    }

    // ── Command intake ───────────────────────────────────────────────────────

    /// Validate and adopt a received command. A channel-count mismatch with
    /// the session contract rejects the frame; the previous command stays in
    /// effect, same as a timeout.
    fn accept(&mut self, cmd: ActuatorCommand) {
        if cmd.channel_count() != self.config.channel_count {
            self.xplm.log(&format!(
                "XSITL: rejected command with {} channels, session uses {}\n",
                cmd.channel_count(),
                self.config.channel_count
            ));
            self.status.set_error("bad channels");
            return;
        }

        self.last_command = cmd.clamped();
        self.status.clear_error();
        if !self.link_up {
            self.link_up = true;
            self.backoff.reset();
            self.xplm.log("XSITL: link restored\n");
        }
    }

    fn apply_last(&mut self) {
        self.controls.apply(self.xplm.as_ref(), &self.last_command);
    }

    // ── Connection management ────────────────────────────────────────────────

    fn open_transport(&mut self) {
        let bind = self
            .config
            .bind_socket_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
        let remote = match self.config.remote_socket_addr() {
            Ok(a) => a,
            Err(e) => {
                self.xplm.log(&format!(
                    "XSITL: bad remote_addr {:?}: {e}\n",
                    self.config.remote_addr
                ));
                self.schedule_reconnect();
                return;
            }
        };

        match Transport::open(bind, remote) {
            Ok(t) => {
                self.transport = Some(t);
                self.next_connect_attempt = None;
            }
            Err(e) => {
                self.xplm.log(&format!("XSITL: transport open failed: {e}\n"));
                self.schedule_reconnect();
            }
        }
    }

    fn on_disconnect(&mut self, e: &std::io::Error) {
        self.xplm.log(&format!("XSITL: link lost: {e}\n"));
        self.transport = None;
        self.link_up = false;
        // Hold neutral until the peer is back.
        self.last_command = ActuatorCommand::neutral(self.config.channel_count);
        self.status.set_error("link lost");
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        let delay = self.backoff.next_delay();
        self.next_connect_attempt = Some(Instant::now() + delay);
    }

    fn poll_reconnect(&mut self) {
        if self.transport.is_some() {
            return;
        }
        if let Some(at) = self.next_connect_attempt {
            if Instant::now() >= at {
                self.open_transport();
            }
        }
    }

    // ── Status ───────────────────────────────────────────────────────────────

    fn refresh_status(&mut self) {
        self.status.set_label(match self.state {
            SessionState::Idle => "idle",
            SessionState::PausedWaitingReply => "lockstep",
            SessionState::FreeRunning => "free-run",
        });
        self.status.set_degraded(
            !self.manifest.is_complete() || !self.controls.is_complete(),
        );
        self.status.set_reconnect_in(
            self.next_connect_attempt
                .map(|at| at.saturating_duration_since(Instant::now()).as_secs_f32()),
        );
    }

    // ── Test hooks ───────────────────────────────────────────────────────────

    #[cfg(test)]
    pub(crate) fn force_disconnect(&mut self) {
        let e = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "test");
        self.on_disconnect(&e);
    }

    #[cfg(test)]
    pub(crate) fn trigger_reconnect_now(&mut self) {
        if self.next_connect_attempt.is_some() {
            self.next_connect_attempt = Some(Instant::now());
        }
    }

    #[cfg(test)]
    pub(crate) fn last_command(&self) -> &ActuatorCommand {
        &self.last_command
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
