//! X-Plane 12 SITL bridge plugin.
//!
//! Compiles to a `.xpl` shared library loaded by X-Plane. Each flight-loop
//! tick sends the sim state (attitude quaternion + position) to an external
//! autopilot over UDP and applies the actuator command it gets back, either
//! in lock-step (host time frozen per round trip) or free-running mode.
//!
//! The `XPLM*` entry points below are only present in non-test builds; unit
//! tests use `MockXplm` and call `StepController` methods directly.

pub mod capture;
pub mod config;
pub mod controller;
pub mod status;
pub mod transport;
pub mod xplm_shim;

// Raw X-Plane SDK extern declarations — only needed for production builds.
// Symbols are resolved at runtime by X-Plane when the .xpl is loaded.
#[cfg(not(test))]
pub(crate) mod xplm_sys {
    use std::ffi::{c_char, c_float, c_int, c_void};

    pub type XPLMDataRef = *mut c_void;
    pub type XPLMCommandRef = *mut c_void;

    pub type XPLMCommandCallback =
        unsafe extern "C" fn(XPLMCommandRef, c_int, *mut c_void) -> c_int;

    extern "C" {
        pub fn XPLMFindDataRef(inDataRefName: *const c_char) -> XPLMDataRef;
        pub fn XPLMGetDataf(inDataRef: XPLMDataRef) -> c_float;
        pub fn XPLMGetDatad(inDataRef: XPLMDataRef) -> f64;
        pub fn XPLMGetDatavf(
            inDataRef:  XPLMDataRef,
            outValues:  *mut c_float,
            inOffset:   c_int,
            inMax:      c_int,
        ) -> c_int;
        pub fn XPLMSetDataf(inDataRef: XPLMDataRef, inValue: c_float);
        pub fn XPLMSetDatavf(
            inDataRef: XPLMDataRef,
            inValues:  *mut c_float,
            inOffset:  c_int,
            inCount:   c_int,
        );
        pub fn XPLMFindCommand(inName: *const c_char) -> XPLMCommandRef;
        pub fn XPLMCommandOnce(inCommand: XPLMCommandRef);
        pub fn XPLMCreateCommand(
            inName:        *const c_char,
            inDescription: *const c_char,
        ) -> XPLMCommandRef;
        pub fn XPLMRegisterCommandHandler(
            inCommand:      XPLMCommandRef,
            inHandler:      Option<XPLMCommandCallback>,
            inBeforeOthers: c_int,
            inRefcon:       *mut c_void,
        );
        pub fn XPLMUnregisterCommandHandler(
            inCommand:      XPLMCommandRef,
            inHandler:      Option<XPLMCommandCallback>,
            inBeforeOthers: c_int,
            inRefcon:       *mut c_void,
        );
        pub fn XPLMDebugString(inString: *const c_char);
        pub fn XPLMRegisterFlightLoopCallback(
            inFlightLoop: Option<
                unsafe extern "C" fn(f32, f32, c_int, *mut c_void) -> f32,
            >,
            inInterval: c_float,
            inRefcon:   *mut c_void,
        );
        pub fn XPLMUnregisterFlightLoopCallback(
            inFlightLoop: Option<
                unsafe extern "C" fn(f32, f32, c_int, *mut c_void) -> f32,
            >,
            inRefcon: *mut c_void,
        );
    }
}

// ── XPLM entry points (production only) ──────────────────────────────────────

#[cfg(not(test))]
mod entry {
    use super::config::SitlConfig;
    use super::controller::StepController;
    use super::xplm_shim::RealXplm;
    use super::xplm_sys;
    use std::ffi::{c_int, c_void, CString};
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::path::Path;
    use std::sync::{Mutex, OnceLock};

    const CONFIG_PATH: &str = "Resources/plugins/xsitl/sitl.json";
    const TOGGLE_COMMAND: &str = "xsitl/toggle_lockstep";

    static PLUGIN: OnceLock<Mutex<StepController>> = OnceLock::new();
    static TOGGLE_CMD: OnceLock<usize> = OnceLock::new();

    #[no_mangle]
    pub unsafe extern "C" fn XPluginStart(
        out_name: *mut std::ffi::c_char,
        out_sig:  *mut std::ffi::c_char,
        out_desc: *mut std::ffi::c_char,
    ) -> c_int {
        write_cstr(out_name, "XSITL");
        write_cstr(out_sig,  "io.xsitl.bridge");
        write_cstr(out_desc, "Exchanges flight state with an external SITL autopilot");

        let config = match SitlConfig::load(Path::new(CONFIG_PATH)) {
            Ok(c) => c,
            Err(e) => {
                log(&format!("XSITL: config error, using defaults: {e}\n"));
                SitlConfig::default()
            }
        };

        let controller = StepController::new(Box::new(RealXplm), config);
        if PLUGIN.set(Mutex::new(controller)).is_err() {
            log("XSITL: PLUGIN already initialized\n");
            return 0;
        }

        // Create the mode-toggle command up front; handler attached on enable.
        if let (Ok(name), Ok(desc)) = (
            CString::new(TOGGLE_COMMAND),
            CString::new("Toggle SITL lock-step mode"),
        ) {
            let cmd = xplm_sys::XPLMCreateCommand(name.as_ptr(), desc.as_ptr());
            let _ = TOGGLE_CMD.set(cmd as usize);
        }

        log("XSITL: XPluginStart OK\n");
        1
    }

    #[no_mangle]
    pub unsafe extern "C" fn XPluginStop() {
        log("XSITL: XPluginStop\n");
        // Plugin state is dropped automatically via OnceLock; no explicit cleanup needed.
    }

    #[no_mangle]
    pub unsafe extern "C" fn XPluginEnable() -> c_int {
        let Some(plugin) = PLUGIN.get() else {
            log("XSITL: XPluginEnable — plugin not initialized\n");
            return 0;
        };
        if let Ok(mut p) = plugin.lock() {
            p.enable();
        }

        if let Some(&cmd) = TOGGLE_CMD.get() {
            xplm_sys::XPLMRegisterCommandHandler(
                cmd as _,
                Some(toggle_cmd_cb),
                1,
                std::ptr::null_mut(),
            );
        }

        // -1.0 = call every flight loop, matching the tick's own scheduling.
        xplm_sys::XPLMRegisterFlightLoopCallback(
            Some(flight_loop_cb),
            -1.0,
            std::ptr::null_mut(),
        );
        log("XSITL: XPluginEnable OK\n");
        1
    }

    #[no_mangle]
    pub unsafe extern "C" fn XPluginDisable() {
        xplm_sys::XPLMUnregisterFlightLoopCallback(
            Some(flight_loop_cb),
            std::ptr::null_mut(),
        );
        if let Some(&cmd) = TOGGLE_CMD.get() {
            xplm_sys::XPLMUnregisterCommandHandler(
                cmd as _,
                Some(toggle_cmd_cb),
                1,
                std::ptr::null_mut(),
            );
        }
        if let Some(plugin) = PLUGIN.get() {
            if let Ok(mut p) = plugin.lock() {
                p.disable();
            }
        }
        log("XSITL: XPluginDisable\n");
    }

    #[no_mangle]
    pub unsafe extern "C" fn XPluginReceiveMessage(
        _from:  c_int,
        _msg:   c_int,
        _param: *mut c_void,
    ) {
        // No inter-plugin messages handled in v1.
    }

    unsafe extern "C" fn flight_loop_cb(
        since_last_call:  f32,
        since_last_floop: f32,
        _counter:         std::ffi::c_int,
        _refcon:          *mut c_void,
    ) -> f32 {
        // A panic must never cross into the host process.
        let result = catch_unwind(AssertUnwindSafe(|| {
            if let Some(plugin) = PLUGIN.get() {
                if let Ok(mut p) = plugin.lock() {
                    return p.tick(since_last_call, since_last_floop);
                }
            }
            0.0
        }));
        match result {
            Ok(next) => next,
            Err(_) => {
                log("XSITL: tick panicked, stopping flight loop\n");
                0.0
            }
        }
    }

    unsafe extern "C" fn toggle_cmd_cb(
        _cmd:    xplm_sys::XPLMCommandRef,
        phase:   c_int,
        _refcon: *mut c_void,
    ) -> c_int {
        // Phase 0 = command begin; ignore continue/end.
        if phase == 0 {
            if let Some(plugin) = PLUGIN.get() {
                if let Ok(mut p) = plugin.lock() {
                    p.toggle_lockstep();
                }
            }
        }
        // Consume the command.
        0
    }

    fn log(msg: &str) {
        if let Ok(c) = CString::new(msg) {
            unsafe { xplm_sys::XPLMDebugString(c.as_ptr()) }
        }
    }

    unsafe fn write_cstr(dst: *mut std::ffi::c_char, s: &str) {
        let bytes = s.as_bytes();
        let len = bytes.len().min(255);
        std::ptr::copy_nonoverlapping(bytes.as_ptr() as *const _, dst, len);
        *dst.add(len) = 0;
    }
}

// ── Re-exports used by integration tests and the peer tool ───────────────────

pub use config::SitlConfig;
pub use controller::{SessionState, StepController};
pub use sitl_schema::{ActuatorCommand, StateSnapshot};
pub use status::STATUS_MAX_LEN;
