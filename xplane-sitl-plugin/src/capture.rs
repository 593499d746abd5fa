//! Per-frame state capture through cached dataref handles.
//!
//! The manifest of dataref paths is fixed and versioned with the wire
//! format: the outbound frame carries exactly the values read here.

use sitl_schema::StateSnapshot;

use crate::xplm_shim::{DataRefHandle, XplmApi};

/// Bump when the captured variable list changes alongside the wire format.
pub const MANIFEST_VERSION: u16 = 1;

pub mod paths {
    pub const SIM_TIME_SEC: &str = "sim/time/total_running_time_sec";
    /// Float array [w, x, y, z].
    pub const QUATERNION: &str = "sim/flightmodel/position/q";
    pub const LATITUDE:   &str = "sim/flightmodel/position/latitude";
    pub const LONGITUDE:  &str = "sim/flightmodel/position/longitude";
}

/// Cached dataref handles, looked up once at session start.
///
/// An unresolved entry is not fatal: capture substitutes 0.0 for it and the
/// condition is surfaced through [`DataRefManifest::missing`] so the status
/// line can show a degraded marker.
#[derive(Default)]
pub struct DataRefManifest {
    sim_time: Option<DataRefHandle>,
    quaternion: Option<DataRefHandle>,
    latitude: Option<DataRefHandle>,
    longitude: Option<DataRefHandle>,
    missing: Vec<&'static str>,
}

impl DataRefManifest {
    /// Resolve every path in the manifest. Unresolved paths are logged and
    /// recorded; they stay unresolved for the rest of the session.
    pub fn resolve(xplm: &dyn XplmApi) -> Self {
        let mut missing = Vec::new();
        let mut find = |path: &'static str| {
            let h = xplm.find_dataref(path);
            if h.is_none() {
                xplm.log(&format!("XSITL: dataref not found: {path}\n"));
                missing.push(path);
            }
            h
        };

        let sim_time   = find(paths::SIM_TIME_SEC);
        let quaternion = find(paths::QUATERNION);
        let latitude   = find(paths::LATITUDE);
        let longitude  = find(paths::LONGITUDE);

        DataRefManifest {
            sim_time,
            quaternion,
            latitude,
            longitude,
            missing,
        }
    }

    /// True when every manifest entry resolved.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Paths that failed to resolve at session start.
    pub fn missing(&self) -> &[&'static str] {
        &self.missing
    }

    /// Read all datarefs and assemble a [`StateSnapshot`].
    ///
    /// No side effects beyond the returned value; unresolved entries read
    /// as zero.
    pub fn capture(&self, xplm: &dyn XplmApi) -> StateSnapshot {
        let gd = |h: Option<DataRefHandle>| h.map_or(0.0_f64, |h| xplm.get_double(h));

        let mut quaternion = [0f32; 4];
        if let Some(h) = self.quaternion {
            xplm.get_float_array(h, 0, &mut quaternion);
        }

        StateSnapshot {
            sim_time_s: self.sim_time.map_or(0.0, |h| f64::from(xplm.get_float(h))),
            quaternion,
            latitude_deg: gd(self.latitude),
            longitude_deg: gd(self.longitude),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xplm_shim::{DataRefValue, MockXplm};

    fn full_mock() -> MockXplm {
        let m = MockXplm::new();
        m.set_dataref(paths::SIM_TIME_SEC, DataRefValue::Float(321.25));
        m.set_dataref(
            paths::QUATERNION,
            DataRefValue::FloatArray(vec![0.7071068, 0.0, 0.7071068, 0.0]),
        );
        m.set_dataref(paths::LATITUDE,  DataRefValue::Double(-35.362938));
        m.set_dataref(paths::LONGITUDE, DataRefValue::Double(149.165085));
        m
    }

    #[test]
    fn capture_reads_all_manifest_entries() {
        let mock = full_mock();
        let manifest = DataRefManifest::resolve(&mock);
        assert!(manifest.is_complete());

        let snap = manifest.capture(&mock);
        assert!((snap.sim_time_s - 321.25).abs() < 1e-6);
        assert!((snap.latitude_deg - -35.362938).abs() < 1e-9);
        assert!((snap.longitude_deg - 149.165085).abs() < 1e-9);
        assert!(snap.quaternion_is_unit());
        assert!(snap.position_in_range());
    }

    #[test]
    fn unresolved_dataref_degrades_to_zero() {
        // No quaternion dataref this session.
        let m = MockXplm::new();
        m.set_dataref(paths::SIM_TIME_SEC, DataRefValue::Float(1.0));
        m.set_dataref(paths::LATITUDE,  DataRefValue::Double(10.0));
        m.set_dataref(paths::LONGITUDE, DataRefValue::Double(20.0));

        let manifest = DataRefManifest::resolve(&m);
        assert!(!manifest.is_complete());
        assert_eq!(manifest.missing(), &[paths::QUATERNION]);
        assert!(m.log_messages().iter().any(|l| l.contains(paths::QUATERNION)));

        let snap = manifest.capture(&m);
        assert_eq!(snap.quaternion, [0.0; 4]);
        assert!((snap.latitude_deg - 10.0).abs() < 1e-9);
    }

    #[test]
    fn capture_has_no_write_side_effects() {
        let mock = full_mock();
        let manifest = DataRefManifest::resolve(&mock);
        let _ = manifest.capture(&mock);
        assert!(mock.set_float_calls().is_empty());
        assert!(mock.set_float_array_calls().is_empty());
        assert!(mock.command_calls().is_empty());
    }
}
