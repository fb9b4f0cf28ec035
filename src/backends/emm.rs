//! EMM operations.
//!
//! Amplifier reference locking, wavelength tuning, tune abort and `ready` go
//! through the bridge process, so it is started (or restarted) before them.

use super::capabilities::{ArgDefault, ArgKind, ArgSpec, Capability, FixedValue, Wire};

const ON_OFF: &[&str] = &["on", "off"];
const START_STOP: &[&str] = &["start", "stop"];

const LASER_CONTROL_ARGS: &[ArgSpec] = &[ArgSpec::required(
    "action",
    ArgKind::Choice(ON_OFF),
    Wire::Field("action"),
)];

const START_PPLN_ARGS: &[ArgSpec] = &[
    ArgSpec::required("oven", ArgKind::IntChoice(&[1, 2, 3]), Wire::Field("fitted_oven")),
    ArgSpec::report_timeout(60),
];

const CHANGE_PPLN_ARGS: &[ArgSpec] = &[ArgSpec::report_timeout(60)];

const PBA_CONTROL_ARGS: &[ArgSpec] = &[ArgSpec::required(
    "action",
    ArgKind::Choice(START_STOP),
    Wire::Field("action"),
)];

const PBA_REFERENCE_ARGS: &[ArgSpec] = &[
    ArgSpec::required("action", ArgKind::Choice(START_STOP), Wire::Field("action")),
    ArgSpec::report_timeout(60),
];

const SET_WAVELENGTH_ARGS: &[ArgSpec] = &[
    ArgSpec::required("target", ArgKind::Number, Wire::Wrapped("target")),
    ArgSpec::report_timeout(120),
    ArgSpec::optional(
        "wavelength_range",
        ArgKind::Choice(&["visible", "infrared"]),
        ArgDefault::Str("visible"),
        Wire::Field("beam"),
    ),
];

// The server rejects wavelength_stop without a parameters object.
const ABORT_TUNE_FIXED: &[(&str, FixedValue)] = &[("null", FixedValue::Null)];

const PBA_REFERENCE_FIXED: &[(&str, FixedValue)] = &[("solstis", FixedValue::Wrapped(1))];

/// EMM capability table, sorted by name.
pub static CAPABILITIES: &[Capability] = &[
    Capability::remote("abort_tune", "wavelength_stop")
        .with_fixed(ABORT_TUNE_FIXED)
        .needs_bridge(),
    Capability::remote("change_ppln", "change_ppln").with_args(CHANGE_PPLN_ARGS),
    Capability::remote("laser_control", "laser_control").with_args(LASER_CONTROL_ARGS),
    Capability::remote("pba_control", "pba_control")
        .with_args(PBA_CONTROL_ARGS)
        .needs_bridge()
        .ack_only(),
    Capability::remote("pba_reference", "pba_reference")
        .with_args(PBA_REFERENCE_ARGS)
        .with_fixed(PBA_REFERENCE_FIXED)
        .needs_bridge(),
    Capability::local("ready", true).needs_bridge(),
    Capability::remote("set_wavelength", "wavelength")
        .with_args(SET_WAVELENGTH_ARGS)
        .needs_bridge(),
    Capability::remote("start_ppln", "start_ppln").with_args(START_PPLN_ARGS),
    Capability::remote("status", "status"),
];
