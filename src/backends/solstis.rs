//! SolsTiS operations.

use super::capabilities::{ArgDefault, ArgKind, ArgSpec, Capability, Wire};

const ON_OFF: &[&str] = &["on", "off"];

const NO_WAVEMETER: &str = "No link to wavelength meter.";

const MOVE_ARGS: &[ArgSpec] = &[
    ArgSpec::required("wavelength", ArgKind::Number, Wire::Wrapped("wavelength")),
    ArgSpec::report_timeout(60),
];

const LOCK_TO_ARGS: &[ArgSpec] = &[
    ArgSpec::required("wavelength", ArgKind::Number, Wire::Wrapped("lock_wavelength")),
    ArgSpec::optional(
        "lock_status",
        ArgKind::Choice(ON_OFF),
        ArgDefault::Str("on"),
        Wire::Field("operation"),
    ),
];

const LOCK_ARGS: &[ArgSpec] = &[ArgSpec::optional(
    "lock_status",
    ArgKind::Choice(ON_OFF),
    ArgDefault::Str("on"),
    Wire::Field("operation"),
)];

const ETALON_VAL_ARGS: &[ArgSpec] = &[ArgSpec::required(
    "percent",
    ArgKind::Percent,
    Wire::Wrapped("setting"),
)];

const ETALON_LOCK_ARGS: &[ArgSpec] = &[
    ArgSpec::required("status", ArgKind::Choice(ON_OFF), Wire::Field("operation")),
    ArgSpec::report_timeout(60),
];

const RESONATOR_VAL_ARGS: &[ArgSpec] = &[
    ArgSpec::required("percent", ArgKind::Percent, Wire::Wrapped("setting")),
    ArgSpec::report_timeout(60),
];

/// SolsTiS capability table, sorted by name.
pub static CAPABILITIES: &[Capability] = &[
    // Unlocks the resonator, leaves the etalon
    Capability::remote("abort_tune", "stop_wave_m").check_status(NO_WAVEMETER),
    Capability::remote("etalon_lock_status", "etalon_lock_status").check_status("Operation failed."),
    Capability::remote("get_wavelength", "poll_wave_m"),
    Capability::remote("get_wavelength_range", "get_wavelength_range"),
    Capability::remote("lock_wavelength", "lock_wave_m")
        .with_args(LOCK_ARGS)
        .check_status(NO_WAVEMETER),
    // Developmental on the server side; newer firmware may reject it
    Capability::remote("lock_wavelength_to", "lock_wave_m_fixed").with_args(LOCK_TO_ARGS),
    Capability::remote("set_etalon_lock", "etalon_lock").with_args(ETALON_LOCK_ARGS),
    Capability::remote("set_etalon_val", "tune_etalon").with_args(ETALON_VAL_ARGS),
    Capability::remote("set_resonator_val", "tune_resonator").with_args(RESONATOR_VAL_ARGS),
    // Also locks the etalon and resonator
    Capability::remote("set_wavelength", "set_wave_m").with_args(MOVE_ARGS),
    Capability::remote("set_wavelength_open", "move_wave_t").with_args(MOVE_ARGS),
    Capability::remote("status", "get_status"),
];
