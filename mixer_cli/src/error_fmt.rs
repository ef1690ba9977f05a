//! Human-readable error descriptions, structured JSON errors and exit codes.

use mixer_core::error::{BuildError, MixerError};
use serde_json::json;

use crate::session::{SessionError, chain_text};

pub const EXIT_GENERIC: i32 = 1;
pub const EXIT_STOPPED: i32 = 2;
pub const EXIT_LINK: i32 = 3;
pub const EXIT_CONFIG: i32 = 4;

fn explain(what: &str, causes: &str, fix: &str) -> String {
    format!("What happened: {what}\nLikely causes: {causes}\nHow to fix: {fix}")
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(se) = err.downcast_ref::<SessionError>() {
        return match se {
            SessionError::Config(msg) => explain(
                &format!("Invalid configuration ({msg})."),
                "A missing file, a TOML syntax error, or an out-of-range value.",
                "Edit the config file (see etc/mixer_config.toml), then rerun.",
            ),
            SessionError::Schedule(msg) => explain(
                &format!("The schedule could not be used ({msg})."),
                "Empty or non-numeric cells, times that do not increase, or a schedule longer than schedule.max_duration_s.",
                "Fix the CSV: first column is time in seconds, one column per MFC.",
            ),
            SessionError::EmergencyStop { violations } if violations.is_empty() => explain(
                "The rig entered emergency stop.",
                "An emergency stop was requested or the rig reported a fault.",
                "Check the rig, then start a new run.",
            ),
            SessionError::EmergencyStop { violations } => explain(
                &format!(
                    "The interlock forced an emergency stop: {}.",
                    violations.join(", ")
                ),
                "A flow, pressure or temperature left its safe band, or the rig stopped answering.",
                "Inspect the rig and review the [interlock] limits, then start a new run.",
            ),
            SessionError::Interrupted => explain(
                "The run was interrupted; the rig was put in emergency stop.",
                "Ctrl-C or a termination signal.",
                "Start a new run when ready.",
            ),
            SessionError::NoTelemetry { port } => explain(
                &format!("Connected to {port} but no telemetry arrived."),
                "Wrong baud rate, firmware not running, or a response delay too short.",
                "Check serial.baud_rate and serial.response_delay_ms, then rerun self-check.",
            ),
        };
    }

    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingLink => explain(
                "No device link was provided to the controller.",
                "The backend failed to initialize before the controller was built.",
                "Rerun with --log-level=debug to see why the backend was not created.",
            ),
            BuildError::InvalidConfig(msg) => explain(
                &format!("Invalid configuration ({msg})."),
                "Missing or out-of-range values in the TOML.",
                "Edit the config file, then rerun.",
            ),
        };
    }

    if let Some(me) = err.downcast_ref::<MixerError>() {
        return match me {
            MixerError::PortNotFound => explain(
                "No serial port looked like the rig controller.",
                "Rig unplugged, missing USB driver, or discovery keywords that do not match.",
                "Run `mixer_cli ports`, then set serial.port or serial.keywords in the config. Use --sim to run without a rig.",
            ),
            MixerError::NotConnected => explain(
                "The device link is not connected.",
                "The port closed after an I/O error or was never opened.",
                "Check the USB cable and rerun.",
            ),
            MixerError::Timeout => explain(
                "The rig did not answer in time.",
                "Firmware busy or hung, or serial.timeout_ms too low.",
                "Power-cycle the controller board or raise serial.timeout_ms.",
            ),
            MixerError::Hardware(msg) | MixerError::HardwareFault(msg) => explain(
                &format!("Serial hardware error ({msg})."),
                "Port in use by another program, insufficient permissions, or a disconnected device.",
                "Close other serial monitors, check permissions on the port, and rerun.",
            ),
            other => explain(
                &format!("{other}."),
                "See logs.",
                "Re-run with --log-level=debug or set RUST_LOG for more detail.",
            ),
        };
    }

    format!(
        "Something went wrong: {}\nHow to fix: Re-run with --log-level=debug for details.",
        chain_text(err)
    )
}

/// Short machine-readable name for the error kind.
pub fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(se) = err.downcast_ref::<SessionError>() {
        return match se {
            SessionError::Config(_) => "Config",
            SessionError::Schedule(_) => "Schedule",
            SessionError::EmergencyStop { .. } => "EmergencyStop",
            SessionError::Interrupted => "Interrupted",
            SessionError::NoTelemetry { .. } => "NoTelemetry",
        };
    }
    if err.downcast_ref::<BuildError>().is_some() {
        return "Config";
    }
    match err.downcast_ref::<MixerError>() {
        Some(MixerError::PortNotFound) => "PortNotFound",
        Some(MixerError::NotConnected) => "NotConnected",
        Some(MixerError::Timeout) => "Timeout",
        Some(MixerError::Hardware(_) | MixerError::HardwareFault(_)) => "Hardware",
        Some(MixerError::Protocol(_)) => "Protocol",
        Some(MixerError::State(_)) => "State",
        Some(MixerError::Config(_)) => "Config",
        Some(MixerError::Interlock(_)) => "EmergencyStop",
        None => "Error",
    }
}

/// Stable exit codes: 2 stopped, 3 link, 4 config, 1 anything else.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match reason_name(err) {
        "EmergencyStop" | "Interrupted" => EXIT_STOPPED,
        "PortNotFound" | "NotConnected" | "Timeout" | "Hardware" | "NoTelemetry" => EXIT_LINK,
        "Config" | "Schedule" => EXIT_CONFIG,
        _ => EXIT_GENERIC,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    let mut obj = json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    });
    if let Some(SessionError::EmergencyStop { violations }) = err.downcast_ref::<SessionError>() {
        obj["details"] = json!({ "violations": violations });
    }
    obj.to_string()
}
