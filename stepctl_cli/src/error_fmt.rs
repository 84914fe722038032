//! Human-readable error descriptions and structured JSON error formatting.

use stepctl_core::{BuildError, ControlError};
use stepctl_hardware::HwError;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingEncoder => {
                "What happened: No encoder was provided to the control core.\nLikely causes: The encoder failed to initialize or was not passed to the builder.\nHow to fix: Ensure the encoder is created successfully and passed via with_encoder(...).".to_string()
            }
            BuildError::MissingDriver => {
                "What happened: No driver was provided to the control core.\nLikely causes: The TMC5130 failed to initialize or was not passed to the builder.\nHow to fix: Ensure the driver is created successfully and passed via with_actuator(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(ce) = err.downcast_ref::<ControlError>() {
        return match ce {
            ControlError::SensorNotDetected => "What happened: The encoder was not detected.\nLikely causes: Encoder unpowered, wrong chip select, or magnet missing / out of range.\nHow to fix: Check wiring and [encoder].spi_bus / spi_slave, and the magnet gap.".to_string(),
            ControlError::Timeout => "What happened: A device did not answer in time.\nLikely causes: SPI wiring, wrong bus/slave, or the device is held in reset.\nHow to fix: Verify SPI wiring and power, then rerun self-check.".to_string(),
            ControlError::HardwareFault(msg) | ControlError::Hardware(msg) => format!(
                "What happened: Hardware fault ({msg}).\nLikely causes: Driver error flag, bus fault, or a damaged encoder reading.\nHow to fix: Run `stepctl self-check` and inspect the driver status."
            ),
            ControlError::Config(msg) => format!(
                "What happened: Configuration error ({msg}).\nLikely causes: A missing or inconsistent setting.\nHow to fix: Edit the config file or command line, then rerun."
            ),
            ControlError::State(msg) => format!(
                "What happened: Command refused ({msg}).\nLikely causes: The command does not apply to the current operating mode.\nHow to fix: Switch mode (e.g. --mode closed-loop) or drop the motion flag."
            ),
        };
    }

    if let Some(hw) = err.downcast_ref::<HwError>() {
        return format!(
            "What happened: Hardware initialization failed ({hw}).\nLikely causes: SPI disabled, wrong bus number, or missing permissions.\nHow to fix: Enable SPI, check [driver]/[encoder] spi settings, and run with access to /dev/spidev*."
        );
    }

    let msg = err.to_string();
    if let Some(te) = err.downcast_ref::<toml::de::Error>() {
        return format!(
            "What happened: The config file is not valid TOML ({msg}).\nDetails: {}\nHow to fix: Edit the TOML config and try again.",
            te.message()
        );
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingEncoder => "MissingEncoder",
            BuildError::MissingDriver => "MissingDriver",
            BuildError::InvalidConfig(_) => "InvalidConfig",
        };
    }
    match err.downcast_ref::<ControlError>() {
        Some(ControlError::SensorNotDetected) => "SensorNotDetected",
        Some(ControlError::Timeout) => "Timeout",
        Some(ControlError::Hardware(_) | ControlError::HardwareFault(_)) => "HardwareFault",
        Some(ControlError::Config(_)) => "Config",
        Some(ControlError::State(_)) => "State",
        None if err.downcast_ref::<HwError>().is_some() => "HardwareFault",
        None if err.downcast_ref::<toml::de::Error>().is_some() => "Config",
        None => "Error",
    }
}

/// Stable exit codes per error class; everything else returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match reason_name(err) {
        "Config" | "InvalidConfig" => 3,
        "SensorNotDetected" => 4,
        "Timeout" => 5,
        "HardwareFault" | "MissingEncoder" | "MissingDriver" => 6,
        "State" => 7,
        _ => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({
        "reason": reason_name(err),
        "error": err.to_string(),
        "message": humanize(err),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::WrapErr;

    #[test]
    fn typed_errors_survive_context() {
        let err: eyre::Result<()> =
            Err(eyre::Report::new(ControlError::Timeout)).wrap_err("capture home angle");
        let err = err.unwrap_err();
        assert_eq!(exit_code_for_error(&err), 5);
        assert!(humanize(&err).contains("did not answer"));
    }

    #[test]
    fn build_errors_map_to_codes() {
        let err = eyre::Report::new(BuildError::InvalidConfig("tick rate must be > 0"));
        assert_eq!(exit_code_for_error(&err), 3);
        assert!(humanize(&err).contains("tick rate"));
    }

    #[test]
    fn json_error_has_reason_and_message() {
        let err = eyre::Report::new(ControlError::State("drop-in".into()));
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "State");
        assert!(v["message"].as_str().unwrap().contains("Command refused"));
    }

    #[test]
    fn toml_errors_are_config_errors() {
        let bad = stepctl_config::load_toml("[motor\n").unwrap_err();
        let err: eyre::Result<()> = Err(bad).wrap_err("parse config cfg.toml");
        let err = err.unwrap_err();
        assert_eq!(exit_code_for_error(&err), 3);
        assert!(humanize(&err).contains("not valid TOML"));
    }

    #[test]
    fn unknown_errors_fall_back() {
        let err = eyre::eyre!("boom");
        assert_eq!(exit_code_for_error(&err), 1);
        assert!(humanize(&err).contains("Something went wrong"));
    }
}
