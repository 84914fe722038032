use stepctl_core::error::ControlError;
use stepctl_core::hw_error::map_hw_error;
use stepctl_core::mocks::{RecordingActuator, ScriptedEncoder};
use stepctl_core::DynControlCore;
use stepctl_hardware::HwError;
use rstest::rstest;

#[rstest]
#[case(HwError::Timeout, "Timeout")]
#[case(HwError::NotDetected("encoder frame"), "SensorNotDetected")]
#[case(HwError::Spi("crc".into()), "HardwareFault")]
fn typed_hardware_errors_are_downcast(#[case] hw: HwError, #[case] expected: &str) {
    let mapped = map_hw_error(&hw);
    let name = match mapped {
        ControlError::Timeout => "Timeout",
        ControlError::SensorNotDetected => "SensorNotDetected",
        ControlError::HardwareFault(_) => "HardwareFault",
        other => panic!("unexpected mapping: {other:?}"),
    };
    assert_eq!(name, expected);
}

#[test]
fn untyped_errors_fall_back_to_message_heuristics() {
    let e = std::io::Error::other("bus timeout after 3 retries");
    assert!(matches!(map_hw_error(&e), ControlError::Timeout));

    let e = std::io::Error::other("weird");
    match map_hw_error(&e) {
        ControlError::Hardware(msg) => assert_eq!(msg, "weird"),
        other => panic!("unexpected mapping: {other:?}"),
    }
}

#[test]
fn foreground_driver_failure_surfaces_as_control_error() {
    let driver = RecordingActuator::new();
    let mut core = DynControlCore::builder()
        .with_encoder(ScriptedEncoder::new())
        .with_actuator(driver.clone())
        .build()
        .unwrap();

    driver.set_failing(true);
    let err = core.move_steps(100).expect_err("driver is offline");
    match err.downcast_ref::<ControlError>() {
        Some(ControlError::Hardware(msg)) => assert!(msg.contains("offline")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn home_fails_when_encoder_read_fails() {
    let encoder = ScriptedEncoder::new();
    let mut core = DynControlCore::builder()
        .with_encoder(encoder.clone())
        .with_actuator(RecordingActuator::new())
        .build()
        .unwrap();

    encoder.push_error("encoder not detected");
    let err = core.set_home().expect_err("home must fail");
    assert!(matches!(
        err.downcast_ref::<ControlError>(),
        Some(ControlError::SensorNotDetected)
    ));
}
