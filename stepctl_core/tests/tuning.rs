use stepctl_core::mocks::{ActuatorCall, MemoryParamStore, RecordingActuator, ScriptedEncoder};
use stepctl_core::DynControlCore;
use stepctl_traits::{ParamStore, TuningRecord};

fn core(driver: &RecordingActuator) -> DynControlCore {
    DynControlCore::builder()
        .with_encoder(ScriptedEncoder::new())
        .with_actuator(driver.clone())
        .build()
        .unwrap()
}

#[test]
fn save_then_load_restores_gains_and_currents() {
    let driver = RecordingActuator::new();
    let mut c = core(&driver);
    let mut store = MemoryParamStore::default();

    c.set_proportional(12.5);
    c.set_integral(0.05);
    c.set_differential(2.0);
    c.set_current(20).unwrap();
    c.set_hold_current(8).unwrap();
    c.save_tuning(&mut store).unwrap();
    assert_eq!(store.saves, 1);

    let mut fresh = core(&driver);
    assert_eq!(fresh.tuning(), TuningRecord::default());
    assert!(fresh.load_tuning(&mut store).unwrap());

    let t = fresh.tuning();
    assert_eq!((t.kp, t.ki, t.kd), (12.5, 0.05, 2.0));
    assert_eq!((t.current, t.hold_current), (20, 8));
    assert_eq!(driver.last_call(), Some(ActuatorCall::Currents(20, 8)));
}

#[test]
fn empty_store_keeps_defaults() {
    let driver = RecordingActuator::new();
    let mut c = core(&driver);
    let mut store = MemoryParamStore::default();
    assert!(!c.load_tuning(&mut store).unwrap());
    assert_eq!(c.tuning(), TuningRecord::default());
}

#[test]
fn builder_applies_stored_record() {
    let driver = RecordingActuator::new();
    let mut store = MemoryParamStore {
        record: Some(TuningRecord {
            kp: 3.0,
            invert_direction: true,
            ..TuningRecord::default()
        }),
        saves: 0,
    };
    let record = store.load().unwrap().unwrap();
    let c = DynControlCore::builder()
        .with_encoder(ScriptedEncoder::new())
        .with_actuator(driver)
        .with_tuning(record)
        .build()
        .unwrap();
    assert_eq!(c.controller().gains().kp, 3.0);
    assert!(c.tuning().invert_direction);
}

#[test]
fn negative_gains_are_saturated_to_zero() {
    let driver = RecordingActuator::new();
    let mut c = core(&driver);
    c.set_proportional(-4.0);
    c.set_integral(f32::NEG_INFINITY);
    let g = c.controller().gains();
    assert_eq!((g.kp, g.ki), (0.0, 0.0));
}
