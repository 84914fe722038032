//! Test and helper doubles for the hardware seams.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use stepctl_traits::{
    AngleSample, AngleSource, BoxError, Direction, DriverStatus, MotionActuator, ParamStore,
    SampleStatus, TuningRecord,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Encoder replaying queued samples; repeats the last one when the queue
/// runs dry. Clones share the queue.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEncoder {
    inner: Arc<Mutex<ScriptState>>,
}

#[derive(Debug, Default)]
struct ScriptState {
    queue: VecDeque<Result<AngleSample, String>>,
    last: AngleSample,
    present: bool,
}

impl ScriptedEncoder {
    pub fn new() -> Self {
        let enc = Self::default();
        lock(&enc.inner).present = true;
        enc
    }

    /// Queue a valid raw angle.
    pub fn push(&self, raw: u16) {
        lock(&self.inner).queue.push_back(Ok(AngleSample::valid(raw)));
    }

    pub fn push_sample(&self, sample: AngleSample) {
        lock(&self.inner).queue.push_back(Ok(sample));
    }

    /// Queue a read failure.
    pub fn push_error(&self, msg: &str) {
        lock(&self.inner).queue.push_back(Err(msg.to_owned()));
    }

    /// Queue a linear ramp of `count` samples, `step` units apart, after `start`.
    pub fn push_ramp(&self, start: u16, step: i32, count: usize) {
        let mut s = lock(&self.inner);
        let mut raw = i64::from(start);
        for _ in 0..count {
            raw = (raw + i64::from(step)).rem_euclid(65_536);
            s.queue.push_back(Ok(AngleSample::valid(raw as u16)));
        }
    }

    pub fn set_present(&self, present: bool) {
        lock(&self.inner).present = present;
    }

    pub fn remaining(&self) -> usize {
        lock(&self.inner).queue.len()
    }
}

impl AngleSource for ScriptedEncoder {
    fn capture_sample(&mut self) -> Result<AngleSample, BoxError> {
        let mut s = lock(&self.inner);
        match s.queue.pop_front() {
            Some(Ok(sample)) => {
                s.last = sample;
                Ok(sample)
            }
            Some(Err(msg)) => Err(Box::new(std::io::Error::other(msg))),
            None => Ok(s.last),
        }
    }

    fn detect_presence(&mut self) -> bool {
        lock(&self.inner).present
    }
}

/// One call made on a `RecordingActuator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorCall {
    TargetPosition(i32),
    TargetVelocity(u32, Direction),
    VelocityLimit(u32),
    AccelerationLimits(u32, u32),
    ActualPosition(i32),
    Currents(u8, u8),
    WriteRegister(u8, u32),
}

#[derive(Debug, Default)]
struct ActuatorState {
    calls: Vec<ActuatorCall>,
    position: i32,
    velocity: i32,
    status: DriverStatus,
    fail: bool,
}

/// Driver double that records every write and serves settable readings.
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct RecordingActuator {
    inner: Arc<Mutex<ActuatorState>>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ActuatorCall> {
        lock(&self.inner).calls.clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.inner).calls.clear();
    }

    pub fn last_call(&self) -> Option<ActuatorCall> {
        lock(&self.inner).calls.last().copied()
    }

    /// Set the reported position counter.
    pub fn set_position(&self, position: i32) {
        lock(&self.inner).position = position;
    }

    /// Set the reported velocity.
    pub fn set_velocity(&self, velocity: i32) {
        lock(&self.inner).velocity = velocity;
    }

    pub fn set_status(&self, status: DriverStatus) {
        lock(&self.inner).status = status;
    }

    /// Make every call fail.
    pub fn set_failing(&self, fail: bool) {
        lock(&self.inner).fail = fail;
    }

    fn record(&self, call: ActuatorCall) -> Result<MutexGuard<'_, ActuatorState>, BoxError> {
        let mut s = lock(&self.inner);
        if s.fail {
            return Err(Box::new(std::io::Error::other("actuator offline")));
        }
        s.calls.push(call);
        Ok(s)
    }

    fn read(&self) -> Result<MutexGuard<'_, ActuatorState>, BoxError> {
        let s = lock(&self.inner);
        if s.fail {
            return Err(Box::new(std::io::Error::other("actuator offline")));
        }
        Ok(s)
    }
}

impl MotionActuator for RecordingActuator {
    fn set_target_position(&mut self, position: i32) -> Result<(), BoxError> {
        self.record(ActuatorCall::TargetPosition(position)).map(drop)
    }

    fn set_target_velocity(&mut self, velocity: u32, direction: Direction) -> Result<(), BoxError> {
        self.record(ActuatorCall::TargetVelocity(velocity, direction))
            .map(drop)
    }

    fn set_velocity_limit(&mut self, velocity: u32) -> Result<(), BoxError> {
        self.record(ActuatorCall::VelocityLimit(velocity)).map(drop)
    }

    fn set_acceleration_limits(&mut self, accel: u32, decel: u32) -> Result<(), BoxError> {
        self.record(ActuatorCall::AccelerationLimits(accel, decel))
            .map(drop)
    }

    fn set_actual_position(&mut self, position: i32) -> Result<(), BoxError> {
        let mut s = self.record(ActuatorCall::ActualPosition(position))?;
        s.position = position;
        Ok(())
    }

    fn position(&mut self) -> Result<i32, BoxError> {
        Ok(self.read()?.position)
    }

    fn velocity(&mut self) -> Result<i32, BoxError> {
        Ok(self.read()?.velocity)
    }

    fn status(&mut self) -> Result<DriverStatus, BoxError> {
        Ok(self.read()?.status)
    }

    fn set_currents(&mut self, run: u8, hold: u8) -> Result<(), BoxError> {
        self.record(ActuatorCall::Currents(run, hold)).map(drop)
    }

    fn write_raw_register(&mut self, address: u8, value: u32) -> Result<(), BoxError> {
        self.record(ActuatorCall::WriteRegister(address, value))
            .map(drop)
    }

    fn read_raw_register(&mut self, _address: u8) -> Result<u32, BoxError> {
        self.read().map(|_| 0)
    }
}

/// In-memory tuning store.
#[derive(Debug, Clone, Default)]
pub struct MemoryParamStore {
    pub record: Option<TuningRecord>,
    pub saves: u32,
}

impl ParamStore for MemoryParamStore {
    fn load(&mut self) -> Result<Option<TuningRecord>, BoxError> {
        Ok(self.record)
    }

    fn save(&mut self, record: &TuningRecord) -> Result<(), BoxError> {
        self.record = Some(*record);
        self.saves += 1;
        Ok(())
    }
}

/// Sample with the given status bits, for health-gate tests.
pub fn flagged_sample(raw: u16, bits: u8) -> AngleSample {
    AngleSample::new(raw, SampleStatus::from_bits(bits))
}
