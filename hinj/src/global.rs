//! Process-wide free functions
//!
//! For callers that want a flat API like the C bindings: no client or
//! barrier to carry around, paths taken from `$HOME`. The endpoint paths are
//! cached once resolved. The barrier is created on first use and, like the
//! socket it owns, lives for the rest of the process; if `$HOME` was missing at
//! that point, every later barrier call reports `NoPath`.
//!
//! The barrier calls assume one thread drives the simulation loop. Concurrent
//! callers are safe but race for the same accepted connections.

use std::sync::{Mutex, OnceLock, PoisonError};

use crate::error::{Ack, Result};
use crate::ipc::{Endpoints, ExchangeClient, GpsFix, SyncBarrier};

static ENDPOINTS: Mutex<Option<Endpoints>> = Mutex::new(None);
static BARRIER: OnceLock<Result<SyncBarrier>> = OnceLock::new();

fn endpoints() -> Result<Endpoints> {
    let mut cached = ENDPOINTS.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(endpoints) = cached.as_ref() {
        return Ok(endpoints.clone());
    }
    let endpoints = Endpoints::from_env()?;
    *cached = Some(endpoints.clone());
    Ok(endpoints)
}

fn client() -> Result<ExchangeClient> {
    endpoints().map(|endpoints| ExchangeClient::from_endpoints(&endpoints))
}

fn barrier() -> Result<&'static SyncBarrier> {
    BARRIER
        .get_or_init(|| endpoints().map(|endpoints| SyncBarrier::from_endpoints(&endpoints)))
        .as_ref()
        .map_err(|e| *e)
}

pub fn start_sync() -> Result<()> {
    barrier()?.start_sync()
}

pub fn end_sync() -> Result<u64> {
    barrier()?.end_sync()
}

/// Iterations completed by the process-wide barrier, 0 if it was never used
pub fn iteration() -> u64 {
    BARRIER
        .get()
        .and_then(|barrier| barrier.as_ref().ok())
        .map_or(0, SyncBarrier::iteration)
}

pub fn update_gyro(x: &mut f32, y: &mut f32, z: &mut f32, instance: u8) -> Result<Ack> {
    client()?.update_gyro(x, y, z, instance)
}

pub fn update_accel(x: &mut f32, y: &mut f32, z: &mut f32, instance: u8) -> Result<Ack> {
    client()?.update_accel(x, y, z, instance)
}

pub fn update_compass(mag_0: &mut f32, mag_1: &mut f32, mag_2: &mut f32, instance: u8) -> Result<Ack> {
    client()?.update_compass(mag_0, mag_1, mag_2, instance)
}

pub fn update_barometer(pressure: &mut f32, temperature: &mut f32, instance: u8) -> Result<Ack> {
    client()?.update_barometer(pressure, temperature, instance)
}

pub fn update_battery(voltage: &mut f32, current: &mut f32, throttle: &mut f32) -> Result<Ack> {
    client()?.update_battery(voltage, current, throttle)
}

pub fn update_gps(fix: &mut GpsFix, instance: u8) -> Result<Ack> {
    client()?.update_gps(fix, instance)
}

pub fn update_mode(mode: u32) -> Result<()> {
    client()?.update_mode(mode)
}
