//! beamline - Device layer for two-mirror beam alignment
//!
//! Capability traits the alignment controller consumes, the [`Relay`] bundle
//! that owns one session's five devices, and a simulated fixture implementing
//! the same traits.
//!
//! - `device` - readback, actuator and centroid capabilities, device errors
//! - `events` - subscription capability and a reusable callback registry
//! - `calibration` - imager pixel calibration
//! - `relay` - device bundle, settle polling, ordered mirror commits
//! - `sim` - simulated source, mirrors and imagers

pub mod calibration;
pub mod device;
pub mod events;
pub mod relay;
pub mod sim;

pub use calibration::ImagerCalibration;
pub use device::{
    reading_value, Actuator, CentroidReadout, DeviceError, DeviceResult, Imager, PixelCentroid,
    Reading, Readings, Readback,
};
pub use events::{CallbackRegistry, DeviceCallback, DeviceEvent, Subscribable, SubscriptionId};
pub use relay::{
    wait_settled, ImagerReadback, Leg, MirrorReadback, Relay, RelaySnapshot, SettlePolicy,
};
pub use sim::{SimConfigError, SimDevice, SimHandle, SimRelay, SimRelayConfig};
