//! PSG9080 device model: value types, limits, the settings cache and the
//! [`SignalGenerator`] driver.

pub mod generator;
pub mod limits;
pub mod setting;
pub mod state;
pub mod types;

pub use generator::{ChannelSettings, SignalGenerator};
pub use setting::{Parameter, Setting};
pub use state::{ChannelState, DeviceState};
pub use types::{Channel, Frequency, FrequencyUnit, Waveform};
