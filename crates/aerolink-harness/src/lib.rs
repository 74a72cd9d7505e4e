//! Test harness for the aerolink lifecycle layer
//!
//! Provides [`MockAirspace`], a deterministic in-memory implementation of
//! both transport seams, so central and peripheral drivers can be exercised
//! end to end without hardware. The workspace's scenario tests live in this
//! crate's `tests/` directory.

mod mock_transport;

pub use mock_transport::{
    AirspaceStats, MockAirspace, MockCentral, MockCharacteristic, MockNodeSpec, MockPeripheral,
};
