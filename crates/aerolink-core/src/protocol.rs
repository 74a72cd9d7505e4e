//! Deployment-fixed identifiers for the telemetry link
//!
//! One telemetry service/characteristic pair per physical node role,
//! configured per deployment. The values below are the reference deployment:
//! two instrument-bay sensor nodes plus the dual-identity flight recorder.

use crate::types::{AdvertisedIdentity, CharacteristicId, ServiceId};

// ----------------------------------------------------------------------------
// Sensor Node Identities
// ----------------------------------------------------------------------------

/// Service advertised by the forward instrument bay node
pub const FORWARD_BAY_SERVICE: ServiceId =
    ServiceId::from_u128(0x0000FE40_cc7a_482a_984a_7f2ed5b3e58f);

/// Telemetry characteristic of the forward instrument bay node
pub const FORWARD_BAY_CHARACTERISTIC: CharacteristicId =
    CharacteristicId::from_u128(0x0000FE41_8e22_4541_9d4c_21edae82ed19);

/// Service advertised by the aft instrument bay node
pub const AFT_BAY_SERVICE: ServiceId =
    ServiceId::from_u128(0x0000FE42_cc7a_482a_984a_7f2ed5b3e58f);

/// Telemetry characteristic of the aft instrument bay node
pub const AFT_BAY_CHARACTERISTIC: CharacteristicId =
    CharacteristicId::from_u128(0x0000FE43_8e22_4541_9d4c_21edae82ed19);

// ----------------------------------------------------------------------------
// Flight Recorder Identities
// ----------------------------------------------------------------------------

/// First identity the flight recorder rotates through
pub const RECORDER_SERVICE_A: ServiceId =
    ServiceId::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b);

/// Second identity the flight recorder rotates through
pub const RECORDER_SERVICE_B: ServiceId =
    ServiceId::from_u128(0xabcdef01_1fb5_459e_8fcc_c5c9c331914b);

/// Ingest characteristic exposed under both recorder identities
pub const RECORDER_CHARACTERISTIC: CharacteristicId =
    CharacteristicId::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a8);

// ----------------------------------------------------------------------------
// Identity Sets
// ----------------------------------------------------------------------------

/// Identity of the forward instrument bay node
pub fn forward_bay() -> AdvertisedIdentity {
    AdvertisedIdentity::new(FORWARD_BAY_SERVICE, FORWARD_BAY_CHARACTERISTIC)
}

/// Identity of the aft instrument bay node
pub fn aft_bay() -> AdvertisedIdentity {
    AdvertisedIdentity::new(AFT_BAY_SERVICE, AFT_BAY_CHARACTERISTIC)
}

/// Both sensor-node identities, in the order the collector tracks them
pub fn sensor_identities() -> Vec<AdvertisedIdentity> {
    vec![forward_bay(), aft_bay()]
}

/// The flight recorder's rotation set, in rotation order
pub fn recorder_identities() -> Vec<AdvertisedIdentity> {
    vec![
        AdvertisedIdentity::new(RECORDER_SERVICE_A, RECORDER_CHARACTERISTIC),
        AdvertisedIdentity::new(RECORDER_SERVICE_B, RECORDER_CHARACTERISTIC),
    ]
}
