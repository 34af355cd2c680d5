// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of HaMirror.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// State string the hub reports for an entity that exists but has no data.
pub const STATE_UNAVAILABLE: &str = "unavailable";
/// State string the hub reports for an entity whose value has never been seen.
pub const STATE_UNKNOWN: &str = "unknown";

/// One entity state record as delivered by Home Assistant.
///
/// The attribute bag is open-ended; only `friendly_name`, `unit_of_measurement`
/// and `device_class` are pulled out through typed accessors. Timestamps are
/// advisory and kept as the wire strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub last_changed: Option<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

impl EntityState {
    pub fn friendly_name(&self) -> Option<&str> {
        self.attributes.get("friendly_name").and_then(Value::as_str)
    }

    pub fn unit_of_measurement(&self) -> Option<&str> {
        self.attributes
            .get("unit_of_measurement")
            .and_then(Value::as_str)
    }

    pub fn device_class(&self) -> Option<&str> {
        self.attributes.get("device_class").and_then(Value::as_str)
    }

    /// Domain part of the entity id, e.g. `sensor` for `sensor.a6_co2`.
    pub fn domain(&self) -> &str {
        self.entity_id.split('.').next().unwrap_or("")
    }

    /// Whether the state is one of the non-data sentinels.
    pub fn is_unavailable(&self) -> bool {
        self.state == STATE_UNAVAILABLE || self.state == STATE_UNKNOWN
    }
}
