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

//! Device-class-aware display formatting for dashboard labels.
//!
//! Binary sensors get their on/off states translated per device class
//! ("Detected"/"Clear", "Open"/"Closed", ...), numeric sensors get a default
//! unit when the hub did not supply one.

use crate::types::{EntityState, STATE_UNAVAILABLE, STATE_UNKNOWN};

/// Human-readable display string for an entity state.
pub fn format_entity_state(entity: &EntityState) -> String {
    let state = entity.state.as_str();
    if state == STATE_UNAVAILABLE {
        return "Unavailable".to_string();
    }
    if state == STATE_UNKNOWN {
        return "Unknown".to_string();
    }

    let unit = entity.unit_of_measurement().unwrap_or("");
    match entity.domain() {
        "binary_sensor" => format_binary_sensor(state, entity.device_class()).to_string(),
        "sensor" => {
            if let Some(formatted) = format_sensor(state, unit, entity.device_class()) {
                formatted
            } else {
                generic(state, unit)
            }
        }
        "media_player" => capitalize(state),
        "switch" | "light" => if state == "on" { "On" } else { "Off" }.to_string(),
        _ => generic(state, unit),
    }
}

fn format_binary_sensor(state: &str, device_class: Option<&str>) -> &'static str {
    let on = state == "on";
    match device_class {
        Some("motion" | "occupancy" | "gas" | "smoke" | "moisture") => {
            if on { "Detected" } else { "Clear" }
        }
        Some("door" | "window") => {
            if on { "Open" } else { "Closed" }
        }
        Some("plug") => {
            if on { "Plugged In" } else { "Unplugged" }
        }
        _ => {
            if on { "On" } else { "Off" }
        }
    }
}

fn format_sensor(state: &str, unit: &str, device_class: Option<&str>) -> Option<String> {
    let with_default = |fallback: &str| {
        let unit = if unit.is_empty() { fallback } else { unit };
        format!("{state}{unit}")
    };
    match device_class? {
        "temperature" => Some(with_default("°")),
        "humidity" => Some(with_default("%")),
        "power" => Some(with_default("W")),
        "energy" => Some(with_default("kWh")),
        "pressure" => Some(with_default("hPa")),
        "illuminance" => Some(with_default("lx")),
        "voltage" => Some(with_default("V")),
        "current" => Some(with_default("A")),
        "pm25" | "pm10" => Some(with_default("µg/m³")),
        "carbon_dioxide" => Some(with_default("ppm")),
        "volatile_organic_compounds" => Some(with_default("")),
        "aqi" => {
            let unit = if unit.is_empty() { "AQI" } else { unit };
            Some(format!("{state} {unit}"))
        }
        _ => None,
    }
}

fn generic(state: &str, unit: &str) -> String {
    if unit.is_empty() {
        state.to_string()
    } else {
        format!("{state} {unit}")
    }
}

fn capitalize(state: &str) -> String {
    let mut chars = state.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(id: &str, state: &str, device_class: Option<&str>, unit: Option<&str>) -> EntityState {
        let mut attributes = serde_json::Map::new();
        if let Some(class) = device_class {
            attributes.insert("device_class".into(), json!(class));
        }
        if let Some(unit) = unit {
            attributes.insert("unit_of_measurement".into(), json!(unit));
        }
        EntityState {
            entity_id: id.to_string(),
            state: state.to_string(),
            attributes,
            last_changed: None,
            last_updated: None,
        }
    }

    #[test]
    fn sentinels_before_anything_else() {
        let e = entity("sensor.x", "unavailable", Some("temperature"), Some("°C"));
        assert_eq!(format_entity_state(&e), "Unavailable");
        let e = entity("binary_sensor.x", "unknown", Some("motion"), None);
        assert_eq!(format_entity_state(&e), "Unknown");
    }

    #[test]
    fn binary_sensor_states_follow_device_class() {
        let cases = [
            ("motion", "on", "Detected"),
            ("occupancy", "off", "Clear"),
            ("door", "on", "Open"),
            ("window", "off", "Closed"),
            ("plug", "on", "Plugged In"),
            ("plug", "off", "Unplugged"),
            ("smoke", "on", "Detected"),
            ("moisture", "off", "Clear"),
        ];
        for (class, state, expected) in cases {
            let e = entity("binary_sensor.x", state, Some(class), None);
            assert_eq!(format_entity_state(&e), expected, "class {class}");
        }
        let e = entity("binary_sensor.x", "on", None, None);
        assert_eq!(format_entity_state(&e), "On");
    }

    #[test]
    fn sensor_units_fall_back_per_device_class() {
        let e = entity("sensor.t", "21.5", Some("temperature"), None);
        assert_eq!(format_entity_state(&e), "21.5°");
        let e = entity("sensor.t", "21.5", Some("temperature"), Some("°C"));
        assert_eq!(format_entity_state(&e), "21.5°C");
        let e = entity("sensor.h", "40", Some("humidity"), None);
        assert_eq!(format_entity_state(&e), "40%");
        let e = entity("sensor.a", "17", Some("aqi"), None);
        assert_eq!(format_entity_state(&e), "17 AQI");
    }

    #[test]
    fn unmatched_sensor_class_uses_the_generic_form() {
        let e = entity("sensor.x", "5", Some("frequency"), Some("Hz"));
        assert_eq!(format_entity_state(&e), "5 Hz");
        let e = entity("sensor.x", "5", None, None);
        assert_eq!(format_entity_state(&e), "5");
    }

    #[test]
    fn media_player_switch_and_light() {
        let e = entity("media_player.tv", "playing", None, None);
        assert_eq!(format_entity_state(&e), "Playing");
        let e = entity("switch.fan", "on", None, None);
        assert_eq!(format_entity_state(&e), "On");
        let e = entity("light.desk", "off", None, None);
        assert_eq!(format_entity_state(&e), "Off");
    }
}
