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

pub mod format;
pub mod rooms;
pub mod store;
pub mod types;

pub use format::format_entity_state;
pub use rooms::{RoomMapping, default_rooms, resolve_room};
pub use store::{EntityStore, NOT_AVAILABLE};
pub use types::{EntityState, STATE_UNAVAILABLE, STATE_UNKNOWN};
