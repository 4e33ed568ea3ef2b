//! Level 3: End-to-End Scenario Tests
//!
//! Full runs over a mods folder laid out the way players install mods.

mod mods_folder;
