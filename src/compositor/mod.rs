//! Compositor Module
//!
//! Damage tracking, composite resources and window captures.

pub mod capture;
pub mod damage;
pub mod resources;
