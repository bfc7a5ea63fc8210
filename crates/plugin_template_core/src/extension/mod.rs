//! Extension identity, access roles and host-side mounting.
//!
//! Manifests are static declarations; the registry mounts live extensions
//! under the prefixes their manifests derive.

pub mod access;
pub mod manifest;
pub mod registry;
