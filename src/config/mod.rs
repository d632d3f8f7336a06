//! Configuration inputs: resource manifests and gitolite parameters.
pub mod gitolite;
pub mod manifest;
pub mod validation;
