//! Registration service plumbing: request/response payloads and the HTTP
//! registrar used by workers.

pub mod client;
pub mod payload;

pub use client::{HttpRegistrar, Registrar, RegistrationError};
pub use payload::{DeviceType, RegisterDevice, RegisterResponse, RegistrationDefaults};
