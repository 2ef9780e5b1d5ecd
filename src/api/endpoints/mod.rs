//! API endpoint handlers.
//!
//! Each module corresponds to one resource. Handlers open a connection,
//! call the domain operation and shape the JSON response.

pub mod appointments;
pub mod auth;
pub mod doctors;
pub mod health;
pub mod medical_records;
pub mod patients;
pub mod users;
