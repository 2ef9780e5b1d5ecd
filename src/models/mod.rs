pub mod appointment;
pub mod doctor;
pub mod enums;
pub mod filters;
pub mod medical_record;
pub mod patient;
pub mod user;

pub use appointment::*;
pub use doctor::*;
pub use enums::*;
pub use filters::*;
pub use medical_record::*;
pub use patient::*;
pub use user::*;
