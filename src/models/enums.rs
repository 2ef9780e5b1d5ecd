use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern.
/// The same string is used in the database and on the wire.
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(Role {
    Admin => "admin",
    Doctor => "doctor",
    Patient => "patient",
});

str_enum!(AppointmentStatus {
    Booked => "booked",
    Confirmed => "confirmed",
    InProgress => "in-progress",
    Completed => "completed",
    Cancelled => "cancelled",
    NoShow => "no-show",
});

str_enum!(AppointmentType {
    Consultation => "consultation",
    FollowUp => "follow-up",
    CheckUp => "check-up",
    Emergency => "emergency",
    Procedure => "procedure",
});

str_enum!(PaymentStatus {
    Pending => "pending",
    Paid => "paid",
    Refunded => "refunded",
});

str_enum!(Gender {
    Male => "Male",
    Female => "Female",
    Other => "Other",
});

str_enum!(BloodGroup {
    APositive => "A+",
    ANegative => "A-",
    BPositive => "B+",
    BNegative => "B-",
    AbPositive => "AB+",
    AbNegative => "AB-",
    OPositive => "O+",
    ONegative => "O-",
});

impl AppointmentStatus {
    /// Whether an appointment in this status occupies the doctor's time.
    pub fn blocks_schedule(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::NoShow)
    }
}

impl Default for AppointmentStatus {
    fn default() -> Self {
        Self::Booked
    }
}

impl Default for AppointmentType {
    fn default() -> Self {
        Self::Consultation
    }
}

impl Default for PaymentStatus {
    fn default() -> Self {
        Self::Pending
    }
}
