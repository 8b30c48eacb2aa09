//! The appointment entity and its request/response shapes.
//!
//! An appointment always references a customer. The pet side is looser: a
//! booking either references an existing Pet row or carries a free-text
//! pet name/species pair until a real record exists.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Appointment lifecycle states. SCHEDULED is the sole initial state unless
/// the creator explicitly supplies another; COMPLETED and CANCELLED are
/// terminal. Transition legality lives in `engine::lifecycle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::Confirmed => "CONFIRMED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// No transitions are permitted out of a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(Self::Scheduled),
            "CONFIRMED" => Ok(Self::Confirmed),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown appointment status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: i64,
    pub appointment_date: String,
    pub reason: String,
    pub status: String,
    pub customer_id: i64,
    pub pet_id: Option<i64>,
    pub pet_name: Option<String>,
    pub pet_species: Option<String>,
    pub veterinarian_id: Option<i64>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Appointment {
    /// Parsed status. Rows only ever hold values written through
    /// `AppointmentStatus::as_str`, so an unknown string is treated as the
    /// initial state.
    pub fn status_enum(&self) -> AppointmentStatus {
        self.status.parse().unwrap_or(AppointmentStatus::Scheduled)
    }
}

/// Pet reference on a booking. Variant order matters: when a payload carries
/// both a `petId` and inline descriptive fields, the id wins.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PetRef {
    #[serde(rename_all = "camelCase")]
    ById { pet_id: i64 },
    #[serde(rename_all = "camelCase")]
    Inline {
        pet_name: String,
        #[serde(alias = "petType")]
        pet_species: String,
    },
}

/// When the visit happens: either a combined timestamp or separate
/// date + time fields joined into one.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Schedule {
    #[serde(rename_all = "camelCase")]
    At { appointment_date: String },
    DateTime { date: String, time: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppointmentRequest {
    /// Customer id, or a user id that reconciles to a customer by email.
    /// When absent the customer derives from the selected pet's owner.
    pub customer_id: Option<i64>,
    #[serde(flatten)]
    pub pet: PetRef,
    #[serde(flatten)]
    pub schedule: Schedule,
    pub veterinarian_id: Option<i64>,
    pub reason: Option<String>,
    pub status: Option<AppointmentStatus>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAppointmentRequest {
    pub appointment_date: Option<String>,
    pub reason: Option<String>,
    pub status: Option<AppointmentStatus>,
    pub veterinarian_id: Option<i64>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentFilter {
    pub customer_id: Option<i64>,
    pub veterinarian_id: Option<i64>,
    pub status: Option<AppointmentStatus>,
    /// Same-calendar-day match, applied as a post-filter.
    pub date: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

/// Appointment with its relations loaded, as the API returns it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentResponse {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub customer: Option<super::Customer>,
    pub pet: Option<super::Pet>,
    pub veterinarian: Option<super::UserResponse>,
}
