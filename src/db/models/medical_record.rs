//! Medical records: one pet, one authoring veterinarian.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MedicalRecord {
    pub id: i64,
    pub record_date: String,
    pub diagnosis: String,
    pub treatment: String,
    pub notes: String,
    /// Prescribed medicines, newline-separated free text.
    pub prescriptions: Option<String>,
    pub pet_id: i64,
    pub veterinarian_id: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMedicalRecordRequest {
    pub pet_id: i64,
    pub record_date: Option<String>,
    pub diagnosis: String,
    pub treatment: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub prescriptions: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMedicalRecordRequest {
    pub record_date: Option<String>,
    pub diagnosis: Option<String>,
    pub treatment: Option<String>,
    pub notes: Option<String>,
    pub prescriptions: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalRecordResponse {
    #[serde(flatten)]
    pub record: MedicalRecord,
    pub pet: Option<super::Pet>,
    pub veterinarian: Option<super::UserResponse>,
}
