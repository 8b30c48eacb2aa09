//! Pet records, owned by exactly one customer.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Pet {
    pub id: i64,
    pub name: String,
    pub species: String,
    pub breed: String,
    pub date_of_birth: String,
    pub gender: String,
    pub weight: Option<f64>,
    pub owner_id: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePetRequest {
    pub name: String,
    pub species: String,
    #[serde(default)]
    pub breed: String,
    pub date_of_birth: String,
    pub gender: String,
    pub weight: Option<f64>,
    /// Owner reference; ignored for CUSTOMER callers, who always create pets
    /// under their own customer record.
    pub owner_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePetRequest {
    pub name: Option<String>,
    pub species: Option<String>,
    pub breed: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub weight: Option<f64>,
}

/// Pet with its owner loaded, as the list/detail endpoints return it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PetResponse {
    #[serde(flatten)]
    pub pet: Pet,
    pub owner: Option<super::Customer>,
}
