//! The authorization gate.
//!
//! One capability matrix of (role, action) pairs, consulted by every handler
//! before it touches the store. Role checks live here and nowhere else, so a
//! denied request produces no side effects. Denials use a single message that
//! reveals nothing about whether the target resource exists.
//!
//! Ownership scoping (a customer seeing only their own records) is not part
//! of the matrix; handlers apply it as query scoping after the gate passes.

use crate::db::Role;

use super::error::ApiError;

/// Everything a request can ask the system to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    // Appointments
    ListAppointments,
    CreateAppointment,
    /// Booking on behalf of an arbitrary customer (front desk).
    CreateAppointmentForAnyCustomer,
    UpdateAppointment,
    DeleteAppointment,
    ConfirmAppointment,
    CancelAppointment,
    CompleteAppointment,
    // Pets
    ReadPets,
    ManageOwnPets,
    // Customers
    ReadCustomers,
    ManageCustomers,
    // Medical records
    ReadMedicalRecords,
    CreateMedicalRecord,
    // Invoices
    ReadInvoices,
    CreateInvoice,
    PayInvoice,
    ManageInvoices,
    // Administration
    ManageUsers,
    ViewStatistics,
}

/// The capability matrix. Keep this the single source of truth for role
/// checks; handlers must not compare role strings themselves.
pub fn allows(role: Role, action: Action) -> bool {
    use Action::*;
    use Role::*;

    match action {
        ListAppointments => true,
        CreateAppointment => matches!(role, Customer | Receptionist),
        CreateAppointmentForAnyCustomer => role == Receptionist,
        UpdateAppointment => matches!(role, Receptionist | Veterinarian | Admin),
        DeleteAppointment => matches!(role, Receptionist | Admin),
        ConfirmAppointment => matches!(role, Receptionist | Veterinarian),
        CancelAppointment => matches!(role, Receptionist | Veterinarian),
        CompleteAppointment => role == Veterinarian,

        ReadPets => matches!(role, Customer | Receptionist | Veterinarian),
        ManageOwnPets => role == Customer,

        ReadCustomers => matches!(role, Customer | Receptionist | Admin),
        ManageCustomers => matches!(role, Receptionist | Admin),

        ReadMedicalRecords => matches!(role, Customer | Veterinarian),
        CreateMedicalRecord => role == Veterinarian,

        ReadInvoices => matches!(role, Customer | Receptionist | Admin),
        CreateInvoice => role == Receptionist,
        PayInvoice => matches!(role, Customer | Receptionist),
        ManageInvoices => matches!(role, Receptionist | Admin),

        ManageUsers => role == Admin,
        ViewStatistics => role == Admin,
    }
}

/// Gate an action, yielding a uniform 403 on denial.
pub fn require(role: Role, action: Action) -> Result<(), ApiError> {
    if allows(role, action) {
        Ok(())
    } else {
        Err(ApiError::forbidden(
            "You do not have permission to perform this action",
        ))
    }
}
