pub mod mpesa;
pub mod payments;
pub mod reconciliation;
