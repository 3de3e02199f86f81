pub mod mpesa_payment;
pub mod sale;
pub mod transaction;
