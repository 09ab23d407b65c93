pub mod formatting;
pub mod plans;
pub mod reconciliation;
