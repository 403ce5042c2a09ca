pub mod coerce;
pub mod reconcile;
