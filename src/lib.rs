pub mod clock;
pub mod coordinator;
pub mod ledger;
pub mod lifecycle;
pub mod limits;
pub mod model;
pub mod observability;
pub mod pricing;
pub mod sql;
pub mod store;
pub mod sweeper;
pub mod wire;
