pub mod account;
pub mod cascade;
pub mod dividend;
pub mod ledger;
pub mod lot;
pub mod query;
pub mod settings;
pub mod summary;
