pub mod access;
pub mod account_service;
pub mod cascade_service;
pub mod dividend_service;
pub mod integrity_service;
pub mod locks;
pub mod lot_service;
pub mod query_service;
