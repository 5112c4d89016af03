pub mod accounting;
pub mod accounts;
pub mod api;
pub mod config;
pub mod error;
pub mod ledger;
pub mod parser;
pub mod service;
