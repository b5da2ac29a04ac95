pub mod admin;
pub mod affiliate;
pub mod app;
pub mod auth;
pub mod bonus;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod fair;
pub mod games;
pub mod gateway;
pub mod locks;
pub mod metrics;
pub mod outbox;
pub mod promo;
pub mod provider;
pub mod request_ledger;
pub mod settings;
pub mod wallet;
