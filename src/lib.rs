pub mod config;
pub mod error;

pub mod capture;
pub mod models;
pub mod services;
pub mod storage;
