pub mod config;
pub mod db;
pub mod locks;
pub mod logging;
pub mod repositories;
pub mod services;
pub mod zapi_client;
