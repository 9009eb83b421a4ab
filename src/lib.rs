pub mod artifacts;
pub mod auth;
pub mod balance;
pub mod browser;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod duration;
pub mod error;
pub mod notify;
pub mod observer;
pub mod run;
pub mod secrets;
