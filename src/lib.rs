pub mod capture;
pub mod config;
pub mod fields;
pub mod host;
pub mod logging;
pub mod postgres;
pub mod recorder;
pub mod run;
pub mod sqlite;
pub mod storage;
