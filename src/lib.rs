pub mod app_state;
pub mod config;
pub mod cookies;
pub mod gate;
pub mod http;
pub mod logging;
pub mod readiness;
pub mod selection;
pub mod session;
pub mod source;
pub mod transcoder;
pub mod workspace;
