//! xss-lock: use an external locker as X screen saver, with systemd-logind
//! integration.

pub mod child;
pub mod config;
pub mod domain;
pub mod idle;
pub mod logind;
pub mod orchestrator;
pub mod x11;
