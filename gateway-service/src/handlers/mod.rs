pub mod provision;
pub mod proxy;
pub mod usage;
pub mod webhook;
