pub mod clear;
pub mod setup;
pub mod status;
