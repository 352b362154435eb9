#[macro_use]
extern crate tracing;

pub mod address;
pub mod addons;
pub mod cmd;
pub mod config;
pub mod constants;
pub mod drift;
pub mod engine;
pub mod errors;
pub mod fixture;
pub mod fs;
pub mod git;
pub mod hooks;
pub mod ibmcloud;
pub mod logger;
pub mod permanent;
pub mod plan;
pub mod region;
pub mod scenario;
pub mod schematics;
mod string;
pub mod suite;
pub mod verifier;
pub mod versions;

pub use string::unique_id;
