pub mod command;
pub mod terraform;
pub mod terraform_validators;
