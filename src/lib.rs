pub mod args;
pub mod config;
pub mod errors;
pub mod exec;
pub mod fetch;
pub mod hash;
pub mod ini;
pub mod lock;
pub mod package;
pub mod plumbing;
pub mod publish;
pub mod rebuild;
pub mod release;
pub mod repo;
pub mod republish;
pub mod resolve;
pub mod site;
pub mod verify;
pub mod version;
