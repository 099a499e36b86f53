pub mod git;
pub mod instance;
pub mod lock;
pub mod modules;
pub mod pipeline;
pub mod service;
