pub mod types;
pub mod ws;
