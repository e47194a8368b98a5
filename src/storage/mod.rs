pub mod code_store;
pub mod overflow_log;
