pub mod cli;
pub mod clock;
pub mod config;
pub mod engine;
pub mod frame_index;
pub mod media_buffer;
pub mod playlist;
pub mod runtime;
pub mod server;
pub mod session;
pub mod watchdog;

mod append_log;
