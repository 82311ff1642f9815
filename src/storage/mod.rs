pub mod segment;
pub mod layout;
pub mod segment_writer;
pub mod segment_reader;
pub mod version;
pub mod operation_log;
pub mod file_lock;
pub mod offline_builder;
