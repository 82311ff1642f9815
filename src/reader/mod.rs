pub mod partition_reader;
pub mod reader_builder;
pub mod reader_container;
