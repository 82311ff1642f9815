pub mod index_kind;
pub mod index_reader;
pub mod deletion_map;
pub mod registry;
pub mod reader_cache;
pub mod term_index_reader;
pub mod range_index_reader;
pub mod primary_key_reader;
pub mod attribute_reader;
pub mod join_reader;
pub mod accessory_reader;
pub mod summary_reader;
pub mod source_reader;
pub mod sorted_range;
