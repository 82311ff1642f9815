pub mod building_segment;
pub mod data_view;
pub mod pk_resolver;
pub mod reconcile;
pub mod writer;
pub mod dumper;
pub mod reopen;
pub mod online_partition;
