pub mod anchor;
pub mod changes;
pub mod engine;
pub mod enumerator;
pub mod index;
pub mod items;
pub mod paging;
pub mod working_set;
