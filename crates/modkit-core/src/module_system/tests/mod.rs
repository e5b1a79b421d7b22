pub mod common;

pub mod archive_tests;
pub mod backup_tests;
pub mod capabilities_tests;
pub mod discovery_tests;
pub mod module_tests;
pub mod release_tests;
pub mod repository_tests;
