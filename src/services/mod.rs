pub mod agreement;
pub mod archive;
pub mod checksum;
pub mod file_list_xlsx;
pub mod ingest_service;
pub mod key_lock;
pub mod metadata;
pub mod object_store;
pub mod queue;
pub mod record_store;
pub mod retry;
pub mod sigv4;
pub mod validator;
