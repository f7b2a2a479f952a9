pub mod blob_store;
pub mod document_service;
