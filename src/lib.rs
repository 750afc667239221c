pub mod api;
pub mod cloud_client;
pub mod config;
pub mod controller;
pub mod document_store;
pub mod error;
pub mod models;
pub mod render;
pub mod storage;
