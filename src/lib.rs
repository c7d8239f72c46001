pub mod chunking;
pub mod config;
pub mod database;
pub mod document;
pub mod handler;
pub mod index;
pub mod openai;
pub mod prompt;
pub mod rag;
pub mod synthesis;
pub mod web;
