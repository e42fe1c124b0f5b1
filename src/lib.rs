//! TTB Label Verification Service
//!
//! Checks alcohol beverage label images against TTB labeling rules. Uploads
//! become jobs in an in-memory store; workers extract text with a classical
//! OCR engine or a vision model, pull out the mandatory fields, and run a
//! structural tier followed by an accuracy tier against caller-supplied
//! reference values.

pub mod app_state;
pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
