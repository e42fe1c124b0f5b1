pub mod batch;
pub mod extractor;
pub mod health;
pub mod intake;
pub mod ocr;
pub mod queue;
pub mod store;
pub mod tesseract;
pub mod ttb_standards;
pub mod validation;
pub mod vault;
pub mod vision;
pub mod worker;
