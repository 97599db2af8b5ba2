//! Portor — structured access to the CAPTCHA-gated sole proprietorship registry.
//!
//! The crate solves the registry's image CAPTCHA with OCR consensus, drives
//! its search and listing endpoints, extracts detail pages into normalized
//! records, and memoizes results.

pub mod cache;
pub mod client;
pub mod config;
pub mod criteria;
pub mod extract;
pub mod ocr;
pub mod service;
pub mod session;
pub mod solver;
pub mod types;

pub use cache::ResultCache;
pub use client::{RegistryClient, PAGE_SIZE};
pub use config::{CacheConfig, Endpoints, OcrConfig, RegistryConfig};
pub use criteria::{LookupParams, SearchCriteria};
pub use extract::{normalize_key, DocumentExtractor, SECTION_RULES};
pub use ocr::{OcrEngine, RecognitionMode, TesseractEngine};
pub use service::Portor;
pub use session::{SessionAcquirer, SessionHandle};
pub use solver::{pick_consensus, CaptchaSolver, CAPTCHA_LENGTH};
pub use types::*;
