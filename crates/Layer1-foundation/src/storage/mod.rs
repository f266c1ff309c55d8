//! Storage module for taskwarden
//!
//! - `json`: JSON - 범용 파일 저장/로드 (설정, 태스크 문서)

mod json;

// JSON Storage (범용)
pub use json::JsonStore;
