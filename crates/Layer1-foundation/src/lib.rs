//! # warden-foundation
//!
//! Foundation layer for taskwarden:
//! - Error: 공통 에러 타입 (`Error`, `Result`)
//! - Config: 통합 설정 (WardenConfig, 글로벌 + 프로젝트 병합)
//! - Storage: JsonStore (설정 파일, 태스크 문서)

pub mod config;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{WardenConfig, DEFAULT_DATA_DIR, WARDEN_CONFIG_FILE};

// ============================================================================
// Storage (저장소)
// ============================================================================
pub use storage::JsonStore;
