//! Config - 통합 설정 관리
//!
//! - `warden.rs` - WardenConfig 통합 설정

mod warden;

pub use warden::{WardenConfig, DEFAULT_DATA_DIR, WARDEN_CONFIG_FILE};
