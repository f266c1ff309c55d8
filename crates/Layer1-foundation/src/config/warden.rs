//! Warden Config - 통합 설정
//!
//! 글로벌 설정과 프로젝트 설정을 병합해서 사용한다 (프로젝트 우선).

use crate::storage::JsonStore;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// 설정 파일명
pub const WARDEN_CONFIG_FILE: &str = "config.json";

/// 기본 데이터 디렉토리 이름 (홈 디렉토리 아래)
pub const DEFAULT_DATA_DIR: &str = ".taskwarden";

const DEFAULT_GRACE_PERIOD_MS: u64 = 5000;
const DEFAULT_CONFLICT_SETTLE_MS: u64 = 1000;
const DEFAULT_RESTART_DELAY_MS: u64 = 1000;
const DEFAULT_LOG_OPEN_TIMEOUT_MS: u64 = 5000;

// ============================================================================
// Warden Config (통합)
// ============================================================================

/// taskwarden 통합 설정
///
/// 모든 필드는 Optional 이며, 값이 없으면 접근자가 기본값을 돌려준다.
/// 그래서 병합 시 "설정되지 않음"과 "기본값으로 설정됨"을 구분할 수 있다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WardenConfig {
    /// 데이터 디렉토리 (tasks.json, logs/)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// 변경 시마다 자동 저장
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_save: Option<bool>,

    /// SIGTERM 이후 SIGKILL 까지 대기 시간 (ms)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_period_ms: Option<u64>,

    /// 충돌 태스크 정지 후 대기 시간 (ms)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_settle_ms: Option<u64>,

    /// 재시작 시 stop 과 start 사이 대기 시간 (ms)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_delay_ms: Option<u64>,

    /// 로그 파일 열기 타임아웃 (ms)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_open_timeout_ms: Option<u64>,
}

impl WardenConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// 글로벌 + 프로젝트 병합 로드
    pub fn load() -> Result<Self> {
        let mut config = Self::new();

        // 1. 글로벌 설정
        if let Ok(global) = JsonStore::global() {
            if let Some(global_config) = global.load_optional::<WardenConfig>(WARDEN_CONFIG_FILE)? {
                debug!("Loaded global config from {}", global.base_dir().display());
                config.merge(global_config);
            }
        }

        // 2. 프로젝트 설정
        if let Ok(project) = JsonStore::current_project() {
            if let Some(project_config) =
                project.load_optional::<WardenConfig>(WARDEN_CONFIG_FILE)?
            {
                debug!("Loaded project config from {}", project.base_dir().display());
                config.merge(project_config);
            }
        }

        Ok(config)
    }

    /// 지정한 저장소에서만 로드
    pub fn load_from(store: &JsonStore) -> Result<Self> {
        Ok(store
            .load_optional::<WardenConfig>(WARDEN_CONFIG_FILE)?
            .unwrap_or_default())
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// 다른 설정과 병합 (other가 우선)
    pub fn merge(&mut self, other: WardenConfig) {
        if other.data_dir.is_some() {
            self.data_dir = other.data_dir;
        }
        if other.auto_save.is_some() {
            self.auto_save = other.auto_save;
        }
        if other.grace_period_ms.is_some() {
            self.grace_period_ms = other.grace_period_ms;
        }
        if other.conflict_settle_ms.is_some() {
            self.conflict_settle_ms = other.conflict_settle_ms;
        }
        if other.restart_delay_ms.is_some() {
            self.restart_delay_ms = other.restart_delay_ms;
        }
        if other.log_open_timeout_ms.is_some() {
            self.log_open_timeout_ms = other.log_open_timeout_ms;
        }
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn auto_save(mut self, enabled: bool) -> Self {
        self.auto_save = Some(enabled);
        self
    }

    pub fn grace_period_ms(mut self, ms: u64) -> Self {
        self.grace_period_ms = Some(ms);
        self
    }

    // ========================================================================
    // Resolved values
    // ========================================================================

    /// 데이터 디렉토리 (기본: ~/.taskwarden)
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(DEFAULT_DATA_DIR)
        })
    }

    pub fn resolved_auto_save(&self) -> bool {
        self.auto_save.unwrap_or(true)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms.unwrap_or(DEFAULT_GRACE_PERIOD_MS))
    }

    pub fn conflict_settle(&self) -> Duration {
        Duration::from_millis(self.conflict_settle_ms.unwrap_or(DEFAULT_CONFLICT_SETTLE_MS))
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms.unwrap_or(DEFAULT_RESTART_DELAY_MS))
    }

    pub fn log_open_timeout(&self) -> Duration {
        Duration::from_millis(
            self.log_open_timeout_ms
                .unwrap_or(DEFAULT_LOG_OPEN_TIMEOUT_MS),
        )
    }
}
