use serde::Deserialize;
use std::path::PathBuf;

/// 전역 설정 — `config/global.toml`에서 로드하며, 파일이 없으면 전부 기본값.
///
/// 테스트/가상 환경에서는 볼륨 루트나 스테이징 디렉터리 같은 고정 경로를
/// 필드로 오버라이드할 수 있습니다 (실제 제품 빌드는 기본값으로 동작).
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct GlobalConfig {
    /// IPC 리슨 주소 (기본: 127.0.0.1:57398)
    pub ipc_listen: Option<String>,
    pub acquire: AcquireConfig,
    pub install: InstallConfig,
    pub worker: WorkerConfig,
}

/// 디스크 탐지/아카이브 수집 설정
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AcquireConfig {
    /// 볼륨 마운트 루트 (macOS 기본: /Volumes)
    pub volumes_root: String,
    /// 광학 미디어 판별 실패 시 폴백으로 찾는 마커 파일
    pub marker_file: String,
    /// 분할 아카이브 베이스 이름 (`<base>.tar.<suffix>`)
    pub archive_base: String,
    /// 파트 스테이징 디렉터리 오버라이드 (기본: <tmp>/hako-install)
    pub staging_dir: Option<String>,
    /// 런처 번들 스테이징 디렉터리 오버라이드 (기본: <tmp>/hako-launcher-install)
    pub launcher_staging_dir: Option<String>,
    /// 디스크가 전혀 없을 때 사용하는 동봉 아카이브 경로 오버라이드
    pub bundled_artifact: Option<String>,
    /// 디스크 삽입 확인 후 마운트 안정화 대기 (초)
    pub mount_settle_secs: u64,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            volumes_root: "/Volumes".to_string(),
            marker_file: "hako_dvd.png".to_string(),
            archive_base: "HakoStack".to_string(),
            staging_dir: None,
            launcher_staging_dir: None,
            bundled_artifact: None,
            mount_settle_secs: 2,
        }
    }
}

impl AcquireConfig {
    /// 파트 파일 이름 접두사 (예: "HakoStack.tar.")
    pub fn part_prefix(&self) -> String {
        format!("{}.tar.", self.archive_base)
    }

    /// 재조립된 아카이브 파일 이름 (예: "HakoStack.tar")
    pub fn archive_name(&self) -> String {
        format!("{}.tar", self.archive_base)
    }

    /// 아카이브에서 꺼낼 설치 패키지 이름 (예: "HakoStack.pkg")
    pub fn artifact_name(&self) -> String {
        format!("{}.pkg", self.archive_base)
    }

    pub fn staging_dir(&self) -> PathBuf {
        match &self.staging_dir {
            Some(dir) => PathBuf::from(dir),
            None => std::env::temp_dir().join("hako-install"),
        }
    }

    pub fn launcher_staging_dir(&self) -> PathBuf {
        match &self.launcher_staging_dir {
            Some(dir) => PathBuf::from(dir),
            None => std::env::temp_dir().join("hako-launcher-install"),
        }
    }

    /// 동봉 아카이브 경로 — 디스크에서 파트를 하나도 못 모았을 때의 폴백.
    /// 기본값은 실행 파일 옆의 resources/ 디렉터리입니다.
    pub fn bundled_artifact_path(&self) -> PathBuf {
        if let Some(path) = &self.bundled_artifact {
            return PathBuf::from(path);
        }
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|d| d.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));
        exe_dir.join("resources").join(self.artifact_name())
    }
}

/// 패키지/런처 설치 설정
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct InstallConfig {
    /// 런처 번들을 복사해 넣을 애플리케이션 디렉터리
    pub applications_dir: String,
    /// 설치 완료 후 실행할 런처 앱 이름
    pub companion_app: String,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            applications_dir: "/Applications".to_string(),
            companion_app: "Hako 98.app".to_string(),
        }
    }
}

/// 워커 스택 수퍼바이저 설정
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct WorkerConfig {
    /// hako-stack 실행 파일 경로 (없으면 표준 설치 위치에서 탐색)
    pub stack_command: Option<String>,
    /// 헬스 체크 URL — 2xx/3xx 응답이면 살아있는 것으로 판단
    pub health_url: String,
    /// 헬스 체크 주기 (초)
    pub poll_interval_secs: u64,
    /// 헬스 체크 요청 타임아웃 (초)
    pub probe_timeout_secs: u64,
    /// graceful stop 제한 시간 — 초과하면 강제 종료 (초)
    pub stop_timeout_secs: u64,
    /// restart 시 stop과 start 사이 대기 (초)
    pub restart_delay_secs: u64,
    /// 로그 링 버퍼 크기
    pub log_buffer_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            stack_command: None,
            health_url: "http://127.0.0.1:8098/_health".to_string(),
            poll_interval_secs: 5,
            probe_timeout_secs: 3,
            stop_timeout_secs: 10,
            restart_delay_secs: 1,
            log_buffer_size: 2000,
        }
    }
}

/// hako-stack 바이너리 표준 설치 후보 (Intel/Apple Silicon Homebrew 포함)
const STACK_COMMAND_CANDIDATES: &[&str] = &[
    "/usr/local/bin/hako-stack",
    "/opt/homebrew/bin/hako-stack",
];

const STACK_COMMAND_GLOBS: &[&str] = &[
    "/usr/local/Cellar/hako-stack/*/bin/hako-stack",
    "/opt/homebrew/Cellar/hako-stack/*/bin/hako-stack",
];

impl WorkerConfig {
    /// 워커 실행 파일 경로 결정.
    ///
    /// 설정값 → 표준 경로 → Homebrew Cellar 글롭 순서로 찾고,
    /// 아무것도 없으면 PATH 검색에 맡기고 이름만 반환합니다.
    pub fn resolve_stack_command(&self) -> String {
        if let Some(cmd) = &self.stack_command {
            return cmd.clone();
        }
        for candidate in STACK_COMMAND_CANDIDATES {
            if std::path::Path::new(candidate).exists() {
                return candidate.to_string();
            }
        }
        for pattern in STACK_COMMAND_GLOBS {
            if let Ok(paths) = glob::glob(pattern) {
                if let Some(Ok(path)) = paths.into_iter().next() {
                    return path.to_string_lossy().to_string();
                }
            }
        }
        "hako-stack".to_string()
    }
}

impl GlobalConfig {
    pub fn load() -> anyhow::Result<Self> {
        let s = std::fs::read_to_string("config/global.toml").unwrap_or_default();
        let mut cfg: Self = toml::from_str(&s).unwrap_or_default();
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// 환경 변수 오버라이드 — GUI가 데몬을 스폰할 때 경로를 주입하는 용도
    fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("HAKO_VOLUMES_ROOT") {
            self.acquire.volumes_root = root;
        }
        if let Ok(cmd) = std::env::var("HAKO_STACK_COMMAND") {
            self.worker.stack_command = Some(cmd);
        }
        if let Ok(addr) = std::env::var("HAKO_IPC_ADDR") {
            self.ipc_listen = Some(addr);
        }
    }

    pub fn listen_addr(&self) -> String {
        self.ipc_listen
            .clone()
            .unwrap_or_else(|| "127.0.0.1:57398".to_string())
    }
}
