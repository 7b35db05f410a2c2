//! OS 유틸리티 경계 — diskutil/osascript/ditto/open 호출을 전부 이 모듈의
//! 좁은 인터페이스 뒤로 모읍니다. 테스트는 목 구현으로 대체합니다.

use std::path::Path;
use std::process::Command;

use crate::error::CoreError;

/// 디스크 메타데이터 조회와 권한 상승 실행을 감싸는 인터페이스.
///
/// 셸 문자열을 조립하는 코드는 이 모듈과 `install`의 패키지 경로 인용
/// 한 곳뿐이어야 합니다.
pub trait PlatformCommands: Send + Sync {
    /// `diskutil info <path>` 텍스트 출력을 그대로 반환
    fn query_volume_metadata(&self, volume_path: &Path) -> Result<String, CoreError>;

    /// 관리자 권한으로 셸 명령 실행 (macOS 권한 상승 다이얼로그 경유).
    /// 다이얼로그 취소는 `UserDeclined`로 구분됩니다.
    fn run_privileged(&self, shell_command: &str) -> Result<(), CoreError>;

    /// 속성 보존 복사 (`ditto`) — .app 번들 복사에 사용
    fn copy_bundle(&self, source: &Path, dest: &Path) -> Result<(), CoreError>;

    /// 설치된 앱 실행 (`open`)
    fn open_application(&self, app_path: &Path) -> Result<(), CoreError>;
}

/// 실제 OS 명령 구현. macOS가 아닌 호스트에서는 전부 `Unsupported`.
pub struct SystemCommands;

fn ensure_macos() -> Result<(), CoreError> {
    if cfg!(target_os = "macos") {
        Ok(())
    } else {
        Err(CoreError::Unsupported)
    }
}

/// AppleScript 권한 상승 래퍼 문자열 조립.
/// 내부 셸 명령은 AppleScript 문자열 리터럴 규칙으로 이스케이프합니다.
pub(crate) fn applescript_elevated(shell_command: &str) -> String {
    let escaped = shell_command.replace('\\', "\\\\").replace('"', "\\\"");
    format!(
        "do shell script \"{}\" with administrator privileges",
        escaped
    )
}

/// osascript 실패 출력을 에러로 매핑.
/// 권한 다이얼로그 취소는 종료 코드 -128에 "User canceled" 메시지로 나타납니다.
pub(crate) fn map_osascript_failure(stderr: &str) -> CoreError {
    if stderr.contains("User canceled") {
        CoreError::UserDeclined("administrator prompt".to_string())
    } else {
        CoreError::CommandFailed(format!("osascript: {}", stderr.trim()))
    }
}

impl PlatformCommands for SystemCommands {
    fn query_volume_metadata(&self, volume_path: &Path) -> Result<String, CoreError> {
        ensure_macos()?;
        let output = Command::new("diskutil")
            .arg("info")
            .arg(volume_path)
            .output()?;
        if !output.status.success() {
            return Err(CoreError::CommandFailed(format!(
                "diskutil info {} failed: {}",
                volume_path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_privileged(&self, shell_command: &str) -> Result<(), CoreError> {
        ensure_macos()?;
        tracing::info!("[Platform] Requesting privileged execution");
        let output = Command::new("osascript")
            .arg("-e")
            .arg(applescript_elevated(shell_command))
            .output()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(map_osascript_failure(&String::from_utf8_lossy(
                &output.stderr,
            )))
        }
    }

    fn copy_bundle(&self, source: &Path, dest: &Path) -> Result<(), CoreError> {
        ensure_macos()?;
        let output = Command::new("ditto").arg(source).arg(dest).output()?;
        if !output.status.success() {
            return Err(CoreError::CommandFailed(format!(
                "ditto {} -> {}: {}",
                source.display(),
                dest.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    fn open_application(&self, app_path: &Path) -> Result<(), CoreError> {
        ensure_macos()?;
        let output = Command::new("open").arg(app_path).output()?;
        if !output.status.success() {
            return Err(CoreError::CommandFailed(format!(
                "open {}: {}",
                app_path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}
