//! 크레이트 공용 에러 타입 — 에러 종류를 구분하여 IPC 핸들러에서
//! 적절한 HTTP 상태 코드를 반환할 수 있게 합니다.

use axum::http::StatusCode;

/// 셋업/런처 작업 중 발생할 수 있는 에러 유형
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    /// 광학 미디어·권한 상승 경로를 지원하지 않는 호스트에서 호출됨
    #[error("Only macOS hosts are supported for this operation")]
    Unsupported,

    #[error("{0} not found")]
    NotFound(String),

    /// 사용자가 관리자 암호 입력이나 디스크 삽입을 거부함 — 실패와 구분됨
    #[error("Cancelled by user: {0}")]
    UserDeclined(String),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    /// HTTP 상태 코드 매핑
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unsupported => StatusCode::NOT_IMPLEMENTED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::UserDeclined(_) => StatusCode::CONFLICT,
            Self::CommandFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON 에러 응답 생성
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "error_code": self.error_code(),
        })
    }

    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unsupported => "ENVIRONMENT_UNSUPPORTED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::UserDeclined(_) => "USER_DECLINED",
            Self::CommandFailed(_) => "COMMAND_FAILED",
            Self::Io(_) => "IO_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// axum 핸들러에서 CoreError를 직접 반환할 수 있도록 IntoResponse 구현
impl axum::response::IntoResponse for CoreError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = axum::Json(self.to_json());
        (status, body).into_response()
    }
}
