//! 에러 타입
//!
//! 라이브러리 전체에서 사용하는 에러 분류입니다.
//! CLI 계층은 anyhow로 감싸서 사용자 메시지를 붙입니다.

/// 지식 엔진 에러
#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    /// 입력 페이로드/디렉토리가 요구 형식과 다름
    #[error("input error: {0}")]
    Input(String),

    /// 임베딩 실패 (원격 호출, 타임아웃, 응답 형식)
    #[error("embedding error: {0}")]
    Embedding(String),

    /// 저장소 I/O 실패
    #[error("persistence error: {0}")]
    Persistence(String),

    /// 호출자가 작업을 취소함
    #[error("operation cancelled")]
    Cancelled,

    /// 잘못된 설정값
    #[error("configuration error: {0}")]
    Config(String),
}

impl KnowledgeError {
    /// 청크 단위로 건너뛸 수 있는 에러인지 여부
    pub fn is_skippable(&self) -> bool {
        matches!(self, KnowledgeError::Embedding(_))
    }
}

impl From<rusqlite::Error> for KnowledgeError {
    fn from(e: rusqlite::Error) -> Self {
        KnowledgeError::Persistence(e.to_string())
    }
}

impl From<std::io::Error> for KnowledgeError {
    fn from(e: std::io::Error) -> Self {
        KnowledgeError::Persistence(e.to_string())
    }
}

pub type Result<T, E = KnowledgeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_embedding_errors_are_skippable() {
        assert!(KnowledgeError::Embedding("timeout".into()).is_skippable());
        assert!(!KnowledgeError::Persistence("disk full".into()).is_skippable());
        assert!(!KnowledgeError::Cancelled.is_skippable());
        assert!(!KnowledgeError::Input("no tables".into()).is_skippable());
    }

    #[test]
    fn test_io_error_maps_to_persistence() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: KnowledgeError = io.into();
        assert!(matches!(err, KnowledgeError::Persistence(_)));
        assert!(err.to_string().contains("denied"));
    }
}
