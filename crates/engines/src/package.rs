//! Sigma 패키지 다운로드 -- HTTP 아카이브 수신과 zip 압축 해제
//!
//! 패키지마다 독립적으로 받습니다. 404는 "지원하지 않는 패키지"로 에러 맵에 기록하고
//! 나머지 패키지는 계속 받습니다.

use std::collections::BTreeMap;
use std::future::Future;
use std::io::{Cursor, Read};
use std::time::Duration;

use tracing::{debug, info, warn};

use rulekeeper_core::error::EngineError;
use rulekeeper_core::types::ErrorMap;

/// 404 응답을 받은 패키지의 에러 메시지
pub const UNSUPPORTED_PACKAGE: &str = "unsupported package";

/// HTTP 응답 요약
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// 패키지 아카이브 수신 trait
pub trait PackageFetcher: Send + Sync + 'static {
    /// URL의 본문을 받습니다. 연결 실패만 에러이며, HTTP 상태 코드는 응답에 담깁니다.
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchResponse, EngineError>> + Send;
}

// ─── HttpPackageFetcher ──────────────────────────────────────────────

/// reqwest 기반 수신기
#[derive(Debug, Clone)]
pub struct HttpPackageFetcher {
    client: reqwest::Client,
}

impl HttpPackageFetcher {
    /// 요청 타임아웃을 지정해 생성합니다.
    pub fn new(timeout: Duration) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Transport(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }
}

impl PackageFetcher for HttpPackageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, EngineError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EngineError::Transport(format!("request to {url} failed: {e}")))?;
        let status = resp.status().as_u16();
        let body = resp
            .bytes()
            .await
            .map_err(|e| EngineError::Transport(format!("failed to read body from {url}: {e}")))?;
        Ok(FetchResponse {
            status,
            body: body.to_vec(),
        })
    }
}

// ─── StaticPackageFetcher ────────────────────────────────────────────

/// 미리 정한 URL → 본문 맵으로 응답하는 수신기. 없는 URL은 404입니다.
#[derive(Debug, Clone, Default)]
pub struct StaticPackageFetcher {
    bodies: BTreeMap<String, FetchResponse>,
}

impl StaticPackageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// URL에 200 응답을 등록합니다.
    pub fn with_body(mut self, url: &str, body: Vec<u8>) -> Self {
        self.bodies
            .insert(url.to_owned(), FetchResponse { status: 200, body });
        self
    }

    /// URL에 임의 상태 코드를 등록합니다.
    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        self.bodies.insert(
            url.to_owned(),
            FetchResponse {
                status,
                body: Vec::new(),
            },
        );
        self
    }
}

impl PackageFetcher for StaticPackageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, EngineError> {
        Ok(self.bodies.get(url).cloned().unwrap_or(FetchResponse {
            status: 404,
            body: Vec::new(),
        }))
    }
}

// ─── Download / Extract ──────────────────────────────────────────────

/// 다운로드 URL 템플릿의 `%s`를 패키지 이름으로 바꿉니다.
pub fn package_url(template: &str, package: &str) -> String {
    template.replacen("%s", package, 1)
}

/// 패키지를 모두 받습니다. 성공한 패키지의 본문과 실패한 패키지의 에러 맵을 반환합니다.
pub async fn download_packages<F: PackageFetcher>(
    fetcher: &F,
    packages: &[String],
    template: &str,
) -> (BTreeMap<String, Vec<u8>>, ErrorMap) {
    let mut archives = BTreeMap::new();
    let mut errors = ErrorMap::new();

    for package in packages {
        let url = package_url(template, package);
        debug!(package = %package, url = %url, "downloading sigma package");

        match fetcher.fetch(&url).await {
            Ok(resp) if resp.status == 200 => {
                info!(package = %package, bytes = resp.body.len(), "downloaded sigma package");
                archives.insert(package.clone(), resp.body);
            }
            Ok(resp) if resp.status == 404 => {
                warn!(package = %package, url = %url, "sigma package not found");
                errors.insert(package.clone(), UNSUPPORTED_PACKAGE.to_owned());
            }
            Ok(resp) => {
                warn!(package = %package, status = resp.status, "unexpected status downloading sigma package");
                errors.insert(
                    package.clone(),
                    format!("non-200 status code during download: {}", resp.status),
                );
            }
            Err(e) => {
                warn!(package = %package, error = %e, "failed to download sigma package");
                errors.insert(package.clone(), e.to_string());
            }
        }
    }

    (archives, errors)
}

/// zip 아카이브에서 규칙 파일(`.yml`/`.yaml`)을 `(경로, 내용)`으로 꺼냅니다.
///
/// 읽을 수 없는 항목은 경로를 키로 에러 맵에 기록합니다.
pub fn extract_rule_files(archive: &[u8]) -> Result<(Vec<(String, String)>, ErrorMap), EngineError> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))
        .map_err(|e| EngineError::Transport(format!("invalid package archive: {e}")))?;

    let mut files = Vec::new();
    let mut errors = ErrorMap::new();

    for i in 0..zip.len() {
        let mut entry = match zip.by_index(i) {
            Ok(entry) => entry,
            Err(e) => {
                errors.insert(format!("entry {i}"), e.to_string());
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }

        let name = entry.name().to_owned();
        let lower = name.to_lowercase();
        if !(lower.ends_with(".yml") || lower.ends_with(".yaml")) {
            continue;
        }

        let mut content = String::new();
        match entry.read_to_string(&mut content) {
            Ok(_) => files.push((name, content)),
            Err(e) => {
                errors.insert(name, e.to_string());
            }
        }
    }

    Ok((files, errors))
}
