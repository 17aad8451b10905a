//! # 远程规则列表拉取
//!
//! 解析器只依赖 [`Fetch`] trait 拿到原始文本，不关心具体传输方式。
//! - [`HttpFetcher`]: 同步 HTTP 拉取，也支持 `file://` 和本地路径
//! - [`MemoryFetcher`]: 内存中的 url -> 文本表，用于测试和离线生成
//! - [`CachingFetcher`]: 同一次生成中每个 url 只拉取一次
//!
//! 拉取失败不重试，直接作为 [`RuleError::Fetch`] 返回。

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use log::debug;

use crate::error::{Result, RuleError};

/// 默认请求超时
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// 拉取规则列表时使用的 User-Agent（部分规则源按 UA 返回 Clash 格式）
const USER_AGENT: &str = "clash";

/// 拉取原始文本的能力
pub trait Fetch {
    fn fetch(&self, url: &str) -> Result<String>;
}

impl<T: Fetch + ?Sized> Fetch for &T {
    fn fetch(&self, url: &str) -> Result<String> {
        (**self).fetch(url)
    }
}

// ========================================
// HTTP 拉取
// ========================================

/// 基于 reqwest 阻塞客户端的拉取实现
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    /// 创建拉取器
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| RuleError::Fetch(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String> {
        // 本地文件：file:// 或不带 scheme 的路径
        if let Some(path) = url.strip_prefix("file://").or_else(|| {
            if url.contains("://") {
                None
            } else {
                Some(url)
            }
        }) {
            debug!("reading local rule list: {}", path);
            return fs::read_to_string(path)
                .map_err(|e| RuleError::Fetch(format!("failed to read {path}: {e}")));
        }

        debug!("fetching remote rule list: {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| RuleError::Fetch(format!("request failed for {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RuleError::Fetch(format!("HTTP {} for {}", status, url)));
        }

        let content = response
            .text()
            .map_err(|e| RuleError::Fetch(format!("failed to read response body of {url}: {e}")))?;
        debug!("fetched {} bytes from {}", content.len(), url);
        Ok(content)
    }
}

// ========================================
// 内存拉取
// ========================================

/// url -> 文本 的静态表
#[derive(Debug, Default, Clone)]
pub struct MemoryFetcher {
    documents: HashMap<String, String>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加一个文档
    pub fn with(mut self, url: impl Into<String>, content: impl Into<String>) -> Self {
        self.documents.insert(url.into(), content.into());
        self
    }
}

impl Fetch for MemoryFetcher {
    fn fetch(&self, url: &str) -> Result<String> {
        self.documents
            .get(url)
            .cloned()
            .ok_or_else(|| RuleError::Fetch(format!("HTTP 404 Not Found for {url}")))
    }
}

// ========================================
// 缓存
// ========================================

/// 为一次生成过程缓存拉取结果（生成流程是单线程的）
pub struct CachingFetcher<F> {
    inner: F,
    cache: RefCell<HashMap<String, String>>,
}

impl<F: Fetch> CachingFetcher<F> {
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            cache: RefCell::new(HashMap::new()),
        }
    }
}

impl<F: Fetch> Fetch for CachingFetcher<F> {
    fn fetch(&self, url: &str) -> Result<String> {
        if let Some(content) = self.cache.borrow().get(url) {
            debug!("cache hit: {}", url);
            return Ok(content.clone());
        }
        let content = self.inner.fetch(url)?;
        self.cache
            .borrow_mut()
            .insert(url.to_string(), content.clone());
        Ok(content)
    }
}
