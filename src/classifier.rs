// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # CDN 端点识别
//!
//! 把运维人员填写的任意 CDN 地址解析为结构化的 [`CdnProfile`]：
//!
//! ```text
//! https://c2nnnn.r10.cf1.rackcdn.com/path
//!   endpoint  c2nnnn.r10.cf1.rackcdn.com/path
//!   hostname  c2nnnn.r10.cf1.rackcdn.com
//!   bucket    c2nnnn
//!   host      r10.cf1.rackcdn.com
//!   domain    rackcdn.com
//!   provider  Rackspace
//! ```
//!
//! 识别永远不会失败：未知主机按“第一个标签是 bucket”的经验规则拆分，
//! 空地址得到禁用状态的 no-provider 档案。

use log::{debug, info, warn};
use regex::Regex;
use serde_derive::{Deserialize, Serialize};

use crate::param::UNIVERSAL_PROVIDER;
use crate::provider::{ProviderHelper, ProviderPattern};

/// 已解析的 CDN 端点身份。创建后不可变，更换主机时整体替换。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdnProfile {
    endpoint: String,
    hostname: String,
    bucket: String,
    host: String,
    domain: String,
    provider: String,
    helper: ProviderHelper,
}

impl Default for CdnProfile {
    fn default() -> Self {
        Self::no_provider()
    }
}

impl CdnProfile {
    /// 未配置 CDN 时的档案，代表改写被禁用
    pub fn no_provider() -> Self {
        Self {
            endpoint: String::new(),
            hostname: String::new(),
            bucket: String::new(),
            host: String::new(),
            domain: String::new(),
            provider: UNIVERSAL_PROVIDER.to_string(),
            helper: ProviderHelper::Generic,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.endpoint.is_empty()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn helper(&self) -> ProviderHelper {
        self.helper
    }
}

/// 规范化 CDN 地址：去掉空白、协议和结尾的 `/`，转为小写。
///
/// 只接受 `http`/`https`（或不带协议的裸主机），其余协议返回空串。
pub fn normalize_endpoint(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let rest = if let Some(r) = lowered.strip_prefix("https://") {
        r
    } else if let Some(r) = lowered.strip_prefix("http://") {
        r
    } else if lowered.contains("://") {
        warn!("不支持的CDN地址协议：{}", raw.trim());
        return String::new();
    } else {
        lowered.as_str()
    };

    // user@host 形式的认证信息不属于端点
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let rest = match rest[..authority_end].rfind('@') {
        Some(at) => &rest[at + 1..],
        None => rest,
    };
    rest.trim_end_matches('/').to_string()
}

/// 从规范化后的端点中取出主机名（去掉路径与端口）
fn hostname_of(endpoint: &str) -> &str {
    let authority = endpoint
        .split(|c: char| c == '/' || c == '?' || c == '#')
        .next()
        .unwrap_or("");
    match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => authority,
    }
}

/// 由服务商表构造一个大的交替正则，每个顶级域捕获组以表中的下标命名（`p0`、`p1`…）
fn build_pattern(table: &[ProviderPattern]) -> Option<Regex> {
    if table.is_empty() {
        return None;
    }
    let alternation = table
        .iter()
        .enumerate()
        .map(|(index, p)| format!("{}(?P<p{}>{})", p.prefix, index, regex::escape(p.top_domain)))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = format!(r"^(.*)\.({})$", alternation);
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!("服务商表无法编译为正则：{}", e);
            None
        }
    }
}

/// 识别 CDN 地址，返回结构化档案。
pub fn classify(raw_host: &str, table: &[ProviderPattern]) -> CdnProfile {
    let endpoint = normalize_endpoint(raw_host);
    let hostname = hostname_of(&endpoint).to_string();
    if endpoint.is_empty() || hostname.is_empty() {
        debug!("CDN地址为空，使用no-provider档案");
        return CdnProfile::no_provider();
    }

    let matched = build_pattern(table).and_then(|re| {
        let caps = re.captures(&hostname)?;
        let (index, domain) = table
            .iter()
            .enumerate()
            .find_map(|(index, _)| caps.name(&format!("p{}", index)).map(|m| (index, m)))?;
        Some((
            caps.get(1)?.as_str().to_string(),
            caps.get(2)?.as_str().to_string(),
            domain.as_str().to_string(),
            &table[index],
        ))
    });

    let profile = match matched {
        Some((bucket, host, domain, pattern)) => CdnProfile {
            endpoint,
            hostname,
            bucket,
            host,
            domain,
            provider: pattern.display_name(),
            helper: pattern.helper,
        },
        None => {
            // 经验规则：多于一个点时，第一个标签视为 bucket
            let (bucket, host) = match hostname.split_once('.') {
                Some((first, rest)) if rest.contains('.') => (first.to_string(), rest.to_string()),
                _ => (String::new(), hostname.clone()),
            };
            CdnProfile {
                endpoint,
                domain: host.clone(),
                hostname,
                bucket,
                host,
                provider: UNIVERSAL_PROVIDER.to_string(),
                helper: ProviderHelper::Generic,
            }
        }
    };

    info!(
        "CDN端点识别结果：endpoint={}, bucket={}, host={}, domain={}, provider={}",
        profile.endpoint, profile.bucket, profile.host, profile.domain, profile.provider
    );
    profile
}
