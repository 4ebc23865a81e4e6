// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # CDN 服务商表
//!
//! 已知服务商的主机命名规律。表是只读的静态数据，按顺序匹配，先匹配者胜出：
//! 顶级域重叠的条目（例如两个 `amazonaws.com`）依靠更具体的 bucket 前缀排在前面来区分。

use lazy_static::lazy_static;
use serde_derive::{Deserialize, Serialize};
use std::fmt;

/// 服务商对应的清除缓存集成。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderHelper {
    CloudFront,
    KeyCdn,
    Generic,
}

impl ProviderHelper {
    pub fn tag(&self) -> &'static str {
        match self {
            ProviderHelper::CloudFront => "cloudfront",
            ProviderHelper::KeyCdn => "keycdn",
            ProviderHelper::Generic => "generic",
        }
    }

    /// 根据标签查找，未知标签一律视为 generic
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "cloudfront" => ProviderHelper::CloudFront,
            "keycdn" => ProviderHelper::KeyCdn,
            _ => ProviderHelper::Generic,
        }
    }
}

impl Default for ProviderHelper {
    fn default() -> Self {
        ProviderHelper::Generic
    }
}

impl fmt::Display for ProviderHelper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// 服务商表中的一条记录。
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPattern {
    /// 服务商标识，下划线在展示时替换为空格
    pub id: &'static str,
    /// bucket 之后、顶级域之前的正则片段，可以为空
    pub prefix: &'static str,
    /// 作为后缀匹配的顶级域字面量
    pub top_domain: &'static str,
    pub helper: ProviderHelper,
}

impl ProviderPattern {
    pub const fn new(
        id: &'static str,
        prefix: &'static str,
        top_domain: &'static str,
        helper: ProviderHelper,
    ) -> Self {
        Self {
            id,
            prefix,
            top_domain,
            helper,
        }
    }

    /// 展示用名称：`Amazon_S3` -> `Amazon S3`
    pub fn display_name(&self) -> String {
        self.id.replace('_', " ")
    }
}

lazy_static! {
    pub static ref PROVIDER_TABLE: Vec<ProviderPattern> = {
        use ProviderHelper::*;
        vec![
            ProviderPattern::new("CloudFront", "", "cloudfront.net", CloudFront),
            ProviderPattern::new("KeyCDN", "", "kxcdn.com", KeyCdn),
            ProviderPattern::new("Akamai_ION", "", "akamaized.net", Generic),
            ProviderPattern::new("RocketCDN", "", "rocketcdn.net", Generic),
            ProviderPattern::new("StackPath", "", "stackpath.com", Generic),
            ProviderPattern::new("CloudFlare", r"cdn\.", "cloudflare.net", Generic),
            ProviderPattern::new("Rackspace", r"\w{3}\.\w{3}\.", "rackcdn.com", Generic),
            ProviderPattern::new("Azure", "", "azureedge.net", Generic),
            ProviderPattern::new("Amazon_S3", r"(?:s3[-.]).*\.", "amazonaws.com", Generic),
            ProviderPattern::new("Amazon_EC2", r"(?:compute-\d).*\.", "amazonaws.com", Generic),
            ProviderPattern::new("Google_Cloud", r"storage\.", "googleapis.com", Generic),
        ]
    };
}
