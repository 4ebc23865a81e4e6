// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::{error, warn};
use std::fs::File;
use std::io::prelude::*;

use crate::exception::Exception;
use crate::filter::{file_type_pattern, parse_list, substring_pattern};
use crate::param::{CACHEABLE_DOWNLOAD_TYPES, CACHEABLE_FILE_TYPES};
use crate::util::host_without_port;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    www_root: String,
    port: u16,
    worker_threads: usize,
    cache_size: usize,
    local: bool,
    #[serde(default)]
    cdn: CdnSettings,
}

/// `[cdn]` 配置段。列表类配置保存运维人员填写的原始文本，
/// 由 [`CdnSettings::derive`] 派生出改写核心使用的正则交替串。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CdnSettings {
    pub host: String,
    pub enabled: bool,
    /// 请求中没有 Host 头时使用的站点地址
    pub site_url: String,
    pub domains: String,
    pub file_types: String,
    pub download_types: String,
    pub page_include: String,
    pub page_exclude: String,
    pub url_include: String,
    pub url_exclude: String,
    pub admin_paths: Vec<String>,
    /// 更换 CDN 地址时通过 CDN 请求的已知资源
    pub verify_path: String,
    /// 清除与验证请求的超时
    pub purge_timeout_secs: u64,
    pub cloudfront: Option<CloudFrontSettings>,
    pub keycdn: Option<KeyCdnSettings>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct CloudFrontSettings {
    #[serde(default)]
    pub distribution_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct KeyCdnSettings {
    #[serde(default)]
    pub zone_id: String,
    #[serde(default)]
    pub api_key: String,
}

impl Default for CdnSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            enabled: false,
            site_url: String::new(),
            domains: String::new(),
            file_types: CACHEABLE_FILE_TYPES.join(" "),
            download_types: CACHEABLE_DOWNLOAD_TYPES.join(" "),
            page_include: String::new(),
            page_exclude: String::new(),
            url_include: String::new(),
            url_exclude: String::new(),
            admin_paths: vec!["/admin/".to_string()],
            verify_path: "/css/site.css".to_string(),
            purge_timeout_secs: 10,
            cloudfront: None,
            keycdn: None,
        }
    }
}

/// 由原始文本派生出的模式串
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DerivedPatterns {
    pub domains: Vec<String>,
    pub file_types: String,
    pub page_include: String,
    pub page_exclude: String,
    pub url_include: String,
    pub url_exclude: String,
}

impl CdnSettings {
    pub fn derive(&self) -> DerivedPatterns {
        DerivedPatterns {
            domains: parse_list(&self.domains, false)
                .into_iter()
                .map(|d| d.to_lowercase())
                .collect(),
            file_types: file_type_pattern(&self.file_types, &self.download_types),
            page_include: substring_pattern(&self.page_include),
            page_exclude: substring_pattern(&self.page_exclude),
            url_include: substring_pattern(&self.url_include),
            url_exclude: substring_pattern(&self.url_exclude),
        }
    }

    /// `site_url` 中的主机名，不含协议与端口
    pub fn site_host(&self) -> String {
        let url = self.site_url.trim().to_lowercase();
        let rest = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .unwrap_or(&url);
        let authority = rest.split('/').next().unwrap_or("");
        host_without_port(authority)
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            www_root: ".".to_string(),
            port: 7878,
            worker_threads: 0,
            cache_size: 5,
            local: true,
            cdn: CdnSettings::default(),
        }
    }

    /// 从 TOML 文件加载配置。文件无法读取时返回错误，内容无法解析时退回默认配置。
    pub fn from_toml(filename: &str) -> Result<Self, Exception> {
        let mut file = File::open(filename).map_err(|e| {
            error!("无法打开配置文件{}：{}", filename, e);
            Exception::ConfigUnreadable
        })?;
        let mut str_val = String::new();
        file.read_to_string(&mut str_val).map_err(|e| {
            error!("读取配置文件{}失败：{}", filename, e);
            Exception::ConfigUnreadable
        })?;
        Ok(Self::from_toml_str(&str_val))
    }

    pub fn from_toml_str(content: &str) -> Self {
        let mut raw_config = match toml::from_str(content) {
            Ok(t) => t,
            Err(e) => {
                error!("无法成功从配置文件构建配置对象，使用默认配置：{}", e);
                Config::new()
            }
        };
        if raw_config.worker_threads == 0 {
            raw_config.worker_threads = num_cpus::get();
        }
        if raw_config.cache_size == 0 {
            warn!("cache_size被设置为0，但目前尚不支持禁用缓存，因此该值将被改为5。");
            raw_config.cache_size = 5;
        }
        raw_config
    }
}

impl Config {
    pub fn www_root(&self) -> &str {
        &self.www_root
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn cdn(&self) -> &CdnSettings {
        &self.cdn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_defaults_for_cdn_section() {
        let config = Config::from_toml_str("www_root = \"static\"\nport = 8080\nworker_threads = 2\ncache_size = 3\nlocal = true\n");
        assert_eq!(config.port(), 8080);
        assert_eq!(config.worker_threads(), 2);
        assert_eq!(config.cdn(), &CdnSettings::default());
        assert!(config.cdn().derive().file_types.contains(r"\.woff2"));
        assert!(config.cdn().derive().file_types.contains(r"\.xlsx"));
    }

    #[test]
    fn test_config_cdn_section() {
        let content = r#"
            www_root = "static"
            port = 7878
            worker_threads = 0
            cache_size = 0
            local = true

            [cdn]
            host = "https://d123abc.cloudfront.net"
            enabled = true
            site_url = "http://mysite.com:7878/"
            domains = "www.mysite.com, static.mysite.com"
            file_types = ".css .js"
            download_types = ""
            url_exclude = "/plugins/"

            [cdn.cloudfront]
            distribution_id = "E123"
        "#;
        let config = Config::from_toml_str(content);
        assert!(config.worker_threads() > 0);
        assert_eq!(config.cache_size(), 5);
        let cdn = config.cdn();
        assert!(cdn.enabled);
        assert_eq!(cdn.site_host(), "mysite.com");
        assert_eq!(cdn.cloudfront.as_ref().unwrap().distribution_id, "E123");
        let derived = cdn.derive();
        assert_eq!(derived.domains, vec!["www.mysite.com", "static.mysite.com"]);
        assert_eq!(derived.file_types, r"\.css|\.js");
        assert_eq!(derived.url_exclude, "/plugins/");
        assert_eq!(derived.url_include, "");
    }

    #[test]
    fn test_config_invalid_content_falls_back() {
        let config = Config::from_toml_str("this is not toml = = =");
        assert_eq!(config.port(), 7878);
        assert_eq!(config.www_root(), ".");
    }

    #[test]
    fn test_site_host_variants() {
        let site = |url: &str| CdnSettings {
            site_url: url.to_string(),
            ..Default::default()
        };
        assert_eq!(site("https://MySite.com/blog/").site_host(), "mysite.com");
        assert_eq!(site("http://mysite.com:7878").site_host(), "mysite.com");
        assert_eq!(site("http://[::1]:7878/").site_host(), "[::1]");
        assert_eq!(site("[2001:db8::1]").site_host(), "[2001:db8::1]");
        assert_eq!(site("").site_host(), "");
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "www_root = \"www\"\nport = 9000\nworker_threads = 1\ncache_size = 2\nlocal = false").unwrap();
        let config = Config::from_toml(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.www_root(), "www");
        assert!(!config.local());
        assert_eq!(
            Config::from_toml("/nonexistent/simplecdn.toml").unwrap_err(),
            Exception::ConfigUnreadable
        );
    }
}
