// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 协议参数与常量模块
//!
//! 集中存放 `simplecdn` 使用的静态数据：
//! - 源站 HTTP 层用到的状态码、MIME 类型与协议枚举。
//! - CDN 改写默认缓存的文件扩展名列表。
//! - 与 CDN 相关的请求/响应头名称。

use lazy_static::lazy_static;
use std::collections::HashMap;

/// 服务器名称标识，用于 HTTP 响应头的 `Server` 字段
pub const SERVER_NAME: &str = "simplecdn-origin";

/// HTTP 协议规定的换行符
pub const CRLF: &str = "\r\n";

/// 请求头：客户端可以通过 `X-Simple-CDN: off` 强制关闭本次请求的改写
pub const CDN_OVERRIDE_HEADER: &str = "x-simple-cdn";

/// 响应头：页面经过改写时附加 `x-Simple-CDN: on`
pub const CDN_ACTIVE_HEADER: &str = "x-Simple-CDN";

/// 无法识别服务商时使用的名称
pub const UNIVERSAL_PROVIDER: &str = "Universal";

/// 默认缓存到 CDN 的静态资源扩展名
pub const CACHEABLE_FILE_TYPES: &[&str] = &[
    ".avi", ".avif", ".bmp", ".css", ".flac", ".gif", ".ico", ".jpeg", ".jpg", ".js", ".m4v",
    ".mov", ".mp3", ".mp4", ".mpg", ".ogg", ".otf", ".pdf", ".png", ".svg", ".svgz", ".swf",
    ".tiff", ".ttf", ".wav", ".webp", ".woff", ".woff2",
];

/// 默认缓存到 CDN 的下载文件扩展名
pub const CACHEABLE_DOWNLOAD_TYPES: &[&str] = &[
    ".apk", ".bin", ".bz2", ".csv", ".dat", ".dmg", ".doc", ".docx", ".eps", ".gz", ".jar",
    ".iso", ".pkg", ".ppt", ".pptx", ".ps", ".psd", ".pub", ".rar", ".rtf", ".vcf", ".wma",
    ".xls", ".xlsx", ".zip",
];

/// 超过该大小的文件不进入页面缓存
pub const CACHE_FILE_SIZE_LIMIT: u64 = 4 * 1024 * 1024;

/// 根路径对应的默认页面
pub const HTML_INDEX: &str = "index.html";

/// 推荐的最小集合，日志提示里会用到
pub const CACHEABLE_RECOMMENDED: &[&str] = &[".css", ".jpeg", ".jpg", ".js", ".png", ".webp"];

lazy_static! {
    /// HTTP 状态码与原因短语映射表（只保留源站实际会返回的状态码）。
    pub static ref STATUS_CODES: HashMap<u16, &'static str> = {
        let mut map = HashMap::new();
        map.insert(200, "OK");
        map.insert(204, "No Content");
        map.insert(304, "Not Modified");
        map.insert(400, "Bad Request");
        map.insert(403, "Forbidden");
        map.insert(404, "Not Found");
        map.insert(405, "Method Not Allowed");
        map.insert(500, "Internal Server Error");
        map.insert(501, "Not Implemented");
        map.insert(505, "HTTP Version Not Supported");
        map
    };
}

lazy_static! {
    /// 源站支持的请求方法，用于 `Allow` 头
    pub static ref ALLOWED_METHODS: Vec<HttpRequestMethod> = vec![
        HttpRequestMethod::Get,
        HttpRequestMethod::Head,
        HttpRequestMethod::Options,
    ];
}

lazy_static! {
    /// 文件后缀名到 MIME 类型的映射表。
    pub static ref MIME_TYPES: HashMap<&'static str, &'static str> = {
        let mut map = HashMap::new();
        map.insert("avif", "image/avif");
        map.insert("bmp", "image/bmp");
        map.insert("css", "text/css;charset=utf-8");
        map.insert("csv", "text/csv");
        map.insert("doc", "application/msword");
        map.insert(
            "docx",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        );
        map.insert("gif", "image/gif");
        map.insert("gz", "application/gzip");
        map.insert("htm", "text/html;charset=utf-8");
        map.insert("html", "text/html;charset=utf-8");
        map.insert("ico", "image/x-icon");
        map.insert("jpeg", "image/jpeg");
        map.insert("jpg", "image/jpeg");
        map.insert("js", "text/javascript;charset=utf-8");
        map.insert("json", "application/json");
        map.insert("mjs", "text/javascript;charset=utf-8");
        map.insert("mp3", "audio/mpeg");
        map.insert("mp4", "video/mp4");
        map.insert("otf", "font/otf");
        map.insert("pdf", "application/pdf");
        map.insert("png", "image/png");
        map.insert("svg", "image/svg+xml");
        map.insert("ttf", "font/ttf");
        map.insert("txt", "text/plain");
        map.insert("wav", "audio/wav");
        map.insert("webm", "video/webm");
        map.insert("webp", "image/webp");
        map.insert("woff", "font/woff");
        map.insert("woff2", "font/woff2");
        map.insert("xml", "text/xml");
        map.insert("zip", "application/zip");
        map
    };
}

/// 支持的 HTTP 协议版本
#[derive(Debug, Clone, Copy)]
pub enum HttpVersion {
    V1_1,
}

/// 标准 HTTP 请求方法
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpRequestMethod {
    Get,
    Head,
    Options,
    Post,
}

/// 支持的内容编码（压缩）格式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpEncoding {
    Gzip,
    Deflate,
    Br,
}

use std::fmt;

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpVersion::V1_1 => write!(f, "1.1"),
        }
    }
}

impl fmt::Display for HttpRequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpRequestMethod::Get => write!(f, "GET"),
            HttpRequestMethod::Head => write!(f, "HEAD"),
            HttpRequestMethod::Options => write!(f, "OPTIONS"),
            HttpRequestMethod::Post => write!(f, "POST"),
        }
    }
}

impl fmt::Display for HttpEncoding {
    /// 将枚举格式化为 `Content-Encoding` 头所使用的标识符
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpEncoding::Gzip => write!(f, "gzip"),
            HttpEncoding::Deflate => write!(f, "deflate"),
            HttpEncoding::Br => write!(f, "br"),
        }
    }
}
