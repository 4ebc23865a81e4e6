// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 源站在请求处理与启动配置阶段可能出现的异常。
//! CDN 改写核心本身不会产生异常：无法识别的主机降级为 Universal，
//! 缺少配置时直接原样返回页面。

use std::fmt;

/// 服务器处理请求或加载配置时发生的异常类型。
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Exception {
    /// 请求字节流无法解析为合法的 UTF-8 字符串。
    RequestIsNotUtf8,
    /// 请求行格式不正确或使用了不支持的方法。
    UnSupportedRequestMethod,
    /// 客户端使用了服务器不支持的 HTTP 协议版本。
    UnsupportedHttpVersion,
    /// 在资源根目录下未找到所请求的文件。对应 `404 Not Found`。
    FileNotFound,
    /// 请求路径非法或包含目录遍历。对应 `400 Bad Request`。
    InvalidPath,
    /// 配置文件不存在或无法读取。
    ConfigUnreadable,
}

use Exception::*;

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            UnSupportedRequestMethod => write!(f, "Unsupported request method"),
            UnsupportedHttpVersion => write!(f, "Unsupported HTTP version"),
            FileNotFound => write!(f, "File not found (404)"),
            InvalidPath => write!(f, "Invalid path (400)"),
            ConfigUnreadable => write!(f, "Configuration file can't be read"),
        }
    }
}

impl std::error::Error for Exception {}
