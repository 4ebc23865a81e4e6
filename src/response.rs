// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use crate::{
    cache::PageCache,
    param::*,
    request::Request,
    state::CdnSnapshot,
    util::HtmlBuilder,
};

use brotli::enc::{self, backward_references::BrotliEncoderParams};
use bytes::Bytes;
use chrono::prelude::*;
use flate2::{
    write::{DeflateEncoder, GzEncoder},
    Compression,
};
use log::{debug, error, warn};

use std::{
    ffi::OsStr,
    fs::{self, metadata},
    io::{self, Write},
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
    time::SystemTime,
};

#[derive(Debug, Clone)]
pub struct Response {
    version: HttpVersion,
    status_code: u16,
    information: String,
    content_type: Option<String>,
    content_length: u64,
    date: DateTime<Utc>,
    content_encoding: Option<HttpEncoding>,
    server_name: String,
    allow: Option<Vec<HttpRequestMethod>>,
    content: Option<Bytes>,
    /// 页面经过 CDN 改写
    cdn_active: bool,
    /// `Link` 资源提示，提前与 CDN 建立连接
    link: Option<String>,
    /// 来自 CDN 的跨域请求被允许时回显的 `Origin`
    allow_origin: Option<String>,
}

impl Response {
    pub fn new() -> Self {
        Self {
            version: HttpVersion::V1_1,
            status_code: 200,
            information: "OK".to_string(),
            content_type: None,
            content_length: 0,
            date: Utc::now(),
            content_encoding: None,
            server_name: SERVER_NAME.to_string(),
            allow: Some(ALLOWED_METHODS.to_vec()),
            content: None,
            cdn_active: false,
            link: None,
            allow_origin: None,
        }
    }

    fn from_file(
        path: &str,
        request: &Request,
        id: u128,
        cache: &Arc<Mutex<PageCache>>,
        snapshot: &CdnSnapshot,
        mime: &str,
    ) -> Self {
        let mut response = Self::new();
        response.allow = None;
        response.content_type = Some(mime.to_string());

        let file_metadata = match metadata(path) {
            Ok(meta) => meta,
            Err(e) => {
                error!("[ID{}]无法获取文件{}的元数据: {}", id, path, e);
                return Self::response_500(request, id);
            }
        };
        let file_size = file_metadata.len();
        let file_modified_time = file_metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        let rewrite = is_rewritable(mime) && snapshot.page_enabled(request, id);
        let (site_host, generation) = match rewrite {
            true => (snapshot.site_host(request), snapshot.generation()),
            // 未改写的文件与站点主机、快照无关
            false => (String::new(), 0),
        };

        let cached = lock_cache(cache, id).find(path, &site_host, file_modified_time, generation);
        let body = match cached {
            Some(bytes) => {
                debug!("[ID{}]缓存命中，原始大小: {} bytes", id, bytes.len());
                bytes
            }
            None => {
                debug!("[ID{}]缓存未命中或文件已修改，读取文件: {}", id, path);
                let contents = match fs::read(path) {
                    Ok(c) => c,
                    Err(e) => {
                        error!("[ID{}]无法读取文件{}。错误：{}", id, path, e);
                        return Self::response_500(request, id);
                    }
                };
                let contents = match rewrite {
                    true => match String::from_utf8(contents) {
                        Ok(text) => Bytes::from(snapshot.rewrite(&text, &site_host)),
                        Err(e) => {
                            warn!("[ID{}]文件{}不是合法的UTF-8文本，跳过CDN改写", id, path);
                            Bytes::from(e.into_bytes())
                        }
                    },
                    false => Bytes::from(contents),
                };
                if file_size <= CACHE_FILE_SIZE_LIMIT {
                    lock_cache(cache, id).push(
                        path,
                        &site_host,
                        contents.clone(),
                        file_modified_time,
                        generation,
                    );
                    debug!("[ID{}]文件已加入缓存", id);
                } else {
                    debug!("[ID{}]文件过大({} bytes)，跳过缓存", id, file_size);
                }
                contents
            }
        };

        if rewrite {
            response.cdn_active = true;
            response.link = Some(format!("<//{}>; rel=preconnect", snapshot.profile().hostname()));
            response.allow_origin = cors_origin(request.origin(), snapshot.profile().hostname());
            debug!("[ID{}]页面已通过CDN改写：{}", id, snapshot.cdn_host());
        }

        response.content_encoding = match should_skip_compression(mime) {
            true => None,
            false => decide_encoding(request.accept_encoding()),
        };
        let compressed = match compress(body.to_vec(), response.content_encoding) {
            Ok(c) => Bytes::from(c),
            Err(e) => {
                error!("[ID{}]压缩文件{}失败: {}，返回未压缩内容", id, path, e);
                response.content_encoding = None;
                body
            }
        };
        response.content_length = compressed.len() as u64;
        response.content = Some(compressed);
        response
    }

    fn from_status_code(code: u16, accept_encoding: &[HttpEncoding], id: u128) -> Self {
        let mut response = Self::new();
        if code == 204 {
            response.allow = Some(ALLOWED_METHODS.to_vec());
            response.set_code(code);
            return response;
        }
        response.allow = None;
        response.content_encoding = decide_encoding(accept_encoding);
        let content = match code {
            404 => HtmlBuilder::from_status_code(404, Some(
                r"<h2>噢！</h2><p>你指定的网页无法找到。</p>"
            )),
            405 => HtmlBuilder::from_status_code(405, Some(
                r"<h2>噢！</h2><p>本服务器仅支持GET、HEAD与OPTIONS方法。</p>"
            )),
            500 => HtmlBuilder::from_status_code(500, Some(
                r"<h2>噢！</h2><p>服务器出现了一个内部错误。</p>"
            )),
            _ => HtmlBuilder::from_status_code(code, None),
        }
        .build();
        let raw = content.into_bytes();
        let bytes = match compress(raw.clone(), response.content_encoding) {
            Ok(c) => Bytes::from(c),
            Err(e) => {
                error!("[ID{}]压缩错误页面失败: {}", id, e);
                response.content_encoding = None;
                Bytes::from(raw)
            }
        };
        response.content_length = bytes.len() as u64;
        response.content = Some(bytes);
        response.content_type = Some("text/html;charset=utf-8".to_string());
        response.set_code(code);
        response
    }

    fn set_date(&mut self) -> &mut Self {
        self.date = Utc::now();
        self
    }

    fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.information = match STATUS_CODES.get(&code) {
            Some(&info) => info.to_string(),
            None => {
                error!("未登记的状态码：{}", code);
                "Unknown".to_string()
            }
        };
        self
    }

    pub fn response_404(request: &Request, id: u128) -> Self {
        Self::from_status_code(404, request.accept_encoding(), id)
            .set_date()
            .to_owned()
    }

    pub fn response_500(request: &Request, id: u128) -> Self {
        Self::from_status_code(500, request.accept_encoding(), id)
            .set_date()
            .to_owned()
    }

    pub fn response_400(request: &Request, id: u128) -> Self {
        Self::from_status_code(400, request.accept_encoding(), id)
            .set_date()
            .to_owned()
    }

    /// 根据请求与文件路径生成响应。文本页面在启用 CDN 时先改写再压缩。
    pub fn from(
        path: &str,
        request: &Request,
        id: u128,
        cache: &Arc<Mutex<PageCache>>,
        snapshot: &CdnSnapshot,
    ) -> Response {
        let method = request.method();
        if !ALLOWED_METHODS.contains(&method) {
            return Self::from_status_code(405, request.accept_encoding(), id)
                .set_date()
                .to_owned();
        }
        if method == HttpRequestMethod::Options {
            debug!("[ID{}]请求方法为OPTIONS", id);
            return Self::from_status_code(204, request.accept_encoding(), id)
                .set_date()
                .to_owned();
        }
        let headonly = method == HttpRequestMethod::Head;

        match fs::metadata(path) {
            Ok(meta) if meta.is_file() => {
                let extension = match Path::new(path).extension() {
                    Some(e) => e,
                    None => {
                        warn!("[ID{}]无法确定请求路径{}的文件扩展名", id, path);
                        return Self::response_404(request, id);
                    }
                };
                let mime = get_mime(extension);
                debug!("[ID{}]MIME类型: {}", id, mime);
                // HEAD 与 GET 生成相同的首部，只去掉响应体
                let mut response = match headonly {
                    true => Self::from_file(path, &request.as_get(), id, cache, snapshot, mime),
                    false => Self::from_file(path, request, id, cache, snapshot, mime),
                };
                if headonly {
                    response.content = None;
                }
                response.set_date().to_owned()
            }
            Ok(_) => {
                debug!("[ID{}]{}不是文件，返回404", id, path);
                Self::response_404(request, id)
            }
            Err(_) => {
                warn!("[ID{}]无法获取{}的元数据，产生500 response", id, path);
                Self::response_500(request, id)
            }
        }
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let mut header = format!(
            "HTTP/{} {} {}{}",
            self.version, self.status_code, self.information, CRLF
        );
        if let Some(t) = &self.content_type {
            header.push_str(&format!("Content-Type: {}{}", t, CRLF));
        }
        if let Some(e) = self.content_encoding {
            header.push_str(&format!("Content-Encoding: {}{}", e, CRLF));
        }
        header.push_str(&format!("Content-Length: {}{}", self.content_length, CRLF));
        header.push_str(&format!("Date: {}{}", format_date(&self.date), CRLF));
        header.push_str(&format!("Server: {}{}", self.server_name, CRLF));
        if let Some(a) = &self.allow {
            let methods = a.iter().map(|m| m.to_string()).collect::<Vec<_>>().join(", ");
            header.push_str(&format!("Allow: {}{}", methods, CRLF));
        }
        if self.cdn_active {
            header.push_str(&format!("{}: on{}", CDN_ACTIVE_HEADER, CRLF));
        }
        if let Some(link) = &self.link {
            header.push_str(&format!("Link: {}{}", link, CRLF));
        }
        if let Some(origin) = &self.allow_origin {
            header.push_str(&format!("Access-Control-Allow-Origin: {}{}", origin, CRLF));
        }
        if self.cdn_active {
            header.push_str(&format!("Vary: Origin{}", CRLF));
        }
        header.push_str(CRLF);

        let mut bytes = header.into_bytes();
        if let Some(c) = &self.content {
            bytes.extend_from_slice(c);
        }
        bytes
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn content(&self) -> Option<&Bytes> {
        self.content.as_ref()
    }

    pub fn content_encoding(&self) -> Option<HttpEncoding> {
        self.content_encoding
    }

    pub fn cdn_active(&self) -> bool {
        self.cdn_active
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }
}

fn lock_cache<'a>(cache: &'a Arc<Mutex<PageCache>>, id: u128) -> MutexGuard<'a, PageCache> {
    match cache.lock() {
        Ok(lock) => lock,
        Err(poisoned) => {
            warn!("[ID{}]缓存锁被污染，恢复并继续", id);
            poisoned.into_inner()
        }
    }
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc2822()
}

/// `Origin` 是 CDN 主机（http 或 https）时原样返回，否则不允许跨域
fn cors_origin(origin: Option<&str>, cdn_hostname: &str) -> Option<String> {
    let origin = origin?.trim();
    let host = origin
        .strip_prefix("https://")
        .or_else(|| origin.strip_prefix("http://"))?;
    match !cdn_hostname.is_empty() && host.trim_end_matches('/').eq_ignore_ascii_case(cdn_hostname) {
        true => Some(origin.to_string()),
        false => None,
    }
}

/// 会经过 CDN 改写的文本类型
fn is_rewritable(mime: &str) -> bool {
    ["text/html", "text/css", "text/javascript"]
        .iter()
        .any(|t| mime.starts_with(t))
}

fn compress(data: Vec<u8>, mode: Option<HttpEncoding>) -> io::Result<Vec<u8>> {
    let original_size = data.len();
    let result = match mode {
        Some(HttpEncoding::Gzip) => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Deflate) => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Br) => {
            let params = BrotliEncoderParams::default();
            let mut output = Vec::new();
            enc::BrotliCompress(&mut io::Cursor::new(data), &mut output, &params)?;
            Ok(output)
        }
        None => Ok(data),
    };

    if let Ok(ref compressed) = result {
        debug!(
            "压缩完成: {:?}, 原始大小: {} bytes, 压缩后: {} bytes",
            mode,
            original_size,
            compressed.len()
        );
    }
    result
}

fn should_skip_compression(mime_type: &str) -> bool {
    let skip_types = [
        "image/jpeg",
        "image/png",
        "image/gif",
        "image/webp",
        "image/avif",
        "video/",
        "audio/",
        "application/zip",
        "application/gzip",
        "font/woff",
    ];
    skip_types
        .iter()
        .any(|&skip_type| mime_type.starts_with(skip_type))
}

/// gzip 优先，其次 brotli、deflate
fn decide_encoding(accept_encoding: &[HttpEncoding]) -> Option<HttpEncoding> {
    [HttpEncoding::Gzip, HttpEncoding::Br, HttpEncoding::Deflate]
        .into_iter()
        .find(|e| accept_encoding.contains(e))
}

fn get_mime(extension: &OsStr) -> &'static str {
    let extension = match extension.to_str() {
        Some(e) => e.to_lowercase(),
        None => {
            error!("无法将&OsStr转换为&str类型");
            return "application/octet-stream";
        }
    };
    match MIME_TYPES.get(extension.as_str()) {
        Some(v) => v,
        None => "application/octet-stream",
    }
}
