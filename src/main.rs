// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # simplecdn 源站
//!
//! 基于 Tokio 的静态文件源站。HTML、CSS 与 JS 在发送前经过 CDN 改写，
//! 其中的静态资源地址被替换为配置的 CDN 地址。
//! 后台控制台可以在运行时修改 CDN 地址、开关改写以及清除 CDN 缓存。

use simplecdn::{
    cache::PageCache,
    config::Config,
    exception::Exception,
    param::HTML_INDEX,
    purge::{CdnPurger, DryRunTransport, FlushListener, PurgeContext},
    request::Request,
    response::Response,
    state::CdnState,
    util::format_file_size,
    verify::{HostVerdict, HostVerifier},
    CdnProfile,
};

use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    runtime::Builder,
};

use std::{
    net::{Ipv4Addr, SocketAddrV4},
    path::{Component, Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Instant,
};

/// CDN 缓存清除后，本地缓存的改写结果也一并丢弃
struct PageCacheFlusher {
    cache: Arc<Mutex<PageCache>>,
}

impl FlushListener for PageCacheFlusher {
    fn on_flushed(&self, profile: &CdnProfile, context: PurgeContext, succeeded: bool) {
        if !succeeded {
            return;
        }
        match self.cache.lock() {
            Ok(mut cache) => cache.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
        info!("[{}]{}缓存已清除，本地页面缓存同步清空", context, profile.provider());
    }
}

fn main() {
    // 1. 初始化日志系统
    if let Err(e) = log4rs::init_file("config/log4rs.yaml", Default::default()) {
        eprintln!("无法初始化日志系统：{}", e);
        std::process::exit(1);
    }

    // 2. 加载配置
    let config = match Config::from_toml("config/development.toml") {
        Ok(config) => config,
        Err(e) => {
            error!("无法加载配置文件：{}", e);
            std::process::exit(1);
        }
    };
    info!("配置文件已载入");
    info!("www root: {}", config.www_root());

    // 3. 根据配置分配工作线程数
    let runtime = match Builder::new_multi_thread()
        .worker_threads(config.worker_threads())
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法创建Tokio运行时：{}", e);
            std::process::exit(1);
        }
    };

    runtime.block_on(serve(config));
}

async fn serve(config: Config) {
    // 4. 共享资源：页面缓存、CDN 状态与清除入口
    let cache = Arc::new(Mutex::new(PageCache::from_capacity(config.cache_size())));
    let state = Arc::new(CdnState::load(config.cdn().clone()));
    let mut purger = CdnPurger::new(Arc::clone(&state), Arc::new(DryRunTransport));
    purger.add_listener(Arc::new(PageCacheFlusher {
        cache: Arc::clone(&cache),
    }));
    let verifier = Arc::new(HostVerifier::new(
        Arc::new(DryRunTransport),
        Arc::clone(purger.notices()),
    ));
    let purger = Arc::new(purger);
    let root = Arc::new(config.www_root().to_string());

    // 5. 网络层初始化
    let port: u16 = config.port();
    let address = match config.local() {
        true => Ipv4Addr::new(127, 0, 0, 1),
        false => Ipv4Addr::new(0, 0, 0, 0),
    };
    info!("服务端将在{}:{}上监听Socket连接", address, port);
    let listener = match TcpListener::bind(SocketAddrV4::new(address, port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("无法绑定端口：{}，错误：{}", port, e);
            return;
        }
    };
    info!("端口{}绑定完成", port);

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let active_connection = Arc::new(AtomicU32::new(0));

    // 6. 后台管理控制台
    tokio::spawn(console(
        Arc::clone(&shutdown_flag),
        Arc::clone(&active_connection),
        Arc::clone(&state),
        Arc::clone(&purger),
        verifier,
        Arc::clone(&cache),
    ));

    // 7. 主事件循环
    let mut id: u128 = 0;
    loop {
        if shutdown_flag.load(Ordering::SeqCst) {
            info!("主循环接收到停机指令，正在退出...");
            break;
        }

        let (mut stream, addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("接受连接失败：{}", e);
                continue;
            }
        };
        debug!("[ID{}]新的连接：{}", id, addr);

        let active_connection = Arc::clone(&active_connection);
        let root = Arc::clone(&root);
        let cache = Arc::clone(&cache);
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            active_connection.fetch_add(1, Ordering::SeqCst);
            handle_connection(&mut stream, id, &root, cache, state).await;
            active_connection.fetch_sub(1, Ordering::SeqCst);
        });
        id += 1;
    }
}

async fn console(
    shutdown_flag: Arc<AtomicBool>,
    active_connection: Arc<AtomicU32>,
    state: Arc<CdnState>,
    purger: Arc<CdnPurger>,
    verifier: Arc<HostVerifier>,
    cache: Arc<Mutex<PageCache>>,
) {
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut input = String::new();
    loop {
        input.clear();
        match reader.read_line(&mut input).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let cmd = input.trim();
        let (name, argument) = match cmd.split_once(' ') {
            Some((name, argument)) => (name, argument.trim()),
            None => (cmd, ""),
        };
        match name {
            "stop" => {
                shutdown_flag.store(true, Ordering::SeqCst);
                println!("停机指令已激活，服务器将在处理完下一个请求后关闭...");
                break;
            }
            "help" => {
                println!("== simplecdn Help ==");
                println!("stop        - 发出停机信号");
                println!("status      - 查看当前服务器运行状态");
                println!("profile     - 查看当前CDN档案");
                println!("cdn <url>   - 验证并修改CDN地址，cdn off 清除地址");
                println!("enable      - 启用CDN改写");
                println!("disable     - 停用CDN改写");
                println!("purge       - 清除CDN缓存");
                println!("help        - 显示此帮助信息");
                println!("====================");
            }
            "status" => {
                let snapshot = state.snapshot();
                let (entries, bytes) = match cache.lock() {
                    Ok(c) => (c.len(), c.total_bytes()),
                    Err(poisoned) => {
                        let c = poisoned.into_inner();
                        (c.len(), c.total_bytes())
                    }
                };
                println!("== simplecdn 状态 ===");
                println!("当前活跃连接数: {}", active_connection.load(Ordering::SeqCst));
                println!("CDN改写: {}", if snapshot.is_active() { "开启" } else { "关闭" });
                println!("页面缓存: {}项, {}", entries, format_file_size(bytes));
                println!("====================");
            }
            "profile" => print_profile(&state.profile()),
            "cdn" if argument.is_empty() => println!("用法：cdn <url> 或 cdn off"),
            "cdn" if argument == "off" => {
                state.set_host("");
                println!("CDN地址已清除，改写已停用");
            }
            "cdn" => {
                let task_state = Arc::clone(&state);
                let task_verifier = Arc::clone(&verifier);
                let host = argument.to_string();
                let verdict = tokio::task::spawn_blocking(move || {
                    task_verifier.change_host(&task_state, &host, PurgeContext::Console)
                })
                .await
                .unwrap_or(HostVerdict::Rejected);
                for notice in verifier.notices().drain() {
                    println!("{}", notice);
                }
                match verdict {
                    HostVerdict::Unchanged => println!("CDN地址未变化"),
                    HostVerdict::Rejected => println!("CDN地址验证失败，改写已停用"),
                    HostVerdict::Cleared | HostVerdict::Accepted => {}
                }
                print_profile(&state.profile());
            }
            "enable" => {
                if state.set_enabled(true) {
                    println!("CDN改写已启用");
                } else {
                    println!("未配置CDN地址，无法启用");
                }
            }
            "disable" => {
                state.set_enabled(false);
                println!("CDN改写已停用");
            }
            "purge" => {
                let task_purger = Arc::clone(&purger);
                let attempted =
                    tokio::task::spawn_blocking(move || task_purger.flush(PurgeContext::Console))
                        .await
                        .unwrap_or(false);
                if !attempted && purger.notices().is_empty() {
                    println!("当前CDN服务商不支持清除缓存");
                }
                for notice in purger.notices().drain() {
                    println!("{}", notice);
                }
            }
            "" => {}
            _ => println!("无效的命令：{}", cmd),
        }
    }
}

fn print_profile(profile: &CdnProfile) {
    if !profile.is_configured() {
        println!("未配置CDN地址");
        return;
    }
    println!("== CDN 档案 ===");
    println!("endpoint: {}", profile.endpoint());
    println!("bucket:   {}", profile.bucket());
    println!("host:     {}", profile.host());
    println!("domain:   {}", profile.domain());
    println!("provider: {} ({})", profile.provider(), profile.helper());
    println!("===============");
}

/// 处理单个 TCP 连接：读取请求、路由、构建并发送响应
async fn handle_connection(
    stream: &mut TcpStream,
    id: u128,
    root: &str,
    cache: Arc<Mutex<PageCache>>,
    state: Arc<CdnState>,
) {
    let mut buffer = vec![0; 4096];
    let size = match stream.read(&mut buffer).await {
        Ok(0) => return,
        Ok(n) => n,
        Err(e) => {
            error!("[ID{}]读取TCPStream时遇到错误: {}", id, e);
            return;
        }
    };
    buffer.truncate(size);
    debug!("[ID{}]HTTP请求接收完毕", id);

    let start_time = Instant::now();

    let request = match Request::try_from(&buffer, id) {
        Ok(req) => req,
        Err(e) => {
            error!("[ID{}]解析HTTP请求失败: {}", id, e);
            let response = "HTTP/1.1 400 Bad Request\r\nContent-Length: 11\r\n\r\nBad Request";
            let _ = stream.write_all(response.as_bytes()).await;
            return;
        }
    };

    // 整个请求使用同一个快照
    let snapshot = state.snapshot();
    let response = match route(request.path(), id, root) {
        Ok(path) => match path.to_str() {
            Some(path_str) => Response::from(path_str, &request, id, &cache, &snapshot),
            None => Response::response_400(&request, id),
        },
        Err(Exception::FileNotFound) => {
            warn!("[ID{}]请求的路径：{} 不存在，返回404", id, request.path());
            Response::response_404(&request, id)
        }
        Err(e) => {
            warn!("[ID{}]请求的路径：{} 非法（{}），返回400", id, request.path(), e);
            Response::response_400(&request, id)
        }
    };

    info!(
        "[ID{}] HTTP/{}, {}, {}, {}, {}, {}, cdn={}, {}ms",
        id,
        request.version(),
        request.path(),
        request.method(),
        response.status_code(),
        response.information(),
        request.user_agent(),
        response.cdn_active(),
        start_time.elapsed().as_millis()
    );

    let response_bytes = response.as_bytes();
    if let Err(e) = stream.write_all(&response_bytes).await {
        error!("[ID{}]发送响应失败: {}", id, e);
        return;
    }
    let _ = stream.flush().await;
}

/// 把请求路径映射到 `www_root` 下的文件。
///
/// 查询串被忽略，`..` 一律拒绝，以 `/` 结尾的路径指向目录下的默认页面。
fn route(path: &str, id: u128, root: &str) -> Result<PathBuf, Exception> {
    if path == "*" {
        return Ok(PathBuf::from(root));
    }
    let path = path.split(['?', '#']).next().unwrap_or("");
    if !path.starts_with('/') {
        return Err(Exception::InvalidPath);
    }

    let relative = Path::new(path.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        warn!("[ID{}]请求路径{}包含目录遍历", id, path);
        return Err(Exception::InvalidPath);
    }

    let mut full_path = Path::new(root).join(relative);
    if path.ends_with('/') || full_path.is_dir() {
        full_path = full_path.join(HTML_INDEX);
    }
    debug!("[ID{}]映射物理路径：{}", id, full_path.display());

    match full_path.is_file() {
        true => Ok(full_path),
        false => Err(Exception::FileNotFound),
    }
}
