// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 开发用 Web 宿主
//!
//! 基于 Tokio 运行时的多线程宿主服务器，把挂载点下的请求交给可热重载的应用实例处理。
//! 核心功能包括：
//! - 应用生命周期监管（懒启动、先排空再停止、故障后自动重启）
//! - 开发模式下把应用故障渲染为错误页面
//! - 后台管理控制台（stop / reload / status / help）

use webapp::{
    request::expected_length, AppRequest, Config, CounterApp, Exception, RecoveryPolicy, Request,
    Response, ServerHandle, Supervisor,
};

use log::{debug, error, info, warn, LevelFilter};
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    runtime::Builder,
    sync::Notify,
};

use std::{
    net::{Ipv4Addr, SocketAddrV4},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

const CONFIG_FILE: &str = "config/development.toml";
const LOG_CONFIG_FILE: &str = "config/log4rs.yaml";
/// 读取单个请求的最长等待时间
const READ_TIMEOUT: Duration = Duration::from_secs(10);
/// 停机时轮询在途连接数的间隔
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

type AppSupervisor = Supervisor<CounterApp>;

/// 活跃连接计数守卫，连接任务结束（包括 panic 展开）时自动减一
struct ActiveConnection(Arc<AtomicUsize>);

impl ActiveConnection {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// # 程序入口点
///
/// 初始化日志、加载配置、构建运行时并启动主事件循环。
fn main() {
    init_logger();

    let config = match Config::from_toml(CONFIG_FILE) {
        Ok(config) => {
            info!("配置文件已载入");
            config
        }
        Err(e) => {
            warn!("{}，使用默认配置", e);
            Config::new()
        }
    };
    let worker_threads = match config.worker_threads() {
        0 => num_cpus::get(),
        n => n,
    };

    let runtime = match Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法构建Tokio运行时：{}", e);
            return;
        }
    };

    runtime.block_on(serve(config));
}

/// 优先使用 YAML 配置，文件缺失时退回到代码构建的控制台输出
fn init_logger() {
    if log4rs::init_file(LOG_CONFIG_FILE, Default::default()).is_ok() {
        return;
    }
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {h({l})} {m}{n}",
        )))
        .build();
    let built = log4rs::Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info));
    match built {
        Ok(log_config) => {
            if let Err(e) = log4rs::init_config(log_config) {
                eprintln!("无法初始化日志系统：{}", e);
            }
        }
        Err(e) => eprintln!("日志配置无效：{}", e),
    }
}

async fn serve(config: Config) {
    let config = Arc::new(config);

    let port = config.port();
    let address = match config.local() {
        true => Ipv4Addr::new(127, 0, 0, 1),
        false => Ipv4Addr::new(0, 0, 0, 0),
    };
    let socket = SocketAddrV4::new(address, port);
    info!("服务端将在{}上监听Socket连接", socket);

    let listener = match TcpListener::bind(socket).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("无法绑定端口：{}，错误：{}", port, e);
            return;
        }
    };
    info!("端口{}绑定完成，应用挂载点：{}", port, config.base_path());

    let policy = match config.development() {
        true => RecoveryPolicy::Development,
        false => RecoveryPolicy::Production,
    };
    let server = Arc::new(ServerHandle::new(
        socket,
        config.base_path(),
        config.development(),
    ));
    let raise_test_error = config.raise_test_error();
    let supervisor: Arc<AppSupervisor> = Arc::new(Supervisor::new(server, policy, move || {
        CounterApp::with_test_error(raise_test_error)
    }));

    let shutdown = Arc::new(Notify::new());
    let active_connection = Arc::new(AtomicUsize::new(0));

    tokio::spawn(console(
        Arc::clone(&supervisor),
        Arc::clone(&shutdown),
        Arc::clone(&active_connection),
    ));

    let mut id: u128 = 0;

    // 主事件循环 (Accept Loop)
    loop {
        let (mut stream, addr) = tokio::select! {
            _ = shutdown.notified() => {
                info!("主循环接收到停机指令，正在退出...");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!("接受连接失败：{}", e);
                    continue;
                }
            },
        };
        debug!("[ID{}]新的连接：{}", id, addr);

        // 在 accept 循环内计数，停机时才能看到尚未开始读取的连接
        let active = ActiveConnection::enter(&active_connection);
        let supervisor = Arc::clone(&supervisor);
        let config = Arc::clone(&config);

        tokio::spawn(async move {
            let _active = active;
            handle_connection(&mut stream, id, &supervisor, &config).await;
        });
        id += 1;
    }

    // 等待已接受的连接全部结束，再排空并停止应用
    loop {
        let remaining = active_connection.load(Ordering::SeqCst);
        if remaining == 0 {
            break;
        }
        debug!("等待{}个在途连接结束", remaining);
        tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
    }
    supervisor.shutdown().await;
    info!("服务器已停止");
}

/// 后台管理控制台，不阻塞监听循环
async fn console(
    supervisor: Arc<AppSupervisor>,
    shutdown: Arc<Notify>,
    active_connection: Arc<AtomicUsize>,
) {
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut input = String::new();
    loop {
        input.clear();
        match reader.read_line(&mut input).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        match input.trim() {
            "stop" => {
                println!("停机指令已激活，服务器将在在途请求完成后关闭...");
                shutdown.notify_one();
                break;
            }
            "reload" => {
                if supervisor.reload().await {
                    println!("应用已停止，下一个请求将启动新的实例");
                } else {
                    println!("当前没有运行中的应用实例");
                }
            }
            "status" => {
                println!("== Webserver 状态 ===");
                match supervisor.epoch().await {
                    Some(epoch) => println!("应用周期: {}", epoch),
                    None => println!("应用周期: 无"),
                }
                println!("应用状态: {}", supervisor.state().await);
                println!("已停止的周期数: {}", supervisor.stopped_epochs());
                println!(
                    "当前活跃连接数: {}",
                    active_connection.load(Ordering::SeqCst)
                );
                println!("====================");
            }
            "help" => {
                println!("== Webserver Help ==");
                println!("stop   - 发出停机信号");
                println!("reload - 重载应用（停止当前实例）");
                println!("status - 查看当前服务器运行状态");
                println!("help   - 显示此帮助信息");
                println!("====================");
            }
            "" => {}
            cmd => println!("无效的命令：{}", cmd),
        }
    }
}

/// 读取一个完整的 HTTP 报文（标头以及 Content-Length 指定的请求体）
async fn read_request(stream: &mut TcpStream, max_size: usize) -> Result<Vec<u8>, u16> {
    let mut buffer = Vec::with_capacity(4096);
    let mut chunk = vec![0u8; 4096];
    loop {
        if let Some(total) = expected_length(&buffer) {
            if total > max_size {
                return Err(413);
            }
            if buffer.len() >= total {
                buffer.truncate(total);
                return Ok(buffer);
            }
        } else if buffer.len() > max_size {
            return Err(413);
        }

        let n = match tokio::time::timeout(READ_TIMEOUT, stream.read(&mut chunk)).await {
            Ok(Ok(n)) => n,
            Ok(Err(_)) => return Err(400),
            Err(_) => return Err(408),
        };
        if n == 0 {
            // 客户端提前关闭，按已读内容尝试解析
            return Ok(buffer);
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}

/// # 连接处理器
///
/// 负责单个 TCP 流的生命周期：读取解析请求、交给应用处理、构建并发送响应。
async fn handle_connection(
    stream: &mut TcpStream,
    id: u128,
    supervisor: &AppSupervisor,
    config: &Config,
) {
    let buffer = match read_request(stream, config.max_request_size()).await {
        Ok(buffer) if buffer.is_empty() => return,
        Ok(buffer) => buffer,
        Err(code) => {
            warn!("[ID{}]读取请求失败，返回{}", id, code);
            let response = Response::from_status_code(code, false);
            let _ = stream.write_all(&response.as_bytes()).await;
            return;
        }
    };
    debug!("[ID{}]HTTP请求接收完毕", id);

    let start_time = Instant::now();

    let request = match Request::try_from(&buffer, id) {
        Ok(req) => req,
        Err(e) => {
            error!("[ID{}]解析HTTP请求失败: {}", id, e);
            let _ = stream
                .write_all(&Response::response_400(false).as_bytes())
                .await;
            return;
        }
    };
    let method = request.method();
    let version = *request.version();
    let target = request.target().to_string();
    let user_agent = request.user_agent().to_string();
    let head_only = method == webapp::HttpRequestMethod::Head;

    let response = match request.mount(config.base_path()) {
        None => {
            warn!("[ID{}]请求的路径：{} 不在应用挂载点下，返回404", id, target);
            Response::response_404(head_only)
        }
        Some(request) => dispatch(&request, id, supervisor, head_only).await,
    };

    debug!(
        "[ID{}]HTTP响应构建完成，服务端用时{}ms。",
        id,
        start_time.elapsed().as_millis()
    );

    info!(
        "[ID{}] {}, {}, {}, {}, {}, {}, ",
        id,
        version,
        target,
        method,
        response.status_code(),
        response.information(),
        user_agent,
    );

    let response_bytes = response.as_bytes();
    debug!("[ID{}]发送全量响应，长度: {}", id, response_bytes.len());
    if let Err(e) = stream.write_all(&response_bytes).await {
        error!("[ID{}]发送响应失败: {}", id, e);
        return;
    }
    let _ = stream.flush().await;
}

/// 交给监管者处理，并按恢复策略把故障转换成错误页面
async fn dispatch(request: &Request, id: u128, supervisor: &AppSupervisor, head_only: bool) -> Response {
    let mut response = Response::for_request(request);
    match supervisor.dispatch(request, &mut response).await {
        Ok(()) if response.is_sent() => response,
        Ok(()) => {
            error!(
                "[ID{}]{}：{}",
                id,
                Exception::ResponseNotSent,
                request.full_url()
            );
            Response::response_500(head_only)
        }
        Err(fault) if fault.exception == Exception::ServerShuttingDown => {
            warn!("[ID{}]服务器正在关闭，拒绝请求：{}", id, request.full_url());
            Response::from_status_code(503, head_only)
        }
        Err(fault) => match supervisor.policy() {
            RecoveryPolicy::Development => {
                Response::response_fault(&fault.exception, id, fault.restarted, head_only)
            }
            RecoveryPolicy::Production => {
                error!("[ID{}]应用故障：{}", id, fault.exception);
                Response::response_500(head_only)
            }
        },
    }
}
