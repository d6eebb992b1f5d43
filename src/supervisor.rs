// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 应用监管模块
//!
//! 宿主一侧的生命周期状态机。每个周期（epoch）对应一个全新的应用实例：
//!
//! 1. 周期内第一个请求到达时构造实例并调用 `start`，期间持有写锁，不会有 `handle` 并发进入。
//! 2. `start` 完成后写锁降级为读锁，同一实例上的多个 `handle` 可以并发执行。
//! 3. 重载、关闭或故障恢复时获取写锁：写锁要等所有在途的 `handle` 释放读锁，
//!    因此 `stop` 一定在最后一个 `handle` 完成之后执行（先排空再停止）。
//! 4. `stop` 之后实例被丢弃，下一个请求会开启新的周期。
//! 5. `shutdown` 之后监管者关闭，不再构造任何实例。

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::{RwLock, RwLockReadGuard};

use crate::{
    app::App, exception::Exception, request::AppRequest, response::AppResponse,
    server::ServerHandle,
};

/// 单个周期内应用实例所处的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochState {
    Constructed,
    Starting,
    Ready,
    /// 至少有一个 `handle` 正在执行，可重入
    Handling,
    Stopping,
    Stopped,
}

impl EpochState {
    /// 状态迁移。`Handling` 由在途请求数推导，不参与显式迁移。
    fn transition(self, next: EpochState) -> Result<EpochState, Exception> {
        use EpochState::*;
        match (self, next) {
            (Constructed, Starting)
            | (Starting, Ready)
            | (Starting, Stopping)
            | (Ready, Stopping)
            | (Stopping, Stopped) => Ok(next),
            _ => Err(Exception::AppFault(format!(
                "illegal lifecycle transition {} -> {}",
                self, next
            ))),
        }
    }
}

impl fmt::Display for EpochState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EpochState::Constructed => "constructed",
            EpochState::Starting => "starting",
            EpochState::Ready => "ready",
            EpochState::Handling => "handling",
            EpochState::Stopping => "stopping",
            EpochState::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// 宿主的故障恢复策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPolicy {
    /// 开发模式：故障后停止并丢弃实例，下一个请求重新启动
    Development,
    /// 生产模式：故障只影响当前请求，实例继续运行
    Production,
}

/// 一次 `dispatch` 失败时的结果
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub exception: Exception,
    /// 故障所属周期是否已被停止并丢弃
    pub restarted: bool,
}

struct Epoch<A> {
    id: u64,
    app: A,
    state: EpochState,
    in_flight: AtomicUsize,
}

impl<A> Epoch<A> {
    fn state(&self) -> EpochState {
        if self.state == EpochState::Ready && self.in_flight.load(Ordering::SeqCst) > 0 {
            EpochState::Handling
        } else {
            self.state
        }
    }

    fn advance(&mut self, next: EpochState) {
        match self.state.transition(next) {
            Ok(state) => self.state = state,
            Err(e) => error!("[EPOCH{}]{}", self.id, e),
        }
    }
}

/// 在途请求计数守卫，离开作用域时自动减一
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

type Factory<A> = Box<dyn Fn() -> A + Send + Sync>;

pub struct Supervisor<A: App> {
    server: Arc<ServerHandle>,
    factory: Factory<A>,
    policy: RecoveryPolicy,
    slot: RwLock<Option<Epoch<A>>>,
    next_epoch: AtomicU64,
    stopped_epochs: AtomicU64,
    /// 只在持有写锁时置位
    closed: AtomicBool,
}

impl<A: App> Supervisor<A> {
    /// * `factory` - 每个周期调用一次，返回一个全新的应用实例
    pub fn new<F>(server: Arc<ServerHandle>, policy: RecoveryPolicy, factory: F) -> Self
    where
        F: Fn() -> A + Send + Sync + 'static,
    {
        Self {
            server,
            factory: Box::new(factory),
            policy,
            slot: RwLock::new(None),
            next_epoch: AtomicU64::new(0),
            stopped_epochs: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// 把请求交给当前周期的应用实例，必要时先开启新周期。
    ///
    /// 返回 `Err` 时响应一定没有被应用发送，宿主负责给出错误页面。
    pub async fn dispatch(
        &self,
        request: &dyn AppRequest,
        response: &mut dyn AppResponse,
    ) -> Result<(), Fault> {
        let guard = self.acquire(request, response).await.map_err(|exception| Fault {
            exception,
            restarted: false,
        })?;
        let Some(epoch) = guard.as_ref() else {
            return Err(Fault {
                exception: Exception::AppStartFailed("no live app instance".to_string()),
                restarted: false,
            });
        };
        let id = epoch.id;

        let result = {
            let _in_flight = InFlight::enter(&epoch.in_flight);
            epoch.app.handle(request, response).await
        };
        drop(guard);

        match result {
            Ok(()) => Ok(()),
            Err(exception) => {
                warn!("[EPOCH{}]应用处理请求时发生未处理的故障：{}", id, exception);
                let restarted = match self.policy {
                    RecoveryPolicy::Development => {
                        self.stop_epoch(Some(id), "故障恢复", false).await;
                        true
                    }
                    RecoveryPolicy::Production => false,
                };
                Err(Fault {
                    exception,
                    restarted,
                })
            }
        }
    }

    /// 热重载：排空在途请求后停止当前实例，下一个请求会用新实例重新启动。
    pub async fn reload(&self) -> bool {
        self.stop_epoch(None, "热重载", false).await
    }

    /// 关闭：排空在途请求后停止当前实例，之后的 `dispatch` 一律返回
    /// `ServerShuttingDown`，不会再构造新实例。
    pub async fn shutdown(&self) -> bool {
        self.stop_epoch(None, "关闭", true).await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 当前周期的状态；没有存活实例时为 `Stopped`
    pub async fn state(&self) -> EpochState {
        match self.slot.read().await.as_ref() {
            Some(epoch) => epoch.state(),
            None => EpochState::Stopped,
        }
    }

    /// 当前存活的周期编号，从 1 开始
    pub async fn epoch(&self) -> Option<u64> {
        self.slot.read().await.as_ref().map(|epoch| epoch.id)
    }

    /// 已停止的周期数（故障恢复、重载与关闭）
    pub fn stopped_epochs(&self) -> u64 {
        self.stopped_epochs.load(Ordering::SeqCst)
    }

    pub fn policy(&self) -> RecoveryPolicy {
        self.policy
    }

    pub fn server(&self) -> &Arc<ServerHandle> {
        &self.server
    }

    /// 取得存活实例的读锁；没有实例时在写锁下开启新周期，再降级为读锁。
    async fn acquire(
        &self,
        request: &dyn AppRequest,
        response: &mut dyn AppResponse,
    ) -> Result<RwLockReadGuard<'_, Option<Epoch<A>>>, Exception> {
        {
            let guard = self.slot.read().await;
            if guard.is_some() {
                return Ok(guard);
            }
        }

        let mut guard = self.slot.write().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(Exception::ServerShuttingDown);
        }
        // 等待写锁期间可能已有其他请求完成了启动
        if guard.is_none() {
            let epoch = self.start_epoch(request, response).await?;
            *guard = Some(epoch);
        }
        Ok(guard.downgrade())
    }

    async fn start_epoch(
        &self,
        request: &dyn AppRequest,
        response: &mut dyn AppResponse,
    ) -> Result<Epoch<A>, Exception> {
        let id = self.next_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let mut epoch = Epoch {
            id,
            app: (self.factory)(),
            state: EpochState::Constructed,
            in_flight: AtomicUsize::new(0),
        };
        debug!("[EPOCH{}]应用实例已构造", id);

        epoch.advance(EpochState::Starting);
        match epoch.app.start(&self.server, request, response).await {
            Ok(()) => {
                epoch.advance(EpochState::Ready);
                info!("[EPOCH{}]应用已启动", id);
                Ok(epoch)
            }
            Err(e) => {
                error!("[EPOCH{}]应用启动失败：{}", id, e);
                // 释放启动过程中可能已获取的资源
                epoch.advance(EpochState::Stopping);
                if let Err(stop_error) = epoch.app.stop(&self.server).await {
                    error!("[EPOCH{}]启动失败后停止应用也失败：{}", id, stop_error);
                }
                epoch.advance(EpochState::Stopped);
                Err(match e {
                    Exception::AppStartFailed(_) => e,
                    other => Exception::AppStartFailed(other.to_string()),
                })
            }
        }
    }

    /// 停止并丢弃当前实例。`expected` 不为空时只停止该编号的周期，
    /// 避免同一周期内多个并发故障导致后续新周期被误停。
    /// `close` 为真时在同一把写锁下关闭监管者。
    async fn stop_epoch(&self, expected: Option<u64>, reason: &str, close: bool) -> bool {
        let mut guard = self.slot.write().await;
        if close {
            self.closed.store(true, Ordering::SeqCst);
        }
        let matches = match (guard.as_ref(), expected) {
            (Some(epoch), Some(id)) => epoch.id == id,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !matches {
            debug!("{}：没有需要停止的实例", reason);
            return false;
        }
        // 持有写锁直到 stop 完成，新周期的 start 只能在此之后开始
        let Some(mut epoch) = guard.take() else {
            return false;
        };

        epoch.advance(EpochState::Stopping);
        if let Err(e) = epoch.app.stop(&self.server).await {
            error!("[EPOCH{}]停止应用失败：{}", epoch.id, e);
        }
        epoch.advance(EpochState::Stopped);
        self.stopped_epochs.fetch_add(1, Ordering::SeqCst);
        info!("[EPOCH{}]应用已停止（{}）", epoch.id, reason);
        true
    }
}
