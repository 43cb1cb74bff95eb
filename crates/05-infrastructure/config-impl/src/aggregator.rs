//! 配置聚合器实现

use crate::merge::merge_slots;
use crate::options::ConfigOptions;
use crate::watcher::ValueWatcher;
use config_abstractions::{
    ChangeSet, ConfigReader, ConfigSource, ConfigValue, ConfigValues, SourceWatcher,
    FALLBACK_SOURCE_NAME,
};
use infrastructure_common::ConfigError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 配置聚合器
///
/// 从多个相互独立的配置源读取配置快照，按优先级合并为一个逻辑文档，
/// 并在任一配置源变更时实时更新合并结果。
///
/// 每个配置源对应一个独立的监听任务；槽位数组、合并结果、配置源列表与
/// 监听器注册表由同一把读写锁保护，合并在写锁内串行执行，读者只会看到
/// 完整的合并前或合并后文档。
///
/// 必须在 Tokio 运行时内创建。
pub struct ConfigAggregator {
    inner: Arc<AggregatorInner>,
}

pub(crate) struct AggregatorInner {
    reader: Arc<dyn ConfigReader>,
    retry_interval: Duration,
    state: RwLock<AggregatorState>,
    shutdown: CancellationToken,
}

struct AggregatorState {
    /// 配置源列表，索引即优先级
    sources: Vec<Arc<dyn ConfigSource>>,
    /// 每个配置源最近一次的快照
    slots: Vec<Option<Arc<ChangeSet>>>,
    /// 当前合并结果
    set: Option<Arc<ChangeSet>>,
    /// 当前值树
    values: Option<Arc<dyn ConfigValues>>,
    /// 监听器注册表
    watchers: HashMap<u64, WatcherEntry>,
    next_watcher_id: u64,
}

struct WatcherEntry {
    path: Vec<String>,
    updates: mpsc::Sender<ConfigValue>,
}

impl AggregatorState {
    fn commit(&mut self, set: Arc<ChangeSet>, values: Arc<dyn ConfigValues>) {
        self.set = Some(set);
        self.values = Some(values);
    }
}

impl ConfigAggregator {
    /// 创建聚合器并为每个配置源启动监听任务
    pub fn new(options: ConfigOptions) -> Self {
        let ConfigOptions {
            sources,
            reader,
            retry_interval,
        } = options;

        let inner = Arc::new(AggregatorInner {
            reader,
            retry_interval,
            state: RwLock::new(AggregatorState {
                sources: sources.clone(),
                slots: vec![None; sources.len()],
                set: None,
                values: None,
                watchers: HashMap::new(),
                next_watcher_id: 0,
            }),
            shutdown: CancellationToken::new(),
        });

        info!("启动配置聚合器，配置源数量: {}", sources.len());
        for (idx, source) in sources.into_iter().enumerate() {
            inner.spawn_source_loop(idx, source);
        }

        Self { inner }
    }

    /// 按路径获取配置值，从不失败
    ///
    /// 首次访问时如果尚无合并结果，会同步读取所有配置源完成冷启动。
    pub async fn get(&self, path: &[&str]) -> ConfigValue {
        self.inner.ensure_loaded().await;

        let state = self.inner.state.read().await;
        state
            .values
            .as_ref()
            .map_or_else(ConfigValue::empty, |values| values.get(path))
    }

    /// 整个合并文档的序列化结果，尚未加载任何内容时为空
    pub async fn bytes(&self) -> Vec<u8> {
        self.inner.ensure_loaded().await;

        let state = self.inner.state.read().await;
        state
            .values
            .as_ref()
            .map(|values| values.bytes())
            .unwrap_or_default()
    }

    /// 当前合并快照
    pub async fn merged_set(&self) -> Option<Arc<ChangeSet>> {
        self.inner.state.read().await.set.clone()
    }

    /// 运行时追加配置源
    ///
    /// 每个新配置源先同步读取一次（失败则忽略），随后追加到配置源列表并启动监听任务，
    /// 最后对全部槽位重新合并一次，使新配置源无需等待首次变更即可生效。
    pub async fn load(&self, sources: Vec<Arc<dyn ConfigSource>>) -> Result<(), ConfigError> {
        self.inner.ensure_loaded().await;

        for source in sources {
            let initial = match source.read().await {
                Ok(change_set) => Some(Arc::new(change_set)),
                Err(e) => {
                    debug!("加载配置源 {} 时初次读取失败，已忽略: {}", source.name(), e);
                    None
                }
            };

            let idx = {
                let mut state = self.inner.state.write().await;
                state.sources.push(Arc::clone(&source));
                state.slots.push(initial);
                state.slots.len() - 1
            };

            info!("加载配置源: {}，优先级索引: {}", source.name(), idx);
            self.inner.spawn_source_loop(idx, source);
        }

        self.inner.reload().await;
        Ok(())
    }

    /// 订阅路径上的变更
    ///
    /// 以当前值作为基线，之后只有序列化结果不同的值才会由 [`ValueWatcher::next`] 返回。
    pub async fn watch(&self, path: &[&str]) -> Result<ValueWatcher, ConfigError> {
        let baseline = self.get(path).await;
        let path: Vec<String> = path.iter().map(|segment| (*segment).to_string()).collect();
        let (sender, receiver) = mpsc::channel(1);

        let id = {
            let mut state = self.inner.state.write().await;
            let id = state.next_watcher_id;
            state.next_watcher_id += 1;
            state.watchers.insert(
                id,
                WatcherEntry {
                    path: path.clone(),
                    updates: sender,
                },
            );
            id
        };

        debug!("注册配置监听器 {}: {}", id, path.join("."));
        Ok(ValueWatcher::new(
            id,
            path,
            baseline,
            receiver,
            Arc::downgrade(&self.inner),
        ))
    }

    /// 关闭聚合器，幂等
    ///
    /// 所有监听任务在当前阻塞步骤被唤醒后退出；已创建的监听器不会被强制停止，
    /// 只是不再收到新的更新。
    pub fn close(&self) -> Result<(), ConfigError> {
        if !self.inner.shutdown.is_cancelled() {
            info!("关闭配置聚合器");
            self.inner.shutdown.cancel();
        }
        Ok(())
    }

    /// 是否已关闭
    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// 获取配置源数量
    pub async fn source_count(&self) -> usize {
        self.inner.state.read().await.sources.len()
    }

    /// 获取已注册的监听器数量
    pub async fn watcher_count(&self) -> usize {
        self.inner.state.read().await.watchers.len()
    }
}

impl Drop for ConfigAggregator {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl std::fmt::Debug for ConfigAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigAggregator")
            .field("reader", &self.inner.reader.name())
            .field("retry_interval", &self.inner.retry_interval)
            .field("closed", &self.inner.shutdown.is_cancelled())
            .finish()
    }
}

impl AggregatorInner {
    fn spawn_source_loop(self: &Arc<Self>, idx: usize, source: Arc<dyn ConfigSource>) {
        tokio::spawn(Arc::clone(self).run_source_loop(idx, source));
    }

    /// 单个配置源的监听循环
    async fn run_source_loop(self: Arc<Self>, idx: usize, source: Arc<dyn ConfigSource>) {
        debug!("配置源 {} 监听任务启动，索引: {}", source.name(), idx);
        let mut failures: u32 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let stream: Arc<dyn SourceWatcher> = match source.watch().await {
                Ok(stream) => Arc::from(stream),
                Err(e) => {
                    failures += 1;
                    warn!(
                        "配置源 {} 打开变更流失败(第 {} 次): {}，{:?} 后重试",
                        source.name(),
                        failures,
                        e,
                        self.retry_interval
                    );
                    if self.backoff().await {
                        break;
                    }
                    continue;
                }
            };

            if failures > 0 {
                info!("配置源 {} 变更流已恢复", source.name());
                failures = 0;
            }

            let done = CancellationToken::new();
            let stopper = tokio::spawn(stop_stream_on_exit(
                Arc::clone(&stream),
                done.clone(),
                self.shutdown.clone(),
                source.name().to_string(),
            ));

            let stream_error = self.consume_stream(idx, stream.as_ref()).await;

            done.cancel();
            if let Err(e) = stopper.await {
                error!("配置源 {} 的停止任务异常退出: {}", source.name(), e);
            }

            if self.shutdown.is_cancelled() {
                break;
            }

            failures += 1;
            warn!(
                "配置源 {} 变更流中断: {}，{:?} 后重新订阅",
                source.name(),
                stream_error,
                self.retry_interval
            );
            if self.backoff().await {
                break;
            }
        }

        info!("配置源 {} 监听任务退出", source.name());
    }

    /// 持续消费变更流，直到变更流出错
    async fn consume_stream(&self, idx: usize, stream: &dyn SourceWatcher) -> ConfigError {
        loop {
            match stream.next().await {
                Ok(change_set) => self.apply_change_set(idx, change_set).await,
                Err(e) => return e,
            }
        }
    }

    /// 固定退避，返回是否在等待期间收到关闭信号
    async fn backoff(&self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.retry_interval) => false,
            _ = self.shutdown.cancelled() => true,
        }
    }

    /// 写入槽位并重新合并
    ///
    /// 合并失败时槽位与合并结果都保持不变，本次变更被丢弃。
    async fn apply_change_set(&self, idx: usize, change_set: ChangeSet) {
        let source_name = change_set.source.clone();

        {
            let mut state = self.state.write().await;
            let mut candidate = state.slots.clone();
            match candidate.get_mut(idx) {
                Some(slot) => *slot = Some(Arc::new(change_set)),
                None => {
                    error!("配置源 {} 的槽位索引 {} 越界", source_name, idx);
                    return;
                }
            }

            match self.merge(&candidate) {
                Ok((set, values)) => {
                    state.slots = candidate;
                    state.commit(set, values);
                }
                Err(e) => {
                    warn!("配置源 {} 的变更合并失败，保留原有配置: {}", source_name, e);
                    return;
                }
            }
        }

        debug!("配置源 {} 的变更已合并", source_name);
        self.notify_watchers().await;
    }

    fn merge(
        &self,
        slots: &[Option<Arc<ChangeSet>>],
    ) -> Result<(Arc<ChangeSet>, Arc<dyn ConfigValues>), ConfigError> {
        let set = merge_slots(self.reader.as_ref(), slots)?;
        let values = self.reader.values(&set)?;
        Ok((Arc::new(set), values))
    }

    /// 对全部槽位重新合并
    async fn reload(&self) {
        {
            let mut state = self.state.write().await;
            match self.merge(&state.slots) {
                Ok((set, values)) => state.commit(set, values),
                Err(e) => {
                    warn!("重新合并配置失败，保留原有配置: {}", e);
                    return;
                }
            }
        }

        self.notify_watchers().await;
    }

    /// 确保冷启动已完成
    async fn ensure_loaded(&self) {
        if self.state.read().await.values.is_some() {
            return;
        }

        let loaded = {
            let mut state = self.state.write().await;
            if state.values.is_some() {
                return;
            }
            self.bootstrap(&mut state).await
        };

        if loaded {
            self.notify_watchers().await;
        }
    }

    /// 冷启动：直接读取所有配置源并合并
    ///
    /// 合并失败时以空文档回退，保证读取路径总能得到可用的值。
    async fn bootstrap(&self, state: &mut AggregatorState) -> bool {
        info!("配置尚未加载，读取 {} 个配置源完成冷启动", state.sources.len());

        let mut reads = Vec::with_capacity(state.sources.len());
        for source in &state.sources {
            match source.read().await {
                Ok(change_set) => reads.push(Some(Arc::new(change_set))),
                Err(e) => {
                    warn!("冷启动读取配置源 {} 失败，已忽略: {}", source.name(), e);
                    reads.push(None);
                }
            }
        }

        match self.merge(&reads) {
            Ok((set, values)) => {
                for (slot, read) in state.slots.iter_mut().zip(reads) {
                    if slot.is_none() {
                        *slot = read;
                    }
                }
                state.commit(set, values);
                true
            }
            Err(e) => {
                let exhausted = ConfigError::BootstrapExhausted {
                    message: e.to_string(),
                };
                warn!("{}，使用空配置文档回退", exhausted);

                let empty = Arc::new(ChangeSet::empty(FALLBACK_SOURCE_NAME));
                match self.reader.values(&empty) {
                    Ok(values) => {
                        state.commit(empty, values);
                        true
                    }
                    Err(e) => {
                        error!("空配置文档回退失败: {}", e);
                        false
                    }
                }
            }
        }
    }

    /// 向所有监听器分发新值
    ///
    /// 在同一次读锁内取得当前值树与注册表快照，投递在锁外进行；
    /// 槽位已满的监听器本次更新被丢弃。
    async fn notify_watchers(&self) {
        let (values, targets): (_, Vec<(u64, Vec<String>, mpsc::Sender<ConfigValue>)>) = {
            let state = self.state.read().await;
            let Some(values) = state.values.clone() else {
                return;
            };
            let targets = state
                .watchers
                .iter()
                .map(|(id, entry)| (*id, entry.path.clone(), entry.updates.clone()))
                .collect();
            (values, targets)
        };

        let mut closed = Vec::new();
        for (id, path, updates) in targets {
            let segments: Vec<&str> = path.iter().map(String::as_str).collect();
            match updates.try_send(values.get(&segments)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!("监听器 {} 尚未消费上一次更新，丢弃本次更新", id);
                }
                Err(TrySendError::Closed(_)) => closed.push(id),
            }
        }

        if !closed.is_empty() {
            let mut state = self.state.write().await;
            for id in closed {
                if state.watchers.remove(&id).is_some() {
                    debug!("清理已释放的配置监听器 {}", id);
                }
            }
        }
    }

    /// 从注册表移除监听器
    pub(crate) async fn unregister(&self, id: u64) {
        let mut state = self.state.write().await;
        if state.watchers.remove(&id).is_some() {
            debug!("移除配置监听器 {}", id);
        }
    }
}

/// 在变更流结束或全局关闭时停止变更流，唤醒挂起中的 `next`
async fn stop_stream_on_exit(
    stream: Arc<dyn SourceWatcher>,
    done: CancellationToken,
    shutdown: CancellationToken,
    source_name: String,
) {
    tokio::select! {
        _ = done.cancelled() => {}
        _ = shutdown.cancelled() => {}
    }

    if let Err(e) = stream.stop().await {
        debug!("停止配置源 {} 的变更流失败: {}", source_name, e);
    }
}
