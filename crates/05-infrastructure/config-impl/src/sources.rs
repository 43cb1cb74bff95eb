//! 配置源实现

use async_trait::async_trait;
use config_abstractions::{ChangeSet, ConfigFormat, ConfigSource, SourceWatcher};
use infrastructure_common::ConfigError;
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 内存配置源
///
/// 内容由调用方通过 [`MemorySource::update`] 推送，推送时广播给所有已打开的变更流。
/// 变更流只投递打开之后发生的更新。
#[derive(Debug)]
pub struct MemorySource {
    name: String,
    current: parking_lot::RwLock<ChangeSet>,
    updates: broadcast::Sender<ChangeSet>,
}

impl MemorySource {
    /// 创建新的内存配置源
    pub fn new(name: impl Into<String>, format: ConfigFormat, data: impl Into<Vec<u8>>) -> Self {
        let name = name.into();
        let (updates, _) = broadcast::channel(16);
        Self {
            current: parking_lot::RwLock::new(ChangeSet::new(name.clone(), format, data)),
            name,
            updates,
        }
    }

    /// 以 JSON 文档创建内存配置源
    pub fn from_json(name: impl Into<String>, value: &Value) -> Self {
        Self::new(name, ConfigFormat::Json, value.to_string().into_bytes())
    }

    /// 替换内容并通知所有变更流
    pub fn update(&self, format: ConfigFormat, data: impl Into<Vec<u8>>) -> ChangeSet {
        let change_set = ChangeSet::new(self.name.clone(), format, data);
        *self.current.write() = change_set.clone();

        match self.updates.send(change_set.clone()) {
            Ok(receivers) => debug!("内存配置源 {} 已推送更新到 {} 个变更流", self.name, receivers),
            Err(_) => debug!("内存配置源 {} 暂无变更流订阅", self.name),
        }
        change_set
    }

    /// 以 JSON 文档替换内容
    pub fn update_json(&self, value: &Value) -> ChangeSet {
        self.update(ConfigFormat::Json, value.to_string().into_bytes())
    }

    /// 当前已打开的变更流数量
    pub fn subscriber_count(&self) -> usize {
        self.updates.receiver_count()
    }
}

#[async_trait]
impl ConfigSource for MemorySource {
    async fn read(&self) -> Result<ChangeSet, ConfigError> {
        Ok(self.current.read().clone())
    }

    async fn watch(&self) -> Result<Box<dyn SourceWatcher>, ConfigError> {
        Ok(Box::new(MemorySourceWatcher {
            name: self.name.clone(),
            updates: Mutex::new(self.updates.subscribe()),
            exit: CancellationToken::new(),
        }))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct MemorySourceWatcher {
    name: String,
    updates: Mutex<broadcast::Receiver<ChangeSet>>,
    exit: CancellationToken,
}

#[async_trait]
impl SourceWatcher for MemorySourceWatcher {
    async fn next(&self) -> Result<ChangeSet, ConfigError> {
        let mut updates = self.updates.lock().await;
        loop {
            let received = tokio::select! {
                biased;
                _ = self.exit.cancelled() => {
                    return Err(ConfigError::source_unavailable(&self.name, "变更流已停止"));
                }
                received = updates.recv() => received,
            };

            match received {
                Ok(change_set) => return Ok(change_set),
                Err(RecvError::Lagged(skipped)) => {
                    debug!("内存配置源 {} 的变更流落后，跳过 {} 次更新", self.name, skipped);
                }
                Err(RecvError::Closed) => {
                    return Err(ConfigError::source_unavailable(&self.name, "配置源已释放"));
                }
            }
        }
    }

    async fn stop(&self) -> Result<(), ConfigError> {
        self.exit.cancel();
        Ok(())
    }
}

/// 文件配置源
///
/// 通过监控文件所在目录感知变更，内容未变化的事件不会产生新的快照。
#[derive(Debug, Clone)]
pub struct FileSource {
    name: String,
    path: PathBuf,
    format: ConfigFormat,
}

impl FileSource {
    /// 创建新的文件配置源，格式根据扩展名推断
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path).ok_or_else(|| ConfigError::TypeConversionError {
            message: format!("无法根据扩展名推断配置格式: {}", path.display()),
        })?;
        Ok(Self::with_format(path, format))
    }

    /// 以指定格式创建文件配置源
    pub fn with_format<P: AsRef<Path>>(path: P, format: ConfigFormat) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            name: format!("file:{}", path.display()),
            path,
            format,
        }
    }

    /// 文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 配置格式
    pub fn format(&self) -> ConfigFormat {
        self.format
    }
}

async fn read_file(name: &str, path: &Path, format: ConfigFormat) -> Result<ChangeSet, ConfigError> {
    let data = tokio::fs::read(path).await.map_err(|e| {
        ConfigError::source_unavailable(name, format!("读取 {} 失败: {}", path.display(), e))
    })?;
    Ok(ChangeSet::new(name, format, data))
}

#[async_trait]
impl ConfigSource for FileSource {
    async fn read(&self) -> Result<ChangeSet, ConfigError> {
        debug!("读取配置文件: {}", self.path.display());
        read_file(&self.name, &self.path, self.format).await
    }

    async fn watch(&self) -> Result<Box<dyn SourceWatcher>, ConfigError> {
        let (events_tx, events_rx) = mpsc::channel(1);
        let file_name = self.path.file_name().map(|name| name.to_os_string());

        // notify 的回调在其内部线程中同步执行，这里只做过滤与非阻塞投递
        let mut watcher = recommended_watcher(move |res: Result<Event, notify::Error>| {
            let event = match res {
                Ok(event) => {
                    let relevant = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if !relevant {
                        return;
                    }
                    match event.kind {
                        EventKind::Create(_) | EventKind::Modify(_) => FileEvent::Changed,
                        EventKind::Remove(_) => FileEvent::Removed,
                        _ => return,
                    }
                }
                Err(e) => FileEvent::Failed(e.to_string()),
            };
            // 槽位已满说明已有待处理事件，重新读取文件即可覆盖本次变更
            let _ = events_tx.try_send(event);
        })
        .map_err(|e| ConfigError::watch_error(format!("创建文件监控器失败: {}", e)))?;

        let directory = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher
            .watch(&directory, RecursiveMode::NonRecursive)
            .map_err(|e| ConfigError::watch_error(format!("添加监控路径失败: {} - {}", directory.display(), e)))?;

        info!("开始监控配置文件: {}", self.path.display());
        Ok(Box::new(FileSourceWatcher {
            name: self.name.clone(),
            path: self.path.clone(),
            format: self.format,
            events: Mutex::new(events_rx),
            watcher: parking_lot::Mutex::new(Some(watcher)),
            last_checksum: parking_lot::Mutex::new(None),
            exit: CancellationToken::new(),
        }))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug)]
enum FileEvent {
    Changed,
    Removed,
    Failed(String),
}

struct FileSourceWatcher {
    name: String,
    path: PathBuf,
    format: ConfigFormat,
    events: Mutex<mpsc::Receiver<FileEvent>>,
    watcher: parking_lot::Mutex<Option<RecommendedWatcher>>,
    last_checksum: parking_lot::Mutex<Option<String>>,
    exit: CancellationToken,
}

impl FileSourceWatcher {
    /// 记录摘要，返回内容是否与上次投递相同
    fn is_unchanged(&self, checksum: &str) -> bool {
        let mut last = self.last_checksum.lock();
        if last.as_deref() == Some(checksum) {
            return true;
        }
        *last = Some(checksum.to_string());
        false
    }
}

#[async_trait]
impl SourceWatcher for FileSourceWatcher {
    async fn next(&self) -> Result<ChangeSet, ConfigError> {
        let mut events = self.events.lock().await;
        loop {
            let event = tokio::select! {
                biased;
                _ = self.exit.cancelled() => {
                    return Err(ConfigError::source_unavailable(&self.name, "文件监控已停止"));
                }
                event = events.recv() => event,
            };

            match event {
                Some(FileEvent::Changed) => {
                    let change_set = read_file(&self.name, &self.path, self.format).await?;
                    if self.is_unchanged(&change_set.checksum) {
                        debug!("配置文件内容未变化: {}", self.path.display());
                        continue;
                    }
                    return Ok(change_set);
                }
                Some(FileEvent::Removed) => {
                    return Err(ConfigError::watch_error(format!(
                        "配置文件已删除: {}",
                        self.path.display()
                    )));
                }
                Some(FileEvent::Failed(message)) => {
                    warn!("文件监控错误: {} - {}", self.path.display(), message);
                    return Err(ConfigError::watch_error(message));
                }
                None => return Err(ConfigError::watch_error("文件监控通道已关闭")),
            }
        }
    }

    async fn stop(&self) -> Result<(), ConfigError> {
        self.exit.cancel();
        if self.watcher.lock().take().is_some() {
            debug!("停止监控配置文件: {}", self.path.display());
        }
        Ok(())
    }
}

/// 环境变量配置源
///
/// 收集带指定前缀的环境变量，去掉前缀后按分隔符拆分为小写的嵌套路径。
/// 进程内环境变量视为不变，变更流从不投递，直到被停止。
#[derive(Debug, Clone)]
pub struct EnvironmentSource {
    prefix: String,
    separator: String,
}

impl EnvironmentSource {
    /// 创建新的环境变量配置源，默认分隔符为 `_`
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            separator: "_".to_string(),
        }
    }

    /// 设置分隔符
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// 收集匹配的环境变量为嵌套文档
    fn collect(&self) -> Value {
        let full_prefix = format!("{}{}", self.prefix, self.separator);
        // 非 UTF-8 的环境变量无法表示为配置值，直接跳过
        let mut vars: Vec<(String, String)> = std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .filter(|(key, _)| key.starts_with(&full_prefix))
            .collect();
        vars.sort();

        let mut root = Map::new();
        for (key, value) in vars {
            let segments: Vec<String> = key[full_prefix.len()..]
                .split(self.separator.as_str())
                .filter(|segment| !segment.is_empty())
                .map(str::to_lowercase)
                .collect();
            insert_path(&mut root, &segments, parse_scalar(&value));
        }

        debug!("加载了 {} 个顶层环境变量配置项，前缀: {}", root.len(), self.prefix);
        Value::Object(root)
    }
}

#[async_trait]
impl ConfigSource for EnvironmentSource {
    async fn read(&self) -> Result<ChangeSet, ConfigError> {
        let data = serde_json::to_vec(&self.collect())?;
        Ok(ChangeSet::new(self.name(), ConfigFormat::Json, data))
    }

    async fn watch(&self) -> Result<Box<dyn SourceWatcher>, ConfigError> {
        Ok(Box::new(EnvironmentWatcher {
            exit: CancellationToken::new(),
        }))
    }

    fn name(&self) -> &str {
        "env"
    }
}

struct EnvironmentWatcher {
    exit: CancellationToken,
}

#[async_trait]
impl SourceWatcher for EnvironmentWatcher {
    async fn next(&self) -> Result<ChangeSet, ConfigError> {
        self.exit.cancelled().await;
        Err(ConfigError::source_unavailable("env", "环境变量监听已停止"))
    }

    async fn stop(&self) -> Result<(), ConfigError> {
        self.exit.cancel();
        Ok(())
    }
}

/// 按路径插入值，路径上的非对象节点会被替换为对象
fn insert_path(root: &mut Map<String, Value>, segments: &[String], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut current = root;
    for segment in parents {
        let entry = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Some(next) = entry.as_object_mut() else {
            return;
        };
        current = next;
    }
    current.insert(last.clone(), value);
}

/// 尝试解析为布尔、整数、浮点，否则保留字符串
fn parse_scalar(value: &str) -> Value {
    if let Ok(bool_val) = value.parse::<bool>() {
        Value::Bool(bool_val)
    } else if let Ok(int_val) = value.parse::<i64>() {
        Value::Number(serde_json::Number::from(int_val))
    } else if let Some(number) = value
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
    {
        Value::Number(number)
    } else {
        Value::String(value.to_string())
    }
}
