// lib.rs
//
// ================================================================================
// Tianqi Bot - 天气查询机器人运行时
//
// 架构：OneBot 风格事件 | 插件化系统 | 平台适配器注册表 | 原子配置
// ================================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{error, info, warn};

pub mod adapters;
pub mod log;
pub mod plugins;
pub mod store;

use store::{FileStore, KvStore};

// ============================================================================
// 1. Error Types (统一错误处理)
// ============================================================================

/// 运行时核心错误类型
pub type BotError = Box<dyn std::error::Error + Send + Sync>;

pub type BotResult<T> = Result<T, BotError>;

/// 回复通道解析失败的原因
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SenderError {
    #[error("事件缺少平台信息")]
    MissingPlatform,
    #[error("未知的平台: {0}")]
    UnknownPlatform(String),
    #[error("事件缺少{0}接收者")]
    MissingRecipient(&'static str),
}

// ============================================================================
// 2. Event Model (事件模型)
// ============================================================================

/// 事件类型常量
pub mod event_types {
    pub const MESSAGE: &str = "message";
}

/// 消息细分类型常量
pub mod detail_types {
    pub const PRIVATE: &str = "private";
    pub const GROUP: &str = "group";
}

/// 机器人自身信息
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SelfInfo {
    /// 平台名称，同时也是适配器注册表的键
    #[serde(default)]
    pub platform: String,
    /// 机器人在该平台上的账号
    #[serde(default)]
    pub user_id: String,
}

/// 核心事件结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// 事件 ID
    #[serde(default)]
    pub id: String,
    /// 事件类型
    #[serde(rename = "type")]
    pub event_type: String,
    /// 细分类型（private / group）
    #[serde(default)]
    pub detail_type: String,
    /// 事件时间戳（毫秒）
    #[serde(default = "timestamp_millis")]
    pub time: i64,
    /// 来源平台
    #[serde(rename = "self", default)]
    pub self_info: SelfInfo,
    /// 纯文本形式的消息内容
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_message: Option<String>,
    /// 发送者
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// 群组
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

impl Default for Event {
    fn default() -> Self {
        Self {
            id: String::new(),
            event_type: String::new(),
            detail_type: String::new(),
            time: timestamp_millis(),
            self_info: SelfInfo::default(),
            alt_message: None,
            user_id: None,
            group_id: None,
        }
    }
}

impl Event {
    /// 创建私聊消息事件
    pub fn private_message(
        platform: impl Into<String>,
        user_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_types::MESSAGE.to_string(),
            detail_type: detail_types::PRIVATE.to_string(),
            self_info: SelfInfo {
                platform: platform.into(),
                user_id: String::new(),
            },
            alt_message: Some(text.into()),
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    /// 创建群消息事件
    pub fn group_message(
        platform: impl Into<String>,
        group_id: impl Into<String>,
        user_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_types::MESSAGE.to_string(),
            detail_type: detail_types::GROUP.to_string(),
            self_info: SelfInfo {
                platform: platform.into(),
                user_id: String::new(),
            },
            alt_message: Some(text.into()),
            user_id: Some(user_id.into()),
            group_id: Some(group_id.into()),
            ..Default::default()
        }
    }

    /// 设置事件 ID
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// 是否为消息事件
    pub fn is_message_event(&self) -> bool {
        self.event_type == event_types::MESSAGE
    }

    /// 是否为私聊（缺省的 detail_type 视作私聊）
    pub fn is_private(&self) -> bool {
        self.detail_type.is_empty() || self.detail_type == detail_types::PRIVATE
    }

    /// 获取消息文本
    pub fn text(&self) -> Option<&str> {
        self.alt_message.as_deref()
    }

    /// 获取发送者 ID
    pub fn sender_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// 获取群组 ID
    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    /// 获取平台名称
    pub fn platform(&self) -> Option<&str> {
        Some(self.self_info.platform.as_str()).filter(|p| !p.is_empty())
    }

    /// 根据 detail_type 计算回复目标：私聊回用户，其余回群
    pub fn reply_target(&self) -> Result<Target, SenderError> {
        if self.is_private() {
            self.sender_id()
                .map(|id| Target::User(id.to_string()))
                .ok_or(SenderError::MissingRecipient("用户"))
        } else {
            self.group_id()
                .map(|id| Target::Group(id.to_string()))
                .ok_or(SenderError::MissingRecipient("群组"))
        }
    }
}

/// 获取当前时间戳（毫秒）
fn timestamp_millis() -> i64 {
    chrono::Local::now().timestamp_millis()
}

// ============================================================================
// 3. Sender Capability (回复能力)
// ============================================================================

/// 消息发送目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    User(String),
    Group(String),
}

impl Target {
    pub fn kind(&self) -> &'static str {
        match self {
            Target::User(_) => "user",
            Target::Group(_) => "group",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Target::User(id) | Target::Group(id) => id,
        }
    }
}

/// 文本回复能力
#[async_trait]
pub trait Sender: Send + Sync {
    async fn text(&self, content: &str) -> BotResult<()>;
}

/// 绑定了具体适配器与目标的发送器
#[derive(Clone)]
pub struct AdapterSender {
    adapter: Arc<dyn Adapter>,
    target: Target,
}

impl AdapterSender {
    pub fn new(adapter: Arc<dyn Adapter>, target: Target) -> Self {
        Self { adapter, target }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }
}

#[async_trait]
impl Sender for AdapterSender {
    async fn text(&self, content: &str) -> BotResult<()> {
        self.adapter.send_text(&self.target, content).await
    }
}

// ============================================================================
// 4. Configuration System (配置系统)
// ============================================================================

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 核心配置
    #[serde(default)]
    pub core: CoreConfig,
    /// 插件配置（使用 flatten 支持任意插件配置）
    #[serde(flatten)]
    pub plugins: HashMap<String, toml::Value>,
}

/// 核心配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// 指令前缀
    #[serde(default = "default_cmd_prefix")]
    pub cmd_prefix: Vec<String>,
}

fn default_cmd_prefix() -> Vec<String> {
    vec!["/".to_string()]
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            cmd_prefix: default_cmd_prefix(),
        }
    }
}

impl AppConfig {
    /// 获取指定插件的配置
    pub fn get_plugin_config<T: for<'de> Deserialize<'de>>(&self, plugin_id: &str) -> Option<T> {
        self.plugins
            .get(plugin_id)
            .and_then(|v| v.clone().try_into().ok())
    }

    /// 插件是否启用（未配置 enabled 时默认启用）
    pub fn is_plugin_enabled(&self, plugin_id: &str) -> bool {
        self.plugins
            .get(plugin_id)
            .and_then(|v| v.get("enabled"))
            .and_then(|v| v.as_bool())
            .unwrap_or(true)
    }
}

/// 构建默认配置 Value，并确保包含 enabled 字段
pub fn build_config<T: Serialize>(data: T) -> toml::Value {
    let mut val =
        toml::Value::try_from(data).unwrap_or(toml::Value::Table(Default::default()));
    if let toml::Value::Table(ref mut map) = val
        && !map.contains_key("enabled")
    {
        map.insert("enabled".to_string(), toml::Value::Boolean(true));
    }
    val
}

/// 配置管理器
pub struct ConfigManager {
    path: PathBuf,
    config: RwLock<AppConfig>,
}

impl ConfigManager {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            config: RwLock::new(AppConfig::default()),
        }
    }

    /// 加载配置，如果文件不存在则创建默认配置
    pub async fn load(&self) -> BotResult<AppConfig> {
        if !self.path.exists() {
            let default_cfg = AppConfig::default();
            self.save_atomic(&default_cfg).await?;
            return Ok(default_cfg);
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        let cfg: AppConfig = toml::from_str(&content)?;

        let mut write_lock = self.config.write().await;
        *write_lock = cfg.clone();

        Ok(cfg)
    }

    /// 原子写入配置（写临时文件 -> Rename 覆盖）
    pub async fn save_atomic(&self, cfg: &AppConfig) -> BotResult<()> {
        let content = toml::to_string_pretty(cfg)?;
        write_atomic(self.path.clone(), content).await?;

        let mut write_lock = self.config.write().await;
        *write_lock = cfg.clone();

        Ok(())
    }

    /// 获取当前配置（只读）
    pub async fn get(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// 更新配置（会自动保存）
    pub async fn update<F>(&self, f: F) -> BotResult<AppConfig>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut cfg = self.config.write().await;
        f(&mut cfg);
        let new_cfg = cfg.clone();
        drop(cfg);

        self.save_atomic(&new_cfg).await?;
        Ok(new_cfg)
    }
}

/// 在阻塞线程中完成 "写临时文件 -> fsync -> rename"
pub(crate) async fn write_atomic(path: PathBuf, content: String) -> std::io::Result<()> {
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = path.with_extension("tmp");
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    })
    .await
    .map_err(std::io::Error::other)?
}

// ============================================================================
// 5. Plugin Traits (插件接口定义)
// ============================================================================

/// 平台适配器接口
/// 负责接收平台事件并把文本回复投递回平台
#[async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// 适配器唯一标识
    fn id(&self) -> &str;

    /// 适配器名称
    fn name(&self) -> &str;

    /// 服务的平台名称，对应事件中的 `self.platform`
    fn platform(&self) -> &str;

    /// 适配器版本
    fn version(&self) -> &str {
        "0.1.0"
    }

    /// 启动适配器
    async fn start(&self, ctx: AdapterContext) -> BotResult<()>;

    /// 停止适配器
    async fn stop(&self) -> BotResult<()>;

    /// 发送文本消息
    async fn send_text(&self, target: &Target, content: &str) -> BotResult<()>;
}

/// 适配器上下文，传递给适配器的 start 方法
pub struct AdapterContext {
    /// 事件发送通道
    pub event_tx: mpsc::Sender<Event>,
    /// 系统信号订阅
    pub system_rx: broadcast::Receiver<SystemSignal>,
    /// 用于请求关闭运行时
    pub system_tx: broadcast::Sender<SystemSignal>,
}

impl Clone for AdapterContext {
    fn clone(&self) -> Self {
        Self {
            event_tx: self.event_tx.clone(),
            system_rx: self.system_rx.resubscribe(),
            system_tx: self.system_tx.clone(),
        }
    }
}

/// 业务逻辑插件接口
#[async_trait]
pub trait Plugin: Send + Sync {
    /// 插件唯一标识，同时是配置文件中的段名
    fn id(&self) -> &str;

    /// 插件名称
    fn name(&self) -> &str;

    /// 插件描述
    fn description(&self) -> &str {
        ""
    }

    fn default_config(&self) -> Option<toml::Value> {
        None
    }

    /// 插件版本
    fn version(&self) -> &str {
        "0.1.0"
    }

    /// 插件优先级（数字越小优先级越高）
    fn priority(&self) -> i32 {
        100
    }

    /// 插件加载时调用
    async fn on_load(&self, _ctx: &PluginContext) -> BotResult<()> {
        Ok(())
    }

    /// 插件卸载时调用
    async fn on_unload(&self, _ctx: &PluginContext) -> BotResult<()> {
        Ok(())
    }

    /// 接收事件
    async fn on_event(&self, ctx: &PluginContext, event: &Event) -> BotResult<EventResult>;
}

/// 事件处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventResult {
    /// 继续传递事件给后续插件
    #[default]
    Continue,
    /// 停止传递事件（事件已被处理）
    Stop,
}

/// 适配器注册表：平台名 -> 适配器
pub type AdapterRegistry = HashMap<String, Arc<dyn Adapter>>;

/// 插件上下文
#[derive(Clone)]
pub struct PluginContext {
    inner: Arc<PluginContextInner>,
}

struct PluginContextInner {
    config: Arc<ConfigManager>,
    adapters: Arc<AdapterRegistry>,
    store: Arc<dyn KvStore>,
    plugin_id: String,
}

impl PluginContext {
    fn new(plugin_id: String, core: &BotInner) -> Self {
        Self {
            inner: Arc::new(PluginContextInner {
                config: core.config.clone(),
                adapters: core.adapters.clone(),
                store: core.store.clone(),
                plugin_id,
            }),
        }
    }

    /// 获取配置
    pub async fn config(&self) -> AppConfig {
        self.inner.config.get().await
    }

    /// 获取当前插件的配置
    pub async fn plugin_config<T: for<'de> Deserialize<'de>>(&self) -> Option<T> {
        self.config().await.get_plugin_config(&self.inner.plugin_id)
    }

    /// 宿主提供的键值存储
    pub fn store(&self) -> Arc<dyn KvStore> {
        self.inner.store.clone()
    }

    /// 按事件来源平台解析回复通道
    pub fn sender(&self, event: &Event) -> Result<AdapterSender, SenderError> {
        let platform = event.platform().ok_or(SenderError::MissingPlatform)?;
        let target = event.reply_target()?;
        let adapter = self
            .inner
            .adapters
            .get(platform)
            .cloned()
            .ok_or_else(|| SenderError::UnknownPlatform(platform.to_string()))?;
        Ok(AdapterSender::new(adapter, target))
    }
}

// ============================================================================
// 6. System Signals (系统信号)
// ============================================================================

/// 系统信号
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SystemSignal {
    /// 关闭运行时
    Shutdown,
}

// ============================================================================
// 7. Runtime Core (运行时核心)
// ============================================================================

/// 插件容器，包含插件实例和启用状态
#[derive(Clone)]
struct PluginSlot {
    plugin: Arc<dyn Plugin>,
    enabled: Arc<AtomicBool>,
}

/// 运行时内部状态 (用于并发共享)
struct BotInner {
    config: Arc<ConfigManager>,
    adapters: Arc<AdapterRegistry>,
    plugins: Arc<Vec<PluginSlot>>,
    store: Arc<dyn KvStore>,
    system_tx: broadcast::Sender<SystemSignal>,
    event_tx: mpsc::Sender<Event>,
}

/// 运行时构建器
pub struct BotBuilder {
    config_path: PathBuf,
    data_dir: PathBuf,
    adapters: Vec<Box<dyn Adapter>>,
    plugins: Vec<Box<dyn Plugin>>,
    store: Option<Arc<dyn KvStore>>,
}

impl BotBuilder {
    pub fn new() -> Self {
        Self {
            config_path: PathBuf::from("config.toml"),
            data_dir: PathBuf::from("data"),
            adapters: Vec::new(),
            plugins: Vec::new(),
            store: None,
        }
    }

    /// 设置配置文件路径
    pub fn config_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = path.as_ref().to_path_buf();
        self
    }

    /// 设置数据目录（默认键值存储位于 `<data_dir>/store.toml`）
    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.data_dir = path.as_ref().to_path_buf();
        self
    }

    /// 注册适配器
    pub fn adapter<A: Adapter + 'static>(mut self, adapter: A) -> Self {
        self.adapters.push(Box::new(adapter));
        self
    }

    /// 注册插件
    pub fn plugin<P: Plugin + 'static>(mut self, plugin: P) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    /// 替换默认的键值存储
    pub fn store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 构建并返回运行时实例
    pub fn build(self) -> BotResult<Bot> {
        Bot::from_builder(self)
    }
}

impl Default for BotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 运行时
pub struct Bot {
    inner: Arc<BotInner>,
    /// 事件接收端 (仅在主循环使用)
    event_rx: Option<mpsc::Receiver<Event>>,
}

impl Bot {
    /// 创建运行时构建器
    pub fn builder() -> BotBuilder {
        BotBuilder::new()
    }

    fn from_builder(builder: BotBuilder) -> BotResult<Self> {
        let (event_tx, event_rx) = mpsc::channel(1000);
        let (system_tx, _) = broadcast::channel(64);

        let config = Arc::new(ConfigManager::new(&builder.config_path));

        let mut adapters = AdapterRegistry::new();
        for adapter in builder.adapters {
            let platform = adapter.platform().to_string();
            if adapters.contains_key(&platform) {
                warn!(target: "Bot", "平台 {} 已注册适配器，忽略 {}", platform, adapter.id());
                continue;
            }
            adapters.insert(platform, Arc::from(adapter));
        }

        let mut raw_plugins = builder.plugins;
        raw_plugins.sort_by_key(|p| p.priority());
        let plugins = raw_plugins
            .into_iter()
            .map(|p| PluginSlot {
                plugin: Arc::from(p),
                enabled: Arc::new(AtomicBool::new(true)),
            })
            .collect();

        let store: Arc<dyn KvStore> = match builder.store {
            Some(store) => store,
            None => Arc::new(FileStore::open(builder.data_dir.join("store.toml"))?),
        };

        let inner = Arc::new(BotInner {
            config,
            adapters: Arc::new(adapters),
            plugins: Arc::new(plugins),
            store,
            system_tx,
            event_tx,
        });

        Ok(Self {
            inner,
            event_rx: Some(event_rx),
        })
    }

    /// 启动运行时，直到收到关闭信号或 Ctrl-C
    pub async fn run(mut self) -> BotResult<()> {
        info!(target: "Bot", "Tianqi Bot 正在启动...");

        self.inner.prepare_config().await?;
        self.inner.load_plugins().await;
        self.inner.start_adapters();

        info!(target: "Bot", "事件循环已启动，等待消息...");

        let mut event_rx = self.event_rx.take().ok_or("event receiver already taken")?;
        let mut system_rx = self.inner.system_tx.subscribe();

        loop {
            tokio::select! {
                Ok(signal) = system_rx.recv() => {
                    match signal {
                        SystemSignal::Shutdown => {
                            info!(target: "Bot", "收到关闭信号，正在停止...");
                            break;
                        }
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    info!(target: "Bot", "收到 Ctrl-C，正在停止...");
                    break;
                }

                maybe_event = event_rx.recv() => {
                    let Some(event) = maybe_event else {
                        warn!(target: "Bot", "事件通道已关闭");
                        break;
                    };
                    // 每个事件独立处理，慢请求不阻塞其他用户
                    let inner = self.inner.clone();
                    tokio::spawn(async move {
                        if let Err(e) = inner.process_event(event).await {
                            error!(target: "Bot", "事件处理错误: {}", e);
                        }
                    });
                }
            }
        }

        self.inner.shutdown().await;
        info!(target: "Bot", "运行时已停止");
        Ok(())
    }
}

impl BotInner {
    /// 加载配置并为缺少配置段的插件写入默认值
    async fn prepare_config(&self) -> BotResult<()> {
        let mut cfg = self.config.load().await?;
        let mut modified = false;

        for slot in self.plugins.iter() {
            let pid = slot.plugin.id();
            if !cfg.plugins.contains_key(pid)
                && let Some(def_cfg) = slot.plugin.default_config()
            {
                info!(target: "Bot", "初始化插件配置: {}", slot.plugin.name());
                cfg.plugins.insert(pid.to_string(), def_cfg);
                modified = true;
            }
        }

        if modified {
            self.config.save_atomic(&cfg).await?;
        }

        for slot in self.plugins.iter() {
            let enabled = cfg.is_plugin_enabled(slot.plugin.id());
            slot.enabled.store(enabled, Ordering::SeqCst);
        }

        Ok(())
    }

    async fn load_plugins(&self) {
        for slot in self.plugins.iter() {
            let plugin = &slot.plugin;
            if !slot.enabled.load(Ordering::SeqCst) {
                info!(target: "Bot", "插件 {} 已禁用", plugin.name());
                continue;
            }

            let ctx = PluginContext::new(plugin.id().to_string(), self);
            match plugin.on_load(&ctx).await {
                Ok(()) => info!(
                    target: "Bot",
                    "{} v{} 已加载: {}",
                    plugin.name(),
                    plugin.version(),
                    plugin.description()
                ),
                Err(e) => {
                    error!(target: "Bot", "插件 {} 初始化失败: {}", plugin.name(), e);
                    slot.enabled.store(false, Ordering::SeqCst);
                }
            }
        }
    }

    fn start_adapters(&self) {
        for (platform, adapter) in self.adapters.iter() {
            let adapter = adapter.clone();
            let ctx = AdapterContext {
                event_tx: self.event_tx.clone(),
                system_rx: self.system_tx.subscribe(),
                system_tx: self.system_tx.clone(),
            };

            info!(target: "Bot", "{} v{} ({}) 已启动", adapter.name(), adapter.version(), platform);
            tokio::spawn(async move {
                if let Err(e) = adapter.start(ctx).await {
                    error!(target: "Bot", "适配器 {} 运行错误: {}", adapter.id(), e);
                }
            });
        }
    }

    /// 处理单个事件：按优先级分发给启用的插件
    async fn process_event(&self, event: Event) -> BotResult<()> {
        for slot in self.plugins.iter() {
            if !slot.enabled.load(Ordering::SeqCst) {
                continue;
            }

            let ctx = PluginContext::new(slot.plugin.id().to_string(), self);
            match slot.plugin.on_event(&ctx, &event).await {
                Ok(EventResult::Stop) => break,
                Ok(EventResult::Continue) => continue,
                Err(e) => {
                    error!(target: "Bot", "插件 {} 处理事件时发生错误: {}", slot.plugin.name(), e);
                }
            }
        }

        Ok(())
    }

    async fn shutdown(&self) {
        let _ = self.system_tx.send(SystemSignal::Shutdown);

        for (platform, adapter) in self.adapters.iter() {
            if let Err(e) = adapter.stop().await {
                error!(target: "Bot", "停止适配器 {} 时发生错误: {}", platform, e);
            }
        }

        for slot in self.plugins.iter() {
            if !slot.enabled.load(Ordering::SeqCst) {
                continue;
            }
            let ctx = PluginContext::new(slot.plugin.id().to_string(), self);
            if let Err(e) = slot.plugin.on_unload(&ctx).await {
                error!(target: "Bot", "插件 {} 卸载失败: {}", slot.plugin.name(), e);
            }
        }
    }
}

// ============================================================================
// 8. Re-exports (重新导出)
// ============================================================================

pub mod prelude {
    //! 常用类型的预导入模块
    //!
    //! ```rust
    //! use tianqi_bot::prelude::*;
    //! ```

    pub use super::{Bot, BotBuilder, BotError, BotResult};

    pub use super::{
        Adapter, AdapterContext, AdapterSender, EventResult, Plugin, PluginContext, Sender,
        SenderError, SystemSignal, Target,
    };

    pub use super::{AppConfig, CoreConfig, build_config};

    pub use super::{Event, SelfInfo, detail_types, event_types};

    pub use super::store::{KvStore, MemoryStore};

    pub use async_trait::async_trait;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::WeatherPlugin;
    use crate::plugins::weather::provider::{CurrentWeather, Forecast, WeatherApi, WeatherError};
    use crate::plugins::weather::validator::{CityValidator, Validation};
    use std::sync::Mutex;

    type Outbox = Arc<Mutex<Vec<(Target, String)>>>;

    #[derive(Default)]
    struct RecordingAdapter {
        sent: Outbox,
    }

    #[async_trait]
    impl Adapter for RecordingAdapter {
        fn id(&self) -> &str {
            "recording"
        }
        fn name(&self) -> &str {
            "Recording Adapter"
        }
        fn platform(&self) -> &str {
            "qq"
        }
        async fn start(&self, _ctx: AdapterContext) -> BotResult<()> {
            Ok(())
        }
        async fn stop(&self) -> BotResult<()> {
            Ok(())
        }
        async fn send_text(&self, target: &Target, content: &str) -> BotResult<()> {
            self.sent
                .lock()
                .unwrap()
                .push((target.clone(), content.to_string()));
            Ok(())
        }
    }

    fn test_bot(dir: &Path) -> Bot {
        Bot::builder()
            .config_path(dir.join("config.toml"))
            .store(Arc::new(store::MemoryStore::new()))
            .adapter(RecordingAdapter::default())
            .build()
            .unwrap()
    }

    struct FakeApi;

    #[async_trait]
    impl WeatherApi for FakeApi {
        async fn today(&self, city: &str) -> Result<CurrentWeather, WeatherError> {
            Ok(CurrentWeather {
                city: city.to_string(),
                ..Default::default()
            })
        }
        async fn five_day(&self, city: &str) -> Result<Forecast, WeatherError> {
            Ok(Forecast {
                city: city.to_string(),
                forecast: Vec::new(),
            })
        }
    }

    struct OnlyBeijing;

    #[async_trait]
    impl CityValidator for OnlyBeijing {
        async fn validate(&self, city: &str) -> Validation {
            if city == "北京" {
                Validation::valid(city)
            } else {
                Validation::invalid("city not found")
            }
        }
    }

    fn weather_bot(dir: &Path) -> (Bot, Outbox) {
        let adapter = RecordingAdapter::default();
        let sent = adapter.sent.clone();
        let bot = Bot::builder()
            .config_path(dir.join("config.toml"))
            .store(Arc::new(store::MemoryStore::new()))
            .adapter(adapter)
            .plugin(WeatherPlugin::with_backends(
                Arc::new(FakeApi),
                Arc::new(OnlyBeijing),
            ))
            .build()
            .unwrap();
        (bot, sent)
    }

    #[test]
    fn event_deserializes_onebot_shape() {
        let json = r#"{
            "id": "e1",
            "type": "message",
            "detail_type": "group",
            "self": { "platform": "qq", "user_id": "10000" },
            "alt_message": "/天气 今日",
            "user_id": "42",
            "group_id": "7"
        }"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert!(event.is_message_event());
        assert!(!event.is_private());
        assert_eq!(event.platform(), Some("qq"));
        assert_eq!(event.reply_target(), Ok(Target::Group("7".to_string())));
    }

    #[test]
    fn reply_target_defaults_to_private() {
        let mut event = Event::private_message("qq", "42", "hi");
        event.detail_type.clear();
        assert_eq!(event.reply_target(), Ok(Target::User("42".to_string())));

        let mut group = Event::group_message("qq", "7", "42", "hi");
        group.group_id = None;
        assert_eq!(
            group.reply_target(),
            Err(SenderError::MissingRecipient("群组"))
        );
    }

    #[tokio::test]
    async fn sender_resolves_by_platform() {
        let dir = tempfile::tempdir().unwrap();
        let bot = test_bot(dir.path());
        let ctx = PluginContext::new("test".to_string(), &bot.inner);

        let event = Event::group_message("qq", "7", "42", "hi");
        let sender = ctx.sender(&event).unwrap();
        assert_eq!(sender.target(), &Target::Group("7".to_string()));
        sender.text("pong").await.unwrap();

        let unknown = Event::private_message("telegram", "42", "hi");
        assert_eq!(
            ctx.sender(&unknown).err(),
            Some(SenderError::UnknownPlatform("telegram".to_string()))
        );

        let mut missing = Event::private_message("qq", "42", "hi");
        missing.self_info.platform.clear();
        assert_eq!(ctx.sender(&missing).err(), Some(SenderError::MissingPlatform));
    }

    #[tokio::test]
    async fn config_manager_creates_and_updates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let manager = ConfigManager::new(&path);

        let cfg = manager.load().await.unwrap();
        assert_eq!(cfg.core.cmd_prefix, vec!["/".to_string()]);
        assert!(path.exists());

        manager
            .update(|c| c.core.cmd_prefix.push("#".to_string()))
            .await
            .unwrap();

        let reloaded = ConfigManager::new(&path).load().await.unwrap();
        assert_eq!(
            reloaded.core.cmd_prefix,
            vec!["/".to_string(), "#".to_string()]
        );
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn build_config_inserts_enabled_flag() {
        #[derive(Serialize)]
        struct Demo {
            level: i64,
        }
        let value = build_config(Demo { level: 3 });
        assert_eq!(value.get("enabled").and_then(|v| v.as_bool()), Some(true));

        let mut cfg = AppConfig::default();
        assert!(cfg.is_plugin_enabled("demo"));
        let mut table = toml::map::Map::new();
        table.insert("enabled".to_string(), toml::Value::Boolean(false));
        cfg.plugins
            .insert("demo".to_string(), toml::Value::Table(table));
        assert!(!cfg.is_plugin_enabled("demo"));
    }

    #[tokio::test]
    async fn weather_commands_flow_through_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let (bot, sent) = weather_bot(dir.path());
        bot.inner.prepare_config().await.unwrap();
        bot.inner.load_plugins().await;

        let written = std::fs::read_to_string(dir.path().join("config.toml")).unwrap();
        assert!(written.contains("[weather]"));
        assert!(written.contains("bind_window_secs = 300"));

        for event in [
            Event::private_message("qq", "42", "/天气 绑定 北京"),
            Event::group_message("qq", "7", "42", "天气 查绑"),
            Event::private_message("qq", "42", "今天天气真好"),
        ] {
            bot.inner.process_event(event).await.unwrap();
        }

        let sent = sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, Target::User("42".to_string()));
        assert!(sent[0].1.starts_with("成功绑定您的默认城市为: 北京"));
        assert_eq!(
            sent[1],
            (
                Target::Group("7".to_string()),
                "您当前绑定的城市为：北京".to_string()
            )
        );

        bot.inner.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_platform_gets_no_reply() {
        let dir = tempfile::tempdir().unwrap();
        let (bot, sent) = weather_bot(dir.path());
        bot.inner.prepare_config().await.unwrap();
        bot.inner.load_plugins().await;

        let event = Event::private_message("telegram", "42", "/天气 查绑");
        bot.inner.process_event(event).await.unwrap();
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn disabled_plugin_ignores_commands() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "[weather]\nenabled = false\n").unwrap();
        let (bot, sent) = weather_bot(dir.path());
        bot.inner.prepare_config().await.unwrap();
        bot.inner.load_plugins().await;

        let event = Event::private_message("qq", "42", "/天气 查绑");
        bot.inner.process_event(event).await.unwrap();
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_trigger_fails_plugin_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "[weather]\ntrigger = \"\"\n").unwrap();
        let (bot, sent) = weather_bot(dir.path());
        bot.inner.prepare_config().await.unwrap();
        bot.inner.load_plugins().await;
        assert!(!bot.inner.plugins[0].enabled.load(Ordering::SeqCst));

        for text in ["今天天气不错", "/天气 查绑"] {
            let event = Event::private_message("qq", "42", text);
            bot.inner.process_event(event).await.unwrap();
        }
        assert!(sent.lock().unwrap().is_empty());
    }
}
