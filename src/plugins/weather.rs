//! 天气查询插件
//!
//! 指令（前缀取自 `core.cmd_prefix`，触发词默认为 "天气"）：
//!
//! ```text
//! /天气 今日 [城市]
//! /天气 五日 [城市]
//! /天气 绑定 城市
//! /天气 强制绑定 城市
//! /天气 解绑
//! /天气 查绑
//! ```
//!
//! 绑定的城市保存在宿主键值存储的 `weather:<用户ID>` 键下。

use std::sync::{Arc, OnceLock};

use tracing::{error, info, warn};

use crate::prelude::*;

pub mod command;
pub mod config;
pub mod provider;
pub mod reply;
pub mod service;
pub mod tracker;
pub mod validator;

use config::PluginConfig;
use provider::{HttpWeatherApi, WeatherApi};
use service::WeatherService;
use validator::{CityValidator, LookupValidator};

pub struct WeatherPlugin {
    backends: Option<(Arc<dyn WeatherApi>, Arc<dyn CityValidator>)>,
    service: OnceLock<WeatherService>,
}

impl WeatherPlugin {
    /// 加载时按配置创建 HTTP 接口
    pub fn new() -> Self {
        Self {
            backends: None,
            service: OnceLock::new(),
        }
    }

    /// 使用指定的接口与校验器
    pub fn with_backends(api: Arc<dyn WeatherApi>, validator: Arc<dyn CityValidator>) -> Self {
        Self {
            backends: Some((api, validator)),
            service: OnceLock::new(),
        }
    }
}

impl Default for WeatherPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for WeatherPlugin {
    fn id(&self) -> &str {
        "weather"
    }

    fn name(&self) -> &str {
        "Weather Plugin"
    }

    fn description(&self) -> &str {
        "天气查询与默认城市绑定"
    }

    fn default_config(&self) -> Option<toml::Value> {
        Some(build_config(PluginConfig::default()))
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn on_load(&self, ctx: &PluginContext) -> BotResult<()> {
        let config: PluginConfig = ctx.plugin_config().await.unwrap_or_default();
        config.validate()?;

        let (api, validator) = match &self.backends {
            Some((api, validator)) => (api.clone(), validator.clone()),
            None => {
                let api: Arc<dyn WeatherApi> = Arc::new(HttpWeatherApi::new(&config)?);
                let validator: Arc<dyn CityValidator> =
                    Arc::new(LookupValidator::new(api.clone()));
                (api, validator)
            }
        };

        let service = WeatherService::new(ctx.store(), validator, api, config.bind_window());
        self.service
            .set(service)
            .map_err(|_| "weather plugin loaded twice")?;

        info!(
            target: "Weather",
            trigger = %config.trigger,
            bind_window_secs = config.bind_window_secs,
            "天气插件已就绪"
        );
        Ok(())
    }

    async fn on_unload(&self, _ctx: &PluginContext) -> BotResult<()> {
        if let Some(service) = self.service.get() {
            service.shutdown().await;
        }
        Ok(())
    }

    async fn on_event(&self, ctx: &PluginContext, event: &Event) -> BotResult<EventResult> {
        if !event.is_message_event() {
            return Ok(EventResult::Continue);
        }
        let Some(text) = event.text() else {
            return Ok(EventResult::Continue);
        };

        let core = ctx.config().await.core;
        let config: PluginConfig = ctx.plugin_config().await.unwrap_or_default();
        let Some(command) = command::parse(text, &core.cmd_prefix, &config.trigger) else {
            return Ok(EventResult::Continue);
        };

        let Some(service) = self.service.get() else {
            warn!(target: "Weather", "插件尚未初始化，忽略指令");
            return Ok(EventResult::Continue);
        };

        let Some(user_id) = event.sender_id() else {
            warn!(target: "Weather", event_id = %event.id, "消息缺少发送者，无法处理");
            return Ok(EventResult::Stop);
        };

        let sender: Arc<dyn Sender> = match ctx.sender(event) {
            Ok(sender) => Arc::new(sender),
            Err(e) => {
                warn!(target: "Weather", event_id = %event.id, "无法获取回复通道: {}", e);
                return Ok(EventResult::Stop);
            }
        };

        info!(
            target: "Weather",
            user_id,
            platform = event.platform().unwrap_or_default(),
            ?command,
            "收到天气指令"
        );

        let is_binding = command.is_binding();
        let response = match service.handle(user_id, command, sender.clone()).await {
            Ok(response) => response,
            Err(e) => {
                error!(target: "Weather", user_id, "指令处理失败: {:#}", e);
                if is_binding {
                    reply::bind_failed(&e)
                } else {
                    reply::internal_error(&e)
                }
            }
        };

        sender.text(&response).await?;
        Ok(EventResult::Stop)
    }
}
