use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PluginConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 触发词，例如 "/天气 今日" 中的 "天气"
    #[serde(default = "default_trigger")]
    pub trigger: String,
    /// 实时天气接口，同时用于城市校验
    #[serde(default = "default_today_api")]
    pub today_api: String,
    /// 五日预报接口
    #[serde(default = "default_forecast_api")]
    pub forecast_api: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// 校验失败后允许强制绑定的时间窗口
    #[serde(default = "default_bind_window")]
    pub bind_window_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_trigger() -> String {
    "天气".to_string()
}
fn default_today_api() -> String {
    "https://api.52vmy.cn/api/query/tian".to_string()
}
fn default_forecast_api() -> String {
    "https://api.yyy001.com/api/weather".to_string()
}
fn default_request_timeout() -> u64 {
    10
}
fn default_bind_window() -> u64 {
    300
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger: default_trigger(),
            today_api: default_today_api(),
            forecast_api: default_forecast_api(),
            request_timeout_secs: default_request_timeout(),
            bind_window_secs: default_bind_window(),
        }
    }
}

impl PluginConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn bind_window(&self) -> Duration {
        Duration::from_secs(self.bind_window_secs)
    }

    /// 加载时检查配置是否可用
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trigger.trim().is_empty() {
            return Err(ConfigError::EmptyTrigger);
        }
        if self.bind_window_secs == 0 {
            return Err(ConfigError::ZeroBindWindow);
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("weather.trigger 不能为空")]
    EmptyTrigger,
    #[error("weather.bind_window_secs 必须大于 0")]
    ZeroBindWindow,
}
