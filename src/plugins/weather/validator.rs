use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::provider::WeatherApi;

/// 城市校验结果，失败原因统一放在 message 中
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub valid: bool,
    pub message: String,
}

impl Validation {
    pub fn valid(message: impl Into<String>) -> Self {
        Self {
            valid: true,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
        }
    }
}

/// 城市校验器。任何失败都折叠为 `valid == false`，不向外抛错。
#[async_trait]
pub trait CityValidator: Send + Sync {
    async fn validate(&self, city: &str) -> Validation;
}

/// 用实时天气接口查询一次，能查到即视为有效
pub struct LookupValidator {
    api: Arc<dyn WeatherApi>,
}

impl LookupValidator {
    pub fn new(api: Arc<dyn WeatherApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl CityValidator for LookupValidator {
    async fn validate(&self, city: &str) -> Validation {
        match self.api.today(city).await {
            Ok(current) => {
                let name = if current.city.is_empty() {
                    city
                } else {
                    current.city.as_str()
                };
                Validation::valid(format!("已识别城市：{}", name))
            }
            Err(e) => {
                debug!(target: "Weather", city, error = %e, "城市校验失败");
                Validation::invalid(e.to_string())
            }
        }
    }
}
