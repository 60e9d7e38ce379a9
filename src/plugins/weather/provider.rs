//! 第三方天气接口：实时天气与五日预报。

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::config::PluginConfig;

#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("HTTP 状态码 {0}")]
    Status(u16),
    #[error("接口返回错误 {code}: {message}")]
    Api { code: String, message: String },
    #[error("请求失败: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("数据解析失败: {0}")]
    Decode(#[from] serde_json::Error),
}

/// 实时天气
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentWeather {
    #[serde(default, deserialize_with = "text")]
    pub city: String,
    #[serde(default, deserialize_with = "text")]
    pub city_english: String,
    #[serde(default, deserialize_with = "text")]
    pub weather: String,
    #[serde(default, deserialize_with = "text")]
    pub weather_english: String,
    #[serde(default, deserialize_with = "text")]
    pub wind: String,
    #[serde(default, deserialize_with = "text")]
    pub wind_speed: String,
    #[serde(default, deserialize_with = "text")]
    pub temp: String,
    #[serde(default, deserialize_with = "text")]
    pub humidity: String,
    #[serde(default, deserialize_with = "text")]
    pub pressure: String,
    #[serde(default, deserialize_with = "text")]
    pub air: String,
    #[serde(default, rename = "air_pm25", deserialize_with = "text")]
    pub air_pm25: String,
    #[serde(default, deserialize_with = "text")]
    pub date: String,
    #[serde(default, deserialize_with = "text")]
    pub time: String,
}

/// 五日预报
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Forecast {
    #[serde(default, deserialize_with = "text")]
    pub city: String,
    #[serde(default)]
    pub forecast: Vec<ForecastDay>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastDay {
    #[serde(default, deserialize_with = "text")]
    pub date: String,
    #[serde(default, deserialize_with = "text")]
    pub temperature: String,
    #[serde(default, deserialize_with = "text")]
    pub day_weather: String,
    #[serde(default, deserialize_with = "text")]
    pub night_weather: String,
    #[serde(default, deserialize_with = "text")]
    pub wind_day: String,
    #[serde(default, deserialize_with = "text")]
    pub wind_night: String,
    #[serde(default, deserialize_with = "text")]
    pub humidity: String,
    #[serde(default, deserialize_with = "text")]
    pub air_quality: String,
}

/// 接口字段可能是字符串也可能是数字，统一按文本展示
fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// 两个接口共用的外层结构：`code` 为 200 表示成功
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: Value,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Value,
}

impl Envelope {
    fn is_success(&self) -> bool {
        match &self.code {
            Value::Number(n) => n.as_i64() == Some(200),
            Value::String(s) => s.trim() == "200",
            _ => false,
        }
    }

    fn into_data(self) -> Result<Value, WeatherError> {
        if self.is_success() {
            return Ok(self.data);
        }
        let code = match self.code {
            Value::String(s) => s,
            other => other.to_string(),
        };
        Err(WeatherError::Api {
            code,
            message: self.text.or(self.msg).unwrap_or_default(),
        })
    }
}

#[derive(Deserialize)]
struct TodayData {
    current: CurrentWeather,
}

#[derive(Deserialize)]
struct ForecastData {
    moji: MojiData,
}

#[derive(Deserialize)]
struct MojiData {
    data: Forecast,
}

pub(crate) fn decode_today(body: &[u8]) -> Result<CurrentWeather, WeatherError> {
    let data = serde_json::from_slice::<Envelope>(body)?.into_data()?;
    Ok(serde_json::from_value::<TodayData>(data)?.current)
}

pub(crate) fn decode_forecast(body: &[u8]) -> Result<Forecast, WeatherError> {
    let data = serde_json::from_slice::<Envelope>(body)?.into_data()?;
    Ok(serde_json::from_value::<ForecastData>(data)?.moji.data)
}

#[async_trait]
pub trait WeatherApi: Send + Sync {
    async fn today(&self, city: &str) -> Result<CurrentWeather, WeatherError>;
    async fn five_day(&self, city: &str) -> Result<Forecast, WeatherError>;
}

/// 基于 reqwest 的接口实现
pub struct HttpWeatherApi {
    client: Client,
    today_url: String,
    forecast_url: String,
}

impl HttpWeatherApi {
    pub fn new(config: &PluginConfig) -> Result<Self, WeatherError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            today_url: config.today_api.clone(),
            forecast_url: config.forecast_api.clone(),
        })
    }

    async fn fetch(&self, url: &str, param: &str, city: &str) -> Result<Vec<u8>, WeatherError> {
        let resp = self
            .client
            .get(url)
            .query(&[(param, city)])
            .send()
            .await?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(WeatherError::Status(status.as_u16()));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

#[async_trait]
impl WeatherApi for HttpWeatherApi {
    async fn today(&self, city: &str) -> Result<CurrentWeather, WeatherError> {
        let body = self.fetch(&self.today_url, "city", city).await?;
        decode_today(&body)
    }

    async fn five_day(&self, city: &str) -> Result<Forecast, WeatherError> {
        let body = self.fetch(&self.forecast_url, "msg", city).await?;
        decode_forecast(&body)
    }
}
